use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use shared::domain::{Example, ImageBytes};
use tracing::debug;

use crate::{stays_inside, DatasetError, DatasetSource, ExampleIter};

const JSONL_METADATA: &str = "metadata.jsonl";
const CSV_METADATA: &str = "metadata.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetadataFormat {
    Jsonl,
    Csv,
}

#[derive(Debug, Deserialize)]
struct MetadataEntry {
    file_name: String,
    text: String,
}

/// A directory of image files plus one metadata file mapping `file_name`
/// (relative to the directory) to its `text` caption.
#[derive(Debug, Clone)]
pub struct ImageFolderSource {
    root: PathBuf,
    metadata: PathBuf,
    format: MetadataFormat,
}

impl ImageFolderSource {
    /// Returns a source when `root` holds `metadata.jsonl` or, failing that,
    /// `metadata.csv`.
    pub fn detect(root: &Path) -> Option<Self> {
        [
            (JSONL_METADATA, MetadataFormat::Jsonl),
            (CSV_METADATA, MetadataFormat::Csv),
        ]
        .into_iter()
        .map(|(name, format)| (root.join(name), format))
        .find(|(metadata, _)| metadata.is_file())
        .map(|(metadata, format)| Self {
            root: root.to_path_buf(),
            metadata,
            format,
        })
    }

    fn read_entries(&self) -> Result<Vec<MetadataEntry>, DatasetError> {
        match self.format {
            MetadataFormat::Jsonl => read_jsonl(&self.metadata),
            MetadataFormat::Csv => read_csv(&self.metadata),
        }
    }

    fn load_image(&self, record: usize, file_name: &str) -> Result<ImageBytes, DatasetError> {
        let relative = Path::new(file_name);
        if !stays_inside(relative) {
            return Err(DatasetError::Metadata {
                path: self.metadata.clone(),
                record,
                message: format!("file_name '{file_name}' must be a path inside the dataset folder"),
            });
        }

        let path = self.root.join(relative);
        let bytes = fs::read(&path).map_err(|source| DatasetError::Io { path, source })?;
        Ok(ImageBytes::from(bytes))
    }
}

impl DatasetSource for ImageFolderSource {
    fn describe(&self) -> String {
        let name = match self.format {
            MetadataFormat::Jsonl => JSONL_METADATA,
            MetadataFormat::Csv => CSV_METADATA,
        };
        format!("image folder ({name})")
    }

    fn examples(&self) -> Result<ExampleIter<'_>, DatasetError> {
        let entries = self.read_entries()?;
        debug!(root = %self.root.display(), entries = entries.len(), "read image folder metadata");
        Ok(Box::new(entries.into_iter().enumerate().map(
            move |(position, entry)| {
                let image = self.load_image(position + 1, &entry.file_name)?;
                Ok(Example::new(image, entry.text))
            },
        )))
    }
}

fn read_jsonl(path: &Path) -> Result<Vec<MetadataEntry>, DatasetError> {
    let raw = fs::read_to_string(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(line_no, line)| {
            serde_json::from_str::<MetadataEntry>(line).map_err(|err| DatasetError::Metadata {
                path: path.to_path_buf(),
                record: line_no + 1,
                message: err.to_string(),
            })
        })
        .collect()
}

fn read_csv(path: &Path) -> Result<Vec<MetadataEntry>, DatasetError> {
    let mut reader = csv::Reader::from_path(path).map_err(|err| DatasetError::Io {
        path: path.to_path_buf(),
        source: err.into(),
    })?;

    reader
        .deserialize::<MetadataEntry>()
        .enumerate()
        .map(|(row, entry)| {
            entry.map_err(|err| DatasetError::Metadata {
                path: path.to_path_buf(),
                record: row + 1,
                message: err.to_string(),
            })
        })
        .collect()
}
