use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use arrow_array::{cast::AsArray, Array, ArrayRef, RecordBatch};
use arrow_schema::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use shared::domain::{Example, ImageBytes};
use tracing::debug;
use walkdir::WalkDir;

use crate::{stays_inside, DatasetError, DatasetSource, ExampleIter};

// dataset root, `data/`, and `data/<split>/`
const SHARD_SEARCH_DEPTH: usize = 3;

#[derive(Debug, Clone)]
pub struct ParquetSource {
    shards: Vec<PathBuf>,
}

impl ParquetSource {
    pub fn new(shards: Vec<PathBuf>) -> Self {
        Self { shards }
    }
}

impl DatasetSource for ParquetSource {
    fn describe(&self) -> String {
        format!("parquet ({} shards)", self.shards.len())
    }

    fn examples(&self) -> Result<ExampleIter<'_>, DatasetError> {
        Ok(Box::new(self.shards.iter().flat_map(|shard| {
            match read_shard(shard) {
                Ok(examples) => examples.into_iter().map(Ok).collect::<Vec<_>>(),
                Err(err) => vec![Err(err)],
            }
        })))
    }
}

pub(crate) fn is_parquet(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("parquet"))
}

/// Lists Parquet files under `root` in path order. When some of them belong
/// to `split` (file name starts with it, or they sit in a directory named
/// after it) only those are kept.
pub(crate) fn discover_shards(root: &Path, split: &str) -> Result<Vec<PathBuf>, DatasetError> {
    let mut shards = Vec::new();
    for entry in WalkDir::new(root)
        .max_depth(SHARD_SEARCH_DEPTH)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|err| DatasetError::Io {
            path: err
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| root.to_path_buf()),
            source: err.into(),
        })?;
        if entry.file_type().is_file() && is_parquet(entry.path()) {
            shards.push(entry.into_path());
        }
    }
    shards.sort();

    let split = split.trim();
    if split.is_empty() {
        return Ok(shards);
    }
    let in_split: Vec<PathBuf> = shards
        .iter()
        .filter(|shard| belongs_to_split(shard, split))
        .cloned()
        .collect();
    Ok(if in_split.is_empty() { shards } else { in_split })
}

fn belongs_to_split(shard: &Path, split: &str) -> bool {
    let file_matches = shard
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(split));
    let dir_matches = shard
        .parent()
        .and_then(|parent| parent.file_name())
        .and_then(|name| name.to_str())
        .is_some_and(|name| name == split);
    file_matches || dir_matches
}

fn read_shard(path: &Path) -> Result<Vec<Example>, DatasetError> {
    let file = File::open(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .and_then(|builder| builder.build())
        .map_err(|err| parquet_error(path, err))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut examples = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|err| parquet_error(path, err))?;
        append_batch(&batch, path, base_dir, &mut examples)?;
    }
    debug!(shard = %path.display(), rows = examples.len(), "read parquet shard");
    Ok(examples)
}

fn append_batch(
    batch: &RecordBatch,
    shard: &Path,
    base_dir: &Path,
    examples: &mut Vec<Example>,
) -> Result<(), DatasetError> {
    let image = column(batch, shard, "image")?;
    let text = column(batch, shard, "text")?;
    if !matches!(text.data_type(), DataType::Utf8 | DataType::LargeUtf8) {
        return Err(schema_error(
            shard,
            format!("`text` column has type {}, expected a string", text.data_type()),
        ));
    }

    let (image_bytes, image_paths): (Option<&ArrayRef>, Option<&ArrayRef>) =
        match image.data_type() {
            DataType::Binary | DataType::LargeBinary => (Some(image), None),
            DataType::Struct(_) => {
                let image = image.as_struct();
                (image.column_by_name("bytes"), image.column_by_name("path"))
            }
            other => {
                return Err(schema_error(
                    shard,
                    format!("`image` column has type {other}, expected binary or {{bytes, path}}"),
                ))
            }
        };

    for row in 0..batch.num_rows() {
        if image.is_null(row) {
            return Err(schema_error(shard, format!("row {row} has no image")));
        }

        let bytes = match image_bytes.and_then(|values| binary_at(values, row)) {
            Some(bytes) => ImageBytes::from(bytes),
            None => {
                let relative = image_paths
                    .and_then(|values| string_at(values, row))
                    .ok_or_else(|| {
                        schema_error(shard, format!("row {row} has neither image bytes nor path"))
                    })?;
                if !stays_inside(Path::new(relative)) {
                    return Err(schema_error(
                        shard,
                        format!("row {row} image path '{relative}' must stay inside the shard directory"),
                    ));
                }
                let path = base_dir.join(relative);
                let bytes = fs::read(&path).map_err(|source| DatasetError::Io { path, source })?;
                ImageBytes::from(bytes)
            }
        };
        let caption = string_at(text, row).unwrap_or_else(|| {
            debug!(shard = %shard.display(), row, "null caption read as empty text");
            ""
        });
        examples.push(Example::new(bytes, caption));
    }
    Ok(())
}

fn column<'a>(batch: &'a RecordBatch, shard: &Path, name: &str) -> Result<&'a ArrayRef, DatasetError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| schema_error(shard, format!("missing `{name}` column")))
}

fn binary_at(values: &ArrayRef, row: usize) -> Option<&[u8]> {
    if values.is_null(row) {
        return None;
    }
    if let Some(values) = values.as_binary_opt::<i32>() {
        return Some(values.value(row));
    }
    values.as_binary_opt::<i64>().map(|values| values.value(row))
}

fn string_at(values: &ArrayRef, row: usize) -> Option<&str> {
    if values.is_null(row) {
        return None;
    }
    if let Some(values) = values.as_string_opt::<i32>() {
        return Some(values.value(row));
    }
    values.as_string_opt::<i64>().map(|values| values.value(row))
}

fn parquet_error(path: &Path, err: impl std::fmt::Display) -> DatasetError {
    DatasetError::Parquet {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn schema_error(path: &Path, message: String) -> DatasetError {
    DatasetError::Schema {
        path: path.to_path_buf(),
        message,
    }
}
