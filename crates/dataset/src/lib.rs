//! Dataset sources that feed the annotation store.
//!
//! Two on-disk layouts are understood, both as published on dataset hubs:
//! an image folder described by `metadata.jsonl` / `metadata.csv`, and
//! Parquet shards with an `image` column (`{bytes, path}` struct or raw
//! binary) and a `text` column.

use std::path::{Component, Path, PathBuf};

use shared::domain::Example;
use thiserror::Error;
use tracing::info;

mod image_folder;
mod parquet_shards;

pub use image_folder::ImageFolderSource;
pub use parquet_shards::ParquetSource;

pub type ExampleIter<'a> = Box<dyn Iterator<Item = Result<Example, DatasetError>> + 'a>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("dataset path '{}' does not exist", .0.display())]
    NotFound(PathBuf),
    #[error("no metadata.jsonl, metadata.csv or parquet shards found at '{}'", .0.display())]
    UnsupportedLayout(PathBuf),
    #[error("failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid metadata in '{}' at record {record}: {message}", .path.display())]
    Metadata {
        path: PathBuf,
        record: usize,
        message: String,
    },
    #[error("failed to decode parquet shard '{}': {message}", .path.display())]
    Parquet { path: PathBuf, message: String },
    #[error("unsupported schema in '{}': {message}", .path.display())]
    Schema { path: PathBuf, message: String },
}

pub trait DatasetSource {
    fn describe(&self) -> String;

    /// Yields examples in dataset order. Sources read lazily where they can,
    /// so per-example failures surface while iterating.
    fn examples(&self) -> Result<ExampleIter<'_>, DatasetError>;
}

/// Picks a source for `path`: a single `.parquet` file, an image folder with
/// a metadata file, or a directory of Parquet shards for `split`.
pub fn open(path: impl AsRef<Path>, split: &str) -> Result<Box<dyn DatasetSource>, DatasetError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(DatasetError::NotFound(path.to_path_buf()));
    }

    let source: Box<dyn DatasetSource> = if path.is_file() {
        if !parquet_shards::is_parquet(path) {
            return Err(DatasetError::UnsupportedLayout(path.to_path_buf()));
        }
        Box::new(ParquetSource::new(vec![path.to_path_buf()]))
    } else if let Some(folder) = ImageFolderSource::detect(path) {
        Box::new(folder)
    } else {
        let shards = parquet_shards::discover_shards(path, split)?;
        if shards.is_empty() {
            return Err(DatasetError::UnsupportedLayout(path.to_path_buf()));
        }
        Box::new(ParquetSource::new(shards))
    };

    info!(path = %path.display(), source = %source.describe(), "opened dataset");
    Ok(source)
}

/// True for a non-empty relative path that never leaves the directory it is
/// joined onto.
pub(crate) fn stays_inside(relative: &Path) -> bool {
    !relative.as_os_str().is_empty()
        && relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
