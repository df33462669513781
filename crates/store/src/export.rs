//! File encodings of the store's export projection.
//!
//! The CSV variant carries captions only (`text,index`). The Parquet variant
//! carries the full `image,text,index` projection in the layout dataset hubs
//! read as an image dataset: `image` is a `{bytes, path}` struct and the
//! column types are declared under the `huggingface` schema metadata key.

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use arrow_array::{ArrayRef, BinaryArray, Int64Array, RecordBatch, StringArray, StructArray};
use arrow_schema::{ArrowError, DataType, Field, Fields, Schema};
use parquet::{arrow::ArrowWriter, errors::ParquetError, file::properties::WriterProperties};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::AnnotationStore;

pub const CAPTIONS_CSV_FILE_NAME: &str = "all_captions.csv";
pub const DATASET_PARQUET_FILE_NAME: &str = "modified_dataset.parquet";

const HUGGINGFACE_METADATA_KEY: &str = "huggingface";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("{0}")]
    Validation(&'static str),
    #[error("failed to create output directory '{}': {source}", .path.display())]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to write '{}': {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to encode csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to encode parquet: {0}")]
    Parquet(#[from] ParquetError),
    #[error("failed to build record batch: {0}")]
    Arrow(#[from] ArrowError),
}

impl ExportError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

#[derive(Serialize)]
struct CaptionRow<'a> {
    text: &'a str,
    index: usize,
}

pub fn write_captions_csv<W: io::Write>(
    store: &AnnotationStore,
    writer: W,
) -> Result<(), ExportError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(writer);
    writer.write_record(["text", "index"])?;
    for row in store.to_table() {
        writer.serialize(CaptionRow {
            text: row.text,
            index: row.index,
        })?;
    }
    writer.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Writes `<output_dir>/all_captions.csv`, creating the directory if needed.
pub fn save_captions_csv(
    store: &AnnotationStore,
    output_dir: &str,
) -> Result<PathBuf, ExportError> {
    let dir = validate_output_dir(output_dir)?;
    let mut encoded = Vec::new();
    write_captions_csv(store, &mut encoded)?;

    let path = write_output(&dir, CAPTIONS_CSV_FILE_NAME, &encoded)?;
    info!(path = %path.display(), rows = store.len(), "saved caption csv");
    Ok(path)
}

pub fn encode_dataset_parquet(store: &AnnotationStore) -> Result<Vec<u8>, ExportError> {
    let rows = store.to_table();

    let image_fields = Fields::from(vec![
        Field::new("bytes", DataType::Binary, true),
        Field::new("path", DataType::Utf8, true),
    ]);
    let image_bytes: ArrayRef = Arc::new(BinaryArray::from_iter_values(
        rows.iter().map(|row| row.image),
    ));
    let image_paths: ArrayRef = Arc::new(StringArray::new_null(rows.len()));
    let images = StructArray::try_new(image_fields.clone(), vec![image_bytes, image_paths], None)?;
    let texts = StringArray::from_iter_values(rows.iter().map(|row| row.text));
    let indices = Int64Array::from_iter_values(rows.iter().map(|row| row.index as i64));

    let schema = Arc::new(dataset_schema(image_fields));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(images), Arc::new(texts), Arc::new(indices)],
    )?;

    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(Vec::new(), schema, Some(props))?;
    writer.write(&batch)?;
    Ok(writer.into_inner()?)
}

/// Writes `<output_dir>/modified_dataset.parquet`, creating the directory if needed.
pub fn save_dataset_parquet(
    store: &AnnotationStore,
    output_dir: &str,
) -> Result<PathBuf, ExportError> {
    let dir = validate_output_dir(output_dir)?;
    let encoded = encode_dataset_parquet(store)?;

    let path = write_output(&dir, DATASET_PARQUET_FILE_NAME, &encoded)?;
    info!(path = %path.display(), rows = store.len(), "saved dataset parquet");
    Ok(path)
}

fn dataset_schema(image_fields: Fields) -> Schema {
    let features = serde_json::json!({
        "info": {
            "features": {
                "image": { "_type": "Image" },
                "text": { "dtype": "string", "_type": "Value" },
                "index": { "dtype": "int64", "_type": "Value" },
            }
        }
    });
    Schema::new_with_metadata(
        vec![
            Field::new("image", DataType::Struct(image_fields), true),
            Field::new("text", DataType::Utf8, false),
            Field::new("index", DataType::Int64, false),
        ],
        HashMap::from([(HUGGINGFACE_METADATA_KEY.to_string(), features.to_string())]),
    )
}

fn validate_output_dir(output_dir: &str) -> Result<PathBuf, ExportError> {
    let output_dir = output_dir.trim();
    if output_dir.is_empty() {
        return Err(ExportError::Validation("output directory is required"));
    }
    Ok(PathBuf::from(output_dir))
}

fn write_output(dir: &Path, file_name: &str, contents: &[u8]) -> Result<PathBuf, ExportError> {
    fs::create_dir_all(dir).map_err(|source| ExportError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dir.join(file_name);
    fs::write(&path, contents).map_err(|source| ExportError::Write {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

#[cfg(test)]
#[path = "tests/export_tests.rs"]
mod tests;
