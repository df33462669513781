//! Per-session annotation state: one record per dataset example, addressed by
//! its dense position in the dataset.

use shared::domain::{Example, ImageBytes};
use thiserror::Error;

pub mod export;

pub use export::{
    encode_dataset_parquet, save_captions_csv, save_dataset_parquet, write_captions_csv,
    ExportError, CAPTIONS_CSV_FILE_NAME, DATASET_PARQUET_FILE_NAME,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("record index {index} is out of range (store holds {len} records)")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Borrowed view of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    pub index: usize,
    pub image: &'a [u8],
    pub text: &'a str,
    pub modified: bool,
}

/// One row of the export projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRow<'a> {
    pub index: usize,
    pub image: &'a [u8],
    pub text: &'a str,
}

/// Images and original captions are fixed at load time; only the current
/// caption and the modified flag change afterwards.
#[derive(Debug, Clone, Default)]
pub struct AnnotationStore {
    images: Vec<ImageBytes>,
    original_texts: Vec<String>,
    texts: Vec<String>,
    modified: Vec<bool>,
}

impl AnnotationStore {
    /// Builds a store from a fallible sequence of examples, stopping at the
    /// first error the source yields.
    pub fn load<I, E>(examples: I) -> Result<Self, E>
    where
        I: IntoIterator<Item = Result<Example, E>>,
    {
        let mut store = Self::default();
        for example in examples {
            store.push(example?);
        }
        Ok(store)
    }

    pub fn from_examples(examples: impl IntoIterator<Item = Example>) -> Self {
        let mut store = Self::default();
        for example in examples {
            store.push(example);
        }
        store
    }

    fn push(&mut self, example: Example) {
        self.images.push(example.image);
        self.original_texts.push(example.text.clone());
        self.texts.push(example.text);
        self.modified.push(false);
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    fn check_index(&self, index: usize) -> Result<(), StoreError> {
        if index < self.len() {
            Ok(())
        } else {
            Err(StoreError::IndexOutOfRange {
                index,
                len: self.len(),
            })
        }
    }

    pub fn get(&self, index: usize) -> Result<Record<'_>, StoreError> {
        self.check_index(index)?;
        Ok(Record {
            index,
            image: &self.images[index],
            text: &self.texts[index],
            modified: self.modified[index],
        })
    }

    /// Shared handle to the image bytes, for handing out beyond the store's borrow.
    pub fn image(&self, index: usize) -> Result<ImageBytes, StoreError> {
        self.check_index(index)?;
        Ok(self.images[index].clone())
    }

    pub fn original_text(&self, index: usize) -> Result<&str, StoreError> {
        self.check_index(index)?;
        Ok(&self.original_texts[index])
    }

    /// Replaces the caption at `index` when `new_text` differs from the
    /// current one and returns whether it did. Once set, the modified flag
    /// stays set, even if the caption is later edited back to the original.
    pub fn update(&mut self, index: usize, new_text: &str) -> Result<bool, StoreError> {
        self.check_index(index)?;
        if self.texts[index] == new_text {
            return Ok(false);
        }
        self.texts[index] = new_text.to_string();
        self.modified[index] = true;
        Ok(true)
    }

    pub fn count_modified(&self) -> usize {
        self.modified.iter().filter(|modified| **modified).count()
    }

    pub fn to_table(&self) -> Vec<TableRow<'_>> {
        self.images
            .iter()
            .zip(&self.texts)
            .enumerate()
            .map(|(index, (image, text))| TableRow {
                index,
                image,
                text,
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
