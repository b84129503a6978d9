use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::RowRecord;
use crate::schema::{RowVariant, is_sequence_field};

#[derive(Debug, Error, PartialEq)]
pub enum GridError {
    #[error("row index {index} out of range (rows: {len})")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Ordered rows of one tracker table. The store owns the sequence numbers:
/// after every mutation they read `1..=len` in display order.
///
/// The store does no I/O. Recording history and scheduling persistence is
/// left to whoever drives it (see `controller::GridController`).
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct GridStore {
    variant: RowVariant,
    rows: Vec<RowRecord>,
}

impl GridStore {
    pub fn new(variant: RowVariant) -> Self {
        GridStore {
            variant,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(variant: RowVariant, rows: Vec<RowRecord>) -> Self {
        let mut store = GridStore { variant, rows };
        store.normalize_all();
        store
    }

    pub fn variant(&self) -> RowVariant {
        self.variant
    }

    pub fn all(&self) -> &[RowRecord] {
        &self.rows
    }

    pub fn get(&self, index: usize) -> Option<&RowRecord> {
        self.rows.get(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Insert at `at` (or append). Returns the index the row landed on.
    pub fn insert(&mut self, record: RowRecord, at: Option<usize>) -> Result<usize, GridError> {
        let index = at.unwrap_or(self.rows.len());
        if index > self.rows.len() {
            return Err(GridError::IndexOutOfRange {
                index,
                len: self.rows.len(),
            });
        }
        let mut record = record;
        self.fill_missing(&mut record);
        self.rows.insert(index, record);
        self.renumber();
        Ok(index)
    }

    /// Merge `patch` into the row. Unknown field names are resolved through the
    /// schema aliases and dropped if they do not match; `sno` is ignored.
    pub fn update<K, V, I>(&mut self, index: usize, patch: I) -> Result<(), GridError>
    where
        K: AsRef<str>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let len = self.rows.len();
        let schema = self.variant.schema();
        let row = self
            .rows
            .get_mut(index)
            .ok_or(GridError::IndexOutOfRange { index, len })?;

        for (key, value) in patch {
            let key = key.as_ref();
            if is_sequence_field(key) {
                continue;
            }
            if let Some(name) = schema.resolve(key) {
                row.set(name, value);
            }
        }
        self.renumber();
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<RowRecord, GridError> {
        if index >= self.rows.len() {
            return Err(GridError::IndexOutOfRange {
                index,
                len: self.rows.len(),
            });
        }
        let removed = self.rows.remove(index);
        self.renumber();
        Ok(removed)
    }

    /// Remove several rows at once (bulk delete of a selection). Duplicate and
    /// out-of-range indices are ignored. Returns how many rows were removed.
    pub fn remove_many(&mut self, indices: &[usize]) -> usize {
        let mut sorted: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|i| *i < self.rows.len())
            .collect();
        sorted.sort_unstable();
        sorted.dedup();
        for index in sorted.iter().rev() {
            self.rows.remove(*index);
        }
        self.renumber();
        sorted.len()
    }

    /// Swap in a whole new state (load, undo, redo).
    pub fn replace(&mut self, rows: Vec<RowRecord>) {
        self.rows = rows;
        self.normalize_all();
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut RowRecord, GridError> {
        let len = self.rows.len();
        self.rows
            .get_mut(index)
            .ok_or(GridError::IndexOutOfRange { index, len })
    }

    /// Indices of rows matching `query` across their visible fields.
    pub fn search(&self, query: &str) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.matches(query))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn into_rows(self) -> Vec<RowRecord> {
        self.rows
    }

    fn normalize_all(&mut self) {
        let variant = self.variant;
        for row in self.rows.iter_mut() {
            fill_missing(variant, row);
        }
        self.renumber();
    }

    fn fill_missing(&self, record: &mut RowRecord) {
        fill_missing(self.variant, record);
    }

    fn renumber(&mut self) {
        for (i, row) in self.rows.iter_mut().enumerate() {
            row.sno = (i + 1) as u32;
        }
    }
}

fn fill_missing(variant: RowVariant, record: &mut RowRecord) {
    for name in variant.schema().field_names() {
        record.fields.entry(name.to_string()).or_default();
    }
}
