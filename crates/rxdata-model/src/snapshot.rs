#![forbid(unsafe_code)]

//! Ordered, keyed tabular snapshots.
//!
//! A [`Snapshot`] is the authoritative value of a managed dataset at one
//! point in time: a table whose rows are keyed by a string identifier and
//! whose columns are named series. Within one data source exactly one
//! snapshot is current at any observation point; mutation replaces the
//! whole snapshot atomically, so `Snapshot` itself is a plain value type
//! with no interior mutability.
//!
//! # Invariants
//!
//! 1. `row.cells.len() == columns.len()` for every row (enforced by
//!    [`Snapshot::upsert_row`] and [`Snapshot::from_rows`]).
//! 2. Row keys are unique; upserting an existing key replaces that row in
//!    place, preserving its position.
//! 3. Row order is insertion order and is significant for content hashing.

use crate::error::DataError;
use crate::value::Value;

/// One keyed row of a snapshot.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Row {
    /// Unique row identifier within the snapshot.
    pub key: String,
    /// Cell values, one per snapshot column, in column order.
    pub cells: Vec<Value>,
}

impl Row {
    /// Create a row from a key and its cells.
    #[must_use]
    pub fn new(key: impl Into<String>, cells: Vec<Value>) -> Self {
        Self {
            key: key.into(),
            cells,
        }
    }
}

/// An ordered table of keyed rows with named columns.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Snapshot {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Snapshot {
    /// Create an empty snapshot with the given column names.
    #[must_use]
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Create a snapshot with no columns and no rows.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from columns and rows, validating row arity.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Row>) -> Result<Self, DataError> {
        let mut snapshot = Self::new(columns);
        for row in rows {
            snapshot.upsert_row(row.key, row.cells)?;
        }
        Ok(snapshot)
    }

    /// Column names, in order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Position of a named column, if present.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Rows in insertion order.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the snapshot has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Insert or replace the row with the given key.
    ///
    /// An existing key keeps its position; a new key is appended. Fails
    /// with [`DataError::SchemaMismatch`] if the cell count does not match
    /// the column count.
    pub fn upsert_row(&mut self, key: impl Into<String>, cells: Vec<Value>) -> Result<(), DataError> {
        let key = key.into();
        if cells.len() != self.columns.len() {
            return Err(DataError::SchemaMismatch {
                key,
                expected: self.columns.len(),
                got: cells.len(),
            });
        }
        match self.rows.iter_mut().find(|r| r.key == key) {
            Some(row) => row.cells = cells,
            None => self.rows.push(Row { key, cells }),
        }
        Ok(())
    }

    /// Remove and return the row with the given key, if present.
    pub fn remove_row(&mut self, key: &str) -> Option<Row> {
        let pos = self.rows.iter().position(|r| r.key == key)?;
        Some(self.rows.remove(pos))
    }

    /// The row with the given key, if present.
    #[must_use]
    pub fn get_row(&self, key: &str) -> Option<&Row> {
        self.rows.iter().find(|r| r.key == key)
    }

    /// Whether a row with the given key exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get_row(key).is_some()
    }

    /// The cell at (row key, column name), if both exist.
    #[must_use]
    pub fn cell(&self, key: &str, column: &str) -> Option<&Value> {
        let col = self.column_index(column)?;
        self.get_row(key)?.cells.get(col)
    }

    /// All values of one column, in row order.
    pub fn column_values(&self, column: &str) -> Result<Vec<&Value>, DataError> {
        let col = self
            .column_index(column)
            .ok_or_else(|| DataError::UnknownColumn(column.to_owned()))?;
        Ok(self.rows.iter().filter_map(|r| r.cells.get(col)).collect())
    }

    /// Row keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.key.as_str())
    }

    /// A snapshot containing only the given row (same columns).
    ///
    /// Used to build single-row change payloads. Returns an empty-rowed
    /// snapshot if the key is absent.
    #[must_use]
    pub fn subset(&self, key: &str) -> Snapshot {
        let rows = self.get_row(key).cloned().into_iter().collect();
        Self {
            columns: self.columns.clone(),
            rows,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
