#![forbid(unsafe_code)]

//! Error types for malformed update payloads.

use thiserror::Error;

/// A malformed update payload.
///
/// `DataError` is recovered locally by the data source: the offending
/// update is skipped, the prior snapshot stays current, and the error is
/// surfaced on the source's error channel rather than raised to the
/// caller of `update_data`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataError {
    /// A row's cell count does not match the snapshot's column count.
    #[error("row '{key}' has {got} cells but the snapshot has {expected} columns")]
    SchemaMismatch {
        /// Key of the offending row.
        key: String,
        /// Number of columns the snapshot declares.
        expected: usize,
        /// Number of cells the row carried.
        got: usize,
    },

    /// A named column does not exist in the snapshot.
    #[error("unknown column: {0}")]
    UnknownColumn(String),
}
