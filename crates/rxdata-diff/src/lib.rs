#![forbid(unsafe_code)]

//! Snapshot diffing for the rxdata synchronization engine.
//!
//! Two layers:
//!
//! - [`hash`]: deterministic, order-sensitive content hashing of snapshots
//!   and columns. Fixed-seed so equal content hashes equal across runs.
//! - [`detector`]: [`EfficientChangeDetector`] classifies the difference
//!   between two snapshots as [`ChangeSet::None`], [`ChangeSet::Full`],
//!   [`ChangeSet::Clear`], or row-level [`ChangeSet::Incremental`], with
//!   optional chunked tracking for sub-linear re-scan of large datasets.
//!
//! # Invariants
//!
//! 1. `detect_changes(s, s)` is always `None` for any snapshot `s`.
//! 2. Reported changed columns are exact for modified rows; affected keys
//!    are a superset of the rows that actually differ.
//! 3. Detection never fails: malformed row comparisons (arity or type
//!    mismatches) classify as "modified", they do not error.
//! 4. Same inputs produce the same change-set (deterministic).

pub mod detector;
pub mod hash;

pub use detector::{ChangeSet, EfficientChangeDetector, IncrementalChanges, RowChange};
pub use hash::{column_hash, snapshot_hash};
