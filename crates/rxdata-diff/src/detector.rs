#![forbid(unsafe_code)]

//! Incremental change detection between snapshots.
//!
//! [`EfficientChangeDetector`] classifies the difference between an old
//! and a new snapshot without assuming anything about how the mutation was
//! produced. The classification ladder, cheapest first:
//!
//! 1. both empty → [`ChangeSet::None`]
//! 2. old empty → [`ChangeSet::Full`] (the entire new snapshot is the change)
//! 3. new empty → [`ChangeSet::Clear`]
//! 4. equal content hashes → [`ChangeSet::None`] — the fast path that
//!    avoids per-row comparison for unchanged data
//! 5. row-level comparison → [`ChangeSet::Incremental`]
//!
//! Rows are matched by key: only-in-new rows are added, only-in-old rows
//! are deleted, rows in both with differing cells are modified with the
//! exact set of differing columns. A structural-only difference the row
//! pass cannot attribute (row reordering, column renames with identical
//! values) conservatively classifies as `Full`.
//!
//! # Chunked tracking
//!
//! [`track_chunks`](EfficientChangeDetector::track_chunks) partitions a
//! snapshot into fixed-size runs of rows and hashes each independently;
//! [`get_affected_chunks`](EfficientChangeDetector::get_affected_chunks)
//! then maps a change-set back to the chunk indices that need
//! re-processing. For localized edits in large datasets this bounds the
//! downstream re-scan to the touched chunks instead of the whole table.
//!
//! # Failure semantics
//!
//! Detection never errors. A malformed row comparison (short row, type
//! mismatch) is treated as "modified" in the affected columns rather than
//! raising — the affected sets stay conservative supersets.

use std::collections::BTreeSet;

use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;

use rxdata_model::{Row, Snapshot};

use crate::hash::{rows_hash, snapshot_hash};

/// Default number of rows per tracked chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 64;

/// One modified row: its key, both cell vectors, and exactly the columns
/// that differ.
#[derive(Debug, Clone, PartialEq)]
pub struct RowChange {
    /// Key of the modified row.
    pub key: String,
    /// Cells before the change.
    pub old_cells: Vec<rxdata_model::Value>,
    /// Cells after the change.
    pub new_cells: Vec<rxdata_model::Value>,
    /// Names of the columns whose values differ.
    pub changed_columns: SmallVec<[String; 4]>,
}

/// The row-level portion of an incremental change-set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IncrementalChanges {
    /// Rows present only in the new snapshot.
    pub added: Vec<Row>,
    /// Rows present in both snapshots with differing values.
    pub modified: Vec<RowChange>,
    /// Keys of rows present only in the old snapshot.
    pub deleted: Vec<String>,
    /// Union of changed columns across all modified rows.
    pub affected_columns: BTreeSet<String>,
    /// Keys of every added, modified, or deleted row.
    pub affected_indices: BTreeSet<String>,
}

impl IncrementalChanges {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Classified result of diffing two snapshots.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeSet {
    /// No change (identical content).
    None,
    /// The dataset went from empty to populated, or changed in a way the
    /// row pass cannot attribute; the entire payload is the change.
    Full {
        /// The new snapshot.
        data: Snapshot,
    },
    /// The dataset went from populated to empty.
    Clear,
    /// Row-level additions, modifications, and deletions.
    Incremental(IncrementalChanges),
}

impl ChangeSet {
    /// Whether this change-set represents "nothing changed".
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Short classification label, useful in logs.
    #[must_use]
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Full { .. } => "full",
            Self::Clear => "clear",
            Self::Incremental(_) => "incremental",
        }
    }

    /// Row keys touched by this change-set.
    ///
    /// `Full` reports every key of the new snapshot; `Clear` and `None`
    /// report nothing (for `Clear` the *old* keys are gone wholesale and
    /// chunk mapping treats it as all-chunks anyway).
    #[must_use]
    pub fn affected_indices(&self) -> BTreeSet<String> {
        match self {
            Self::None | Self::Clear => BTreeSet::new(),
            Self::Full { data } => data.keys().map(str::to_owned).collect(),
            Self::Incremental(inc) => inc.affected_indices.clone(),
        }
    }
}

/// Snapshot diff engine with optional chunked tracking.
#[derive(Debug, Clone)]
pub struct EfficientChangeDetector {
    chunk_size: usize,
    chunk_hashes: Vec<u64>,
    chunk_of_key: AHashMap<String, usize>,
    tracked_rows: usize,
}

impl Default for EfficientChangeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl EfficientChangeDetector {
    /// Create a detector with the default chunk size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Create a detector with an explicit chunk size (clamped to ≥ 1).
    #[must_use]
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_hashes: Vec::new(),
            chunk_of_key: AHashMap::new(),
            tracked_rows: 0,
        }
    }

    /// Rows per chunk.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Per-chunk hashes from the last [`track_chunks`](Self::track_chunks)
    /// call.
    #[must_use]
    pub fn chunk_hashes(&self) -> &[u64] {
        &self.chunk_hashes
    }

    /// Classify the difference between two snapshots.
    ///
    /// Pure with respect to chunk state; never errors.
    #[must_use]
    pub fn detect_changes(&self, old: &Snapshot, new: &Snapshot) -> ChangeSet {
        if old.is_empty() && new.is_empty() {
            return ChangeSet::None;
        }
        if old.is_empty() {
            return ChangeSet::Full { data: new.clone() };
        }
        if new.is_empty() {
            return ChangeSet::Clear;
        }
        // Fast path: identical content hashes mean no per-row work.
        if snapshot_hash(old) == snapshot_hash(new) {
            return ChangeSet::None;
        }

        let old_index: AHashMap<&str, &Row> =
            old.rows().iter().map(|r| (r.key.as_str(), r)).collect();
        let new_keys: AHashSet<&str> = new.rows().iter().map(|r| r.key.as_str()).collect();

        let mut inc = IncrementalChanges::default();

        for new_row in new.rows() {
            match old_index.get(new_row.key.as_str()) {
                None => {
                    inc.affected_indices.insert(new_row.key.clone());
                    inc.added.push(new_row.clone());
                }
                Some(old_row) => {
                    let changed = changed_columns(old, new, old_row, new_row);
                    if !changed.is_empty() {
                        inc.affected_indices.insert(new_row.key.clone());
                        inc.affected_columns.extend(changed.iter().cloned());
                        inc.modified.push(RowChange {
                            key: new_row.key.clone(),
                            old_cells: old_row.cells.clone(),
                            new_cells: new_row.cells.clone(),
                            changed_columns: changed,
                        });
                    }
                }
            }
        }

        for old_row in old.rows() {
            if !new_keys.contains(old_row.key.as_str()) {
                inc.affected_indices.insert(old_row.key.clone());
                inc.deleted.push(old_row.key.clone());
            }
        }

        if inc.is_empty() {
            // Hashes differ but no row attributes the change (reordering,
            // column rename with identical values). Re-sync everything.
            return ChangeSet::Full { data: new.clone() };
        }
        ChangeSet::Incremental(inc)
    }

    /// Partition `snapshot` into fixed-size chunks and record a hash per
    /// chunk, plus a key → chunk mapping for later attribution.
    pub fn track_chunks(&mut self, snapshot: &Snapshot) {
        self.chunk_hashes = snapshot
            .rows()
            .chunks(self.chunk_size)
            .map(rows_hash)
            .collect();
        self.chunk_of_key = snapshot
            .rows()
            .iter()
            .enumerate()
            .map(|(pos, row)| (row.key.clone(), pos / self.chunk_size))
            .collect();
        self.tracked_rows = snapshot.len();
    }

    /// Chunk indices that need re-processing for the given change-set,
    /// relative to the last tracked snapshot.
    ///
    /// `Full` and `Clear` affect every tracked chunk; `None` affects none.
    /// Keys unknown to the tracked snapshot (freshly added rows) map to
    /// the chunk an appended row would land in.
    #[must_use]
    pub fn get_affected_chunks(&self, change_set: &ChangeSet) -> Vec<usize> {
        match change_set {
            ChangeSet::None => Vec::new(),
            ChangeSet::Full { .. } | ChangeSet::Clear => (0..self.chunk_hashes.len()).collect(),
            ChangeSet::Incremental(inc) => {
                let append_chunk = self.tracked_rows / self.chunk_size;
                let chunks: BTreeSet<usize> = inc
                    .affected_indices
                    .iter()
                    .map(|key| self.chunk_of_key.get(key).copied().unwrap_or(append_chunk))
                    .collect();
                chunks.into_iter().collect()
            }
        }
    }
}

/// Exact set of columns whose values differ for one row present in both
/// snapshots. Compares by column *name*, so reordered or renamed columns
/// and short rows degrade to "changed", never to an error.
fn changed_columns(
    old_snap: &Snapshot,
    new_snap: &Snapshot,
    old_row: &Row,
    new_row: &Row,
) -> SmallVec<[String; 4]> {
    let mut changed = SmallVec::new();
    for (ci, column) in new_snap.columns().iter().enumerate() {
        let new_cell = new_row.cells.get(ci);
        let old_cell = old_snap
            .column_index(column)
            .and_then(|oi| old_row.cells.get(oi));
        if old_cell != new_cell {
            changed.push(column.clone());
        }
    }
    // Columns dropped from the new snapshot count as changed too.
    for column in old_snap.columns() {
        if new_snap.column_index(column).is_none() {
            changed.push(column.clone());
        }
    }
    changed
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
