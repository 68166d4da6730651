#![forbid(unsafe_code)]

//! Change events, pending writes, and history records.
//!
//! These are the records that flow between pipeline stages:
//!
//! - [`DataChange`] travels from a data source to its subscribers. It is
//!   created by the source, consumed once by the detector/scheduler
//!   pipeline, then discarded (retained only by the history log).
//! - [`PendingWrite`] is a raw keyed write accumulated by the conflict
//!   resolver before a resolution pass.
//! - [`ChangeRecord`] is an applied change as stored by the history ring
//!   buffer, carrying before/after content hashes for cheap comparison.

use std::collections::{BTreeMap, BTreeSet};

use crate::snapshot::Snapshot;
use crate::value::Value;

/// Classification of a data change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChangeKind {
    /// New rows were introduced.
    Add,
    /// Existing rows were modified.
    #[default]
    Update,
    /// Rows were removed.
    Delete,
    /// The whole dataset was replaced (also the initial bind delivery).
    Reset,
}

/// One mutation of a source's snapshot, as delivered to subscribers.
///
/// `affected_keys` is a conservative superset of what actually changed:
/// false positives are tolerated, false negatives are a correctness bug.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataChange {
    /// What kind of mutation this is.
    pub kind: ChangeKind,
    /// The new snapshot, or the affected subset of it.
    pub payload: Snapshot,
    /// Wall-clock time of the mutation, epoch milliseconds.
    pub timestamp_ms: u64,
    /// Conservative superset of the changed keys/columns.
    pub affected_keys: BTreeSet<String>,
    /// Free-form annotations (e.g. originating metric).
    pub metadata: BTreeMap<String, String>,
}

impl DataChange {
    /// Create a change with empty affected-keys and metadata.
    #[must_use]
    pub fn new(kind: ChangeKind, payload: Snapshot, timestamp_ms: u64) -> Self {
        Self {
            kind,
            payload,
            timestamp_ms,
            affected_keys: BTreeSet::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// A `Reset` change carrying a full snapshot, with every row key
    /// marked affected.
    #[must_use]
    pub fn reset(snapshot: Snapshot, timestamp_ms: u64) -> Self {
        let affected_keys = snapshot.keys().map(str::to_owned).collect();
        Self {
            kind: ChangeKind::Reset,
            payload: snapshot,
            timestamp_ms,
            affected_keys,
            metadata: BTreeMap::new(),
        }
    }

    /// Add one affected key.
    #[must_use]
    pub fn with_affected_key(mut self, key: impl Into<String>) -> Self {
        self.affected_keys.insert(key.into());
        self
    }

    /// Replace the affected-key set.
    #[must_use]
    pub fn with_affected_keys(mut self, keys: BTreeSet<String>) -> Self {
        self.affected_keys = keys;
        self
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A raw write awaiting conflict resolution.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PendingWrite {
    /// Logical key the write targets (e.g. a metric name).
    pub key: String,
    /// Proposed value.
    pub value: Value,
    /// Identifier of the writer.
    pub source_id: String,
    /// Wall-clock time of the write, epoch milliseconds.
    pub timestamp_ms: u64,
}

impl PendingWrite {
    /// Create a pending write.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        value: Value,
        source_id: impl Into<String>,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            source_id: source_id.into(),
            timestamp_ms,
        }
    }
}

/// An applied change as retained by the history log.
///
/// Owned exclusively by the history ring buffer; rollback points reference
/// positions in that buffer, never the records themselves.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChangeRecord {
    /// Wall-clock time of the change, epoch milliseconds.
    pub timestamp_ms: u64,
    /// What kind of mutation was applied.
    pub kind: ChangeKind,
    /// Snapshot before the change, if captured.
    pub old_value: Option<Snapshot>,
    /// Snapshot after the change, if captured.
    pub new_value: Option<Snapshot>,
    /// Conservative superset of the changed keys/columns.
    pub affected_keys: BTreeSet<String>,
    /// Identifier of the component that applied the change.
    pub source_id: String,
    /// Content hash of the snapshot before the change.
    pub hash_before: u64,
    /// Content hash of the snapshot after the change.
    pub hash_after: u64,
}

impl ChangeRecord {
    /// Create a record with no captured snapshots.
    #[must_use]
    pub fn new(kind: ChangeKind, source_id: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            kind,
            old_value: None,
            new_value: None,
            affected_keys: BTreeSet::new(),
            source_id: source_id.into(),
            hash_before: 0,
            hash_after: 0,
        }
    }

    /// Attach before/after snapshots.
    #[must_use]
    pub fn with_snapshots(mut self, old: Snapshot, new: Snapshot) -> Self {
        self.old_value = Some(old);
        self.new_value = Some(new);
        self
    }

    /// Attach before/after content hashes.
    #[must_use]
    pub fn with_hashes(mut self, before: u64, after: u64) -> Self {
        self.hash_before = before;
        self.hash_after = after;
        self
    }

    /// Replace the affected-key set.
    #[must_use]
    pub fn with_affected_keys(mut self, keys: BTreeSet<String>) -> Self {
        self.affected_keys = keys;
        self
    }

    /// Whether the change altered snapshot content at all, judged by the
    /// recorded hashes.
    #[must_use]
    pub fn is_content_change(&self) -> bool {
        self.hash_before != self.hash_after
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
