#![forbid(unsafe_code)]

//! Bounded change history with named rollback points.
//!
//! [`ChangeHistory`] is an append-only ring buffer of [`ChangeRecord`]s.
//! Once `max_history` is exceeded the oldest entries are silently evicted.
//! A monotonically increasing *sequence number* counts every append ever
//! made, so a rollback point is stored as an absolute offset and eviction
//! is exactly detectable: a point whose offset predates the surviving
//! window fails with [`HistoryError::RollbackPointEvicted`] instead of
//! silently returning a truncated record list.
//!
//! # Invariants
//!
//! 1. `len() <= max_history` always.
//! 2. Surviving records are the most recent `len()` appends, in order.
//! 3. `seq() == evicted + len()` — the total number of appends ever made.

use std::collections::VecDeque;

use ahash::AHashMap;
use thiserror::Error;

use rxdata_model::ChangeRecord;

/// Rollback failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    /// The named rollback point was never created.
    #[error("rollback point not found: {name}")]
    RollbackPointNotFound {
        /// The requested point name.
        name: String,
    },

    /// The named point exists but its offset has been evicted from the
    /// ring buffer, so the records needed to roll back are gone.
    #[error("rollback point '{name}' refers to history already evicted from the ring buffer")]
    RollbackPointEvicted {
        /// The requested point name.
        name: String,
    },
}

/// Fixed-capacity, append-only log of applied changes.
#[derive(Debug, Default)]
pub struct ChangeHistory {
    max_history: usize,
    entries: VecDeque<ChangeRecord>,
    /// Number of records evicted so far; `evicted + entries.len()` is the
    /// absolute sequence number of the next append.
    evicted: u64,
    /// Named rollback points, stored as absolute sequence offsets.
    points: AHashMap<String, u64>,
}

impl ChangeHistory {
    /// Create a history retaining at most `max_history` records (≥ 1).
    #[must_use]
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history: max_history.max(1),
            entries: VecDeque::new(),
            evicted: 0,
            points: AHashMap::new(),
        }
    }

    /// Maximum number of retained records.
    #[must_use]
    pub fn max_history(&self) -> usize {
        self.max_history
    }

    /// Number of currently retained records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no records are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Absolute sequence number of the next append (total appends so far).
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.evicted + self.entries.len() as u64
    }

    /// Append a record, evicting the oldest if at capacity.
    pub fn record_change(&mut self, record: ChangeRecord) {
        if self.entries.len() == self.max_history {
            self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(record);
    }

    /// The most recent `n` records, in chronological order (most recent
    /// last). Returns fewer when the history holds fewer.
    #[must_use]
    pub fn get_recent_changes(&self, n: usize) -> Vec<&ChangeRecord> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).collect()
    }

    /// Store the current position under `name`, overwriting any prior
    /// point with the same name.
    pub fn create_rollback_point(&mut self, name: impl Into<String>) {
        self.points.insert(name.into(), self.seq());
    }

    /// Names of all registered rollback points.
    #[must_use]
    pub fn rollback_points(&self) -> Vec<&str> {
        self.points.keys().map(String::as_str).collect()
    }

    /// Records appended strictly after the named point, most recent first.
    ///
    /// Fails with [`HistoryError::RollbackPointNotFound`] for unknown
    /// names, and [`HistoryError::RollbackPointEvicted`] when ring-buffer
    /// overflow has discarded records the point refers to.
    pub fn rollback_to_point(&self, name: &str) -> Result<Vec<ChangeRecord>, HistoryError> {
        let offset = *self
            .points
            .get(name)
            .ok_or_else(|| HistoryError::RollbackPointNotFound {
                name: name.to_owned(),
            })?;
        if offset < self.evicted {
            return Err(HistoryError::RollbackPointEvicted {
                name: name.to_owned(),
            });
        }
        let skip = (offset - self.evicted) as usize;
        Ok(self.entries.iter().skip(skip).rev().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
