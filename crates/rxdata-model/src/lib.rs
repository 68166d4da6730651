#![forbid(unsafe_code)]

//! Data-model primitives for the rxdata synchronization engine.
//!
//! This crate holds the logic-free building blocks the rest of the
//! pipeline operates on:
//!
//! - [`Value`]: a tagged cell value (numbers, text, lists, maps).
//! - [`Snapshot`] / [`Row`]: an ordered table of keyed rows with named
//!   columns — the authoritative dataset at one point in time.
//! - [`DataChange`]: one classified mutation of a snapshot, flowing from a
//!   data source to its subscribers.
//! - [`PendingWrite`]: a raw write awaiting conflict resolution.
//! - [`ChangeRecord`]: an applied change as retained by the history log.
//!
//! # Invariants
//!
//! 1. Every [`Row`] in a [`Snapshot`] has exactly one cell per column.
//! 2. Row keys are unique within a snapshot; row order is insertion order.
//! 3. A [`DataChange`]'s `affected_keys` is a conservative superset of what
//!    actually changed (false positives tolerated, false negatives are a
//!    correctness bug).
//!
//! Higher layers (diffing, conflict resolution, scheduling) live in their
//! own crates; nothing here spawns threads, takes locks, or logs.

pub mod change;
pub mod error;
pub mod snapshot;
pub mod value;

pub use change::{ChangeKind, ChangeRecord, DataChange, PendingWrite};
pub use error::DataError;
pub use snapshot::{Row, Snapshot};
pub use value::Value;
