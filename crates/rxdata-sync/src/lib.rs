#![forbid(unsafe_code)]

//! Write coordination for the rxdata synchronization engine.
//!
//! - [`resolver`]: [`ConflictResolver`] accumulates concurrent writes to
//!   the same key within a resolution window and reduces them to exactly
//!   one value per key, per a configurable [`ConflictStrategy`]. Every
//!   multi-write key is logged to a bounded conflict log.
//! - [`history`]: [`ChangeHistory`] keeps a fixed-capacity, append-only
//!   ring of applied changes with named rollback points.
//!
//! Each of these structures is owned by exactly one component and mutated
//! only through its documented methods; neither takes locks internally.

pub mod history;
pub mod resolver;

pub use history::{ChangeHistory, HistoryError};
pub use resolver::{ConflictInfo, ConflictResolver, ConflictStrategy, ResolverFn};
