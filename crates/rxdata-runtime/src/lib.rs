#![forbid(unsafe_code)]

//! Runtime layer of the rxdata synchronization engine.
//!
//! Three cooperating pieces:
//!
//! - [`UpdateScheduler`]: batches opaque update tokens by size or
//!   max-delay on a periodic background tick, stopping itself when idle.
//! - [`ReactiveDataSource`]: the mutable store. Owns the current
//!   snapshot, applies updates under a single writer lock, computes a
//!   cheap affected-keys superset, and publishes buffered [`DataChange`]
//!   notifications to subscribers.
//! - [`ReactiveDataBinding`]: binds N independent consumers (each with an
//!   optional transform) to sources, holding consumers weakly so a
//!   binding never extends a consumer's lifetime.
//!
//! # Ordering guarantees
//!
//! Within one source, changes are delivered in the order their updates
//! completed (FIFO); batches preserve the relative order of their
//! constituent updates. Across sources there is no ordering guarantee.
//!
//! [`DataChange`]: rxdata_model::DataChange
//! [`UpdateScheduler`]: scheduler::UpdateScheduler
//! [`ReactiveDataSource`]: source::ReactiveDataSource
//! [`ReactiveDataBinding`]: binding::ReactiveDataBinding

pub mod binding;
pub mod scheduler;
pub mod source;

pub use binding::{BindingId, DataConsumer, ReactiveDataBinding, TransformFn};
pub use scheduler::{SchedulerConfig, SubscriberId, UpdateScheduler};
pub use source::{ReactiveDataSource, SourceConfig, SourceState, UpdateStrategy};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a holder panicked.
///
/// None of the guarded state here can be left torn by a panic (every
/// critical section is a field swap or a queue drain), so continuing past
/// poisoning is safe and keeps delivery threads alive.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Current wall-clock time in epoch milliseconds.
#[must_use]
pub(crate) fn now_ms() -> u64 {
    use web_time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}
