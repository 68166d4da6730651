#![forbid(unsafe_code)]

//! Fan-out from sources to consumers.
//!
//! [`ReactiveDataBinding`] connects N independent [`DataConsumer`]s to
//! data sources, each binding optionally routed through a [`TransformFn`]
//! that reshapes the change before the consumer sees it. The same source
//! can feed many consumers with different transforms; the same consumer
//! can be bound to many sources.
//!
//! # Lifetime
//!
//! Consumers are held weakly: a binding never extends a consumer's
//! lifetime. When the consumer has been dropped, or reports
//! `is_alive() == false`, deliveries are silently skipped (logged at
//! debug). [`prune`](ReactiveDataBinding::prune) garbage-collects such
//! dead bindings and unsubscribes them from their sources.
//!
//! # Initial delivery
//!
//! Binding to a source whose snapshot is non-empty delivers one
//! synchronous `Reset` change carrying the full current snapshot before
//! [`bind`](ReactiveDataBinding::bind) returns, so a late joiner does not
//! render stale until the next update. Binding to an empty source skips
//! the initial delivery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use ahash::AHashMap;
use tracing::debug;

use rxdata_model::DataChange;

use crate::scheduler::SubscriberId;
use crate::source::ReactiveDataSource;
use crate::{lock, now_ms};

/// Something that renders or reacts to data changes.
///
/// Implementations must be cheap in `on_change`; delivery happens on the
/// source's notify thread (or the updater's thread for immediate
/// strategies).
pub trait DataConsumer: Send + Sync {
    /// Handle one (possibly transformed) change.
    fn on_change(&self, change: &DataChange);

    /// Whether this consumer still wants deliveries. Defaults to true;
    /// override to decouple liveness from the `Arc` being dropped (e.g. a
    /// view that has been hidden but not destroyed).
    fn is_alive(&self) -> bool {
        true
    }
}

/// Per-binding change transformation, applied before the consumer sees
/// the change.
pub type TransformFn = Arc<dyn Fn(DataChange) -> DataChange + Send + Sync>;

/// Handle identifying one consumer↔source binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingId(u64);

struct BindingEntry {
    source: ReactiveDataSource,
    subscription: SubscriberId,
    consumer: Weak<dyn DataConsumer>,
}

/// Distributes source changes to weakly-held consumers.
#[derive(Default)]
pub struct ReactiveDataBinding {
    bindings: Mutex<AHashMap<u64, BindingEntry>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ReactiveDataBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveDataBinding")
            .field("bindings", &lock(&self.bindings).len())
            .finish()
    }
}

impl ReactiveDataBinding {
    /// Create an empty distributor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a consumer to a source, with an optional transform.
    ///
    /// Holds the consumer weakly. If the source's snapshot is non-empty,
    /// delivers one synchronous `Reset` change (through the transform)
    /// before returning.
    pub fn bind<C>(
        &self,
        source: &ReactiveDataSource,
        consumer: &Arc<C>,
        transform: Option<TransformFn>,
    ) -> BindingId
    where
        C: DataConsumer + 'static,
    {
        let snapshot = source.snapshot();
        if !snapshot.is_empty() {
            let initial = DataChange::reset((*snapshot).clone(), now_ms());
            match &transform {
                Some(f) => consumer.on_change(&f(initial)),
                None => consumer.on_change(&initial),
            }
        }

        // Coerce to the trait object on the strong side; downgrading an
        // `Arc<C>` directly cannot unsize into `Weak<dyn DataConsumer>`.
        let strong: Arc<dyn DataConsumer> = Arc::<C>::clone(consumer);
        let weak = Arc::downgrade(&strong);
        let weak_cb = Weak::clone(&weak);
        let subscription = source.subscribe(move |change| {
            let Some(consumer) = weak_cb.upgrade() else {
                debug!("binding target dropped; skipping delivery");
                return;
            };
            if !consumer.is_alive() {
                debug!("binding target not alive; skipping delivery");
                return;
            }
            match &transform {
                Some(f) => consumer.on_change(&f(change.clone())),
                None => consumer.on_change(change),
            }
        });

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.bindings).insert(
            id,
            BindingEntry {
                source: source.clone(),
                subscription,
                consumer: weak,
            },
        );
        BindingId(id)
    }

    /// Remove a binding and unsubscribe it from its source. Returns
    /// whether the binding existed.
    pub fn unbind(&self, id: BindingId) -> bool {
        let entry = lock(&self.bindings).remove(&id.0);
        match entry {
            Some(entry) => {
                entry.source.unsubscribe(entry.subscription);
                true
            }
            None => false,
        }
    }

    /// Number of registered bindings, dead ones included until pruned.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        lock(&self.bindings).len()
    }

    /// Drop bindings whose consumer is gone or reports not-alive,
    /// unsubscribing each from its source. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let dead: Vec<(u64, BindingEntry)> = {
            let mut bindings = lock(&self.bindings);
            let dead_ids: Vec<u64> = bindings
                .iter()
                .filter(|(_, e)| !e.consumer.upgrade().is_some_and(|c| c.is_alive()))
                .map(|(id, _)| *id)
                .collect();
            dead_ids
                .into_iter()
                .filter_map(|id| bindings.remove(&id).map(|e| (id, e)))
                .collect()
        };
        let removed = dead.len();
        for (id, entry) in dead {
            debug!(binding = id, "pruning dead binding");
            entry.source.unsubscribe(entry.subscription);
        }
        removed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    use rxdata_model::{ChangeKind, Value};

    use crate::source::{SourceConfig, UpdateStrategy};

    struct Recorder {
        received: Mutex<Vec<DataChange>>,
        alive: AtomicBool,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                received: Mutex::new(Vec::new()),
                alive: AtomicBool::new(true),
            })
        }

        fn changes(&self) -> Vec<DataChange> {
            lock(&self.received).clone()
        }
    }

    impl DataConsumer for Recorder {
        fn on_change(&self, change: &DataChange) {
            lock(&self.received).push(change.clone());
        }

        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::Relaxed)
        }
    }

    /// Source where every delivery is synchronous, so tests need no waits.
    fn immediate_source() -> ReactiveDataSource {
        let source = ReactiveDataSource::with_config(SourceConfig {
            source_id: "test".into(),
            batch_interval: std::time::Duration::from_millis(10),
        });
        source.set_metric_strategy("hr", UpdateStrategy::Immediate);
        source.set_metric_strategy("spo2", UpdateStrategy::Immediate);
        source
    }

    fn tag(name: &'static str) -> TransformFn {
        Arc::new(move |change: DataChange| change.with_metadata("consumer", name))
    }

    #[test]
    fn two_consumers_get_independently_transformed_changes() {
        let source = immediate_source();
        let binding = ReactiveDataBinding::new();

        let first = Recorder::new();
        let second = Recorder::new();
        binding.bind(&source, &first, Some(tag("first")));
        binding.bind(&source, &second, Some(tag("second")));

        source.update_metric("hr", Value::Int(72), 1);

        let a = first.changes();
        let b = second.changes();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(a[0].metadata.get("consumer").map(String::as_str), Some("first"));
        assert_eq!(b[0].metadata.get("consumer").map(String::as_str), Some("second"));
        // Same underlying change either way.
        assert_eq!(a[0].payload, b[0].payload);
    }

    #[test]
    fn binding_to_populated_source_delivers_initial_reset() {
        let source = immediate_source();
        source.update_metric("hr", Value::Int(70), 1);

        let consumer = Recorder::new();
        let binding = ReactiveDataBinding::new();
        binding.bind(&source, &consumer, None);

        let changes = consumer.changes();
        assert_eq!(changes.len(), 1, "initial delivery happens in bind()");
        assert_eq!(changes[0].kind, ChangeKind::Reset);
        assert_eq!(changes[0].payload.cell("hr", "value"), Some(&Value::Int(70)));
        assert!(changes[0].affected_keys.contains("hr"));
    }

    #[test]
    fn binding_to_empty_source_skips_initial_delivery() {
        let source = immediate_source();
        let consumer = Recorder::new();
        let binding = ReactiveDataBinding::new();
        binding.bind(&source, &consumer, None);
        assert!(consumer.changes().is_empty());
    }

    #[test]
    fn unbind_stops_one_consumer_only() {
        let source = immediate_source();
        let binding = ReactiveDataBinding::new();

        let first = Recorder::new();
        let second = Recorder::new();
        let id = binding.bind(&source, &first, None);
        binding.bind(&source, &second, None);

        source.update_metric("hr", Value::Int(1), 1);
        assert!(binding.unbind(id));
        assert!(!binding.unbind(id), "second unbind is a no-op");
        source.update_metric("hr", Value::Int(2), 2);

        assert_eq!(first.changes().len(), 1);
        assert_eq!(second.changes().len(), 2);
        assert_eq!(binding.binding_count(), 1);
    }

    #[test]
    fn dropped_consumer_is_skipped_then_pruned() {
        let source = immediate_source();
        let binding = ReactiveDataBinding::new();

        let consumer = Recorder::new();
        binding.bind(&source, &consumer, None);
        drop(consumer);

        // Delivery to the dropped consumer is a silent no-op.
        source.update_metric("hr", Value::Int(1), 1);

        assert_eq!(binding.binding_count(), 1);
        assert_eq!(binding.prune(), 1);
        assert_eq!(binding.binding_count(), 0);
    }

    #[test]
    fn not_alive_consumer_is_skipped() {
        let source = immediate_source();
        let binding = ReactiveDataBinding::new();

        let consumer = Recorder::new();
        binding.bind(&source, &consumer, None);

        source.update_metric("hr", Value::Int(1), 1);
        consumer.alive.store(false, Ordering::Relaxed);
        source.update_metric("hr", Value::Int(2), 2);

        assert_eq!(consumer.changes().len(), 1, "not-alive deliveries skipped");
        assert_eq!(binding.prune(), 1, "not-alive bindings are prunable");
    }

    #[test]
    fn one_consumer_bound_to_two_sources() {
        let first = immediate_source();
        let second = immediate_source();
        let binding = ReactiveDataBinding::new();

        let consumer = Recorder::new();
        binding.bind(&first, &consumer, None);
        binding.bind(&second, &consumer, None);

        first.update_metric("hr", Value::Int(1), 1);
        second.update_metric("spo2", Value::Int(98), 2);

        let changes = consumer.changes();
        assert_eq!(changes.len(), 2);
        assert_eq!(binding.binding_count(), 2);
    }
}
