#![forbid(unsafe_code)]

//! The mutable store at the center of the pipeline.
//!
//! [`ReactiveDataSource`] owns the current [`Snapshot`], applies updates,
//! and publishes buffered [`DataChange`] notifications to subscribers.
//!
//! # State machine
//!
//! Per source: `Idle → Updating → NotifyPending → Idle`. An update
//! acquires the single writer lock, computes a cheap column-level
//! affected-keys superset against the prior snapshot, swaps the snapshot
//! pointer, and releases the lock — the lock is held only for that O(1)
//! copy/replace step, never across diff computation or notification
//! delivery. Detailed change-sets are the consumer's business, via
//! `rxdata-diff` on the snapshots it pulls.
//!
//! # Snapshot sharing
//!
//! The current snapshot lives in an [`ArcSwap`]: readers
//! ([`snapshot`](ReactiveDataSource::snapshot), the detector, bindings)
//! load it lock-free and concurrently; only
//! [`update_data`](ReactiveDataSource::update_data) mutates, under the
//! writer lock.
//!
//! # Batching
//!
//! Applied changes are pushed into an internal buffer; a timer thread at
//! the configured interval drains it, delivers each change to
//! single-change subscribers in FIFO order, and emits one consolidated
//! batch event when more than one change accumulated. Per-metric
//! [`UpdateStrategy`] lets a high-frequency metric run `Immediate`
//! (synchronous delivery) while others batch at their own interval;
//! switching the active metric reconfigures the interval used for
//! subsequent whole-snapshot updates.
//!
//! # Failure behavior
//!
//! A malformed update never reaches the snapshot. [`Snapshot`] enforces
//! row arity by construction, so `update_data` cannot be handed a torn
//! table; the remaining schema hazard is [`update_metric`] against a
//! snapshot whose columns do not fit the metric table, which is skipped,
//! logged, and surfaced on the error channel while the prior snapshot
//! remains current.
//!
//! [`update_metric`]: ReactiveDataSource::update_metric

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use ahash::AHashMap;
use arc_swap::ArcSwap;
use tracing::{debug, warn};

use rxdata_diff::{column_hash, snapshot_hash};
use rxdata_model::{ChangeKind, ChangeRecord, DataChange, DataError, Snapshot, Value};
use rxdata_sync::{ChangeHistory, HistoryError};

use crate::scheduler::SubscriberId;
use crate::{lock, now_ms};

/// Source construction parameters.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Identifier recorded in history entries for changes this source applies.
    pub source_id: String,
    /// Default notification batching interval.
    pub batch_interval: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            source_id: "local".into(),
            batch_interval: Duration::from_millis(100),
        }
    }
}

/// How updates for one logical metric are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// Deliver synchronously on the updating thread, bypassing the buffer.
    Immediate,
    /// Buffer and deliver on a timer at the given interval.
    Batched(Duration),
}

/// Observable lifecycle state of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceState {
    /// No update in progress, nothing buffered.
    #[default]
    Idle,
    /// An update is being applied under the writer lock.
    Updating,
    /// Changes are buffered awaiting timer delivery.
    NotifyPending,
}

type ChangeFn = Arc<dyn Fn(&DataChange) + Send + Sync>;
type BatchFn = Arc<dyn Fn(&[DataChange]) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&DataError) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    change: Vec<(SubscriberId, ChangeFn)>,
    batch: Vec<(SubscriberId, BatchFn)>,
    error: Vec<(SubscriberId, ErrorFn)>,
}

#[derive(Default)]
struct NotifyBuffer {
    pending: Vec<DataChange>,
    timer_running: bool,
}

struct SourceShared {
    config: SourceConfig,
    /// Current snapshot; lock-free shared reads, single-writer swaps.
    current: ArcSwap<Snapshot>,
    /// Serializes mutation. Held only across the swap, never delivery.
    write_lock: Mutex<()>,
    /// Serializes delivery so immediate dispatch stays FIFO.
    notify_lock: Mutex<()>,
    state: Mutex<SourceState>,
    buffer: Mutex<NotifyBuffer>,
    /// Interval the notify thread sleeps between windows. Re-read every
    /// window, so strategy switches apply without restarting the thread.
    notify_interval: Mutex<Duration>,
    subscribers: Mutex<Subscribers>,
    next_id: AtomicU64,
    strategies: Mutex<AHashMap<String, UpdateStrategy>>,
    active_metric: Mutex<Option<String>>,
    history: Option<Mutex<ChangeHistory>>,
}

/// The mutable, observable store. Cloning shares the same underlying source.
pub struct ReactiveDataSource {
    shared: Arc<SourceShared>,
}

impl Clone for ReactiveDataSource {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl std::fmt::Debug for ReactiveDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveDataSource")
            .field("source_id", &self.shared.config.source_id)
            .field("rows", &self.shared.current.load().len())
            .field("state", &*lock(&self.shared.state))
            .finish()
    }
}

impl Default for ReactiveDataSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactiveDataSource {
    /// Create a source with default configuration and no history.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SourceConfig::default())
    }

    /// Create a source with explicit configuration and no history.
    #[must_use]
    pub fn with_config(config: SourceConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a source that records every applied change into a bounded
    /// [`ChangeHistory`] of at most `max_history` records.
    #[must_use]
    pub fn with_history(config: SourceConfig, max_history: usize) -> Self {
        Self::build(config, Some(Mutex::new(ChangeHistory::new(max_history))))
    }

    fn build(config: SourceConfig, history: Option<Mutex<ChangeHistory>>) -> Self {
        let batch_interval = config.batch_interval;
        Self {
            shared: Arc::new(SourceShared {
                config,
                current: ArcSwap::from_pointee(Snapshot::empty()),
                write_lock: Mutex::new(()),
                notify_lock: Mutex::new(()),
                state: Mutex::new(SourceState::Idle),
                buffer: Mutex::new(NotifyBuffer::default()),
                notify_interval: Mutex::new(batch_interval),
                subscribers: Mutex::new(Subscribers::default()),
                next_id: AtomicU64::new(0),
                strategies: Mutex::new(AHashMap::new()),
                active_metric: Mutex::new(None),
                history,
            }),
        }
    }

    /// The latest consistent snapshot (lock-free).
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.shared.current.load_full()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SourceState {
        *lock(&self.shared.state)
    }

    // ── Subscriptions ───────────────────────────────────────────────────

    /// Register a single-change subscriber.
    pub fn subscribe(&self, callback: impl Fn(&DataChange) + Send + Sync + 'static) -> SubscriberId {
        let id = self.next_id();
        lock(&self.shared.subscribers)
            .change
            .push((id, Arc::new(callback)));
        id
    }

    /// Register a consolidated-batch subscriber, invoked only when more
    /// than one change accumulated in a single timer window.
    pub fn subscribe_batch(
        &self,
        callback: impl Fn(&[DataChange]) + Send + Sync + 'static,
    ) -> SubscriberId {
        let id = self.next_id();
        lock(&self.shared.subscribers)
            .batch
            .push((id, Arc::new(callback)));
        id
    }

    /// Register an error subscriber for skipped malformed updates.
    pub fn subscribe_errors(
        &self,
        callback: impl Fn(&DataError) + Send + Sync + 'static,
    ) -> SubscriberId {
        let id = self.next_id();
        lock(&self.shared.subscribers)
            .error
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove a subscriber from every channel it appears on.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subs = lock(&self.shared.subscribers);
        let before = subs.change.len() + subs.batch.len() + subs.error.len();
        subs.change.retain(|(sid, _)| *sid != id);
        subs.batch.retain(|(sid, _)| *sid != id);
        subs.error.retain(|(sid, _)| *sid != id);
        subs.change.len() + subs.batch.len() + subs.error.len() != before
    }

    fn next_id(&self) -> SubscriberId {
        SubscriberId(self.shared.next_id.fetch_add(1, Ordering::Relaxed))
    }

    // ── Per-metric strategy ─────────────────────────────────────────────

    /// Configure how updates to one logical metric are delivered.
    pub fn set_metric_strategy(&self, key: impl Into<String>, strategy: UpdateStrategy) {
        lock(&self.shared.strategies).insert(key.into(), strategy);
    }

    /// The delivery strategy for a metric (default: batched at the
    /// configured interval).
    #[must_use]
    pub fn metric_strategy(&self, key: &str) -> UpdateStrategy {
        lock(&self.shared.strategies)
            .get(key)
            .copied()
            .unwrap_or(UpdateStrategy::Batched(self.shared.config.batch_interval))
    }

    /// Make `key` the active metric: whole-snapshot updates now use its
    /// strategy's interval.
    pub fn set_active_metric(&self, key: impl Into<String>) {
        *lock(&self.shared.active_metric) = Some(key.into());
    }

    fn active_interval(&self) -> Duration {
        let active = lock(&self.shared.active_metric).clone();
        match active {
            Some(key) => match self.metric_strategy(&key) {
                UpdateStrategy::Immediate => Duration::ZERO,
                UpdateStrategy::Batched(d) => d,
            },
            None => self.shared.config.batch_interval,
        }
    }

    // ── Updates ─────────────────────────────────────────────────────────

    /// Replace the snapshot wholesale.
    pub fn update_data(&self, new_snapshot: Snapshot, kind: ChangeKind) {
        let interval = self.active_interval();
        let guard = lock(&self.shared.write_lock);
        let change = self.commit(guard, new_snapshot, kind, None);
        self.dispatch(change, interval);
    }

    /// Push one metric value, upserting the metric's row.
    ///
    /// The metric table has one row per metric key with columns `value`
    /// and `timestamp`. Delivery follows the metric's [`UpdateStrategy`].
    ///
    /// If the current snapshot's columns are incompatible with the metric
    /// schema the update is skipped: the prior snapshot stays current and
    /// the error surfaces on the error channel, not to this caller.
    pub fn update_metric(&self, key: impl Into<String>, value: Value, timestamp_ms: u64) {
        let key = key.into();
        let interval = match self.metric_strategy(&key) {
            UpdateStrategy::Immediate => Duration::ZERO,
            UpdateStrategy::Batched(d) => d,
        };

        let guard = lock(&self.shared.write_lock);
        let mut new = (*self.shared.current.load_full()).clone();
        if new.columns().is_empty() {
            new = Snapshot::new(METRIC_COLUMNS.map(str::to_owned).to_vec());
        } else if let Some(err) = metric_schema_error(&key, &new) {
            drop(guard);
            self.emit_error(&err);
            return;
        }
        let kind = if new.contains_key(&key) {
            ChangeKind::Update
        } else {
            ChangeKind::Add
        };
        if let Err(err) = new.upsert_row(key.clone(), vec![value, Value::Int(timestamp_ms as i64)])
        {
            drop(guard);
            self.emit_error(&err);
            return;
        }
        let mut affected = BTreeSet::new();
        affected.insert(key.clone());
        let change = self
            .commit(guard, new, kind, Some(affected))
            .with_metadata("metric", key);
        self.dispatch(change, interval);
    }

    /// Swap in `new` under the writer lock and build the resulting change.
    ///
    /// Consumes the guard: the lock is released before this returns, so
    /// callers dispatch without holding it.
    fn commit(
        &self,
        guard: MutexGuard<'_, ()>,
        new: Snapshot,
        kind: ChangeKind,
        affected: Option<BTreeSet<String>>,
    ) -> DataChange {
        *lock(&self.shared.state) = SourceState::Updating;
        let old = self.shared.current.load_full();
        let affected = affected.unwrap_or_else(|| column_diff(&old, &new));
        let timestamp_ms = now_ms();

        if let Some(history) = &self.shared.history {
            let record = ChangeRecord::new(kind, self.shared.config.source_id.clone(), timestamp_ms)
                .with_hashes(snapshot_hash(&old), snapshot_hash(&new))
                .with_snapshots((*old).clone(), new.clone())
                .with_affected_keys(affected.clone());
            lock(history).record_change(record);
        }

        let payload = new.clone();
        self.shared.current.store(Arc::new(new));
        drop(guard);

        DataChange::new(kind, payload, timestamp_ms).with_affected_keys(affected)
    }

    fn dispatch(&self, change: DataChange, interval: Duration) {
        if interval.is_zero() {
            *lock(&self.shared.state) = SourceState::Idle;
            let _delivery = lock(&self.shared.notify_lock);
            let subscribers: Vec<ChangeFn> = lock(&self.shared.subscribers)
                .change
                .iter()
                .map(|(_, f)| Arc::clone(f))
                .collect();
            for subscriber in subscribers {
                subscriber(&change);
            }
            return;
        }

        *lock(&self.shared.notify_interval) = interval;
        let mut buffer = lock(&self.shared.buffer);
        buffer.pending.push(change);
        *lock(&self.shared.state) = SourceState::NotifyPending;
        if !buffer.timer_running {
            buffer.timer_running = true;
            drop(buffer);
            let shared = Arc::clone(&self.shared);
            thread::Builder::new()
                .name("rxdata-notify".into())
                .spawn(move || notify_loop(&shared))
                .expect("failed to spawn notify timer thread");
        }
    }

    fn emit_error(&self, err: &DataError) {
        warn!(error = %err, "skipping malformed update");
        let subscribers: Vec<ErrorFn> = lock(&self.shared.subscribers)
            .error
            .iter()
            .map(|(_, f)| Arc::clone(f))
            .collect();
        for subscriber in subscribers {
            subscriber(err);
        }
    }

    // ── History delegation ──────────────────────────────────────────────

    /// Number of retained history records (0 when history is disabled).
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.shared.history.as_ref().map_or(0, |h| lock(h).len())
    }

    /// The most recent `n` history records, chronological order.
    #[must_use]
    pub fn recent_changes(&self, n: usize) -> Vec<ChangeRecord> {
        self.shared.history.as_ref().map_or_else(Vec::new, |h| {
            lock(h)
                .get_recent_changes(n)
                .into_iter()
                .cloned()
                .collect()
        })
    }

    /// Mark the current history position under `name`.
    ///
    /// Returns false when history is disabled.
    pub fn create_rollback_point(&self, name: impl Into<String>) -> bool {
        match &self.shared.history {
            Some(history) => {
                lock(history).create_rollback_point(name);
                true
            }
            None => false,
        }
    }

    /// Records applied strictly after the named point, most recent first.
    pub fn rollback_to_point(&self, name: &str) -> Result<Vec<ChangeRecord>, HistoryError> {
        match &self.shared.history {
            Some(history) => lock(history).rollback_to_point(name),
            None => Err(HistoryError::RollbackPointNotFound {
                name: name.to_owned(),
            }),
        }
    }
}

/// Fixed shape of the metric table: one row per metric key.
const METRIC_COLUMNS: [&str; 2] = ["value", "timestamp"];

/// Reject snapshots whose columns are not exactly the metric table's.
///
/// Name-blind arity checks are not enough: a foreign two-column schema
/// would accept the upsert and land the metric value in an unrelated
/// column.
fn metric_schema_error(key: &str, snapshot: &Snapshot) -> Option<DataError> {
    for (position, expected) in METRIC_COLUMNS.iter().enumerate() {
        match snapshot.column_index(expected) {
            Some(found) if found == position => {}
            _ => return Some(DataError::UnknownColumn((*expected).to_owned())),
        }
    }
    if snapshot.columns().len() != METRIC_COLUMNS.len() {
        return Some(DataError::SchemaMismatch {
            key: key.to_owned(),
            expected: METRIC_COLUMNS.len(),
            got: snapshot.columns().len(),
        });
    }
    None
}

/// Cheap column-level diff: the set of columns whose hashed contents
/// differ between the snapshots. A conservative superset of the real
/// change — any row addition or removal touches every column — and much
/// cheaper than the detector's full row pass.
fn column_diff(old: &Snapshot, new: &Snapshot) -> BTreeSet<String> {
    let mut affected = BTreeSet::new();
    for column in new.columns() {
        match (column_hash(old, column), column_hash(new, column)) {
            (Some(before), Some(after)) if before == after => {}
            _ => {
                affected.insert(column.clone());
            }
        }
    }
    for column in old.columns() {
        if new.column_index(column).is_none() {
            affected.insert(column.clone());
        }
    }
    affected
}

fn notify_loop(shared: &Arc<SourceShared>) {
    loop {
        let interval = *lock(&shared.notify_interval);
        thread::sleep(interval);
        let drained = {
            let mut buffer = lock(&shared.buffer);
            if buffer.pending.is_empty() {
                buffer.timer_running = false;
                *lock(&shared.state) = SourceState::Idle;
                return;
            }
            std::mem::take(&mut buffer.pending)
        };

        let _delivery = lock(&shared.notify_lock);
        let (changes, batches) = {
            let subs = lock(&shared.subscribers);
            (
                subs.change.iter().map(|(_, f)| Arc::clone(f)).collect::<Vec<_>>(),
                subs.batch.iter().map(|(_, f)| Arc::clone(f)).collect::<Vec<_>>(),
            )
        };
        for change in &drained {
            for subscriber in &changes {
                subscriber(change);
            }
        }
        if drained.len() > 1 {
            debug!(len = drained.len(), "emitting consolidated batch");
            for subscriber in &batches {
                subscriber(&drained);
            }
        }

        let buffer = lock(&shared.buffer);
        if buffer.pending.is_empty() {
            *lock(&shared.state) = SourceState::Idle;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use web_time::Instant;

    fn fast_config() -> SourceConfig {
        SourceConfig {
            source_id: "test".into(),
            batch_interval: Duration::from_millis(10),
        }
    }

    fn table(pairs: &[(&str, i64)]) -> Snapshot {
        let mut s = Snapshot::new(vec!["value".into()]);
        for (k, v) in pairs {
            s.upsert_row(*k, vec![Value::Int(*v)]).unwrap();
        }
        s
    }

    fn recv(rx: &mpsc::Receiver<DataChange>, ms: u64) -> Option<DataChange> {
        rx.recv_timeout(Duration::from_millis(ms)).ok()
    }

    #[test]
    fn update_data_replaces_snapshot_and_notifies() {
        let source = ReactiveDataSource::with_config(fast_config());
        let (tx, rx) = mpsc::channel();
        source.subscribe(move |c| {
            let _ = tx.send(c.clone());
        });

        source.update_data(table(&[("a", 1)]), ChangeKind::Reset);

        let change = recv(&rx, 1000).expect("change should be delivered");
        assert_eq!(change.kind, ChangeKind::Reset);
        assert_eq!(source.snapshot().cell("a", "value"), Some(&Value::Int(1)));
    }

    #[test]
    fn incompatible_metric_update_is_skipped_and_surfaced() {
        let source = ReactiveDataSource::with_config(fast_config());
        source.set_metric_strategy("hr", UpdateStrategy::Immediate);

        let (err_tx, err_rx) = mpsc::channel();
        source.subscribe_errors(move |e| {
            let _ = err_tx.send(e.clone());
        });
        let (tx, rx) = mpsc::channel();
        source.subscribe(move |c| {
            let _ = tx.send(c.clone());
        });

        // A three-column snapshot cannot accept the two-cell metric row.
        let mut wide = Snapshot::new(vec!["a".into(), "b".into(), "c".into()]);
        wide.upsert_row("x", vec![Value::Int(1), Value::Int(2), Value::Int(3)])
            .unwrap();
        source.update_data(wide.clone(), ChangeKind::Reset);
        recv(&rx, 1000).expect("the reset itself is delivered normally");

        source.update_metric("hr", Value::Int(72), 1_000);

        let err = err_rx
            .recv_timeout(Duration::from_millis(1000))
            .expect("schema mismatch must surface on the error channel");
        assert!(matches!(err, DataError::UnknownColumn(_)));
        assert_eq!(
            *source.snapshot(),
            wide,
            "skipped update must leave the prior snapshot current"
        );
        assert!(
            rx.try_recv().is_err(),
            "a skipped update must not notify change subscribers"
        );
    }

    #[test]
    fn metric_update_rejects_arity_compatible_foreign_schema() {
        let source = ReactiveDataSource::with_config(fast_config());
        source.set_metric_strategy("hr", UpdateStrategy::Immediate);

        let (err_tx, err_rx) = mpsc::channel();
        source.subscribe_errors(move |e| {
            let _ = err_tx.send(e.clone());
        });
        let (tx, rx) = mpsc::channel();
        source.subscribe(move |c| {
            let _ = tx.send(c.clone());
        });

        // Two columns, so the upsert's arity check alone would accept the
        // write and drop the value into `systolic`.
        let mut bp = Snapshot::new(vec!["systolic".into(), "diastolic".into()]);
        bp.upsert_row("t0", vec![Value::Int(120), Value::Int(80)])
            .unwrap();
        source.update_data(bp.clone(), ChangeKind::Reset);
        recv(&rx, 1000).expect("the reset itself is delivered normally");

        source.update_metric("hr", Value::Int(72), 1_000);

        let err = err_rx
            .recv_timeout(Duration::from_millis(1000))
            .expect("foreign schema must surface on the error channel");
        assert_eq!(err, DataError::UnknownColumn("value".into()));
        let snap = source.snapshot();
        assert_eq!(*snap, bp, "no cell of the foreign schema may be touched");
        assert!(!snap.contains_key("hr"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn metric_update_rejects_reordered_metric_columns() {
        let source = ReactiveDataSource::with_config(fast_config());
        source.set_metric_strategy("hr", UpdateStrategy::Immediate);

        let (err_tx, err_rx) = mpsc::channel();
        source.subscribe_errors(move |e| {
            let _ = err_tx.send(e.clone());
        });

        // Right names, wrong order: the value would land in `timestamp`.
        let swapped = Snapshot::new(vec!["timestamp".into(), "value".into()]);
        source.update_data(swapped.clone(), ChangeKind::Reset);
        source.update_metric("hr", Value::Int(72), 1_000);

        let err = err_rx
            .recv_timeout(Duration::from_millis(1000))
            .expect("reordered columns must surface on the error channel");
        assert!(matches!(err, DataError::UnknownColumn(_)));
        assert_eq!(*source.snapshot(), swapped);
    }

    #[test]
    fn affected_keys_contains_changed_column() {
        let source = ReactiveDataSource::with_config(fast_config());
        let (tx, rx) = mpsc::channel();
        source.subscribe(move |c| {
            let _ = tx.send(c.clone());
        });

        let mut old = Snapshot::new(vec!["hr".into(), "spo2".into()]);
        old.upsert_row("t0", vec![Value::Int(70), Value::Int(98)])
            .unwrap();
        source.update_data(old.clone(), ChangeKind::Reset);
        recv(&rx, 1000).expect("reset");

        let mut new = old.clone();
        new.upsert_row("t0", vec![Value::Int(75), Value::Int(98)])
            .unwrap();
        source.update_data(new, ChangeKind::Update);

        let change = recv(&rx, 1000).expect("update");
        assert!(
            change.affected_keys.contains("hr"),
            "changed column must be in affected_keys, got {:?}",
            change.affected_keys
        );
    }

    #[test]
    fn immediate_metric_strategy_delivers_synchronously() {
        let source = ReactiveDataSource::with_config(fast_config());
        source.set_metric_strategy("hr", UpdateStrategy::Immediate);

        let (tx, rx) = mpsc::channel();
        source.subscribe(move |c| {
            let _ = tx.send(c.clone());
        });

        source.update_metric("hr", Value::Int(72), 1_000);
        // No waiting: delivery happened on this thread during the call.
        let change = rx.try_recv().expect("synchronous delivery");
        assert_eq!(change.kind, ChangeKind::Add);
        assert!(change.affected_keys.contains("hr"));
        assert_eq!(change.metadata.get("metric").map(String::as_str), Some("hr"));
        assert_eq!(source.state(), SourceState::Idle);
    }

    #[test]
    fn update_metric_upserts_one_row_per_key() {
        let source = ReactiveDataSource::with_config(fast_config());
        source.set_metric_strategy("hr", UpdateStrategy::Immediate);
        source.set_metric_strategy("spo2", UpdateStrategy::Immediate);

        source.update_metric("hr", Value::Int(70), 1);
        source.update_metric("spo2", Value::Int(98), 2);
        source.update_metric("hr", Value::Int(75), 3);

        let snap = source.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.cell("hr", "value"), Some(&Value::Int(75)));
        assert_eq!(snap.cell("hr", "timestamp"), Some(&Value::Int(3)));
    }

    #[test]
    fn rapid_updates_consolidate_into_a_batch_event() {
        let source = ReactiveDataSource::with_config(SourceConfig {
            source_id: "test".into(),
            batch_interval: Duration::from_millis(40),
        });
        let (batch_tx, batch_rx) = mpsc::channel();
        source.subscribe_batch(move |batch| {
            let _ = batch_tx.send(batch.to_vec());
        });
        let (tx, rx) = mpsc::channel();
        source.subscribe(move |c| {
            let _ = tx.send(c.clone());
        });

        source.update_data(table(&[("a", 1)]), ChangeKind::Reset);
        source.update_data(table(&[("a", 2)]), ChangeKind::Update);
        source.update_data(table(&[("a", 3)]), ChangeKind::Update);

        let batch = batch_rx
            .recv_timeout(Duration::from_millis(2000))
            .expect("consolidated batch event");
        assert!(batch.len() >= 2, "batch should hold the coalesced changes");

        // Individual deliveries arrive too, in FIFO order.
        let mut values = Vec::new();
        while let Some(change) = recv(&rx, 200) {
            values.push(change.payload.cell("a", "value").cloned());
            if values.len() == 3 {
                break;
            }
        }
        assert_eq!(
            values,
            vec![
                Some(Value::Int(1)),
                Some(Value::Int(2)),
                Some(Value::Int(3))
            ]
        );
    }

    #[test]
    fn active_metric_reconfigures_update_data_interval() {
        let source = ReactiveDataSource::with_config(SourceConfig {
            source_id: "test".into(),
            batch_interval: Duration::from_millis(500),
        });
        source.set_metric_strategy("fast", UpdateStrategy::Immediate);
        source.set_active_metric("fast");

        let (tx, rx) = mpsc::channel();
        source.subscribe(move |c| {
            let _ = tx.send(c.clone());
        });

        let start = Instant::now();
        source.update_data(table(&[("a", 1)]), ChangeKind::Reset);
        assert!(
            rx.try_recv().is_ok(),
            "active immediate metric should bypass the 500ms batch interval"
        );
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn interval_switch_applies_while_timer_runs() {
        let source = ReactiveDataSource::with_config(SourceConfig {
            source_id: "test".into(),
            batch_interval: Duration::from_millis(500),
        });
        let (tx, rx) = mpsc::channel();
        source.subscribe(move |c| {
            let _ = tx.send(c.clone());
        });

        source.update_data(table(&[("a", 1)]), ChangeKind::Reset);
        recv(&rx, 5000).expect("first window at the slow interval");

        source.set_metric_strategy("fast", UpdateStrategy::Batched(Duration::from_millis(10)));
        source.set_active_metric("fast");
        source.update_data(table(&[("a", 2)]), ChangeKind::Update);
        // The thread may sleep through one stale window before it re-reads
        // the interval; by the time this change is out it has.
        recv(&rx, 5000).expect("second window");

        let start = Instant::now();
        source.update_data(table(&[("a", 3)]), ChangeKind::Update);
        recv(&rx, 5000).expect("third window");
        assert!(
            start.elapsed() < Duration::from_millis(400),
            "a running timer must pick up the reconfigured 10ms interval, took {:?}",
            start.elapsed()
        );
    }

    #[test]
    fn history_records_applied_changes_with_hashes() {
        let source = ReactiveDataSource::with_history(fast_config(), 10);
        source.set_metric_strategy("hr", UpdateStrategy::Immediate);

        source.update_metric("hr", Value::Int(70), 1);
        source.update_metric("hr", Value::Int(75), 2);

        assert_eq!(source.history_len(), 2);
        let recent = source.recent_changes(10);
        assert_eq!(recent.len(), 2);
        assert!(recent[0].is_content_change());
        assert_eq!(recent[0].source_id, "test");
    }

    #[test]
    fn rollback_point_round_trip() {
        let source = ReactiveDataSource::with_history(fast_config(), 10);
        source.set_metric_strategy("hr", UpdateStrategy::Immediate);

        source.update_metric("hr", Value::Int(70), 1);
        assert!(source.create_rollback_point("baseline"));
        source.update_metric("hr", Value::Int(75), 2);
        source.update_metric("hr", Value::Int(80), 3);

        let rolled = source.rollback_to_point("baseline").unwrap();
        assert_eq!(rolled.len(), 2, "two changes after the point");
        assert!(
            source.rollback_to_point("missing").is_err(),
            "unknown point is an error"
        );
    }

    #[test]
    fn history_disabled_rollback_fails() {
        let source = ReactiveDataSource::with_config(fast_config());
        assert!(!source.create_rollback_point("p"));
        assert!(source.rollback_to_point("p").is_err());
    }

    #[test]
    fn unsubscribe_stops_future_deliveries() {
        let source = ReactiveDataSource::with_config(fast_config());
        source.set_metric_strategy("hr", UpdateStrategy::Immediate);

        let (tx, rx) = mpsc::channel();
        let id = source.subscribe(move |c| {
            let _ = tx.send(c.clone());
        });
        source.update_metric("hr", Value::Int(1), 1);
        assert!(rx.try_recv().is_ok());

        assert!(source.unsubscribe(id));
        source.update_metric("hr", Value::Int(2), 2);
        assert!(rx.try_recv().is_err());
    }
}
