#![forbid(unsafe_code)]

//! Size/delay-batched scheduling of opaque update tokens.
//!
//! [`UpdateScheduler`] coalesces a stream of tokens into consolidated
//! batches to reduce downstream churn. A background thread ticks at a
//! fixed interval and flushes the entire queue as one batch when either
//! trigger fires:
//!
//! - queue length reached `batch_size`, or
//! - the first queued-and-unflushed token has waited `max_delay`.
//!
//! `max_delay` is therefore a hard upper bound (± one tick) on
//! "token enqueued → batch delivered" latency, while bursts that exceed
//! `batch_size` flush sooner.
//!
//! # Idle behavior
//!
//! When a tick finds the queue empty the thread stops itself — no
//! busy-polling while idle. The next [`schedule_update`] respawns it.
//!
//! # Invariants
//!
//! 1. Batches preserve enqueue order.
//! 2. A drained batch is always delivered; there is no cancellation of
//!    in-flight batches.
//! 3. The first-enqueued stamp resets only when the queue empties.
//!
//! [`schedule_update`]: UpdateScheduler::schedule_update

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use web_time::Instant;

use crate::lock;

/// Batching parameters.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Queue length that triggers an immediate flush on the next tick.
    pub batch_size: usize,
    /// Hard upper bound on how long a token may wait before delivery.
    pub max_delay: Duration,
    /// Background timer tick interval.
    pub tick: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_delay: Duration::from_millis(500),
            tick: Duration::from_millis(50),
        }
    }
}

/// Handle identifying one batch subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub(crate) u64);

type BatchFn<T> = Arc<dyn Fn(&[T]) + Send + Sync>;

struct SchedulerState<T> {
    queue: Vec<T>,
    /// When the oldest unflushed token was enqueued. Reset only when the
    /// queue empties.
    first_enqueued: Option<Instant>,
    timer_running: bool,
}

struct SchedulerInner<T> {
    config: SchedulerConfig,
    state: Mutex<SchedulerState<T>>,
    subscribers: Mutex<Vec<(SubscriberId, BatchFn<T>)>>,
    next_id: AtomicU64,
}

/// Batches a stream of update tokens by size or max-delay.
///
/// Cloning the handle shares the same queue and subscribers.
pub struct UpdateScheduler<T: Send + 'static> {
    inner: Arc<SchedulerInner<T>>,
}

impl<T: Send + 'static> Clone for UpdateScheduler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for UpdateScheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("UpdateScheduler")
            .field("queued", &state.queue.len())
            .field("timer_running", &state.timer_running)
            .finish()
    }
}

impl<T: Send + 'static> Default for UpdateScheduler<T> {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl<T: Send + 'static> UpdateScheduler<T> {
    /// Create a scheduler with the given batching parameters.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                state: Mutex::new(SchedulerState {
                    queue: Vec::new(),
                    first_enqueued: None,
                    timer_running: false,
                }),
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register a batch subscriber.
    pub fn subscribe(&self, callback: impl Fn(&[T]) + Send + Sync + 'static) -> SubscriberId {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.subscribers).push((id, Arc::new(callback)));
        id
    }

    /// Remove a batch subscriber. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subs = lock(&self.inner.subscribers);
        let before = subs.len();
        subs.retain(|(sid, _)| *sid != id);
        subs.len() != before
    }

    /// Enqueue one token, starting the batch timer if it is not running.
    pub fn schedule_update(&self, token: T) {
        let mut state = lock(&self.inner.state);
        state.queue.push(token);
        if state.first_enqueued.is_none() {
            state.first_enqueued = Some(Instant::now());
        }
        if !state.timer_running {
            state.timer_running = true;
            drop(state);
            let inner = Arc::clone(&self.inner);
            thread::Builder::new()
                .name("rxdata-scheduler".into())
                .spawn(move || tick_loop(&inner))
                .expect("failed to spawn scheduler tick thread");
        }
    }

    /// Number of queued, unflushed tokens.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        lock(&self.inner.state).queue.len()
    }

    /// Whether the background timer has stopped (empty queue, no thread).
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let state = lock(&self.inner.state);
        !state.timer_running && state.queue.is_empty()
    }

    /// Drain and deliver whatever is queued, immediately and on the
    /// caller's thread. Intended for shutdown paths and tests.
    pub fn flush(&self) {
        let batch = {
            let mut state = lock(&self.inner.state);
            if state.queue.is_empty() {
                return;
            }
            state.first_enqueued = None;
            std::mem::take(&mut state.queue)
        };
        deliver(&self.inner, &batch);
    }
}

fn tick_loop<T: Send + 'static>(inner: &Arc<SchedulerInner<T>>) {
    loop {
        thread::sleep(inner.config.tick);
        let batch = {
            let mut state = lock(&inner.state);
            if state.queue.is_empty() {
                // Idle: stop ourselves. schedule_update respawns.
                state.timer_running = false;
                state.first_enqueued = None;
                return;
            }
            let overdue = state
                .first_enqueued
                .is_some_and(|t| t.elapsed() >= inner.config.max_delay);
            if state.queue.len() >= inner.config.batch_size || overdue {
                state.first_enqueued = None;
                Some(std::mem::take(&mut state.queue))
            } else {
                None
            }
        };
        // Deliver outside the state lock.
        if let Some(batch) = batch {
            deliver(inner, &batch);
        }
    }
}

fn deliver<T: Send + 'static>(inner: &SchedulerInner<T>, batch: &[T]) {
    let subscribers: Vec<BatchFn<T>> = lock(&inner.subscribers)
        .iter()
        .map(|(_, f)| Arc::clone(f))
        .collect();
    for subscriber in subscribers {
        subscriber(batch);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
