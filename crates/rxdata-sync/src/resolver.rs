#![forbid(unsafe_code)]

//! Conflict resolution for concurrent keyed writes.
//!
//! Multiple writers may push values for the same key within one
//! resolution window. [`ConflictResolver::add_change`] only accumulates;
//! [`ConflictResolver::resolve_conflicts`] reduces every pending key to a
//! single value and clears the pending map atomically with producing the
//! result, so no write is ever resolved twice.
//!
//! # Tie-break rule
//!
//! `LastWriteWins` and `FirstWriteWins` sort pending writes by timestamp
//! with a **stable** sort: writes sharing an identical timestamp keep
//! their insertion (arrival) order. This is the documented tie-break, not
//! an accident of map iteration order.
//!
//! # Invariants
//!
//! 1. Resolution is idempotent per call: a second `resolve_conflicts()`
//!    with no interleaving `add_change` returns an empty map.
//! 2. Every key with ≥ 2 pending writes appends exactly one
//!    [`ConflictInfo`] to the bounded conflict log, regardless of strategy.
//! 3. Keys with exactly one pending write pass through unchanged and are
//!    not logged as conflicts.

use std::collections::VecDeque;
use std::sync::Arc;

use ahash::AHashMap;
use tracing::warn;

use rxdata_model::{PendingWrite, Value};

/// Default capacity of the bounded conflict log.
pub const DEFAULT_CONFLICT_LOG_CAPACITY: usize = 1000;

/// How concurrent writes to one key reduce to a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConflictStrategy {
    /// Highest timestamp wins; ties keep arrival order (last arrival wins).
    #[default]
    LastWriteWins,
    /// Lowest timestamp wins; ties keep arrival order (first arrival wins).
    FirstWriteWins,
    /// Numeric values average, lists concatenate and dedupe, maps
    /// shallow-merge in timestamp order; anything else takes the last value.
    MergeValues,
    /// Dispatch to a per-key registered function; keys without one fall
    /// back to `LastWriteWins` with a warning.
    CustomResolver,
}

/// A per-key custom resolution function.
///
/// Receives the key's pending writes sorted by timestamp (stable, arrival
/// order on ties) and returns the resolved value.
pub type ResolverFn = Arc<dyn Fn(&[PendingWrite]) -> Value + Send + Sync>;

/// Record of one resolved multi-write conflict.
#[derive(Debug, Clone)]
pub struct ConflictInfo {
    /// The contested key.
    pub key: String,
    /// Every contending (source_id, value) pair, in timestamp order.
    pub values: Vec<(String, Value)>,
    /// Strategy that produced the resolution.
    pub strategy: ConflictStrategy,
    /// The value that won.
    pub resolved: Value,
    /// Timestamp of the latest contending write, epoch milliseconds.
    pub timestamp_ms: u64,
}

/// Accumulates pending writes and reduces them per strategy.
pub struct ConflictResolver {
    strategy: ConflictStrategy,
    pending: AHashMap<String, Vec<PendingWrite>>,
    resolvers: AHashMap<String, ResolverFn>,
    log: VecDeque<ConflictInfo>,
    log_capacity: usize,
}

impl std::fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("strategy", &self.strategy)
            .field("pending_keys", &self.pending.len())
            .field("custom_resolvers", &self.resolvers.len())
            .field("log_len", &self.log.len())
            .finish()
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(ConflictStrategy::default())
    }
}

impl ConflictResolver {
    /// Create a resolver with the given strategy and the default conflict
    /// log capacity.
    #[must_use]
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self::with_log_capacity(strategy, DEFAULT_CONFLICT_LOG_CAPACITY)
    }

    /// Create a resolver with an explicit conflict log capacity (≥ 1).
    #[must_use]
    pub fn with_log_capacity(strategy: ConflictStrategy, log_capacity: usize) -> Self {
        Self {
            strategy,
            pending: AHashMap::new(),
            resolvers: AHashMap::new(),
            log: VecDeque::new(),
            log_capacity: log_capacity.max(1),
        }
    }

    /// The configured strategy.
    #[must_use]
    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Change the strategy for subsequent resolution passes.
    pub fn set_strategy(&mut self, strategy: ConflictStrategy) {
        self.strategy = strategy;
    }

    /// Register a custom resolution function for one key.
    ///
    /// Only consulted under [`ConflictStrategy::CustomResolver`].
    pub fn register_resolver(
        &mut self,
        key: impl Into<String>,
        resolver: impl Fn(&[PendingWrite]) -> Value + Send + Sync + 'static,
    ) {
        self.resolvers.insert(key.into(), Arc::new(resolver));
    }

    /// Accumulate one pending write. No resolution side effects.
    pub fn add_change(
        &mut self,
        key: impl Into<String>,
        value: Value,
        source_id: impl Into<String>,
        timestamp_ms: u64,
    ) {
        let key = key.into();
        let write = PendingWrite::new(key.clone(), value, source_id, timestamp_ms);
        self.pending.entry(key).or_default().push(write);
    }

    /// Number of keys with at least one pending write.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Reduce all pending writes to one value per key.
    ///
    /// Single-write keys pass through unchanged. Multi-write keys resolve
    /// per strategy and append one [`ConflictInfo`] to the log. The
    /// pending map is taken whole before any resolution work, so the
    /// clear is atomic with producing the result.
    pub fn resolve_conflicts(&mut self) -> AHashMap<String, Value> {
        let pending = std::mem::take(&mut self.pending);
        let mut resolved = AHashMap::with_capacity(pending.len());

        for (key, mut writes) in pending {
            if writes.len() == 1 {
                // No conflict: pass through, no log entry.
                if let Some(write) = writes.pop() {
                    resolved.insert(key, write.value);
                }
                continue;
            }

            // Stable sort: equal timestamps keep arrival order.
            writes.sort_by_key(|w| w.timestamp_ms);
            let value = self.resolve_key(&key, &writes);
            self.push_log(ConflictInfo {
                key: key.clone(),
                values: writes
                    .iter()
                    .map(|w| (w.source_id.clone(), w.value.clone()))
                    .collect(),
                strategy: self.strategy,
                resolved: value.clone(),
                timestamp_ms: writes.last().map_or(0, |w| w.timestamp_ms),
            });
            resolved.insert(key, value);
        }
        resolved
    }

    /// The conflict log, oldest first.
    #[must_use]
    pub fn get_conflict_log(&self) -> &VecDeque<ConflictInfo> {
        &self.log
    }

    fn push_log(&mut self, info: ConflictInfo) {
        if self.log.len() == self.log_capacity {
            self.log.pop_front();
        }
        self.log.push_back(info);
    }

    /// Resolve one multi-write key. `writes` is sorted by timestamp,
    /// length ≥ 2.
    fn resolve_key(&self, key: &str, writes: &[PendingWrite]) -> Value {
        match self.strategy {
            ConflictStrategy::LastWriteWins => last_value(writes),
            ConflictStrategy::FirstWriteWins => {
                writes.first().map_or(Value::Null, |w| w.value.clone())
            }
            ConflictStrategy::MergeValues => merge_values(writes),
            ConflictStrategy::CustomResolver => match self.resolvers.get(key) {
                Some(resolver) => resolver(writes),
                None => {
                    warn!(
                        key,
                        "no custom resolver registered; falling back to last-write-wins"
                    );
                    last_value(writes)
                }
            },
        }
    }
}

fn last_value(writes: &[PendingWrite]) -> Value {
    writes.last().map_or(Value::Null, |w| w.value.clone())
}

/// Merge semantics for [`ConflictStrategy::MergeValues`].
///
/// - all numeric → arithmetic mean (as `Float`)
/// - all lists → concatenation, deduplicated (first occurrence wins)
/// - all maps → shallow merge in timestamp order, later entries override
/// - anything else → last value
fn merge_values(writes: &[PendingWrite]) -> Value {
    if writes.is_empty() {
        return Value::Null;
    }

    if let Some(sum) = writes
        .iter()
        .map(|w| w.value.as_f64())
        .collect::<Option<Vec<f64>>>()
        .map(|nums| nums.iter().sum::<f64>())
    {
        return Value::Float(sum / writes.len() as f64);
    }

    if writes.iter().all(|w| matches!(w.value, Value::List(_))) {
        let mut merged: Vec<Value> = Vec::new();
        for write in writes {
            if let Value::List(items) = &write.value {
                for item in items {
                    if !merged.contains(item) {
                        merged.push(item.clone());
                    }
                }
            }
        }
        return Value::List(merged);
    }

    if writes.iter().all(|w| matches!(w.value, Value::Map(_))) {
        let mut merged = std::collections::BTreeMap::new();
        for write in writes {
            if let Value::Map(map) = &write.value {
                for (k, v) in map {
                    merged.insert(k.clone(), v.clone());
                }
            }
        }
        return Value::Map(merged);
    }

    last_value(writes)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
