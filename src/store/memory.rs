//! In-process counter store.
//!
//! Gives the same per-key atomicity as the Redis store, but only within one
//! process. Useful for single-node deployments and for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::{AtomicScript, CounterStore};
use crate::error::StoreError;

/// Events recorded for one sliding-window key.
#[derive(Debug, Default)]
struct WindowRecord {
    /// Event times in ms, oldest first
    events: VecDeque<i64>,
    /// Record is reclaimed once evaluation time passes this point
    expires_at_ms: i64,
}

/// Window evaluations between sweeps of expired records.
const DEFAULT_PURGE_INTERVAL: u64 = 1024;

/// A `CounterStore` held entirely in memory.
///
/// Every operation on a key runs under that key's shard lock, so the
/// sliding-window script is atomic with respect to other callers on the same key.
///
/// Idle keys are reclaimed: a counter is removed once it settles back to
/// zero, and expired window records are swept every `purge_interval`
/// evaluations.
#[derive(Debug)]
pub struct MemoryStore {
    counters: DashMap<String, i64>,
    windows: DashMap<String, WindowRecord>,
    evaluations: AtomicU64,
    purge_interval: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            counters: DashMap::new(),
            windows: DashMap::new(),
            evaluations: AtomicU64::new(0),
            purge_interval: DEFAULT_PURGE_INTERVAL,
        }
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sweep expired window records every `every` evaluations (at least 1).
    pub fn with_purge_interval(mut self, every: u64) -> Self {
        self.purge_interval = every.max(1);
        self
    }

    /// Number of window keys currently held, expired or not.
    pub fn window_keys(&self) -> usize {
        self.windows.len()
    }

    /// Drop window records whose TTL ran out before `now_ms`.
    ///
    /// Returns the number of records removed.
    pub fn purge_expired(&self, now_ms: i64) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, record| record.expires_at_ms > now_ms);
        before - self.windows.len()
    }

    /// Number of events currently held for a window key.
    pub fn window_len(&self, key: &str) -> usize {
        self.windows.get(key).map(|r| r.events.len()).unwrap_or(0)
    }

    fn sliding_window(&self, key: &str, window_ms: i64, rate: u64, now_ms: i64) -> bool {
        let mut record = self.windows.entry(key.to_string()).or_default();

        if record.expires_at_ms <= now_ms {
            record.events.clear();
        }

        let oldest_kept = now_ms.saturating_sub(window_ms);
        while record.events.front().is_some_and(|&t| t < oldest_kept) {
            record.events.pop_front();
        }

        let count = record.events.len() as u64;
        trace!(key = %key, count, rate, now_ms, "Evaluated window record");
        if count >= rate {
            return true;
        }

        record.events.push_back(now_ms);
        record.expires_at_ms = now_ms.saturating_add(window_ms);
        false
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let mut value = self.counters.entry(key.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn decrement(&self, key: &str) -> Result<i64, StoreError> {
        match self.counters.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                *entry.get_mut() -= 1;
                let value = *entry.get();
                if value == 0 {
                    entry.remove();
                }
                Ok(value)
            }
            Entry::Vacant(entry) => {
                entry.insert(-1);
                Ok(-1)
            }
        }
    }

    async fn eval(&self, script: &AtomicScript, key: &str) -> Result<bool, StoreError> {
        let limited = match *script {
            AtomicScript::SlidingWindow {
                window_ms,
                rate,
                now_ms,
            } => {
                let limited = self.sliding_window(key, window_ms, rate, now_ms);
                // the record's shard lock is released by now
                let n = self.evaluations.fetch_add(1, Ordering::Relaxed) + 1;
                if n % self.purge_interval == 0 {
                    let purged = self.purge_expired(now_ms);
                    debug!(purged, remaining = self.windows.len(), "Swept expired window records");
                }
                limited
            }
        };
        Ok(limited)
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        Ok(self.counters.get(key).map(|v| *v))
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        self.counters.remove(key);
        self.windows.remove(key);
        Ok(())
    }
}
