//! Shared counter store.
//!
//! Limiters that need to agree across processes keep their state in a store
//! that offers atomic increment, atomic decrement and atomic scripted
//! evaluation. Correctness for a single key is delegated entirely to the
//! store: no client-side locking is done.

mod memory;
mod redis_store;

use std::fmt::Debug;

use async_trait::async_trait;

use crate::error::StoreError;

pub use self::memory::MemoryStore;
pub use self::redis_store::{RedisStore, RedisStoreConfig};

/// A multi-step operation the store must run without interleaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicScript {
    /// Evict events older than `now_ms - window_ms`, count what is left and,
    /// when the count is still below `rate`, record an event at `now_ms`.
    ///
    /// Evaluates to `true` when the caller is limited.
    SlidingWindow {
        /// Window length in milliseconds
        window_ms: i64,
        /// Maximum number of events per window
        rate: u64,
        /// Evaluation time in milliseconds since the epoch
        now_ms: i64,
    },
}

impl AtomicScript {
    /// Stable identifier, used in logs.
    pub fn id(&self) -> &'static str {
        match self {
            AtomicScript::SlidingWindow { .. } => "sliding_window",
        }
    }
}

/// Client for a key-value store holding limiter state.
#[async_trait]
pub trait CounterStore: Send + Sync + Debug {
    /// Atomically add one to `key` and return the new value.
    async fn increment(&self, key: &str) -> Result<i64, StoreError>;

    /// Atomically subtract one from `key` and return the new value.
    async fn decrement(&self, key: &str) -> Result<i64, StoreError>;

    /// Run `script` against `key` as a single atomic transaction.
    async fn eval(&self, script: &AtomicScript, key: &str) -> Result<bool, StoreError>;

    /// Read the counter at `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError>;

    /// Remove whatever is stored at `key`.
    async fn reset(&self, key: &str) -> Result<(), StoreError>;
}
