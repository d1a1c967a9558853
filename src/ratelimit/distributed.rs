//! Active-unit limiter shared through the counter store.
//!
//! The counter for each key lives in the store, so the cap applies to the
//! sum of units in flight across every process using that store.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::permit::Permit;
use super::{Limiter, Verdict};
use crate::error::{Result, StoreError};
use crate::logging::{FailureLogger, TracingLogger};
use crate::store::CounterStore;

/// Caps units in flight per key across a fleet.
///
/// Acquisition is a single `INCR`; the post-increment value is compared with
/// the cap, so like [`LocalActiveLimiter`](super::LocalActiveLimiter) the
/// count can briefly read one above it. Release is a `DECR`.
///
/// A failed `INCR` is an error and nothing is reserved. A failed `DECR` is
/// logged and swallowed; the counter for that key then stays inflated until
/// it is corrected outside this limiter (see `warden counter reset`).
pub struct DistributedActiveLimiter {
    store: Arc<dyn CounterStore>,
    max_active: AtomicI64,
    logger: Arc<dyn FailureLogger>,
}

impl std::fmt::Debug for DistributedActiveLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedActiveLimiter")
            .field("store", &self.store)
            .field("max_active", &self.max_active)
            .finish_non_exhaustive()
    }
}

impl DistributedActiveLimiter {
    /// Create a limiter allowing `max_active` concurrent units per key.
    pub fn new(store: Arc<dyn CounterStore>, max_active: i64) -> Self {
        Self {
            store,
            max_active: AtomicI64::new(max_active),
            logger: Arc::new(TracingLogger),
        }
    }

    /// Replace the logger used for release failures.
    pub fn with_logger(mut self, logger: Arc<dyn FailureLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Change the cap. Takes effect on the next acquisition.
    pub fn set_max_active(&self, max_active: i64) -> &Self {
        self.max_active.store(max_active, Ordering::SeqCst);
        self
    }

    /// Get the current cap.
    pub fn max_active(&self) -> i64 {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Increment the counter for `key` and return the post-increment value
    /// together with the permit that undoes it.
    ///
    /// On error nothing was reserved and there is nothing to release. The
    /// error is returned, not logged; reporting it is up to the caller.
    ///
    /// The increment runs on its own task. If this future is cancelled after
    /// the increment has landed, the task still builds the permit and
    /// dropping it gives the unit back.
    pub async fn acquire(&self, key: &str) -> Result<(i64, Permit)> {
        let store = self.store.clone();
        let logger = self.logger.clone();
        let key = key.to_string();
        let reserve = async move {
            let current = store.increment(&key).await?;
            Ok::<_, StoreError>((current, Permit::store(store, key, logger)))
        };

        let reserved = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle.spawn(reserve).await.map_err(|e| {
                StoreError::Unavailable(format!("increment task failed: {}", e))
            })?,
            Err(_) => reserve.await,
        };
        Ok(reserved?)
    }

    /// Get the shared counter for `key` without changing it.
    pub async fn current(&self, key: &str) -> Result<i64> {
        Ok(self.store.get(key).await?.unwrap_or(0))
    }
}

#[async_trait]
impl Limiter for DistributedActiveLimiter {
    async fn limit(&self, key: &str) -> Result<Verdict> {
        let (current, permit) = self.acquire(key).await?;
        let max_active = self.max_active();

        trace!(key = %key, current, max_active, "Checking distributed active limit");

        if current <= max_active {
            return Ok(Verdict::Admitted(permit));
        }

        debug!(
            key = %key,
            current,
            max_active,
            "Distributed active limit exceeded"
        );
        permit.release().await;
        Ok(Verdict::Limited)
    }
}
