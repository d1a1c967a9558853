//! Reserved capacity and its release.
//!
//! Active-unit limiters hand out a [`Permit`] for every successful
//! acquisition. The permit is released exactly once: explicitly through
//! [`Permit::release`], or implicitly when it is dropped. Dropping covers the
//! paths explicit code cannot reach, such as an early error return, a panic
//! unwinding through the guarded work, or the request future being cancelled.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tracing::{trace, warn};

use crate::logging::FailureLogger;
use crate::store::CounterStore;

/// What has to be undone when the permit goes away.
enum Reservation {
    /// An in-process counter.
    Local(Arc<AtomicI64>),
    /// A counter in the shared store.
    Store {
        store: Arc<dyn CounterStore>,
        key: String,
        logger: Arc<dyn FailureLogger>,
    },
}

impl Reservation {
    async fn undo(self) {
        match self {
            Reservation::Local(active) => Self::undo_local(&active),
            Reservation::Store { store, key, logger } => {
                if let Err(e) = store.decrement(&key).await {
                    // The counter for this key stays inflated until corrected out of band.
                    warn!(key = %key, error = %e, "Failed to release shared counter");
                    logger.log("redis - 1", &e);
                } else {
                    trace!(key = %key, "Released shared counter");
                }
            }
        }
    }

    fn undo_local(active: &AtomicI64) {
        let now = active.fetch_sub(1, Ordering::SeqCst) - 1;
        trace!(active = now, "Released local counter");
    }

    /// Release from a synchronous context.
    fn undo_detached(self) {
        match self {
            Reservation::Local(active) => Self::undo_local(&active),
            store @ Reservation::Store { .. } => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(store.undo());
                }
                Err(e) => {
                    if let Reservation::Store { key, logger, .. } = store {
                        warn!(key = %key, "No runtime to release shared counter");
                        logger.log("redis - 1", &e);
                    }
                }
            },
        }
    }
}

/// Capacity held by one admitted unit of work.
pub struct Permit {
    reservation: Option<Reservation>,
}

impl Permit {
    /// A permit with nothing to release.
    pub fn empty() -> Self {
        Self { reservation: None }
    }

    pub(crate) fn local(active: Arc<AtomicI64>) -> Self {
        Self {
            reservation: Some(Reservation::Local(active)),
        }
    }

    pub(crate) fn store(
        store: Arc<dyn CounterStore>,
        key: String,
        logger: Arc<dyn FailureLogger>,
    ) -> Self {
        Self {
            reservation: Some(Reservation::Store { store, key, logger }),
        }
    }

    /// Whether releasing this permit gives capacity back.
    pub fn holds_capacity(&self) -> bool {
        self.reservation.is_some()
    }

    /// Release now and wait for it to finish.
    ///
    /// A failed release is logged, never returned: the guarded work has
    /// already been decided. Store releases run on their own task, so
    /// cancelling this future does not cancel the decrement.
    pub async fn release(mut self) {
        match self.reservation.take() {
            None => {}
            Some(Reservation::Local(active)) => Reservation::undo_local(&active),
            Some(store) => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    if let Err(e) = handle.spawn(store.undo()).await {
                        warn!(error = %e, "Release task did not complete");
                    }
                }
                Err(_) => store.undo().await,
            },
        }
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if let Some(reservation) = self.reservation.take() {
            reservation.undo_detached();
        }
    }
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.reservation {
            None => "empty",
            Some(Reservation::Local(_)) => "local",
            Some(Reservation::Store { .. }) => "store",
        };
        f.debug_struct("Permit").field("kind", &kind).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{AtomicScript, MemoryStore};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Memory store whose decrement takes 100ms.
    #[derive(Debug, Default)]
    struct SlowDecrement(MemoryStore);

    #[async_trait]
    impl CounterStore for SlowDecrement {
        async fn increment(&self, key: &str) -> Result<i64, StoreError> {
            self.0.increment(key).await
        }

        async fn decrement(&self, key: &str) -> Result<i64, StoreError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.0.decrement(key).await
        }

        async fn eval(&self, script: &AtomicScript, key: &str) -> Result<bool, StoreError> {
            self.0.eval(script, key).await
        }

        async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
            self.0.get(key).await
        }

        async fn reset(&self, key: &str) -> Result<(), StoreError> {
            self.0.reset(key).await
        }
    }

    #[test]
    fn test_empty_permit() {
        let permit = Permit::empty();
        assert!(!permit.holds_capacity());
        drop(permit);
    }

    #[test]
    fn test_local_permit_released_on_drop() {
        let active = Arc::new(AtomicI64::new(1));
        let permit = Permit::local(active.clone());
        assert!(permit.holds_capacity());

        drop(permit);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_local_permit_released_once() {
        let active = Arc::new(AtomicI64::new(1));
        let permit = Permit::local(active.clone());

        // release consumes the permit, so the drop that follows is a no-op
        permit.release().await;
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_local_permit_released_when_unwinding() {
        let active = Arc::new(AtomicI64::new(1));
        let guarded = active.clone();

        let result = std::panic::catch_unwind(move || {
            let _permit = Permit::local(guarded);
            panic!("guarded work aborted");
        });

        assert!(result.is_err());
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_store_permit_release() {
        let store = Arc::new(MemoryStore::new());
        store.increment("k").await.unwrap();

        let permit = Permit::store(store.clone(), "k".to_string(), Arc::new(crate::logging::TracingLogger));
        permit.release().await;

        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_permit_released_on_drop() {
        let store = Arc::new(MemoryStore::new());
        store.increment("k").await.unwrap();

        drop(Permit::store(store.clone(), "k".to_string(), Arc::new(crate::logging::TracingLogger)));

        // the decrement runs on a spawned task
        for _ in 0..50 {
            if store.get("k").await.unwrap().is_none() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[test]
    fn test_store_permit_dropped_outside_runtime_is_logged() {
        let store = Arc::new(MemoryStore::new());
        tokio_test::assert_ok!(tokio_test::block_on(store.increment("k")));

        let lines = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = lines.clone();
        let logger = move |message: &str, _error: &dyn fmt::Display| {
            sink.lock().unwrap().push(message.to_string());
        };

        drop(Permit::store(store.clone(), "k".to_string(), Arc::new(logger)));

        assert_eq!(lines.lock().unwrap().as_slice(), ["redis - 1"]);
        assert_eq!(tokio_test::block_on(store.get("k")).unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_store_release_survives_cancellation() {
        let store = Arc::new(SlowDecrement::default());
        store.increment("k").await.unwrap();
        store.increment("k").await.unwrap();

        let permit = Permit::store(store.clone(), "k".to_string(), Arc::new(crate::logging::TracingLogger));
        let cancelled = tokio::time::timeout(Duration::from_millis(10), permit.release()).await;
        assert!(cancelled.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(store.get("k").await.unwrap(), Some(1));
    }
}
