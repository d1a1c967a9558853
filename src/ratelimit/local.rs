//! In-process active-unit limiter.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::permit::Permit;
use super::{Limiter, Verdict};
use crate::error::Result;

/// Caps how many units of work are in flight in this process.
///
/// The counter is incremented before it is compared with the maximum, so
/// under contention it can briefly read one above the cap. A unit is admitted
/// when the post-increment value is `<= max_active`.
///
/// Lock-free: both the counter and the cap are plain atomics.
#[derive(Debug)]
pub struct LocalActiveLimiter {
    /// Units admitted and not yet released
    active: Arc<AtomicI64>,
    /// Maximum units in flight, swappable at runtime
    max_active: AtomicI64,
}

impl LocalActiveLimiter {
    /// Create a limiter allowing `max_active` concurrent units.
    pub fn new(max_active: i64) -> Self {
        Self {
            active: Arc::new(AtomicI64::new(0)),
            max_active: AtomicI64::new(max_active),
        }
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

    /// Get the number of units currently counted as active.
    pub fn active(&self) -> i64 {
        self.active.load(Ordering::SeqCst)
    }

    /// Increment the counter and return the post-increment value together
    /// with the permit that undoes it.
    pub fn acquire(&self) -> (i64, Permit) {
        let current = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        (current, Permit::local(self.active.clone()))
    }

    /// Acquire and decide. A rejected acquisition is released immediately.
    pub fn try_acquire(&self) -> Verdict {
        let (current, permit) = self.acquire();
        let max_active = self.max_active();

        trace!(current, max_active, "Checking local active limit");

        if current <= max_active {
            Verdict::Admitted(permit)
        } else {
            debug!(current, max_active, "Local active limit exceeded");
            drop(permit);
            Verdict::Limited
        }
    }
}

#[async_trait]
impl Limiter for LocalActiveLimiter {
    /// The key is ignored: one limiter instance is one bucket.
    async fn limit(&self, _key: &str) -> Result<Verdict> {
        Ok(self.try_acquire())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits_up_to_max() {
        let limiter = LocalActiveLimiter::new(2);

        let first = limiter.try_acquire();
        let second = limiter.try_acquire();
        let third = limiter.try_acquire();

        assert!(!first.is_limited());
        assert!(!second.is_limited());
        assert!(third.is_limited());
        // the rejected acquisition has already been given back
        assert_eq!(limiter.active(), 2);
    }

    #[test]
    fn test_release_frees_capacity() {
        let limiter = LocalActiveLimiter::new(1);

        let held = limiter.try_acquire();
        assert!(limiter.try_acquire().is_limited());

        drop(held);
        assert_eq!(limiter.active(), 0);
        assert!(!limiter.try_acquire().is_limited());
    }

    #[test]
    fn test_acquire_reports_post_increment_value() {
        let limiter = LocalActiveLimiter::new(0);

        let (first, _a) = limiter.acquire();
        let (second, _b) = limiter.acquire();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[test]
    fn test_set_max_active_hot_swaps() {
        let limiter = LocalActiveLimiter::new(1);
        let _held = limiter.try_acquire();
        assert!(limiter.try_acquire().is_limited());

        limiter.set_max_active(2);
        assert_eq!(limiter.max_active(), 2);
        assert!(!limiter.try_acquire().is_limited());
    }

    #[test]
    fn test_zero_max_rejects_everything() {
        let limiter = LocalActiveLimiter::new(0);
        assert!(limiter.try_acquire().is_limited());
        assert_eq!(limiter.active(), 0);
    }

    #[tokio::test]
    async fn test_counter_settles_after_concurrent_units() {
        let limiter = Arc::new(LocalActiveLimiter::new(4));
        let mut handles = Vec::new();

        for _ in 0..32 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                let verdict = limiter.limit("ignored").await.unwrap();
                tokio::task::yield_now().await;
                !verdict.is_limited()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert!(admitted >= 4);
        assert_eq!(limiter.active(), 0);
    }
}
