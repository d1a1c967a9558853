//! Sliding-window rate limiter backed by the shared counter store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use super::clock::{Clock, SystemClock};
use super::permit::Permit;
use super::{Limiter, Verdict};
use crate::error::Result;
use crate::store::{AtomicScript, CounterStore};

/// Limits each key to `rate` events in any trailing `interval`.
///
/// The whole evaluation (evict stale events, count, record the new one) runs
/// as one atomic script in the store, so two callers racing on the same key
/// can never both see room for the last slot. Window records expire in the
/// store after `interval` of inactivity.
///
/// Store failures are returned as errors. There is no fallback decision.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    /// Window length in milliseconds
    interval_ms: AtomicU64,
    /// Maximum events per window
    rate: AtomicU64,
}

impl SlidingWindowLimiter {
    /// Create a limiter allowing `rate` events per `interval` for each key.
    pub fn new(store: Arc<dyn CounterStore>, interval: Duration, rate: u64) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            interval_ms: AtomicU64::new(window_millis(interval)),
            rate: AtomicU64::new(rate),
        }
    }

    /// Use a different time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Get the window length.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::SeqCst))
    }

    /// Change the window length for subsequent evaluations.
    pub fn set_interval(&self, interval: Duration) -> &Self {
        self.interval_ms
            .store(window_millis(interval), Ordering::SeqCst);
        self
    }

    /// Get the maximum events per window.
    pub fn rate(&self) -> u64 {
        self.rate.load(Ordering::SeqCst)
    }

    /// Change the maximum events per window for subsequent evaluations.
    pub fn set_rate(&self, rate: u64) -> &Self {
        self.rate.store(rate, Ordering::SeqCst);
        self
    }

    /// Evaluate `key` as of `now_ms`. Returns `true` when limited.
    pub async fn limit_at(&self, key: &str, now_ms: i64) -> Result<bool> {
        let script = AtomicScript::SlidingWindow {
            window_ms: i64::try_from(self.interval_ms.load(Ordering::SeqCst)).unwrap_or(i64::MAX),
            rate: self.rate(),
            now_ms,
        };

        trace!(key = %key, now_ms, ?script, "Checking sliding window");

        let limited = self.store.eval(&script, key).await?;
        if limited {
            debug!(key = %key, rate = self.rate(), "Sliding window limit exceeded");
        }
        Ok(limited)
    }
}

/// Window length in whole milliseconds, kept within `1..=i64::MAX`.
///
/// A zero window would expire the record as soon as it is written.
fn window_millis(interval: Duration) -> u64 {
    let ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    if ms == 0 {
        warn!(?interval, "Sliding window shorter than 1ms, using 1ms");
    }
    ms.clamp(1, i64::MAX as u64)
}

#[async_trait]
impl Limiter for SlidingWindowLimiter {
    async fn limit(&self, key: &str) -> Result<Verdict> {
        let limited = self.limit_at(key, self.clock.now_ms()).await?;
        Ok(if limited {
            Verdict::Limited
        } else {
            Verdict::Admitted(Permit::empty())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::ManualClock;
    use crate::store::MemoryStore;

    fn window_limiter(rate: u64, interval_ms: u64) -> (SlidingWindowLimiter, ManualClock) {
        let clock = ManualClock::new(0);
        let limiter = SlidingWindowLimiter::new(
            Arc::new(MemoryStore::new()),
            Duration::from_millis(interval_ms),
            rate,
        )
        .with_clock(Arc::new(clock.clone()));
        (limiter, clock)
    }

    #[tokio::test]
    async fn test_window_evicts_after_interval() {
        let (limiter, clock) = window_limiter(1, 500);

        assert!(!limiter.limit("k").await.unwrap().is_limited());

        clock.set(300);
        assert!(limiter.limit("k").await.unwrap().is_limited());

        clock.set(510);
        assert!(!limiter.limit("k").await.unwrap().is_limited());
    }

    #[tokio::test]
    async fn test_rate_counts_events_in_window() {
        let (limiter, clock) = window_limiter(3, 1000);

        for t in [0, 100, 200] {
            clock.set(t);
            assert!(!limiter.limit("k").await.unwrap().is_limited());
        }
        clock.set(300);
        assert!(limiter.limit("k").await.unwrap().is_limited());
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let (limiter, _clock) = window_limiter(1, 1000);

        assert!(!limiter.limit("a").await.unwrap().is_limited());
        assert!(limiter.limit("a").await.unwrap().is_limited());
        assert!(!limiter.limit("b").await.unwrap().is_limited());
    }

    #[tokio::test]
    async fn test_rate_and_interval_hot_swap() {
        let (limiter, clock) = window_limiter(1, 1000);
        assert!(!limiter.limit("k").await.unwrap().is_limited());
        assert!(limiter.limit("k").await.unwrap().is_limited());

        limiter.set_rate(2);
        assert_eq!(limiter.rate(), 2);
        assert!(!limiter.limit("k").await.unwrap().is_limited());

        limiter.set_interval(Duration::from_millis(100));
        assert_eq!(limiter.interval(), Duration::from_millis(100));
        clock.set(150);
        assert!(!limiter.limit("k").await.unwrap().is_limited());
    }

    #[tokio::test]
    async fn test_admitted_verdict_holds_no_capacity() {
        let (limiter, _clock) = window_limiter(1, 1000);
        match limiter.limit("k").await.unwrap() {
            Verdict::Admitted(permit) => assert!(!permit.holds_capacity()),
            Verdict::Limited => panic!("first event should be admitted"),
        }
    }

    #[test]
    fn test_interval_is_clamped() {
        let limiter = SlidingWindowLimiter::new(Arc::new(MemoryStore::new()), Duration::ZERO, 1);
        assert_eq!(limiter.interval(), Duration::from_millis(1));

        limiter.set_interval(Duration::from_micros(900));
        assert_eq!(limiter.interval(), Duration::from_millis(1));

        limiter.set_interval(Duration::MAX);
        assert_eq!(limiter.interval(), Duration::from_millis(i64::MAX as u64));
    }

    #[tokio::test]
    async fn test_huge_interval_does_not_wrap() {
        let (limiter, clock) = window_limiter(1, 1000);
        limiter.set_interval(Duration::MAX);

        clock.set(1_700_000_000_000);
        assert!(!limiter.limit("k").await.unwrap().is_limited());
        clock.advance(Duration::from_secs(86_400));
        assert!(limiter.limit("k").await.unwrap().is_limited());
    }
}
