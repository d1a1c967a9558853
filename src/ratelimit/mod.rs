//! Admission limiters.
//!
//! Three policies share one capability, [`Limiter`]:
//! - [`SlidingWindowLimiter`]: at most `rate` events per trailing window, per key,
//!   evaluated atomically in the shared store.
//! - [`LocalActiveLimiter`]: at most `max_active` units in flight in this process.
//! - [`DistributedActiveLimiter`]: at most `max_active` units in flight per key,
//!   counted in the shared store.

mod clock;
mod distributed;
mod local;
mod permit;
mod window;

use async_trait::async_trait;

use crate::error::Result;

pub use clock::{Clock, ManualClock, SystemClock};
pub use distributed::DistributedActiveLimiter;
pub use local::LocalActiveLimiter;
pub use permit::Permit;
pub use window::SlidingWindowLimiter;

/// The outcome of asking a limiter about one unit of work.
#[derive(Debug)]
pub enum Verdict {
    /// The unit may proceed. Keep the permit for as long as the work runs.
    Admitted(Permit),
    /// The unit must be rejected.
    Limited,
}

impl Verdict {
    /// Whether the unit was limited.
    pub fn is_limited(&self) -> bool {
        matches!(self, Verdict::Limited)
    }

    /// Take the permit out of an admitted verdict.
    pub fn into_permit(self) -> Option<Permit> {
        match self {
            Verdict::Admitted(permit) => Some(permit),
            Verdict::Limited => None,
        }
    }
}

/// Decides whether a unit of work identified by `key` may proceed.
///
/// An `Err` means the policy could not be evaluated. Callers must not treat it
/// as an admission.
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Evaluate one unit of work for `key`.
    async fn limit(&self, key: &str) -> Result<Verdict>;
}
