//! Admission middleware.
//!
//! [`Admission`] adapts any [`Limiter`] into a per-request check: derive a
//! key, ask the limiter, and turn the answer into an [`Outcome`]. It never
//! retries. [`AdmissionLayer`] wires that into a `tower` stack of
//! `http::Request`s.

mod key;
mod layer;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{StoreError, WardenError};
use crate::logging::{FailureLogger, TracingLogger};
use crate::ratelimit::{Limiter, Permit, Verdict};

pub use key::{client_addr, ClientAddrKey, FixedKey, KeyGenerator, DEFAULT_NAMESPACE};
pub use layer::{AdmissionLayer, AdmissionService};

/// What the host pipeline should do with a request.
#[derive(Debug)]
pub enum Outcome {
    /// Continue to the next stage. Hold the permit until the work finishes.
    Admitted(Permit),
    /// Too many requests.
    Rejected,
    /// The limiter could not decide. Treated as an internal failure.
    Failed(WardenError),
}

impl Outcome {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Admitted(_) => "admitted",
            Outcome::Rejected => "rejected",
            Outcome::Failed(_) => "failed",
        }
    }
}

/// A limiter plus the strategies that feed it.
///
/// Defaults: keys from [`ClientAddrKey`] (for `http::Request`s), failures to
/// [`TracingLogger`], no deadline. All can be replaced without touching
/// limiter state.
pub struct Admission<Req> {
    limiter: Arc<dyn Limiter>,
    key_gen: Arc<dyn KeyGenerator<Req>>,
    logger: Arc<dyn FailureLogger>,
    deadline: Option<Duration>,
}

impl<Req> Clone for Admission<Req> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            key_gen: self.key_gen.clone(),
            logger: self.logger.clone(),
            deadline: self.deadline,
        }
    }
}

impl<Req> std::fmt::Debug for Admission<Req> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl<Req: 'static> Admission<Req> {
    /// Guard requests with `limiter`, keyed by caller address.
    pub fn new(limiter: Arc<dyn Limiter>) -> Self
    where
        ClientAddrKey: KeyGenerator<Req>,
    {
        Self::with_key_generator(limiter, ClientAddrKey::default())
    }

    /// Guard requests with `limiter`, keyed by `key_gen`.
    pub fn with_key_generator(
        limiter: Arc<dyn Limiter>,
        key_gen: impl KeyGenerator<Req> + 'static,
    ) -> Self {
        Self {
            limiter,
            key_gen: Arc::new(key_gen),
            logger: Arc::new(TracingLogger),
            deadline: None,
        }
    }

    /// Replace the key generator.
    pub fn set_key_generator(mut self, key_gen: impl KeyGenerator<Req> + 'static) -> Self {
        self.key_gen = Arc::new(key_gen);
        self
    }

    /// Replace the failure logger.
    pub fn set_logger(mut self, logger: impl FailureLogger + 'static) -> Self {
        self.logger = Arc::new(logger);
        self
    }

    /// Give up on a limiter call after `deadline`. The abandoned call counts
    /// as a failure, never as an admission.
    pub fn set_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Derive the limiter key for `request`.
    pub fn key(&self, request: &Req) -> String {
        self.key_gen.key(request)
    }

    /// Evaluate an already derived key.
    pub async fn evaluate(&self, key: &str) -> Outcome {
        trace!(key = %key, "Evaluating admission");

        let verdict = match self.deadline {
            Some(limit) => tokio::time::timeout(limit, self.limiter.limit(key))
                .await
                .unwrap_or_else(|_| Err(StoreError::Timeout(limit).into())),
            None => self.limiter.limit(key).await,
        };

        match verdict {
            Ok(Verdict::Admitted(permit)) => Outcome::Admitted(permit),
            Ok(Verdict::Limited) => {
                debug!(key = %key, "Request rejected by limiter");
                Outcome::Rejected
            }
            Err(e) => {
                self.logger.log("admission check failed", &e);
                Outcome::Failed(e)
            }
        }
    }

    /// Derive the key for `request` and evaluate it.
    pub async fn admit(&self, request: &Req) -> Outcome {
        let key = self.key(request);
        self.evaluate(&key).await
    }
}
