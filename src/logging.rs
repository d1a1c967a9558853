//! Failure logging hook.
//!
//! Limiters and the admission middleware report failures they swallow or
//! convert through a [`FailureLogger`]. The default writes a structured
//! `tracing` event; any `Fn(&str, &dyn Display)` can replace it.

use std::fmt;

use tracing::error;

/// Receives failures that do not propagate as errors.
pub trait FailureLogger: Send + Sync {
    /// Record `error` with a short description of what was being attempted.
    fn log(&self, message: &str, error: &dyn fmt::Display);
}

impl<F> FailureLogger for F
where
    F: Fn(&str, &dyn fmt::Display) + Send + Sync,
{
    fn log(&self, message: &str, error: &dyn fmt::Display) {
        self(message, error)
    }
}

/// Default logger: one `error` level event per failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl FailureLogger for TracingLogger {
    fn log(&self, message: &str, error: &dyn fmt::Display) {
        error!(error = %error, "{}", message);
    }
}
