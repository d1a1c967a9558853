//! Error types for Warden.
//!
//! A limit decision is never an error: `Verdict::Limited` is a normal result.
//! Everything here means the policy could not be evaluated, and callers are
//! expected to fail closed.

use std::time::Duration;

use thiserror::Error;

/// Failures talking to the shared counter store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Errors reported by the Redis client.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The command did not complete before its deadline.
    #[error("store command timed out after {0:?}")]
    Timeout(Duration),

    /// The store answered with something the client cannot interpret.
    #[error("unexpected reply from store: {0}")]
    UnexpectedReply(String),
}

/// Main error type for Warden operations.
#[derive(Error, Debug)]
pub enum WardenError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The limiter could not reach its counter store
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WardenError {
    /// Whether this error came from the counter store.
    pub fn is_store(&self) -> bool {
        matches!(self, WardenError::Store(_))
    }
}

/// Result type alias for Warden operations.
pub type Result<T> = std::result::Result<T, WardenError>;
