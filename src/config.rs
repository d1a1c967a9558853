//! Configuration management for Warden.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WardenError};
use crate::middleware::{ClientAddrKey, DEFAULT_NAMESPACE};
use crate::ratelimit::{DistributedActiveLimiter, LocalActiveLimiter, SlidingWindowLimiter};
use crate::store::{CounterStore, RedisStoreConfig};

/// Prefix for environment overrides, e.g. `WARDEN__STORE__URL`.
pub const ENV_PREFIX: &str = "WARDEN";

/// Main configuration for Warden.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Sliding-window limiter configuration
    #[serde(default)]
    pub sliding_window: SlidingWindowConfig,

    /// Active-unit limiter configuration
    #[serde(default)]
    pub active: ActiveConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis connection URL
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Prepended to every key
    #[serde(default)]
    pub key_prefix: String,

    /// Per-command deadline in milliseconds; 0 disables it
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            key_prefix: String::new(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl StoreConfig {
    /// Build the Redis client configuration.
    pub fn redis(&self) -> RedisStoreConfig {
        RedisStoreConfig {
            key_prefix: self.key_prefix.clone(),
            command_timeout: (self.command_timeout_ms > 0)
                .then(|| Duration::from_millis(self.command_timeout_ms)),
        }
    }
}

fn default_store_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_command_timeout_ms() -> u64 {
    500
}

/// Sliding-window limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlidingWindowConfig {
    /// Window length in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Maximum events per window
    #[serde(default = "default_rate")]
    pub rate: u64,

    /// Namespace for caller-address keys
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for SlidingWindowConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            rate: default_rate(),
            namespace: default_namespace(),
        }
    }
}

impl SlidingWindowConfig {
    /// Build a limiter over `store`.
    pub fn build(&self, store: Arc<dyn CounterStore>) -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(store, Duration::from_millis(self.interval_ms), self.rate)
    }

    /// Caller-address keys under the configured namespace.
    pub fn key_generator(&self) -> ClientAddrKey {
        ClientAddrKey::new(self.namespace.clone())
    }
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_rate() -> u64 {
    100
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Active-unit limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveConfig {
    /// Maximum units in flight
    #[serde(default = "default_max_active")]
    pub max_active: i64,

    /// Store key of the shared counter
    #[serde(default = "default_active_key")]
    pub key: String,
}

impl Default for ActiveConfig {
    fn default() -> Self {
        Self {
            max_active: default_max_active(),
            key: default_active_key(),
        }
    }
}

impl ActiveConfig {
    /// Build an in-process limiter.
    pub fn build_local(&self) -> LocalActiveLimiter {
        LocalActiveLimiter::new(self.max_active)
    }

    /// Build a limiter shared through `store`.
    pub fn build_distributed(&self, store: Arc<dyn CounterStore>) -> DistributedActiveLimiter {
        DistributedActiveLimiter::new(store, self.max_active)
    }
}

fn default_max_active() -> i64 {
    100
}

fn default_active_key() -> String {
    "active-limiter".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl WardenConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: WardenConfig = serde_yaml::from_str(yaml)
            .map_err(|e| WardenError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file, then apply `WARDEN__*`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: WardenConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| WardenError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no limiter can run with.
    pub fn validate(&self) -> Result<()> {
        if self.sliding_window.interval_ms == 0 {
            return Err(WardenError::Config(
                "sliding_window.interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.active.max_active < 0 {
            return Err(WardenError::Config(
                "active.max_active must not be negative".to_string(),
            ));
        }
        if self.active.key.is_empty() {
            return Err(WardenError::Config("active.key must not be empty".to_string()));
        }
        Ok(())
    }
}
