//! Redis-backed counter store.
//!
//! Counters use `INCR`/`DECR`. The sliding window is a sorted set scored by
//! event time, maintained by a Lua script so eviction, counting and recording
//! happen in one atomic step on the server.
//!
//! Commands are never retried. A command that outlives
//! [`RedisStoreConfig::command_timeout`] is abandoned and reported as
//! [`StoreError::Timeout`].

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult, Script};
use tracing::{debug, info};

use super::{AtomicScript, CounterStore};
use crate::error::StoreError;

const SLIDE_WINDOW_SCRIPT: &str = include_str!("slide_window.lua");

/// Configuration for the Redis store.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Prepended to every key (default: empty)
    pub key_prefix: String,
    /// Deadline for a single command (default: 500ms)
    pub command_timeout: Option<Duration>,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            command_timeout: Some(Duration::from_millis(500)),
        }
    }
}

/// A `CounterStore` shared by every process connected to the same Redis.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
    window_script: Script,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect with default configuration.
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the connection fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect with custom configuration.
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the connection fails.
    pub async fn connect_with_config(
        url: &str,
        config: RedisStoreConfig,
    ) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        info!(
            key_prefix = %config.key_prefix,
            command_timeout = ?config.command_timeout,
            "Connected to Redis counter store"
        );

        Ok(Self {
            connection,
            config,
            window_script: Script::new(SLIDE_WINDOW_SCRIPT),
        })
    }

    /// Get the configuration in use.
    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// Await a command, bounded by the configured deadline.
    async fn run<T, F>(&self, command: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match self.config.command_timeout {
            Some(limit) => tokio::time::timeout(limit, command)
                .await
                .map_err(|_| StoreError::Timeout(limit))?
                .map_err(StoreError::from),
            None => command.await.map_err(StoreError::from),
        }
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let key = self.key(key);
        let mut conn = self.connection.clone();
        self.run(conn.incr(&key, 1)).await
    }

    async fn decrement(&self, key: &str) -> Result<i64, StoreError> {
        let key = self.key(key);
        let mut conn = self.connection.clone();
        self.run(conn.decr(&key, 1)).await
    }

    async fn eval(&self, script: &AtomicScript, key: &str) -> Result<bool, StoreError> {
        let key = self.key(key);
        let mut conn = self.connection.clone();

        match *script {
            AtomicScript::SlidingWindow {
                window_ms,
                rate,
                now_ms,
            } => {
                // Two events in the same millisecond must stay distinct members.
                let member = format!("{}-{}", now_ms, uuid::Uuid::new_v4());
                let mut invocation = self.window_script.key(&key);
                invocation.arg(window_ms).arg(rate).arg(now_ms).arg(member);

                let reply: i64 = self.run(invocation.invoke_async(&mut conn)).await?;
                debug!(key = %key, script = script.id(), reply, "Evaluated script");
                match reply {
                    0 => Ok(false),
                    1 => Ok(true),
                    other => Err(StoreError::UnexpectedReply(format!(
                        "{} returned {}",
                        script.id(),
                        other
                    ))),
                }
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let key = self.key(key);
        let mut conn = self.connection.clone();
        self.run(conn.get(&key)).await
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        let key = self.key(key);
        let mut conn = self.connection.clone();
        self.run(conn.del::<_, ()>(&key)).await
    }
}
