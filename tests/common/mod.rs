//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use http::{Request, Response};
use warden::error::StoreError;
use warden::logging::FailureLogger;
use warden::store::{AtomicScript, CounterStore, MemoryStore};

/// Memory store whose commands can be switched to fail or to stall.
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_increment: AtomicBool,
    pub fail_decrement: AtomicBool,
    pub fail_eval: AtomicBool,
    /// Delay increments and evaluations by 100ms before they run
    pub stall: AtomicBool,
}

impl FlakyStore {
    async fn maybe_stall(&self) {
        if self.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{} refused", what)));
        }
        Ok(())
    }
}

#[async_trait]
impl CounterStore for FlakyStore {
    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        self.maybe_stall().await;
        Self::check(&self.fail_increment, "INCR")?;
        self.inner.increment(key).await
    }

    async fn decrement(&self, key: &str) -> Result<i64, StoreError> {
        Self::check(&self.fail_decrement, "DECR")?;
        self.inner.decrement(key).await
    }

    async fn eval(&self, script: &AtomicScript, key: &str) -> Result<bool, StoreError> {
        self.maybe_stall().await;
        Self::check(&self.fail_eval, "EVAL")?;
        self.inner.eval(script, key).await
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        self.inner.get(key).await
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        self.inner.reset(key).await
    }
}

/// Logger that keeps every line.
#[derive(Debug, Clone, Default)]
pub struct Lines(pub Arc<Mutex<Vec<String>>>);

impl Lines {
    pub fn taken(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl FailureLogger for Lines {
    fn log(&self, message: &str, error: &dyn fmt::Display) {
        self.0.lock().unwrap().push(format!("{}: {}", message, error));
    }
}

/// Counts requests that reach it. `/slow` takes 300ms, `/panic` panics.
#[derive(Debug, Clone, Default)]
pub struct Handler {
    pub hits: Arc<AtomicUsize>,
}

impl Handler {
    pub async fn handle(self, req: Request<()>) -> Result<Response<String>, Infallible> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        match req.uri().path() {
            "/slow" => tokio::time::sleep(Duration::from_millis(300)).await,
            "/panic" => panic!("handler blew up"),
            _ => {}
        }
        Ok(Response::new("ok".to_string()))
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

pub fn get(path: &str) -> Request<()> {
    Request::builder().uri(path).body(()).unwrap()
}

pub fn get_from(path: &str, addr: &str) -> Request<()> {
    Request::builder()
        .uri(path)
        .header("x-forwarded-for", addr)
        .body(())
        .unwrap()
}
