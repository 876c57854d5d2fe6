//! In-memory sessions for unit tests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::connection::{Connection, ConnectionFactory};
use crate::error_handling::{ConnectionError, QueryError};

/// Decides the result of the n-th query (0-based, counted across all sessions
/// sharing the counter).
pub type Script = Arc<dyn Fn(u64) -> Result<Option<String>, QueryError> + Send + Sync>;

pub fn scripted<F>(f: F) -> Script
where
    F: Fn(u64) -> Result<Option<String>, QueryError> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub struct FakeConnection {
    script: Script,
    calls: Arc<AtomicU64>,
    delay: Option<Duration>,
    closed: Arc<AtomicUsize>,
}

impl FakeConnection {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: Arc::new(AtomicU64::new(0)),
            delay: None,
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn execute(&mut self, _sql: &str) -> Result<Option<String>, QueryError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.script)(n)
    }

    async fn close(self: Box<Self>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory whose sessions share one call counter and one script.
pub struct FakeFactory {
    script: Script,
    pub calls: Arc<AtomicU64>,
    pub opened: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
    pub refuse_connections: AtomicBool,
}

impl FakeFactory {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: Arc::new(AtomicU64::new(0)),
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
            refuse_connections: AtomicBool::new(false),
        }
    }

    pub fn always_ok() -> Self {
        Self::new(scripted(|_| Ok(Some("POINT (-98.71447796 29.48604692)".to_string()))))
    }
}

#[async_trait]
impl ConnectionFactory for FakeFactory {
    async fn connect(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        if self.refuse_connections.load(Ordering::SeqCst) {
            return Err(ConnectionError::new("SQL30081N connection refused"));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            script: Arc::clone(&self.script),
            calls: Arc::clone(&self.calls),
            delay: None,
            closed: Arc::clone(&self.closed),
        }))
    }

    fn describe(&self) -> String {
        "fake://db2".to_string()
    }
}
