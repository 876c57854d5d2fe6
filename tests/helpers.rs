// Shared fakes for the integration tests.
//
// `FakeDb` stands in for a DB2 server: every session opened through its
// factory shares one call counter and one script deciding each call's result.

#![allow(dead_code)] // Each test binary uses a different subset

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use st_transform_repro::{
    Config, Connection, ConnectionError, ConnectionFactory, QueryError,
};

pub const UDF_ABEND: &str = "SQL0430N  User defined function \"DB2GSE.ST_TRANSFORM\" \
(specific name \"STTRANSFORM\") has abnormally terminated.  SQLSTATE=38503 SQLCODE=-430";

pub const INSTANCE_DOWN: &str =
    "SQL1224N  The database manager is not able to accept new requests, has terminated all \
requests in progress, or has terminated the specified request because of an error or a forced \
interrupt.  SQLSTATE=55032";

pub type Script = Box<dyn Fn(u64) -> Result<Option<String>, QueryError> + Send + Sync>;

pub struct FakeDb {
    script: Script,
    /// Per-call latency
    pub delay: Duration,
    /// Call index that never returns on its own
    pub hang_on: Option<u64>,
    pub calls: AtomicU64,
    pub failures_returned: AtomicU64,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub active: AtomicUsize,
    pub peak_active: AtomicUsize,
    pub refuse_connections: AtomicBool,
}

impl FakeDb {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(u64) -> Result<Option<String>, QueryError> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            delay: Duration::from_millis(1),
            hang_on: None,
            calls: AtomicU64::new(0),
            failures_returned: AtomicU64::new(0),
            opened: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
            refuse_connections: AtomicBool::new(false),
        }
    }

    pub fn healthy() -> Self {
        Self::new(|_| Ok(Some("POINT (-98.71447796 29.48604692)".to_string())))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn hanging_on(mut self, call: u64) -> Self {
        self.hang_on = Some(call);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

pub struct FakeSession {
    db: Arc<FakeDb>,
}

#[async_trait]
impl Connection for FakeSession {
    async fn execute(&mut self, _sql: &str) -> Result<Option<String>, QueryError> {
        let n = self.db.calls.fetch_add(1, Ordering::SeqCst);
        let now_active = self.db.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.db.peak_active.fetch_max(now_active, Ordering::SeqCst);

        if self.db.hang_on == Some(n) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        tokio::time::sleep(self.db.delay).await;

        let result = (self.db.script)(n);
        if result.is_err() {
            self.db.failures_returned.fetch_add(1, Ordering::SeqCst);
        }
        self.db.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn close(self: Box<Self>) {
        self.db.closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeFactory {
    pub db: Arc<FakeDb>,
}

#[async_trait]
impl ConnectionFactory for FakeFactory {
    async fn connect(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        if self.db.refuse_connections.load(Ordering::SeqCst) {
            return Err(ConnectionError::new(
                "SQL30081N  A communication error has been detected. Communication protocol \
being used: \"TCP/IP\".  Location where the error was detected: \"127.0.0.1\".  SQLSTATE=08001",
            ));
        }
        self.db.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            db: Arc::clone(&self.db),
        }))
    }

    fn describe(&self) -> String {
        "fake://db2inst1@127.0.0.1:50000/SAMPLE".to_string()
    }
}

pub fn factory(db: &Arc<FakeDb>) -> Arc<dyn ConnectionFactory> {
    Arc::new(FakeFactory { db: Arc::clone(db) })
}

/// Unbounded run with `workers` workers sharing `pool_size` sessions.
pub fn config(workers: usize, pool_size: usize) -> Config {
    Config {
        workers: Some(workers),
        pool_size,
        duration: Duration::ZERO,
        shutdown_grace: Duration::from_secs(2),
        progress_interval: Duration::ZERO,
        ..Default::default()
    }
}
