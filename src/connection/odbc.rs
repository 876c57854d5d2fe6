//! DB2 sessions over the IBM CLI/ODBC driver.
//!
//! ODBC calls block, so every call runs on Tokio's blocking pool. Each
//! in-flight query therefore occupies its own OS thread, which is what gives
//! the workload real parallelism against the server.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use odbc_api::{ConnectionOptions, Cursor, Environment};

use super::{Connection, ConnectionFactory};
use crate::config::DbEndpoint;
use crate::error_handling::{ConnectionError, QueryError};

type SharedHandle = Arc<Mutex<odbc_api::Connection<'static>>>;

static ENVIRONMENT: OnceLock<Environment> = OnceLock::new();

/// Process-wide ODBC environment, created on first use.
fn environment() -> Result<&'static Environment, ConnectionError> {
    if let Some(env) = ENVIRONMENT.get() {
        return Ok(env);
    }
    let env = Environment::new()
        .map_err(|e| ConnectionError::new(format!("ODBC environment: {e}")))?;
    // Losing the race drops our environment; the winner's is used
    let _ = ENVIRONMENT.set(env);
    ENVIRONMENT
        .get()
        .ok_or_else(|| ConnectionError::new("ODBC environment was not initialized"))
}

fn query_error(e: odbc_api::Error) -> QueryError {
    match &e {
        odbc_api::Error::Diagnostics { record, .. } => QueryError::Database {
            sqlstate: Some(record.state.as_str().to_string()),
            native_code: Some(record.native_error),
            message: e.to_string(),
        },
        _ => QueryError::Driver(e.to_string()),
    }
}

fn run_query(
    handle: &Mutex<odbc_api::Connection<'static>>,
    sql: &str,
    timeout_sec: Option<usize>,
) -> Result<Option<String>, QueryError> {
    let conn = handle
        .lock()
        .map_err(|_| QueryError::Driver("connection handle poisoned".to_string()))?;
    let mut statement = conn.preallocate().map_err(query_error)?;
    if let Some(secs) = timeout_sec {
        statement.set_query_timeout_sec(secs).map_err(query_error)?;
    }
    let Some(mut cursor) = statement.execute(sql, ()).map_err(query_error)? else {
        return Ok(None);
    };
    let Some(mut row) = cursor.next_row().map_err(query_error)? else {
        return Ok(None);
    };
    let mut buf = Vec::new();
    if !row.get_text(1, &mut buf).map_err(query_error)? {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Drops `value` on the blocking pool, logging a panicking drop.
///
/// Returns `false` when the drop did not complete.
async fn drop_blocking<T: Send + 'static>(value: T) -> bool {
    match tokio::task::spawn_blocking(move || drop(value)).await {
        Ok(()) => true,
        Err(e) => {
            debug!("Disconnect task failed: {}", e);
            false
        }
    }
}

/// One autocommit DB2 session.
pub struct OdbcConnection {
    handle: Option<SharedHandle>,
    query_timeout_sec: Option<usize>,
}

#[async_trait]
impl Connection for OdbcConnection {
    async fn execute(&mut self, sql: &str) -> Result<Option<String>, QueryError> {
        let handle = self
            .handle
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| QueryError::Driver("connection already closed".to_string()))?;
        let sql = sql.to_string();
        let timeout_sec = self.query_timeout_sec;
        tokio::task::spawn_blocking(move || run_query(&handle, &sql, timeout_sec))
            .await
            .map_err(|e| QueryError::Driver(format!("query task failed: {e}")))?
    }

    async fn close(mut self: Box<Self>) {
        if let Some(handle) = self.handle.take() {
            // Disconnect blocks; a query abandoned by a timeout still holds a clone
            drop_blocking(handle).await;
        }
    }
}

/// Opens [`OdbcConnection`]s against one endpoint.
pub struct OdbcConnectionFactory {
    endpoint: DbEndpoint,
    query_timeout: Option<Duration>,
}

impl OdbcConnectionFactory {
    /// `query_timeout` is also pushed down to the driver so the server cancels
    /// the statement, not just the client.
    pub fn new(endpoint: DbEndpoint, query_timeout: Option<Duration>) -> Self {
        Self {
            endpoint,
            query_timeout,
        }
    }
}

#[async_trait]
impl ConnectionFactory for OdbcConnectionFactory {
    async fn connect(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        let env = environment()?;
        let connection_string = self.endpoint.connection_string();
        let conn = tokio::task::spawn_blocking(move || {
            env.connect_with_connection_string(&connection_string, ConnectionOptions::default())
                .map_err(|e| ConnectionError::new(e.to_string()))
        })
        .await
        .map_err(|e| ConnectionError::new(format!("connect task failed: {e}")))??;
        debug!("Opened DB2 session to {}", self.describe());

        Ok(Box::new(OdbcConnection {
            handle: Some(Arc::new(Mutex::new(conn))),
            query_timeout_sec: self
                .query_timeout
                .map(|t| t.as_secs().max(1) as usize),
        }))
    }

    fn describe(&self) -> String {
        self.endpoint.redacted()
    }
}
