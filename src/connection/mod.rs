//! Database session abstraction.
//!
//! The harness never talks to a driver directly. Workers hold a
//! `Box<dyn Connection>` borrowed from the pool, and the pool opens sessions
//! through a [`ConnectionFactory`]. The ODBC backend (feature `odbc`)
//! implements both traits for a real DB2 endpoint; tests substitute fakes.

use async_trait::async_trait;

use crate::error_handling::{ConnectionError, QueryError};

#[cfg(feature = "odbc")]
mod odbc;

#[cfg(feature = "odbc")]
pub use odbc::{OdbcConnection, OdbcConnectionFactory};

/// An exclusive-use session against the database under test.
#[async_trait]
pub trait Connection: Send {
    /// Executes `sql` once and returns the first column of the first row as text.
    ///
    /// Must not retry. Errors carry the driver's full diagnostic text.
    async fn execute(&mut self, sql: &str) -> Result<Option<String>, QueryError>;

    /// Closes the session. Errors while closing are swallowed by implementations.
    async fn close(self: Box<Self>);
}

/// Opens new sessions for the pool.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>, ConnectionError>;

    /// Human-readable target description (never contains credentials).
    fn describe(&self) -> String;
}
