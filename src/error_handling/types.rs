//! Error type definitions.
//!
//! This module defines the typed errors raised by each layer of the harness and
//! the counter categories tracked while a run is in progress.

use std::time::Duration;

use log::SetLoggerError;
use serde::Serialize;
use strum_macros::EnumIter as EnumIterMacro;
use thiserror::Error;

/// Error types for initialization failures.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)] // All variants end with "Error" by convention
pub enum InitializationError {
    /// Error initializing the logger.
    #[error("Logger initialization error: {0}")]
    LoggerError(#[from] SetLoggerError),

    /// The binary was built without a database backend.
    #[error("No database backend available: {0}")]
    BackendUnavailable(String),
}

/// A session could not be established or re-established.
#[derive(Error, Debug, Clone)]
#[error("Unable to establish DB2 connection: {message}")]
pub struct ConnectionError {
    /// Driver message, including SQLSTATE and native code when present
    pub message: String,
}

impl ConnectionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error types for connection pool operations.
#[derive(Error, Debug, Clone)]
pub enum PoolError {
    /// No connection became available within the acquire deadline.
    #[error("Connection pool exhausted: no connection available within {0:?}")]
    Exhausted(Duration),

    /// The pool has been shut down.
    #[error("Connection pool is closed")]
    Closed,

    /// Opening a new or replacement connection failed.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// A single query attempt failed.
///
/// The message text is kept verbatim because the failure classifier matches on
/// exact DB2 message identifiers and SQL codes.
#[derive(Error, Debug, Clone)]
pub enum QueryError {
    /// The server (or the driver on its behalf) returned a diagnostic.
    #[error("{message}")]
    Database {
        /// Five character SQLSTATE, when the driver reported one
        sqlstate: Option<String>,
        /// Native error code (the DB2 SQLCODE)
        native_code: Option<i32>,
        /// Full diagnostic text
        message: String,
    },

    /// The query did not return within the configured timeout.
    #[error("Query exceeded timeout of {0:?}")]
    Timeout(Duration),

    /// The driver failed outside of a server diagnostic (e.g. a poisoned handle).
    #[error("Driver failure: {0}")]
    Driver(String),
}

impl QueryError {
    /// Convenience constructor for a server diagnostic carrying only text.
    pub fn database(message: impl Into<String>) -> Self {
        QueryError::Database {
            sqlstate: None,
            native_code: None,
            message: message.into(),
        }
    }

    /// Text the classifier matches against.
    ///
    /// The native code is appended as `SQLCODE=<n>` when the message does not
    /// already carry it, so rules written against either form match.
    pub fn classification_text(&self) -> String {
        match self {
            QueryError::Database {
                sqlstate,
                native_code,
                message,
            } => {
                let mut text = message.clone();
                if let Some(code) = native_code {
                    if !text.contains("SQLCODE=") {
                        text.push_str(&format!(" SQLCODE={}", code));
                    }
                }
                if let Some(state) = sqlstate {
                    if !text.contains("SQLSTATE=") {
                        text.push_str(&format!(" SQLSTATE={}", state));
                    }
                }
                text
            }
            other => other.to_string(),
        }
    }
}

/// Where a captured error was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    /// Returned by a worker's query call
    Query,
    /// Read from the diagnostic log stream
    DiagnosticLog,
    /// A new first-occurrence data capture directory appeared
    FodcMonitor,
}

/// Verbatim record of one classified error, kept for the final report.
#[derive(Debug, Clone, Serialize)]
pub struct CapturedError {
    pub source: ErrorSource,
    /// Worker that observed it (query errors only)
    pub worker: Option<usize>,
    pub kind: FailureKind,
    /// Classifier rule that matched
    pub rule: Option<String>,
    pub sqlstate: Option<String>,
    pub native_code: Option<i32>,
    pub message: String,
    /// Unix timestamp in milliseconds
    pub observed_at_ms: i64,
}

impl CapturedError {
    /// Captures a query error as classified.
    pub fn from_query(
        worker: usize,
        error: &QueryError,
        kind: FailureKind,
        rule: Option<String>,
    ) -> Self {
        let (sqlstate, native_code) = match error {
            QueryError::Database {
                sqlstate,
                native_code,
                ..
            } => (sqlstate.clone(), *native_code),
            _ => (None, None),
        };
        Self {
            source: ErrorSource::Query,
            worker: Some(worker),
            kind,
            rule,
            sqlstate,
            native_code,
            message: truncate_message(&error.to_string()),
            observed_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Captures a signature seen outside of a query call.
    pub fn external(
        source: ErrorSource,
        message: &str,
        kind: FailureKind,
        rule: Option<String>,
    ) -> Self {
        Self {
            source,
            worker: None,
            kind,
            rule,
            sqlstate: None,
            native_code: None,
            message: truncate_message(message),
            observed_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Truncates a message to `MAX_ERROR_MESSAGE_LENGTH` characters.
fn truncate_message(message: &str) -> String {
    let max = crate::config::MAX_ERROR_MESSAGE_LENGTH;
    let char_count = message.chars().count();
    if char_count <= max {
        return message.to_string();
    }
    let truncated: String = message.chars().take(max).collect();
    format!("{}... (truncated, original length: {} chars)", truncated, char_count)
}

/// Outcome kind of one query attempt or one diagnostic log match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, EnumIterMacro)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Query returned a value with no error
    Success,
    /// Recoverable error unrelated to the race under test
    Transient,
    /// Signature of the reproduced race (the harness' success condition)
    TargetFailure,
    /// Database unreachable or in an unrecoverable state
    Fatal,
}

impl FailureKind {
    /// Whether this outcome ends the whole run.
    pub fn stops_run(self) -> bool {
        matches!(self, FailureKind::TargetFailure | FailureKind::Fatal)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Success => "success",
            FailureKind::Transient => "transient",
            FailureKind::TargetFailure => "target failure",
            FailureKind::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Types of error events counted during a run.
///
/// One classified failure increments exactly one of the query-level counters;
/// pool and connection events are counted separately because they happen
/// outside of a query attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIterMacro)]
pub enum ErrorType {
    TransientQueryError,
    QueryTimeout,
    TargetFailure,
    FatalError,
    PoolExhausted,
    ConnectionError,
    WorkerPanic,
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::TransientQueryError => "Transient query error",
            ErrorType::QueryTimeout => "Query timeout",
            ErrorType::TargetFailure => "Target failure (race reproduced)",
            ErrorType::FatalError => "Fatal error",
            ErrorType::PoolExhausted => "Pool exhausted",
            ErrorType::ConnectionError => "Connection error",
            ErrorType::WorkerPanic => "Worker panic",
        }
    }

    /// Stable key used in serialized reports.
    pub fn key(&self) -> &'static str {
        match self {
            ErrorType::TransientQueryError => "transient_query_error",
            ErrorType::QueryTimeout => "query_timeout",
            ErrorType::TargetFailure => "target_failure",
            ErrorType::FatalError => "fatal_error",
            ErrorType::PoolExhausted => "pool_exhausted",
            ErrorType::ConnectionError => "connection_error",
            ErrorType::WorkerPanic => "worker_panic",
        }
    }
}
