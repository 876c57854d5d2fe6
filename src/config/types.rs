//! Configuration types.
//!
//! This module defines the enums and structs that describe a reproduction run.
//! None of them depend on the CLI; the binary converts its arguments into a
//! [`Config`].

use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use serde::Serialize;

use crate::config::constants::{
    ACQUIRE_RETRY_DELAY, ACQUIRE_TIMEOUT, DEFAULT_DB_HOST, DEFAULT_DB_NAME, DEFAULT_DB_PORT,
    DEFAULT_DB_USER, DEFAULT_DURATION_SECS, DEFAULT_ODBC_DRIVER, DEFAULT_POOL_SIZE,
    LOGGING_INTERVAL_SECS, MAX_FAILURE_SAMPLES, QUERY_TIMEOUT, REDACTED_PASSWORD, SHUTDOWN_GRACE,
};

/// Logging level for the application.
///
/// Controls the verbosity of log output, from most restrictive (Error) to most
/// verbose (Trace).
#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    /// Only error messages
    Error,
    /// Error and warning messages
    Warn,
    /// Error, warning, and informational messages
    Info,
    /// All messages except trace
    Debug,
    /// All messages including trace
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Log output format.
///
/// - `Plain`: Human-readable format with colors (default)
/// - `Json`: Structured JSON format for machine parsing
#[derive(Clone, Debug, ValueEnum)]
pub enum LogFormat {
    /// Human-readable format with colors (default)
    Plain,
    /// Structured JSON format for machine parsing
    Json,
}

/// How a connection reset that does not carry a DB2 SQL code is treated.
///
/// A reset on its own does not prove the server crashed, so the default keeps
/// the run going. `Fatal` is useful when the harness runs against a server
/// that should never drop sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionResetPolicy {
    /// Count the reset and keep looping
    Transient,
    /// Abort the run
    Fatal,
}

/// Location and credentials of the DB2 database under test.
#[derive(Clone, Debug)]
pub struct DbEndpoint {
    /// ODBC driver name as registered in `odbcinst.ini`
    pub driver: String,
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Database name (the spatially enabled database)
    pub database: String,
    /// Instance user
    pub user: String,
    /// Password for `user`
    pub password: String,
}

impl DbEndpoint {
    /// Builds the CLI/ODBC connection string for this endpoint.
    ///
    /// Uses the DB2 CLI keyword format (`DATABASE=..;HOSTNAME=..;PORT=..;`).
    pub fn connection_string(&self) -> String {
        format!(
            "DRIVER={{{}}};DATABASE={};HOSTNAME={};PORT={};PROTOCOL=TCPIP;UID={};PWD={};",
            self.driver, self.database, self.host, self.port, self.user, self.password
        )
    }

    /// Connection string with the password masked, safe for logging.
    pub fn redacted(&self) -> String {
        let full = self.connection_string();
        if self.password.is_empty() {
            return full;
        }
        full.replace(
            &format!("PWD={};", self.password),
            &format!("PWD={};", REDACTED_PASSWORD),
        )
    }
}

impl Default for DbEndpoint {
    fn default() -> Self {
        Self {
            driver: DEFAULT_ODBC_DRIVER.to_string(),
            host: DEFAULT_DB_HOST.to_string(),
            port: DEFAULT_DB_PORT,
            database: DEFAULT_DB_NAME.to_string(),
            user: DEFAULT_DB_USER.to_string(),
            password: String::new(),
        }
    }
}

/// Library configuration (no CLI dependencies).
///
/// # Examples
///
/// ```no_run
/// use st_transform_repro::Config;
/// use std::time::Duration;
///
/// let config = Config {
///     pool_size: 32,
///     duration: Duration::ZERO, // run until the bug fires
///     ..Default::default()
/// };
/// assert_eq!(config.effective_workers(), 32);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Database endpoint
    pub endpoint: DbEndpoint,

    /// Log level
    pub log_level: LogLevel,

    /// Log format
    pub log_format: LogFormat,

    /// Number of concurrent workers (`None` follows `pool_size`)
    pub workers: Option<usize>,

    /// Number of pooled connections
    pub pool_size: usize,

    /// Wall-clock run duration (`Duration::ZERO` runs until the stop signal)
    pub duration: Duration,

    /// Optional cap on the total number of query attempts
    pub max_iterations: Option<u64>,

    /// Per-query timeout (`None` waits for the server indefinitely)
    pub query_timeout: Option<Duration>,

    /// Maximum wait for a pooled connection
    pub acquire_timeout: Duration,

    /// Delay before a worker retries after pool exhaustion
    pub acquire_retry_delay: Duration,

    /// Stop a worker instead of retrying when the pool is exhausted
    pub stop_on_pool_exhaustion: bool,

    /// Hard ceiling on the shutdown wait for in-flight workers
    pub shutdown_grace: Duration,

    /// Treatment of bare connection resets
    pub connection_reset_policy: ConnectionResetPolicy,

    /// Diagnostic log (e.g. `db2diag.log`) to tail for failure signatures
    pub diag_log: Option<PathBuf>,

    /// Dump directory (e.g. `db2dump`) to poll for new FODC directories
    pub fodc_dir: Option<PathBuf>,

    /// Interval between progress log lines
    pub progress_interval: Duration,

    /// Maximum number of target-failure texts kept in the report
    pub max_failure_samples: usize,

    /// Write the final report as JSON to this path
    pub report_path: Option<PathBuf>,
}

impl Config {
    /// Worker count actually spawned.
    ///
    /// Defaults to the pool size so no worker starves behind another's
    /// borrowed connection.
    pub fn effective_workers(&self) -> usize {
        self.workers.unwrap_or(self.pool_size).max(1)
    }

    /// Returns `None` when the run is unbounded in time.
    pub fn run_deadline(&self) -> Option<Duration> {
        if self.duration.is_zero() {
            None
        } else {
            Some(self.duration)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DbEndpoint::default(),
            log_level: LogLevel::Info,
            log_format: LogFormat::Plain,
            workers: None,
            pool_size: DEFAULT_POOL_SIZE,
            duration: Duration::from_secs(DEFAULT_DURATION_SECS),
            max_iterations: None,
            query_timeout: Some(QUERY_TIMEOUT),
            acquire_timeout: ACQUIRE_TIMEOUT,
            acquire_retry_delay: ACQUIRE_RETRY_DELAY,
            stop_on_pool_exhaustion: false,
            shutdown_grace: SHUTDOWN_GRACE,
            connection_reset_policy: ConnectionResetPolicy::Transient,
            diag_log: None,
            fodc_dir: None,
            progress_interval: Duration::from_secs(LOGGING_INTERVAL_SECS),
            max_failure_samples: MAX_FAILURE_SAMPLES,
            report_path: None,
        }
    }
}
