//! Configuration constants.
//!
//! This module defines the constants used throughout the harness, including
//! the fixed target statement, default sizing, timeouts and retry parameters.

use std::time::Duration;

/// The statement every worker executes.
///
/// Validates a hardcoded NAD83 point (SRID 4269) and transforms it to WGS84
/// (SRID 4326). `ST_Transform` is the routine whose shared projection cache is
/// torn down twice under concurrent use.
pub const TARGET_SQL: &str = "SELECT CASE \
WHEN DB2GSE.ST_IsEmpty(DB2GSE.ST_Point(CAST(-98.71447796 AS DOUBLE), CAST(29.48604692 AS DOUBLE), CAST(4269 AS INTEGER)))=1 \
OR DB2GSE.ST_IsValid(DB2GSE.ST_Point(CAST(-98.71447796 AS DOUBLE), CAST(29.48604692 AS DOUBLE), CAST(4269 AS INTEGER)))=0 \
THEN NULL \
ELSE CAST(db2gse.ST_AsText(db2gse.ST_Transform(DB2GSE.ST_Point(CAST(-98.71447796 AS DOUBLE), CAST(29.48604692 AS DOUBLE), CAST(4269 AS INTEGER)), CAST(4326 AS INTEGER))) AS CLOB(2097152)) \
END \
FROM SYSIBM.SYSDUMMY1";

// Workload sizing
/// Default number of pooled connections
/// The worker count follows the pool size unless set explicitly
pub const DEFAULT_POOL_SIZE: usize = 16;
/// Default run duration in seconds (0 runs until a failure is observed)
pub const DEFAULT_DURATION_SECS: u64 = 300;

// Endpoint defaults (match the community DB2 container image)
pub const DEFAULT_DB_HOST: &str = "127.0.0.1";
pub const DEFAULT_DB_PORT: u16 = 50000;
pub const DEFAULT_DB_NAME: &str = "SAMPLE";
pub const DEFAULT_DB_USER: &str = "db2inst1";
pub const DEFAULT_ODBC_DRIVER: &str = "IBM DB2 ODBC DRIVER";
/// Replacement text for the password whenever a connection string is logged
pub const REDACTED_PASSWORD: &str = "********";

// Timeouts
/// Maximum time a worker waits for a pooled connection
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(1);
/// Delay before a worker retries after the pool was exhausted
pub const ACQUIRE_RETRY_DELAY: Duration = Duration::from_millis(50);
/// Per-query timeout
/// The transform itself completes in milliseconds; anything past this is a hung server
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(30);
/// Hard ceiling on how long shutdown waits for workers to finish their current query
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// Reconnect strategy
/// Initial delay in milliseconds before the first reconnect retry
pub const RECONNECT_INITIAL_DELAY_MS: u64 = 100;
/// Factor by which the reconnect delay is multiplied on each attempt
pub const RECONNECT_FACTOR: u64 = 2;
/// Maximum delay between reconnect attempts in seconds
pub const RECONNECT_MAX_DELAY_SECS: u64 = 2;
/// Maximum number of reconnect retries after the initial attempt
pub const RECONNECT_MAX_ATTEMPTS: usize = 3;

// Reporting
/// Interval between progress log lines in seconds
pub const LOGGING_INTERVAL_SECS: u64 = 5;
/// Per-worker debug progress is logged every this many iterations
pub const WORKER_DEBUG_EVERY: u64 = 100;
/// Maximum number of target-failure error texts kept in the report
pub const MAX_FAILURE_SAMPLES: usize = 16;
/// Maximum captured error message length in characters
pub const MAX_ERROR_MESSAGE_LENGTH: usize = 2000;

// Diagnostic collaborators
/// Poll interval for the diagnostic log tailer
pub const DIAG_LOG_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Unterminated log output beyond this many bytes is classified as one line
pub const MAX_PARTIAL_LINE_BYTES: usize = 64 * 1024;
/// Poll interval for new FODC directories (db2dump)
pub const FODC_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Directory name prefix DB2 uses for first-occurrence data capture
pub const FODC_DIR_PREFIX: &str = "FODC_";
