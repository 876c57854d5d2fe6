//! Main application entry point (CLI binary).
//!
//! This is a thin wrapper around the `st_transform_repro` library that handles:
//! - Command-line argument parsing (with `DB2_*` environment fallbacks)
//! - Environment variable loading (.env file)
//! - Logger initialization
//! - Mapping the run outcome to the process exit code

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use st_transform_repro::config::{
    ACQUIRE_RETRY_DELAY, ACQUIRE_TIMEOUT, DEFAULT_DB_HOST, DEFAULT_DB_NAME, DEFAULT_DB_PORT,
    DEFAULT_DB_USER, DEFAULT_DURATION_SECS, DEFAULT_ODBC_DRIVER, DEFAULT_POOL_SIZE,
    LOGGING_INTERVAL_SECS, MAX_FAILURE_SAMPLES, QUERY_TIMEOUT, SHUTDOWN_GRACE,
};
use st_transform_repro::initialization::init_logger_with;
use st_transform_repro::{
    init_connection_factory, run_repro, Config, ConnectionResetPolicy, DbEndpoint, LogFormat,
    LogLevel,
};

/// Exit code for errors that prevented a run from starting.
const EXIT_SETUP_ERROR: i32 = 2;

/// Stress DB2GSE.ST_Transform from many concurrent sessions until the
/// double-free race fires.
///
/// Exits 1 when the failure was reproduced, 0 when the run ended without it,
/// 2 on a fatal abort or setup error, 130 when interrupted.
#[derive(Debug, Parser)]
#[command(name = "st_transform_repro", version, about)]
struct Cli {
    /// Database host
    #[arg(long, env = "DB2_HOST", default_value = DEFAULT_DB_HOST)]
    host: String,

    /// Database port
    #[arg(long, env = "DB2_PORT", default_value_t = DEFAULT_DB_PORT)]
    port: u16,

    /// Database name
    #[arg(long, env = "DB2_DATABASE", default_value = DEFAULT_DB_NAME)]
    database: String,

    /// Database user
    #[arg(long, env = "DB2_USER", default_value = DEFAULT_DB_USER)]
    user: String,

    /// Database password
    #[arg(long, env = "DB2_PASSWORD", hide_env_values = true, default_value = "")]
    password: String,

    /// ODBC driver name as registered with the driver manager
    #[arg(long, env = "DB2_ODBC_DRIVER", default_value = DEFAULT_ODBC_DRIVER)]
    driver: String,

    /// Concurrent workers (defaults to the pool size)
    #[arg(long, visible_alias = "threads")]
    workers: Option<usize>,

    /// Pooled sessions
    #[arg(long, default_value_t = DEFAULT_POOL_SIZE)]
    pool_size: usize,

    /// Run duration in seconds (0 runs until a failure is observed)
    #[arg(long, default_value_t = DEFAULT_DURATION_SECS)]
    duration: u64,

    /// Stop after this many queries in total (0 means no cap)
    #[arg(long, default_value_t = 0)]
    max_iterations: u64,

    /// Per-query timeout in seconds (0 disables it)
    #[arg(long, default_value_t = QUERY_TIMEOUT.as_secs())]
    query_timeout: u64,

    /// Maximum wait for a free pooled session, in milliseconds
    #[arg(long, default_value_t = ACQUIRE_TIMEOUT.as_millis() as u64)]
    acquire_timeout_ms: u64,

    /// Stop a worker instead of retrying when the pool is exhausted
    #[arg(long)]
    stop_on_pool_exhaustion: bool,

    /// Seconds to wait for workers to finish their current query on shutdown
    #[arg(long, default_value_t = SHUTDOWN_GRACE.as_secs())]
    shutdown_grace: u64,

    /// How a bare connection reset is classified
    #[arg(long, value_enum, default_value_t = ConnectionResetPolicy::Transient)]
    connection_reset: ConnectionResetPolicy,

    /// Tail this diagnostic log (e.g. db2diag.log) for crash signatures
    #[arg(long)]
    diag_log: Option<PathBuf>,

    /// Watch this dump directory for new FODC_* captures
    #[arg(long)]
    fodc_dir: Option<PathBuf>,

    /// Seconds between progress lines (0 disables them)
    #[arg(long, default_value_t = LOGGING_INTERVAL_SECS)]
    progress_interval: u64,

    /// Write the final report as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Log level
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Log format
    #[arg(long, value_enum, default_value_t = LogFormat::Plain)]
    log_format: LogFormat,
}

impl Cli {
    fn into_config(self) -> Config {
        Config {
            endpoint: DbEndpoint {
                driver: self.driver,
                host: self.host,
                port: self.port,
                database: self.database,
                user: self.user,
                password: self.password,
            },
            log_level: self.log_level,
            log_format: self.log_format,
            workers: self.workers,
            pool_size: self.pool_size.max(1),
            duration: Duration::from_secs(self.duration),
            max_iterations: (self.max_iterations > 0).then_some(self.max_iterations),
            query_timeout: (self.query_timeout > 0).then(|| Duration::from_secs(self.query_timeout)),
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
            acquire_retry_delay: ACQUIRE_RETRY_DELAY,
            stop_on_pool_exhaustion: self.stop_on_pool_exhaustion,
            shutdown_grace: Duration::from_secs(self.shutdown_grace),
            connection_reset_policy: self.connection_reset,
            diag_log: self.diag_log,
            fodc_dir: self.fodc_dir,
            progress_interval: Duration::from_secs(self.progress_interval),
            max_failure_samples: MAX_FAILURE_SAMPLES,
            report_path: self.report,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load DB2_* settings from .env in the current directory or next to the executable
    if dotenvy::dotenv().is_err() {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let env_path = exe_dir.join(".env");
                if env_path.exists() {
                    let _ = dotenvy::from_path(&env_path);
                }
            }
        }
    }

    let cli = Cli::parse();
    init_logger_with(cli.log_level.clone().into(), cli.log_format.clone())
        .context("Failed to initialize logger")?;

    let config = cli.into_config();
    let report_path = config.report_path.clone();

    let factory = match init_connection_factory(&config) {
        Ok(factory) => factory,
        Err(e) => {
            eprintln!("st_transform_repro error: {:#}", e);
            process::exit(EXIT_SETUP_ERROR);
        }
    };

    match run_repro(config, factory).await {
        Ok(report) => {
            if let Some(path) = report_path {
                match report.write_json(&path) {
                    Ok(()) => println!("Report written to {}", path.display()),
                    Err(e) => eprintln!("st_transform_repro error: {:#}", e),
                }
            }
            println!(
                "{}: {} iteration{} in {:.1}s ({} target failure{}, {} fatal)",
                report.outcome,
                report.iterations(),
                if report.iterations() == 1 { "" } else { "s" },
                report.elapsed_seconds,
                report.stats.target_failures,
                if report.stats.target_failures == 1 { "" } else { "s" },
                report.stats.fatal_errors
            );
            process::exit(report.exit_code());
        }
        Err(e) => {
            eprintln!("st_transform_repro error: {:#}", e);
            process::exit(EXIT_SETUP_ERROR);
        }
    }
}
