//! st_transform_repro library: concurrent reproduction of the DB2 spatial
//! `ST_Transform` double-free race.
//!
//! The harness issues the same spatial transform from many pooled sessions at
//! once until the server's shared projection cache is torn down twice, then
//! reports what it saw. Failure detection is driven by exact DB2 message
//! identifiers and diagnostic log markers, never by latency.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use st_transform_repro::{init_connection_factory, run_repro, Config, Outcome};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = Config {
//!     pool_size: 16,
//!     duration: std::time::Duration::from_secs(60),
//!     ..Default::default()
//! };
//! let factory = init_connection_factory(&config)?;
//! let report = run_repro(config, factory).await?;
//! if report.outcome == Outcome::ReproducedBug {
//!     println!("Reproduced after {} iterations", report.iterations());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Requirements
//!
//! A Tokio multi-thread runtime. Real DB2 sessions need the `odbc` feature;
//! without it, supply your own [`ConnectionFactory`].

mod app;
pub mod config;
pub mod connection;
pub mod diagnostics;
mod error_handling;
mod executor;
pub mod initialization;
pub mod pool;
pub mod report;
mod run;

#[cfg(test)]
mod test_helpers;

// Re-export public API
pub use config::{Config, ConnectionResetPolicy, DbEndpoint, LogFormat, LogLevel, TARGET_SQL};
pub use connection::{Connection, ConnectionFactory};
pub use error_handling::{
    CapturedError, Classification, ClassifierRule, ConnectionError, ErrorSource, ErrorType,
    FailureClassifier, FailureKind, InitializationError, PoolError, QueryError, RuleSource,
    StatsSnapshot,
};
pub use executor::{IterationResult, QueryExecutor};
pub use initialization::init_connection_factory;
pub use report::{Outcome, RunReport};
pub use run::{
    run_repro, run_repro_with_classifier, StopReason, StopSignal, WorkerExit, WorkerSummary,
};
