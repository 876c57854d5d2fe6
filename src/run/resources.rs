//! Run resources and worker parameters.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error_handling::RunStatistics;
use crate::executor::QueryExecutor;
use crate::pool::ConnectionPool;

use super::StopSignal;

/// Everything initialised before the first worker starts.
pub struct RunResources {
    pub pool: Arc<ConnectionPool>,
    pub executor: QueryExecutor,
    pub stats: Arc<RunStatistics>,
    pub signal: StopSignal,
    /// Progress logger and diagnostic watchers
    pub background: BackgroundTasks,
    /// Endpoint description with the password masked
    pub endpoint: String,
    pub config: Config,
}

/// Handles to tasks that run alongside the workers.
pub struct BackgroundTasks {
    /// Stops the progress logger (watchers follow the stop signal)
    pub cancel: CancellationToken,
    pub progress_task: Option<JoinHandle<()>>,
    pub watchers: Vec<JoinHandle<()>>,
}

/// Parameters for one worker task.
pub struct WorkerParams {
    pub id: usize,
    pub pool: Arc<ConnectionPool>,
    pub executor: QueryExecutor,
    pub stats: Arc<RunStatistics>,
    pub signal: StopSignal,
    /// Total iteration cap shared by all workers
    pub max_iterations: Option<u64>,
    /// Pause after an exhausted acquire
    pub acquire_retry_delay: Duration,
    pub stop_on_pool_exhaustion: bool,
}

impl WorkerParams {
    pub fn from_resources(id: usize, resources: &RunResources) -> Self {
        Self {
            id,
            pool: Arc::clone(&resources.pool),
            executor: resources.executor.clone(),
            stats: Arc::clone(&resources.stats),
            signal: resources.signal.clone(),
            max_iterations: resources.config.max_iterations,
            acquire_retry_delay: resources.config.acquire_retry_delay,
            stop_on_pool_exhaustion: resources.config.stop_on_pool_exhaustion,
        }
    }
}

/// Why a worker left its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerExit {
    /// Saw the stop signal set by someone else
    StopSignal,
    /// Could not reserve another iteration
    IterationCap,
    /// Observed the target failure itself
    TargetFailure,
    /// Observed a fatal error itself
    Fatal,
    /// Gave up after an exhausted acquire
    PoolExhausted,
    /// The pool was closed underneath it
    PoolClosed,
}

/// Per-worker totals returned when the worker stops.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSummary {
    pub id: usize,
    /// Completed query attempts
    pub iterations: u64,
    /// Non-success outcomes, acquire failures and release failures
    pub errors: u64,
    pub exit: WorkerExit,
}
