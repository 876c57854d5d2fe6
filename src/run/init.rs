//! Run resource initialization.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;
use tokio_util::sync::CancellationToken;

use crate::app::log_progress;
use crate::config::{Config, TARGET_SQL};
use crate::connection::ConnectionFactory;
use crate::diagnostics::{spawn_watchers, DiagnosticContext};
use crate::error_handling::{FailureClassifier, RunStatistics};
use crate::executor::QueryExecutor;
use crate::initialization::init_classifier;
use crate::pool::{ConnectionPool, PoolConfig};

use super::resources::{BackgroundTasks, RunResources};
use super::StopSignal;

/// Initializes everything a run needs before the first worker starts.
///
/// 1. Build the classifier
/// 2. Open and populate the connection pool
/// 3. Create the shared statistics and stop signal
/// 4. Start the progress logger and diagnostic watchers
///
/// # Errors
///
/// Returns an error if the pool cannot be populated; no iteration has run at
/// that point, so there is nothing to report.
pub async fn init_run_resources(
    config: Config,
    factory: Arc<dyn ConnectionFactory>,
    classifier: Option<Arc<FailureClassifier>>,
) -> Result<RunResources> {
    let classifier = classifier.unwrap_or_else(|| init_classifier(&config));
    let workers = config.effective_workers();

    let endpoint = factory.describe();
    info!("Connecting to {}", endpoint);
    info!(
        "Starting run: {} worker(s), {} pooled session(s), duration {}, iteration cap {}",
        workers,
        config.pool_size,
        match config.run_deadline() {
            Some(deadline) => format!("{:?}", deadline),
            None => "unbounded".to_string(),
        },
        config
            .max_iterations
            .map(|cap| cap.to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    if workers > config.pool_size {
        info!(
            "{} workers share {} sessions; expect pool exhaustion events",
            workers, config.pool_size
        );
    }

    let pool = ConnectionPool::new(
        factory,
        PoolConfig {
            size: config.pool_size,
            acquire_timeout: config.acquire_timeout,
        },
    )
    .await
    .context("Failed to initialize connection pool")?;

    let executor = QueryExecutor::new(TARGET_SQL, config.query_timeout, Arc::clone(&classifier));
    let stats = Arc::new(RunStatistics::new(config.max_failure_samples));
    let signal = StopSignal::new();

    let cancel = CancellationToken::new();
    let progress_task = spawn_progress_logger(&config, &stats, &pool, &cancel);
    let watchers = spawn_watchers(
        &config,
        &DiagnosticContext {
            classifier,
            stats: Arc::clone(&stats),
            signal: signal.clone(),
        },
    );

    Ok(RunResources {
        pool,
        executor,
        stats,
        signal,
        background: BackgroundTasks {
            cancel,
            progress_task,
            watchers,
        },
        endpoint,
        config,
    })
}

fn spawn_progress_logger(
    config: &Config,
    stats: &Arc<RunStatistics>,
    pool: &Arc<ConnectionPool>,
    cancel: &CancellationToken,
) -> Option<tokio::task::JoinHandle<()>> {
    if config.progress_interval.is_zero() {
        return None;
    }
    let period = config.progress_interval;
    let stats = Arc::clone(stats);
    let pool = Arc::clone(pool);
    let cancel = cancel.clone();
    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => log_progress(&stats, &pool),
                _ = cancel.cancelled() => break,
            }
        }
    }))
}
