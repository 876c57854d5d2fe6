//! Run orchestration.
//!
//! `run_repro` owns the whole lifecycle: build the pool, start the workers,
//! wait for a reason to stop, give the workers a bounded grace period to
//! finish their current query, tear everything down and report.

mod finalize;
mod init;
mod resources;
mod signal;
mod worker;

use std::sync::Arc;

use anyhow::Result;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use log::{error, info, warn};
use tokio::task::{AbortHandle, JoinError};

use crate::config::Config;
use crate::connection::ConnectionFactory;
use crate::error_handling::{ErrorType, FailureClassifier, RunStatistics};
use crate::report::RunReport;

pub use resources::{WorkerExit, WorkerSummary};
pub use signal::{StopReason, StopSignal};

use finalize::finalize_run;
use init::init_run_resources;
use resources::WorkerParams;
use worker::run_worker;

/// Runs the reproduction workload with the built-in failure signatures.
///
/// Returns once the failure is reproduced, a fatal error occurs, the duration
/// or iteration cap is reached, or the process is interrupted.
///
/// # Errors
///
/// Returns an error only if the run could not start (the pool could not be
/// populated). Every run that started produces a [`RunReport`], including
/// fatal aborts.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use st_transform_repro::{run_repro, Config};
///
/// # async fn example(factory: Arc<dyn st_transform_repro::ConnectionFactory>) -> anyhow::Result<()> {
/// let config = Config {
///     pool_size: 32,
///     max_iterations: Some(100_000),
///     ..Default::default()
/// };
/// let report = run_repro(config, factory).await?;
/// println!("{} after {} iterations", report.outcome, report.iterations());
/// # Ok(())
/// # }
/// ```
pub async fn run_repro(config: Config, factory: Arc<dyn ConnectionFactory>) -> Result<RunReport> {
    run_repro_with_classifier(config, factory, None).await
}

/// Same as [`run_repro`], with a caller-supplied classifier (for example one
/// extended with [`FailureClassifier::with_rule`]).
pub async fn run_repro_with_classifier(
    config: Config,
    factory: Arc<dyn ConnectionFactory>,
    classifier: Option<Arc<FailureClassifier>>,
) -> Result<RunReport> {
    let resources = init_run_resources(config, factory, classifier).await?;
    let worker_count = resources.config.effective_workers();
    let signal = resources.signal.clone();
    let stats = Arc::clone(&resources.stats);

    let mut tasks = FuturesUnordered::new();
    let mut abort_handles: Vec<AbortHandle> = Vec::with_capacity(worker_count);
    for id in 0..worker_count {
        let handle = tokio::spawn(run_worker(WorkerParams::from_resources(id, &resources)));
        abort_handles.push(handle.abort_handle());
        tasks.push(async move { (id, handle.await) });
    }

    let mut summaries = Vec::with_capacity(worker_count);

    // Wait for a reason to stop
    let deadline = resources.config.run_deadline();
    let duration_elapsed = async move {
        match deadline {
            Some(deadline) => tokio::time::sleep(deadline).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(duration_elapsed);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut interrupt_armed = true;

    loop {
        tokio::select! {
            _ = signal.stopped() => break,
            _ = &mut duration_elapsed => {
                if signal.trigger(StopReason::DurationElapsed) {
                    info!("Run duration elapsed, stopping workers");
                }
                break;
            }
            result = &mut interrupt, if interrupt_armed => {
                interrupt_armed = false;
                match result {
                    Ok(()) => {
                        if signal.trigger(StopReason::Interrupted) {
                            warn!("Interrupted, stopping workers");
                        }
                        break;
                    }
                    Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
                }
            }
            joined = tasks.next() => match joined {
                Some((id, result)) => collect_worker(id, result, &stats, &mut summaries),
                None => {
                    signal.trigger(StopReason::WorkersExited);
                    break;
                }
            },
        }
    }

    let reason = signal.reason();
    info!(
        "Stopping ({}), waiting up to {:?} for {} worker(s)",
        reason
            .map(|r| format!("{:?}", r))
            .unwrap_or_else(|| "unknown".to_string()),
        resources.config.shutdown_grace,
        tasks.len()
    );

    // Bounded wait for workers to finish their current iteration
    let grace = tokio::time::sleep(resources.config.shutdown_grace);
    tokio::pin!(grace);
    loop {
        tokio::select! {
            joined = tasks.next() => match joined {
                Some((id, result)) => collect_worker(id, result, &stats, &mut summaries),
                None => break,
            },
            _ = &mut grace => break,
        }
    }

    let abandoned = tasks.len();
    if abandoned > 0 {
        warn!(
            "{} worker(s) still running after {:?}, abandoning them",
            abandoned, resources.config.shutdown_grace
        );
        for handle in &abort_handles {
            handle.abort();
        }
    }
    drop(tasks);

    summaries.sort_by_key(|s| s.id);
    Ok(finalize_run(resources, summaries, abandoned).await)
}

fn collect_worker(
    id: usize,
    result: Result<WorkerSummary, JoinError>,
    stats: &RunStatistics,
    summaries: &mut Vec<WorkerSummary>,
) {
    match result {
        Ok(summary) => summaries.push(summary),
        Err(e) if e.is_panic() => {
            stats.increment_error(ErrorType::WorkerPanic);
            error!("Worker {} panicked: {}", id, e);
        }
        Err(e) => warn!("Worker {} was cancelled: {}", id, e),
    }
}
