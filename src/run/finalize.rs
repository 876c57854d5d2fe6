//! Run finalization and cleanup.

use log::info;

use crate::app::{log_progress, print_run_statistics, shutdown_gracefully};
use crate::report::{Outcome, RunReport};

use super::resources::{RunResources, WorkerSummary};

/// Tears the run down and produces the final report.
///
/// 1. Stop the progress logger and diagnostic watchers
/// 2. Log final progress
/// 3. Close the pool
/// 4. Decide the outcome and print statistics
///
/// Never fails: a report is produced even after a fatal abort.
pub async fn finalize_run(
    resources: RunResources,
    worker_summaries: Vec<WorkerSummary>,
    abandoned_workers: usize,
) -> RunReport {
    let RunResources {
        pool,
        stats,
        signal,
        background,
        endpoint,
        config,
        ..
    } = resources;

    shutdown_gracefully(background.cancel, background.progress_task, background.watchers).await;
    log_progress(&stats, &pool);

    pool.close().await;
    info!("Connection pool closed");

    let snapshot = stats.snapshot();
    let stop_reason = signal.reason();
    let outcome = Outcome::decide(snapshot.failure_detected, snapshot.fatal_errors, stop_reason);

    let report = RunReport {
        outcome,
        stop_reason,
        endpoint,
        elapsed_seconds: snapshot.elapsed_seconds,
        workers: config.effective_workers(),
        abandoned_workers,
        stats: snapshot,
        pool: pool.stats(),
        worker_summaries,
    };

    print_run_statistics(&report);
    report
}
