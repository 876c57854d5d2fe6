//! Worker loop.
//!
//! Each worker repeats: check the stop signal, borrow a session, run the
//! target statement once, record the outcome, hand the session back. A worker
//! that observes a target or fatal failure sets the stop signal itself before
//! leaving, so every other worker stops at its next check.

use std::time::Duration;

use log::{debug, error, warn};
use rand::Rng;

use crate::config::WORKER_DEBUG_EVERY;
use crate::error_handling::{
    CapturedError, ErrorSource, ErrorType, FailureKind, PoolError,
};
use crate::pool::Disposition;

use super::resources::{WorkerExit, WorkerParams, WorkerSummary};
use super::StopReason;

/// Rule name recorded when the pool cannot open any session.
const CONNECTION_LOST_RULE: &str = "connection_lost";

/// Runs one worker until it stops.
///
/// Never panics on query errors; every outcome is recorded in the shared
/// statistics and in the returned summary.
pub async fn run_worker(params: WorkerParams) -> WorkerSummary {
    let WorkerParams {
        id,
        pool,
        executor,
        stats,
        signal,
        max_iterations,
        acquire_retry_delay,
        stop_on_pool_exhaustion,
    } = params;

    let mut iterations: u64 = 0;
    let mut errors: u64 = 0;
    debug!("Worker {} started", id);

    let exit = loop {
        if signal.is_set() {
            break WorkerExit::StopSignal;
        }

        // A sibling may stop the run while this worker waits for a slot
        let acquired = tokio::select! {
            biased;
            _ = signal.stopped() => None,
            acquired = pool.acquire() => Some(acquired),
        };
        let Some(acquired) = acquired else {
            break WorkerExit::StopSignal;
        };

        let mut pooled = match acquired {
            Ok(pooled) => pooled,
            Err(PoolError::Exhausted(waited)) => {
                stats.increment_error(ErrorType::PoolExhausted);
                errors += 1;
                if stop_on_pool_exhaustion {
                    warn!("Worker {} stopping: no session free after {:?}", id, waited);
                    break WorkerExit::PoolExhausted;
                }
                debug!("Worker {} found the pool exhausted after {:?}", id, waited);
                let pause = with_jitter(acquire_retry_delay);
                tokio::select! {
                    _ = signal.stopped() => {}
                    _ = tokio::time::sleep(pause) => {}
                }
                continue;
            }
            Err(PoolError::Closed) => break WorkerExit::PoolClosed,
            Err(PoolError::Connection(e)) => {
                // The pool already retried with backoff; the server is gone.
                // Counted once, as the fatal error recorded below.
                errors += 1;
                error!("Worker {} cannot reach the database: {}", id, e);
                let mut captured = CapturedError::external(
                    ErrorSource::Query,
                    &e.to_string(),
                    FailureKind::Fatal,
                    Some(CONNECTION_LOST_RULE.to_string()),
                );
                captured.worker = Some(id);
                stats.record_external_failure(captured);
                signal.trigger(StopReason::Fatal);
                pool.discard_all().await;
                break WorkerExit::Fatal;
            }
        };

        if signal.is_set() {
            if let Err(e) = pool.release(pooled, Disposition::Discard).await {
                debug!("Worker {} failed to return session: {}", id, e);
            }
            break WorkerExit::StopSignal;
        }

        // Reserve after borrowing so a failed acquire never burns an iteration
        if !stats.try_begin_iteration(max_iterations) {
            if let Err(e) = pool.release(pooled, Disposition::Healthy).await {
                debug!("Worker {} failed to return session: {}", id, e);
            }
            signal.trigger(StopReason::IterationCapReached);
            break WorkerExit::IterationCap;
        }

        let Some(conn) = pooled.connection() else {
            // Only possible after a release; treat the slot as lost
            continue;
        };
        let result = executor.execute(conn).await;
        iterations += 1;

        let captured = result
            .error
            .as_ref()
            .filter(|_| result.outcome.stops_run())
            .map(|e| CapturedError::from_query(id, e, result.outcome, result.rule.clone()));
        let total = stats.record_query_outcome(result.outcome, result.timed_out(), captured);

        let mut disposition = result.disposition();
        match result.outcome {
            FailureKind::Success => {}
            FailureKind::Transient => {
                errors += 1;
                if let Some(e) = &result.error {
                    warn!("Worker {} transient error ({}): {}", id, rule_label(&result.rule), e);
                }
            }
            FailureKind::TargetFailure => {
                errors += 1;
                if signal.trigger(StopReason::TargetFailure) {
                    error!(
                        "Worker {} reproduced the failure after {} total iterations ({}): {}",
                        id,
                        total,
                        rule_label(&result.rule),
                        error_text(&result.error)
                    );
                } else {
                    error!(
                        "Worker {} also observed the failure ({}): {}",
                        id,
                        rule_label(&result.rule),
                        error_text(&result.error)
                    );
                }
                disposition = Disposition::Discard;
            }
            FailureKind::Fatal => {
                errors += 1;
                error!(
                    "Worker {} hit a fatal error ({}): {}",
                    id,
                    rule_label(&result.rule),
                    error_text(&result.error)
                );
                signal.trigger(StopReason::Fatal);
                pool.discard_all().await;
                disposition = Disposition::Discard;
            }
        }

        if let Err(e) = pool.release(pooled, disposition).await {
            stats.increment_error(ErrorType::ConnectionError);
            errors += 1;
            warn!("Worker {} could not replace its session: {}", id, e);
        }

        match result.outcome {
            FailureKind::TargetFailure => break WorkerExit::TargetFailure,
            FailureKind::Fatal => break WorkerExit::Fatal,
            FailureKind::Success | FailureKind::Transient => {}
        }

        if iterations % WORKER_DEBUG_EVERY == 0 {
            debug!(
                "Worker {}: {} iterations, {} errors (run total {})",
                id, iterations, errors, total
            );
        }
    };

    debug!(
        "Worker {} stopped ({:?}) after {} iterations, {} errors",
        id, exit, iterations, errors
    );
    WorkerSummary {
        id,
        iterations,
        errors,
        exit,
    }
}

/// Adds up to 50% random jitter so stalled workers do not retry in lockstep.
fn with_jitter(base: Duration) -> Duration {
    let max_jitter = base.as_millis() as u64 / 2;
    if max_jitter == 0 {
        return base;
    }
    let jitter = rand::rng().random_range(0..=max_jitter);
    base + Duration::from_millis(jitter)
}

fn rule_label(rule: &Option<String>) -> &str {
    rule.as_deref().unwrap_or("unclassified")
}

fn error_text(error: &Option<crate::error_handling::QueryError>) -> String {
    error
        .as_ref()
        .map(|e| e.to_string())
        .unwrap_or_default()
}
