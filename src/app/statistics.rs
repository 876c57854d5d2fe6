//! Final statistics printout.

use log::{error, info, warn};
use strum::IntoEnumIterator;

use crate::error_handling::{ErrorType, StatsSnapshot};
use crate::report::{Outcome, RunReport};

/// Prints the outcome, counters and captured failures of a finished run.
pub fn print_run_statistics(report: &RunReport) {
    print_error_statistics(&report.stats);

    let pool = &report.pool;
    info!(
        "Pool: size {}, peak in use {}, opened {}, closed {}, replaced {}, replacement failures {}, exhausted {}",
        pool.size,
        pool.peak_borrowed,
        pool.connections_opened,
        pool.connections_closed,
        pool.connections_replaced,
        pool.replacement_failures,
        pool.exhausted_count
    );

    if report.abandoned_workers > 0 {
        warn!(
            "{} of {} worker(s) did not stop within the shutdown grace period",
            report.abandoned_workers, report.workers
        );
    }

    if let Some(failure) = &report.stats.highlighted_failure {
        error!(
            "First target failure ({}, {:?}{}): {}",
            failure.rule.as_deref().unwrap_or("unclassified"),
            failure.source,
            failure
                .worker
                .map(|w| format!(", worker {}", w))
                .unwrap_or_default(),
            failure.message
        );
        let more = report.stats.target_failures.saturating_sub(1);
        if more > 0 {
            info!("{} further target failure event(s) observed", more);
        }
    } else if let Some(fatal) = &report.stats.first_fatal {
        error!(
            "Fatal error ({}): {}",
            fatal.rule.as_deref().unwrap_or("unclassified"),
            fatal.message
        );
    }

    if report.limit_reached_without_failure() {
        warn!(
            "Run limit reached without reproducing the failure; \
             try a longer --duration, --duration 0 to run until failure, or more --workers"
        );
    }

    print_simple_summary(report);
}

/// Prints the per-type error counts.
pub fn print_error_statistics(stats: &StatsSnapshot) {
    let total_errors: u64 = stats.errors.values().sum();
    if total_errors == 0 {
        return;
    }
    info!("Error Counts ({} total):", total_errors);
    for error_type in ErrorType::iter() {
        let count = stats.errors.get(error_type.key()).copied().unwrap_or(0);
        if count > 0 {
            info!("   {}: {}", error_type.as_str(), count);
        }
    }
}

fn print_simple_summary(report: &RunReport) {
    let marker = match report.outcome {
        Outcome::ReproducedBug => "💥",
        Outcome::FatalAbort => "❌",
        Outcome::NoFailureObserved => "✅",
    };
    info!(
        "{} {}: {} iteration{} ({} succeeded) in {:.1}s with {} worker{}",
        marker,
        report.outcome,
        report.iterations(),
        if report.iterations() == 1 { "" } else { "s" },
        report.stats.successes,
        report.elapsed_seconds,
        report.workers,
        if report.workers == 1 { "" } else { "s" }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handling::{
        CapturedError, ErrorSource, FailureKind, RunStatistics,
    };
    use crate::pool::PoolStats;
    use crate::run::StopReason;

    fn report(stats: &RunStatistics, outcome: Outcome, reason: StopReason) -> RunReport {
        RunReport {
            outcome,
            stop_reason: Some(reason),
            endpoint: "fake://db2".to_string(),
            elapsed_seconds: 3.0,
            workers: 4,
            abandoned_workers: 1,
            stats: stats.snapshot(),
            pool: PoolStats::default(),
            worker_summaries: Vec::new(),
        }
    }

    #[test]
    fn test_print_without_errors() {
        let stats = RunStatistics::new(1);
        // Should not panic when nothing happened
        print_run_statistics(&report(&stats, Outcome::NoFailureObserved, StopReason::DurationElapsed));
    }

    #[test]
    fn test_print_with_failures() {
        let stats = RunStatistics::new(2);
        stats.increment_error(ErrorType::PoolExhausted);
        stats.record_external_failure(CapturedError::external(
            ErrorSource::DiagnosticLog,
            "double free or corruption (fasttop)",
            FailureKind::TargetFailure,
            Some("double_free".to_string()),
        ));
        stats.record_external_failure(CapturedError::external(
            ErrorSource::DiagnosticLog,
            "db2sysc terminated",
            FailureKind::Fatal,
            None,
        ));
        print_run_statistics(&report(&stats, Outcome::ReproducedBug, StopReason::TargetFailure));
        print_run_statistics(&report(&stats, Outcome::FatalAbort, StopReason::Fatal));
    }
}
