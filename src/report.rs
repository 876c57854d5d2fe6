//! Final run report.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::error_handling::StatsSnapshot;
use crate::pool::PoolStats;
use crate::run::{StopReason, WorkerSummary};

/// Exit code used when the run was interrupted from the terminal (128 + SIGINT).
pub const EXIT_INTERRUPTED: i32 = 130;

/// Overall verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// At least one target failure was observed
    ReproducedBug,
    /// The run ended without a target or fatal failure
    NoFailureObserved,
    /// The run was aborted by a fatal error before any target failure
    FatalAbort,
}

impl Outcome {
    /// Decides the verdict; a reproduced failure wins over a later fatal error.
    pub fn decide(failure_detected: bool, fatal_errors: u64, reason: Option<StopReason>) -> Self {
        if failure_detected {
            Outcome::ReproducedBug
        } else if fatal_errors > 0 || reason == Some(StopReason::Fatal) {
            Outcome::FatalAbort
        } else {
            Outcome::NoFailureObserved
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::ReproducedBug => "reproduced bug",
            Outcome::NoFailureObserved => "no failure observed",
            Outcome::FatalAbort => "fatal abort",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything known about a finished run.
///
/// Produced even when the run was aborted, so partial statistics survive.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: Outcome,
    /// Why the run stopped; `None` only if nothing ever set the stop signal
    pub stop_reason: Option<StopReason>,
    /// Endpoint with the password masked
    pub endpoint: String,
    pub elapsed_seconds: f64,
    pub workers: usize,
    /// Workers that did not exit within the shutdown grace period
    pub abandoned_workers: usize,
    pub stats: StatsSnapshot,
    pub pool: PoolStats,
    pub worker_summaries: Vec<WorkerSummary>,
}

impl RunReport {
    pub fn iterations(&self) -> u64 {
        self.stats.iterations
    }

    pub fn interrupted(&self) -> bool {
        self.stop_reason == Some(StopReason::Interrupted)
    }

    /// Process exit code for this report.
    ///
    /// - 1 when the failure was reproduced
    /// - 2 on a fatal abort
    /// - 130 when interrupted without a result
    /// - 0 otherwise
    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            Outcome::ReproducedBug => 1,
            Outcome::FatalAbort => 2,
            Outcome::NoFailureObserved if self.interrupted() => EXIT_INTERRUPTED,
            Outcome::NoFailureObserved => 0,
        }
    }

    /// Whether the run hit its duration or iteration bound without a failure.
    pub fn limit_reached_without_failure(&self) -> bool {
        self.outcome == Outcome::NoFailureObserved
            && matches!(
                self.stop_reason,
                Some(StopReason::DurationElapsed | StopReason::IterationCapReached)
            )
    }

    /// Writes the report as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write run report to {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handling::RunStatistics;

    fn report(outcome: Outcome, reason: Option<StopReason>) -> RunReport {
        RunReport {
            outcome,
            stop_reason: reason,
            endpoint: "fake://db2".to_string(),
            elapsed_seconds: 1.5,
            workers: 2,
            abandoned_workers: 0,
            stats: RunStatistics::new(1).snapshot(),
            pool: PoolStats::default(),
            worker_summaries: Vec::new(),
        }
    }

    #[test]
    fn test_outcome_decision() {
        assert_eq!(
            Outcome::decide(true, 1, Some(StopReason::Fatal)),
            Outcome::ReproducedBug
        );
        assert_eq!(
            Outcome::decide(false, 1, Some(StopReason::Interrupted)),
            Outcome::FatalAbort
        );
        assert_eq!(
            Outcome::decide(false, 0, Some(StopReason::Fatal)),
            Outcome::FatalAbort
        );
        assert_eq!(
            Outcome::decide(false, 0, Some(StopReason::DurationElapsed)),
            Outcome::NoFailureObserved
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(report(Outcome::ReproducedBug, Some(StopReason::TargetFailure)).exit_code(), 1);
        assert_eq!(report(Outcome::FatalAbort, Some(StopReason::Fatal)).exit_code(), 2);
        assert_eq!(
            report(Outcome::NoFailureObserved, Some(StopReason::DurationElapsed)).exit_code(),
            0
        );
        assert_eq!(
            report(Outcome::NoFailureObserved, Some(StopReason::Interrupted)).exit_code(),
            EXIT_INTERRUPTED
        );
    }

    #[test]
    fn test_limit_warning_only_without_failure() {
        assert!(report(Outcome::NoFailureObserved, Some(StopReason::IterationCapReached))
            .limit_reached_without_failure());
        assert!(!report(Outcome::NoFailureObserved, Some(StopReason::Interrupted))
            .limit_reached_without_failure());
        assert!(!report(Outcome::ReproducedBug, Some(StopReason::DurationElapsed))
            .limit_reached_without_failure());
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("report.json");
        report(Outcome::ReproducedBug, Some(StopReason::TargetFailure))
            .write_json(&path)
            .expect("write report");

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(value["outcome"], "reproduced_bug");
        assert_eq!(value["stop_reason"], "target_failure");
        assert_eq!(value["stats"]["iterations"], 0);
        assert!(value["stats"]["errors"]["pool_exhausted"].is_number());
    }
}
