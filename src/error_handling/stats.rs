//! Run statistics tracking.
//!
//! This module provides the process-wide counters every worker updates while
//! a run is in progress. Counters are atomics; the captured error samples sit
//! behind a short-lived mutex.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::IntoEnumIterator;

use super::types::{CapturedError, ErrorType, FailureKind};

#[derive(Debug, Default)]
struct FailureSamples {
    /// First target failure observed; the one the report highlights
    highlighted: Option<CapturedError>,
    /// First fatal error observed
    first_fatal: Option<CapturedError>,
    /// Bounded list of target-failure texts in arrival order
    samples: Vec<CapturedError>,
}

/// Thread-safe run statistics tracker.
///
/// Shared across workers with `Arc`. All error types are initialized to zero
/// on creation, so increments never allocate.
///
/// The iteration cap is enforced through [`RunStatistics::try_begin_iteration`],
/// which reserves a slot before the query is issued. `iterations` counts
/// attempts that actually completed.
pub struct RunStatistics {
    start_time: Instant,
    started_at: DateTime<Utc>,
    reserved: AtomicU64,
    iterations: AtomicU64,
    successes: AtomicU64,
    errors: HashMap<ErrorType, AtomicU64>,
    failure_detected: AtomicBool,
    max_samples: usize,
    samples: Mutex<FailureSamples>,
}

impl RunStatistics {
    pub fn new(max_samples: usize) -> Self {
        let mut errors = HashMap::new();
        for error in ErrorType::iter() {
            errors.insert(error, AtomicU64::new(0));
        }

        RunStatistics {
            start_time: Instant::now(),
            started_at: Utc::now(),
            reserved: AtomicU64::new(0),
            iterations: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            errors,
            failure_detected: AtomicBool::new(false),
            max_samples,
            samples: Mutex::new(FailureSamples::default()),
        }
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    /// Reserves one iteration slot.
    ///
    /// Returns `false` once `cap` slots have been handed out; the caller must
    /// not issue a query in that case. With no cap this always succeeds.
    pub fn try_begin_iteration(&self, cap: Option<u64>) -> bool {
        match cap {
            None => {
                self.reserved.fetch_add(1, Ordering::Relaxed);
                true
            }
            Some(cap) => self
                .reserved
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    (n < cap).then_some(n + 1)
                })
                .is_ok(),
        }
    }

    /// Records the outcome of one completed query attempt.
    ///
    /// Returns the new total iteration count.
    pub fn record_query_outcome(
        &self,
        kind: FailureKind,
        timed_out: bool,
        captured: Option<CapturedError>,
    ) -> u64 {
        let total = self.iterations.fetch_add(1, Ordering::SeqCst) + 1;
        match kind {
            FailureKind::Success => {
                self.successes.fetch_add(1, Ordering::Relaxed);
            }
            FailureKind::Transient if timed_out => self.increment_error(ErrorType::QueryTimeout),
            FailureKind::Transient => self.increment_error(ErrorType::TransientQueryError),
            FailureKind::TargetFailure | FailureKind::Fatal => {
                self.record_stop_failure(kind, captured);
            }
        }
        total
    }

    /// Records a target or fatal signature seen outside of a query call.
    ///
    /// Does not count as an iteration.
    pub fn record_external_failure(&self, captured: CapturedError) {
        let kind = captured.kind;
        match kind {
            FailureKind::TargetFailure | FailureKind::Fatal => {
                self.record_stop_failure(kind, Some(captured))
            }
            FailureKind::Transient => self.increment_error(ErrorType::TransientQueryError),
            FailureKind::Success => {}
        }
    }

    fn record_stop_failure(&self, kind: FailureKind, captured: Option<CapturedError>) {
        let error_type = if kind == FailureKind::TargetFailure {
            self.failure_detected.store(true, Ordering::SeqCst);
            ErrorType::TargetFailure
        } else {
            ErrorType::FatalError
        };
        self.increment_error(error_type);

        let Some(captured) = captured else {
            return;
        };
        let mut samples = self.samples.lock().unwrap_or_else(|p| p.into_inner());
        if kind == FailureKind::TargetFailure {
            if samples.highlighted.is_none() {
                samples.highlighted = Some(captured.clone());
            }
            if samples.samples.len() < self.max_samples {
                samples.samples.push(captured);
            }
        } else if samples.first_fatal.is_none() {
            samples.first_fatal = Some(captured);
        }
    }

    /// Increment an error counter.
    pub fn increment_error(&self, error: ErrorType) {
        if let Some(counter) = self.errors.get(&error) {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            log::error!(
                "Attempted to increment error counter for {:?} which is not in the map. \
                 This indicates a bug in RunStatistics initialization.",
                error
            );
        }
    }

    /// Get the count for an error type.
    pub fn get_error_count(&self, error: ErrorType) -> u64 {
        self.errors
            .get(&error)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn total_errors(&self) -> u64 {
        self.errors.values().map(|c| c.load(Ordering::SeqCst)).sum()
    }

    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::SeqCst)
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::SeqCst)
    }

    pub fn failure_detected(&self) -> bool {
        self.failure_detected.load(Ordering::SeqCst)
    }

    /// Point-in-time copy of every counter for reporting.
    pub fn snapshot(&self) -> StatsSnapshot {
        let errors = ErrorType::iter()
            .map(|e| (e.key(), self.get_error_count(e)))
            .collect();
        let samples = self.samples.lock().unwrap_or_else(|p| p.into_inner());
        StatsSnapshot {
            started_at: self.started_at.to_rfc3339(),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
            iterations: self.iterations(),
            successes: self.successes(),
            target_failures: self.get_error_count(ErrorType::TargetFailure),
            fatal_errors: self.get_error_count(ErrorType::FatalError),
            errors,
            failure_detected: self.failure_detected(),
            highlighted_failure: samples.highlighted.clone(),
            first_fatal: samples.first_fatal.clone(),
            failure_samples: samples.samples.clone(),
        }
    }
}

/// Plain copy of [`RunStatistics`] at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    /// RFC 3339 start timestamp
    pub started_at: String,
    pub elapsed_seconds: f64,
    pub iterations: u64,
    pub successes: u64,
    pub target_failures: u64,
    pub fatal_errors: u64,
    /// Count per error type, keyed by [`ErrorType::key`]
    pub errors: BTreeMap<&'static str, u64>,
    pub failure_detected: bool,
    pub highlighted_failure: Option<CapturedError>,
    pub first_fatal: Option<CapturedError>,
    pub failure_samples: Vec<CapturedError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handling::ErrorSource;
    use std::sync::Arc;

    fn target(message: &str) -> CapturedError {
        CapturedError::external(
            ErrorSource::DiagnosticLog,
            message,
            FailureKind::TargetFailure,
            None,
        )
    }

    #[test]
    fn test_initialized_to_zero() {
        let stats = RunStatistics::new(4);
        for error_type in ErrorType::iter() {
            assert_eq!(stats.get_error_count(error_type), 0);
        }
        assert_eq!(stats.iterations(), 0);
        assert!(!stats.failure_detected());
    }

    #[test]
    fn test_iteration_cap_is_exact() {
        let stats = RunStatistics::new(4);
        assert!(stats.try_begin_iteration(Some(2)));
        assert!(stats.try_begin_iteration(Some(2)));
        assert!(!stats.try_begin_iteration(Some(2)));
        assert!(!stats.try_begin_iteration(Some(2)));
        assert!(stats.try_begin_iteration(None));
    }

    #[test]
    fn test_outcomes_map_to_counters() {
        let stats = RunStatistics::new(4);
        stats.record_query_outcome(FailureKind::Success, false, None);
        stats.record_query_outcome(FailureKind::Transient, false, None);
        stats.record_query_outcome(FailureKind::Transient, true, None);
        stats.record_query_outcome(FailureKind::Fatal, false, None);
        assert_eq!(stats.iterations(), 4);
        assert_eq!(stats.successes(), 1);
        assert_eq!(stats.get_error_count(ErrorType::TransientQueryError), 1);
        assert_eq!(stats.get_error_count(ErrorType::QueryTimeout), 1);
        assert_eq!(stats.get_error_count(ErrorType::FatalError), 1);
        assert!(!stats.failure_detected());
    }

    #[test]
    fn test_first_target_failure_is_highlighted_and_samples_are_bounded() {
        let stats = RunStatistics::new(2);
        for i in 0..5 {
            stats.record_external_failure(target(&format!("SQL0430N #{i}")));
        }
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.target_failures, 5);
        assert_eq!(snapshot.failure_samples.len(), 2);
        assert_eq!(
            snapshot.highlighted_failure.map(|c| c.message),
            Some("SQL0430N #0".to_string())
        );
        assert!(snapshot.failure_detected);
        // External signatures are not iterations
        assert_eq!(snapshot.iterations, 0);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let stats = Arc::new(RunStatistics::new(4));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_query_outcome(FailureKind::Success, false, None);
                        stats.increment_error(ErrorType::PoolExhausted);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread panicked");
        }
        assert_eq!(stats.iterations(), 8000);
        assert_eq!(stats.successes(), 8000);
        assert_eq!(stats.get_error_count(ErrorType::PoolExhausted), 8000);
    }

    #[test]
    fn test_snapshot_error_keys() {
        let stats = RunStatistics::new(1);
        stats.increment_error(ErrorType::ConnectionError);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.errors.get("connection_error"), Some(&1));
        assert_eq!(snapshot.errors.len(), ErrorType::iter().count());
    }
}
