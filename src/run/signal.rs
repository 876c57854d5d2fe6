//! Run-wide stop signal.
//!
//! A single first-writer-wins flag plus a broadcast cancellation token. The
//! first `trigger` records why the run stopped; later calls are no-ops.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Why the run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The configured wall-clock duration elapsed
    DurationElapsed,
    /// The total iteration cap was reached
    IterationCapReached,
    /// The race signature was observed
    TargetFailure,
    /// The server became unreachable or unusable
    Fatal,
    /// The operator interrupted the run
    Interrupted,
    /// Every worker exited on its own (e.g. all stopped on pool exhaustion)
    WorkersExited,
}

impl StopReason {
    const ALL: [StopReason; 6] = [
        StopReason::DurationElapsed,
        StopReason::IterationCapReached,
        StopReason::TargetFailure,
        StopReason::Fatal,
        StopReason::Interrupted,
        StopReason::WorkersExited,
    ];

    fn code(self) -> u8 {
        Self::ALL
            .iter()
            .position(|r| *r == self)
            .map(|i| i as u8 + 1)
            .unwrap_or(0)
    }

    fn from_code(code: u8) -> Option<Self> {
        code.checked_sub(1)
            .and_then(|i| Self::ALL.get(i as usize).copied())
    }
}

/// Shared stop flag observed by every worker before each iteration.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    reason: std::sync::Arc<AtomicU8>,
    token: CancellationToken,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the signal.
    ///
    /// Returns `true` when this call won, i.e. its reason is the one recorded.
    pub fn trigger(&self, reason: StopReason) -> bool {
        let won = self
            .reason
            .compare_exchange(0, reason.code(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        self.token.cancel();
        won
    }

    pub fn is_set(&self) -> bool {
        self.reason.load(Ordering::SeqCst) != 0
    }

    /// The winning reason, `None` while the signal is clear.
    pub fn reason(&self) -> Option<StopReason> {
        StopReason::from_code(self.reason.load(Ordering::SeqCst))
    }

    /// Resolves once the signal is set.
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Token for background tasks that only need to observe the signal.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}
