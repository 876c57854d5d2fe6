//! Pool counters.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Pool statistics at one point in time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    /// Configured pool size
    pub size: usize,
    /// Sessions opened, including the initial population
    pub connections_opened: u64,
    /// Sessions closed
    pub connections_closed: u64,
    /// Broken sessions successfully replaced
    pub connections_replaced: u64,
    /// Replacements that failed after all retries
    pub replacement_failures: u64,
    /// Successful borrows
    pub acquisitions: u64,
    /// Borrows that hit the acquire deadline
    pub exhausted_count: u64,
    /// Total time spent waiting for a slot (milliseconds)
    pub total_wait_time_ms: u64,
    /// Highest number of sessions on loan at the same time
    pub peak_borrowed: usize,
}

#[derive(Debug, Default)]
pub(super) struct AtomicPoolStats {
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    connections_replaced: AtomicU64,
    replacement_failures: AtomicU64,
    acquisitions: AtomicU64,
    exhausted_count: AtomicU64,
    total_wait_time_ms: AtomicU64,
    peak_borrowed: AtomicUsize,
}

impl AtomicPoolStats {
    pub(super) fn record_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_replaced(&self) {
        self.connections_replaced.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_replacement_failure(&self) {
        self.replacement_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_acquisition(&self, wait_time_ms: u64, now_borrowed: usize) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        self.total_wait_time_ms
            .fetch_add(wait_time_ms, Ordering::Relaxed);
        self.peak_borrowed.fetch_max(now_borrowed, Ordering::SeqCst);
    }

    pub(super) fn record_exhausted(&self) {
        self.exhausted_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn snapshot(&self, size: usize) -> PoolStats {
        PoolStats {
            size,
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            connections_replaced: self.connections_replaced.load(Ordering::Relaxed),
            replacement_failures: self.replacement_failures.load(Ordering::Relaxed),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            exhausted_count: self.exhausted_count.load(Ordering::Relaxed),
            total_wait_time_ms: self.total_wait_time_ms.load(Ordering::Relaxed),
            peak_borrowed: self.peak_borrowed.load(Ordering::SeqCst),
        }
    }
}
