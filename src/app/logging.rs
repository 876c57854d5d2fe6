//! Progress logging utilities.

use log::info;

use crate::error_handling::RunStatistics;
use crate::pool::ConnectionPool;

/// Logs iteration throughput and pool usage so far.
pub fn log_progress(stats: &RunStatistics, pool: &ConnectionPool) {
    let elapsed_secs = stats.start_time().elapsed().as_secs_f64();
    let iterations = stats.iterations();
    let rate = if elapsed_secs > 0.0 {
        iterations as f64 / elapsed_secs
    } else {
        0.0
    };
    info!(
        "Executed {} iterations in {:.2} seconds (~{:.2} queries/sec), {} errors, {}/{} sessions in use",
        iterations,
        elapsed_secs,
        rate,
        stats.total_errors(),
        pool.borrowed(),
        pool.size()
    );
}
