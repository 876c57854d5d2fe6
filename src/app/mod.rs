//! Application-level helpers around a run.
//!
//! This module provides progress logging, background task shutdown and the
//! final statistics printout.

pub mod logging;
pub mod shutdown;
pub mod statistics;

// Re-export public API
pub use logging::log_progress;
pub use shutdown::shutdown_gracefully;
pub use statistics::print_run_statistics;
