//! Run configuration and constants.
//!
//! This module provides:
//! - Configuration constants (the target statement, timeouts, retry limits)
//! - The library [`Config`] and its supporting enums

mod constants;
mod types;

// Re-export all constants
pub use constants::*;
pub use types::{Config, ConnectionResetPolicy, DbEndpoint, LogFormat, LogLevel};
