//! Error handling, failure classification and run statistics.
//!
//! This module provides:
//! - Typed errors for each layer (initialization, connection, pool, query)
//! - The failure classifier that turns error text into a [`FailureKind`]
//! - Run statistics shared by all workers
//! - The reconnect retry strategy
//!
//! Classified outcomes are:
//! - **Success**: the query returned a value
//! - **Transient**: recoverable, the worker keeps looping
//! - **TargetFailure**: the race under test was reproduced
//! - **Fatal**: the database is gone; the run aborts

mod categorization;
mod stats;
mod types;

// Re-export public API
pub use categorization::{
    get_retry_strategy, Classification, ClassifierRule, FailureClassifier, RuleSource,
};
pub use stats::{RunStatistics, StatsSnapshot};
pub use types::{
    CapturedError, ConnectionError, ErrorSource, ErrorType, FailureKind, InitializationError,
    PoolError, QueryError,
};
