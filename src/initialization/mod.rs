//! Application initialization.
//!
//! This module provides:
//! - Logger setup
//! - The failure classifier built from configuration
//! - The database connection backend

mod logger;

use std::sync::Arc;

use crate::config::Config;
use crate::connection::ConnectionFactory;
use crate::error_handling::{FailureClassifier, InitializationError};

// Re-export public API
pub use logger::init_logger_with;

/// Builds the shared classifier with the configured connection-reset policy.
pub fn init_classifier(config: &Config) -> Arc<FailureClassifier> {
    Arc::new(FailureClassifier::new(config.connection_reset_policy))
}

/// Creates the factory for real DB2 sessions.
///
/// # Errors
///
/// Returns `InitializationError::BackendUnavailable` when the crate was built
/// without a database backend.
#[cfg(feature = "odbc")]
pub fn init_connection_factory(
    config: &Config,
) -> Result<Arc<dyn ConnectionFactory>, InitializationError> {
    Ok(Arc::new(crate::connection::OdbcConnectionFactory::new(
        config.endpoint.clone(),
        config.query_timeout,
    )))
}

/// Creates the factory for real DB2 sessions.
///
/// # Errors
///
/// Returns `InitializationError::BackendUnavailable` when the crate was built
/// without a database backend.
#[cfg(not(feature = "odbc"))]
pub fn init_connection_factory(
    _config: &Config,
) -> Result<Arc<dyn ConnectionFactory>, InitializationError> {
    Err(InitializationError::BackendUnavailable(
        "built without a database backend; rebuild with `--features odbc` \
         and install the IBM DB2 CLI/ODBC driver"
            .to_string(),
    ))
}
