//! Query execution and outcome capture.
//!
//! The executor issues the fixed statement exactly once per call, bounded by
//! the query timeout, and turns whatever happened into an [`IterationResult`].
//! Retry policy lives in the worker, never here.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::connection::Connection;
use crate::error_handling::{Classification, FailureClassifier, FailureKind, QueryError};
use crate::pool::Disposition;

/// What one query attempt produced.
#[derive(Debug, Clone)]
pub struct IterationResult {
    pub outcome: FailureKind,
    pub elapsed: Duration,
    /// Name of the classifier rule that matched, if any
    pub rule: Option<String>,
    /// Raw error, `None` on success
    pub error: Option<QueryError>,
    /// First column of the first row on success
    pub value: Option<String>,
}

impl IterationResult {
    /// Whether the session can go back to the pool.
    ///
    /// Any error may have left the session mid-statement or disconnected, so
    /// only successful sessions are reused.
    pub fn disposition(&self) -> Disposition {
        if self.error.is_none() {
            Disposition::Healthy
        } else {
            Disposition::Broken
        }
    }

    pub fn timed_out(&self) -> bool {
        matches!(self.error, Some(QueryError::Timeout(_)))
    }
}

/// Runs the target statement on a borrowed session.
#[derive(Clone)]
pub struct QueryExecutor {
    sql: Arc<str>,
    query_timeout: Option<Duration>,
    classifier: Arc<FailureClassifier>,
}

impl QueryExecutor {
    pub fn new(
        sql: impl Into<Arc<str>>,
        query_timeout: Option<Duration>,
        classifier: Arc<FailureClassifier>,
    ) -> Self {
        Self {
            sql: sql.into(),
            query_timeout,
            classifier,
        }
    }

    pub fn classifier(&self) -> &Arc<FailureClassifier> {
        &self.classifier
    }

    /// Executes the statement once and classifies the outcome.
    ///
    /// On timeout the in-flight call is abandoned; the caller must discard the
    /// session (see [`IterationResult::disposition`]).
    pub async fn execute(&self, conn: &mut dyn Connection) -> IterationResult {
        let start = Instant::now();
        let result = match self.query_timeout {
            Some(limit) => match tokio::time::timeout(limit, conn.execute(&self.sql)).await {
                Ok(result) => result,
                Err(_) => Err(QueryError::Timeout(limit)),
            },
            None => conn.execute(&self.sql).await,
        };
        let elapsed = start.elapsed();

        let Classification { kind, rule } = self.classifier.classify_result(&result);
        let (value, error) = match result {
            Ok(value) => (value, None),
            Err(e) => (None, Some(e)),
        };

        IterationResult {
            outcome: kind,
            elapsed,
            rule,
            error,
            value,
        }
    }
}
