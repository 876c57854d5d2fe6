//! Out-of-band failure signals.
//!
//! The server often reports the race somewhere other than the failing query:
//! the diagnostic log gets a trap record, and a first-occurrence data capture
//! (`FODC_*`) directory appears in the dump directory. Both watchers feed the
//! same classifier, statistics and stop signal as the workers.

mod fodc;
mod log_tail;

use std::sync::Arc;

use log::{error, warn};
use tokio::task::JoinHandle;

use crate::config::{Config, DIAG_LOG_POLL_INTERVAL, FODC_POLL_INTERVAL};
use crate::error_handling::{
    CapturedError, Classification, ErrorSource, FailureClassifier, FailureKind, RunStatistics,
};
use crate::run::{StopReason, StopSignal};

pub use fodc::FodcWatcher;
pub use log_tail::DiagLogWatcher;

/// Shared handles a watcher reports into.
#[derive(Clone)]
pub struct DiagnosticContext {
    pub classifier: Arc<FailureClassifier>,
    pub stats: Arc<RunStatistics>,
    pub signal: StopSignal,
}

impl DiagnosticContext {
    /// Records a classified out-of-band signature and stops the run when the
    /// kind calls for it.
    pub(crate) fn report(&self, source: ErrorSource, text: &str, classification: Classification) {
        let Classification { kind, rule } = classification;
        let rule_name = rule.as_deref().unwrap_or("unmatched");
        match kind {
            FailureKind::TargetFailure => {
                error!("Target failure signature in {:?} ({}): {}", source, rule_name, text)
            }
            FailureKind::Fatal => {
                error!("Fatal signature in {:?} ({}): {}", source, rule_name, text)
            }
            FailureKind::Transient | FailureKind::Success => {
                warn!("Diagnostic signature in {:?} ({}): {}", source, rule_name, text)
            }
        }

        self.stats
            .record_external_failure(CapturedError::external(source, text, kind, rule));

        match kind {
            FailureKind::TargetFailure => {
                self.signal.trigger(StopReason::TargetFailure);
            }
            FailureKind::Fatal => {
                self.signal.trigger(StopReason::Fatal);
            }
            FailureKind::Transient | FailureKind::Success => {}
        }
    }
}

/// Starts the watchers enabled in `config`.
///
/// Each task runs until the stop signal fires.
pub fn spawn_watchers(config: &Config, ctx: &DiagnosticContext) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    if let Some(path) = &config.diag_log {
        let watcher = DiagLogWatcher::new(path.clone(), DIAG_LOG_POLL_INTERVAL);
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move { watcher.run(ctx).await }));
    }

    if let Some(dir) = &config.fodc_dir {
        let watcher = FodcWatcher::new(dir.clone(), FODC_POLL_INTERVAL);
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move { watcher.run(ctx).await }));
    }

    handles
}
