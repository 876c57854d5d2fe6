//! First-occurrence data capture monitor.
//!
//! DB2 writes a `FODC_*` directory under the dump path whenever an engine or
//! fenced process traps. A directory that was not there when the run started
//! means something crashed during the run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};

use super::DiagnosticContext;
use crate::config::FODC_DIR_PREFIX;
use crate::error_handling::{Classification, ErrorSource, FailureKind};

/// Rule name reported for a new capture directory no log rule recognises.
const FODC_CAPTURE_RULE: &str = "fodc_capture";

/// Polls a dump directory for new `FODC_*` entries.
pub struct FodcWatcher {
    dir: PathBuf,
    poll_interval: Duration,
}

impl FodcWatcher {
    pub fn new(dir: PathBuf, poll_interval: Duration) -> Self {
        Self { dir, poll_interval }
    }

    pub async fn run(self, ctx: DiagnosticContext) {
        let mut seen = list_fodc_dirs(&self.dir).await;
        info!(
            "Watching {} for new {}* directories ({} already present)",
            self.dir.display(),
            FODC_DIR_PREFIX,
            seen.len()
        );

        loop {
            tokio::select! {
                _ = ctx.signal.stopped() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let mut fresh: Vec<String> = list_fodc_dirs(&self.dir)
                .await
                .into_iter()
                .filter(|name| !seen.contains(name))
                .collect();
            fresh.sort();

            for name in fresh {
                let classification = ctx
                    .classifier
                    .classify_log_line(&name)
                    .unwrap_or_else(|| Classification {
                        kind: FailureKind::TargetFailure,
                        rule: Some(FODC_CAPTURE_RULE.to_string()),
                    });
                let text = format!("New FODC directory: {}", self.dir.join(&name).display());
                ctx.report(ErrorSource::FodcMonitor, &text, classification);
                seen.insert(name);
            }
        }
        debug!("FODC watcher stopped");
    }
}

/// Names of the `FODC_*` entries in `dir`; empty when it cannot be read.
async fn list_fodc_dirs(dir: &Path) -> HashSet<String> {
    let mut names = HashSet::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot read {}: {}", dir.display(), e);
            return names;
        }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(FODC_DIR_PREFIX) {
            names.insert(name);
        }
    }
    names
}
