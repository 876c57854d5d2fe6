//! Graceful shutdown handling.

use std::time::Duration;

use log::warn;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long each background task gets to notice cancellation.
const BACKGROUND_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Shuts down all background tasks gracefully.
///
/// Cancels the progress logger and waits for it, then waits for each
/// diagnostic watcher (which follow the stop signal), aborting any that do
/// not finish in time.
pub async fn shutdown_gracefully(
    cancel: CancellationToken,
    progress_task: Option<JoinHandle<()>>,
    watchers: Vec<JoinHandle<()>>,
) {
    cancel.cancel();
    if let Some(progress_task) = progress_task {
        let _ = progress_task.await;
    }

    for mut watcher in watchers {
        if tokio::time::timeout(BACKGROUND_JOIN_TIMEOUT, &mut watcher)
            .await
            .is_err()
        {
            warn!("Diagnostic watcher did not stop in time, aborting it");
            watcher.abort();
        }
    }
}
