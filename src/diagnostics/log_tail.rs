//! Diagnostic log tailing.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::DiagnosticContext;
use crate::config::MAX_PARTIAL_LINE_BYTES;
use crate::error_handling::ErrorSource;

/// Follows a growing log file (typically `db2diag.log`) from its current end.
pub struct DiagLogWatcher {
    path: PathBuf,
    poll_interval: Duration,
}

impl DiagLogWatcher {
    pub fn new(path: PathBuf, poll_interval: Duration) -> Self {
        Self {
            path,
            poll_interval,
        }
    }

    /// Polls the file until the stop signal fires, classifying each new line.
    pub async fn run(self, ctx: DiagnosticContext) {
        let mut tail = LogTail::at_end(self.path.clone()).await;
        info!(
            "Watching diagnostic log {} from offset {}",
            self.path.display(),
            tail.offset
        );

        loop {
            tokio::select! {
                _ = ctx.signal.stopped() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let lines = match tail.read_new_lines().await {
                Ok(lines) => lines,
                Err(e) => {
                    debug!("Failed to read {}: {}", self.path.display(), e);
                    continue;
                }
            };
            for line in lines {
                if let Some(classification) = ctx.classifier.classify_log_line(&line) {
                    ctx.report(ErrorSource::DiagnosticLog, &line, classification);
                }
            }
        }
        debug!("Diagnostic log watcher stopped");
    }
}

/// Byte offset into a file plus any trailing line not yet terminated.
///
/// The tail is kept as raw bytes so a multibyte character split across two
/// reads is decoded whole.
struct LogTail {
    path: PathBuf,
    offset: u64,
    partial: Vec<u8>,
}

impl LogTail {
    /// Starts at the current end of the file, or at 0 if it does not exist yet.
    async fn at_end(path: PathBuf) -> Self {
        let offset = tokio::fs::metadata(&path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        Self {
            path,
            offset,
            partial: Vec::new(),
        }
    }

    /// Returns the complete lines appended since the last call.
    async fn read_new_lines(&mut self) -> std::io::Result<Vec<String>> {
        let len = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        // Truncated or rotated
        if len < self.offset {
            self.offset = 0;
            self.partial.clear();
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        self.offset += buf.len() as u64;
        self.partial.extend_from_slice(&buf);

        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.partial.drain(..=pos).collect();
            push_line(&mut lines, &raw);
        }
        if self.partial.len() > MAX_PARTIAL_LINE_BYTES {
            debug!(
                "Flushing {} bytes of unterminated output from {}",
                self.partial.len(),
                self.path.display()
            );
            let raw = std::mem::take(&mut self.partial);
            push_line(&mut lines, &raw);
        }
        Ok(lines)
    }
}

fn push_line(lines: &mut Vec<String>, raw: &[u8]) {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim_end_matches(['\r', '\n']);
    if !line.is_empty() {
        lines.push(line.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;

    use crate::error_handling::{FailureClassifier, RunStatistics};
    use crate::run::{StopReason, StopSignal};

    fn append(path: &std::path::Path, text: &str) {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .expect("open log");
        file.write_all(text.as_bytes()).expect("append");
    }

    #[tokio::test]
    async fn test_existing_content_is_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("db2diag.log");
        std::fs::write(&path, "free(): double free detected in tcache 2\n").expect("seed");

        let mut tail = LogTail::at_end(path.clone()).await;
        assert!(tail.read_new_lines().await.expect("read").is_empty());

        append(&path, "LEVEL: Severe\nPID : 4242\n");
        let lines = tail.read_new_lines().await.expect("read");
        assert_eq!(lines, vec!["LEVEL: Severe".to_string(), "PID : 4242".to_string()]);
    }

    #[tokio::test]
    async fn test_partial_line_is_held_until_terminated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("db2diag.log");
        std::fs::write(&path, "").expect("seed");

        let mut tail = LogTail::at_end(path.clone()).await;
        append(&path, "double free or ");
        assert!(tail.read_new_lines().await.expect("read").is_empty());
        append(&path, "corruption (fasttop)\r\n");
        assert_eq!(
            tail.read_new_lines().await.expect("read"),
            vec!["double free or corruption (fasttop)".to_string()]
        );
    }

    #[tokio::test]
    async fn test_multibyte_character_split_across_reads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("db2diag.log");
        std::fs::write(&path, "").expect("seed");

        let mut tail = LogTail::at_end(path.clone()).await;
        let text = "MESSAGE : Zeichensatz \u{00fc}ngültig\n".as_bytes();
        let split = text
            .iter()
            .position(|b| *b == 0xc3)
            .expect("two-byte character")
            + 1;
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut f| f.write_all(&text[..split]))
            .expect("append first half");
        assert!(tail.read_new_lines().await.expect("read").is_empty());
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut f| f.write_all(&text[split..]))
            .expect("append second half");

        let lines = tail.read_new_lines().await.expect("read");
        assert_eq!(lines, vec!["MESSAGE : Zeichensatz \u{00fc}ngültig".to_string()]);
        assert!(!lines[0].contains('\u{fffd}'));
    }

    #[tokio::test]
    async fn test_unterminated_output_is_bounded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("db2diag.log");
        std::fs::write(&path, "").expect("seed");

        let mut tail = LogTail::at_end(path.clone()).await;
        let mut blob = "x".repeat(MAX_PARTIAL_LINE_BYTES);
        blob.push_str("double free or corruption (out)");
        append(&path, &blob);

        let lines = tail.read_new_lines().await.expect("read");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("double free or corruption (out)"));
        assert!(tail.partial.is_empty());

        append(&path, "next\n");
        assert_eq!(
            tail.read_new_lines().await.expect("read"),
            vec!["next".to_string()]
        );
    }

    #[tokio::test]
    async fn test_truncation_restarts_from_beginning() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("db2diag.log");
        std::fs::write(&path, "a fairly long line that will be rotated away\n").expect("seed");

        let mut tail = LogTail::at_end(path.clone()).await;
        std::fs::write(&path, "new\n").expect("rotate");
        assert_eq!(
            tail.read_new_lines().await.expect("read"),
            vec!["new".to_string()]
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_picked_up_when_created() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("db2diag.log");

        let mut tail = LogTail::at_end(path.clone()).await;
        assert!(tail.read_new_lines().await.expect("read").is_empty());
        std::fs::write(&path, "first\n").expect("create");
        assert_eq!(
            tail.read_new_lines().await.expect("read"),
            vec!["first".to_string()]
        );
    }

    #[tokio::test]
    async fn test_watcher_stops_run_on_double_free() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("db2diag.log");
        std::fs::write(&path, "2025-01-01-00.00.00 startup\n").expect("seed");

        let ctx = DiagnosticContext {
            classifier: Arc::new(FailureClassifier::default()),
            stats: Arc::new(RunStatistics::new(4)),
            signal: StopSignal::new(),
        };
        let watcher = DiagLogWatcher::new(path.clone(), Duration::from_millis(10));
        let handle = tokio::spawn(watcher.run(ctx.clone()));

        // Let the watcher record its starting offset first
        tokio::time::sleep(Duration::from_millis(50)).await;
        append(&path, "*** Error in `db2fmp': double free or corruption (out): 0x00007f ***\n");

        tokio::time::timeout(Duration::from_secs(5), ctx.signal.stopped())
            .await
            .expect("signal fired");
        assert_eq!(ctx.signal.reason(), Some(StopReason::TargetFailure));
        let snapshot = ctx.stats.snapshot();
        assert_eq!(snapshot.target_failures, 1);
        assert_eq!(
            snapshot.highlighted_failure.and_then(|c| c.rule),
            Some("double_free".to_string())
        );

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("watcher exited")
            .expect("watcher joined");
    }
}
