//! Encoder diagnostic output filter
//!
//! The encoder writes a progress line several times per second. Only lines
//! reporting an error reach the log; progress is sampled at trace level.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(5);

const ERROR_MARKERS: [&str; 8] = [
    "error",
    "failed",
    "invalid",
    "cannot",
    "could not",
    "no such",
    "denied",
    "busy",
];

/// Classification of one stderr line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Progress,
    DeviceBusy,
    Error,
    Other,
}

pub fn classify_line(line: &str) -> LineKind {
    let lower = line.to_lowercase();
    if lower.contains("device or resource busy") {
        return LineKind::DeviceBusy;
    }
    if lower.contains("time=") && lower.contains("bitrate=") {
        return LineKind::Progress;
    }
    if ERROR_MARKERS.iter().any(|m| lower.contains(m)) {
        return LineKind::Error;
    }
    LineKind::Other
}

/// What the monitor has observed so far
#[derive(Debug, Default)]
pub struct StderrSummary {
    device_busy: AtomicBool,
    progress_updates: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl StderrSummary {
    pub fn device_busy(&self) -> bool {
        self.device_busy.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Progress reports seen so far
    pub fn progress_updates(&self) -> u64 {
        self.progress_updates.load(Ordering::SeqCst)
    }

    fn record(&self, kind: LineKind, line: &str) {
        match kind {
            LineKind::DeviceBusy => {
                self.device_busy.store(true, Ordering::SeqCst);
                *self.last_error.lock() = Some(line.to_string());
            }
            LineKind::Error => {
                *self.last_error.lock() = Some(line.to_string());
            }
            LineKind::Progress => {
                self.progress_updates.fetch_add(1, Ordering::SeqCst);
            }
            LineKind::Other => {}
        }
    }
}

/// Spawn a task draining `stream` record by record until EOF
///
/// Progress updates end in '\r' rather than '\n', so records are cut at
/// carriage returns as they arrive and then split into lines.
pub fn spawn_monitor<R>(stream: R, label: String, summary: Arc<StderrSummary>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut records = BufReader::new(stream).split(b'\r');
        let mut last_progress: Option<Instant> = None;

        loop {
            let record = match records.next_segment().await {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("{}: stderr read failed: {}", label, e);
                    break;
                }
            };

            let record = String::from_utf8_lossy(&record);
            for segment in record.split('\n').map(str::trim).filter(|s| !s.is_empty()) {
                let kind = classify_line(segment);
                summary.record(kind, segment);

                match kind {
                    LineKind::Error | LineKind::DeviceBusy => {
                        tracing::warn!("{}: {}", label, segment);
                    }
                    LineKind::Progress => {
                        if last_progress.map_or(true, |t| t.elapsed() >= PROGRESS_LOG_INTERVAL) {
                            tracing::trace!("{}: {}", label, segment);
                            last_progress = Some(Instant::now());
                        }
                    }
                    LineKind::Other => {}
                }
            }
        }
    })
}
