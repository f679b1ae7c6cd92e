//! Progress reporting for uploads: per-completion accounting, speed and ETA.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

/// Progress update information sent to callbacks
#[derive(Clone)]
pub struct ProgressUpdate {
    /// Total file size in bytes
    pub total_size: u64,
    /// Bytes in completed chunks
    pub bytes_done: u64,
    /// Progress percentage, clamped to [0, 100]
    pub progress_pct: f64,
    /// Average speed since the session started, bytes per second
    pub speed_bps: f64,
    /// Estimated seconds remaining (None while speed is 0)
    pub eta_seconds: Option<u64>,
    /// Total number of chunks
    pub total_chunks: usize,
    /// Completed chunk count
    pub completed_chunks: usize,
    /// Permanently failed chunk count
    pub failed_chunks: usize,
    /// Chunks currently in flight
    pub active_chunks: usize,
}

impl ProgressUpdate {
    pub fn new(
        total_size: u64,
        bytes_done: u64,
        elapsed: Duration,
        total_chunks: usize,
        completed_chunks: usize,
        failed_chunks: usize,
        active_chunks: usize,
    ) -> Self {
        let progress_pct = if total_size > 0 {
            (100.0 * bytes_done as f64 / total_size as f64).clamp(0.0, 100.0)
        } else if completed_chunks == total_chunks {
            100.0
        } else {
            0.0
        };

        let speed_bps = compute_speed(bytes_done, elapsed);
        let eta_seconds = if speed_bps > 0.0 && bytes_done < total_size {
            Some(((total_size - bytes_done) as f64 / speed_bps).ceil() as u64)
        } else {
            None
        };

        Self {
            total_size,
            bytes_done,
            progress_pct,
            speed_bps,
            eta_seconds,
            total_chunks,
            completed_chunks,
            failed_chunks,
            active_chunks,
        }
    }

    /// Human-readable remaining-time estimate
    pub fn eta_display(&self) -> String {
        format_eta(self.speed_bps, self.eta_seconds)
    }
}

impl Debug for ProgressUpdate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Progress: {:.1}% ({} / {}) @ {} | ETA: {} | Chunks: {}/{} ({} active, {} failed)",
            self.progress_pct,
            format_bytes(self.bytes_done),
            format_bytes(self.total_size),
            format_speed(self.speed_bps),
            self.eta_display(),
            self.completed_chunks,
            self.total_chunks,
            self.active_chunks,
            self.failed_chunks,
        )
    }
}

/// Average speed over the whole session; 0 when no time has elapsed
pub fn compute_speed(bytes_done: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    bytes_done as f64 / secs
}

/// Format bytes into a human-readable string (e.g., "10.50 MB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format speed into a human-readable string (e.g., "10.50 MB/s")
pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec as u64))
}

/// Format a remaining-time estimate: seconds under a minute, whole minutes
/// under an hour, whole hours beyond that. Before any speed is measured the
/// estimate is unknown.
fn format_eta(speed_bps: f64, eta_seconds: Option<u64>) -> String {
    if speed_bps <= 0.0 {
        return "Calculating…".to_string();
    }
    match eta_seconds {
        None => "0s".to_string(),
        Some(secs) if secs < 60 => format!("{}s", secs),
        Some(secs) if secs < 3600 => format!("{}m", secs / 60),
        Some(secs) => format!("{}h", secs / 3600),
    }
}

/// Trait for receiving progress updates
pub trait ProgressCallback: Send + Sync {
    /// Called when upload progress changes
    fn on_progress(&self, update: ProgressUpdate);
}

/// No-op progress callback implementation
pub struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _update: ProgressUpdate) {}
}

/// Closure-based progress callback
pub struct FnProgress<F>(pub F);

impl<F> ProgressCallback for FnProgress<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn on_progress(&self, update: ProgressUpdate) {
        (self.0)(update)
    }
}

/// Arc wrapper for progress callbacks
impl<T: ProgressCallback> ProgressCallback for Arc<T> {
    fn on_progress(&self, update: ProgressUpdate) {
        (**self).on_progress(update)
    }
}

/// Box wrapper for progress callbacks
impl ProgressCallback for Box<dyn ProgressCallback> {
    fn on_progress(&self, update: ProgressUpdate) {
        (**self).on_progress(update)
    }
}
