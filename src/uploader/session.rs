//! Upload session state: the per-file record owned by the session controller

use crate::uploader::error::{FailureReport, UploadError, UploadResult};
use crate::uploader::plan::{self, Chunk, ChunkStatus};
use crate::uploader::progress::ProgressUpdate;
use crate::uploader::providers::{CompletedPart, ProviderKind};
use crate::uploader::tune::{MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use chrono::{DateTime, Utc};
use skylift_api::models::upload::{MAX_CHUNK_COUNT, MAX_FILE_SIZE, UploadStatusResponse};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Session lifecycle states; Completed, Failed and Cancelled are terminal
/// (Failed still admits a manual retry)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Pending,
    Uploading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Uploading => "uploading",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

/// In-memory state of one file upload, from plan through finalize.
///
/// The session controller owns this exclusively; workers only observe
/// immutable chunk snapshots and report back over a channel.
#[derive(Debug)]
pub struct UploadSession {
    /// Client-generated identity, stable across retries
    pub session_id: String,
    /// Provider-side identity, assigned by initialize
    pub upload_id: Option<String>,
    pub file_path: PathBuf,
    pub filename: String,
    pub mime_type: Option<String>,
    pub total_size: u64,
    pub chunk_size: u64,
    pub concurrency: usize,
    pub auto_tune: bool,
    pub provider: ProviderKind,
    /// Whole-file SHA-256, populated asynchronously
    pub file_hash: Option<[u8; 32]>,
    pub chunks: Vec<Chunk>,
    pub completed_indices: BTreeSet<usize>,
    pub failed_indices: BTreeSet<usize>,
    /// ETags of completed chunks, keyed by chunk index
    pub etags: BTreeMap<usize, String>,
    pub bytes_done: u64,
    pub status: SessionStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub final_location: Option<String>,
    pub error: Option<FailureReport>,
    started_at: Option<Instant>,
}

impl UploadSession {
    /// Create a session with a freshly planned chunk list.
    ///
    /// Validates everything the control plane would reject: an empty file
    /// name, a file over 10 GiB, a chunk size outside [256 KiB, 16 MiB] or
    /// not a power of two, concurrency outside 1..=8, and plans that exceed
    /// 10 000 chunks.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file_path: PathBuf,
        filename: String,
        mime_type: Option<String>,
        total_size: u64,
        chunk_size: u64,
        concurrency: usize,
        auto_tune: bool,
        provider: ProviderKind,
    ) -> UploadResult<Self> {
        if filename.trim().is_empty() {
            return Err(UploadError::Validation("file name is empty".to_string()));
        }
        if total_size > MAX_FILE_SIZE {
            return Err(UploadError::Validation(format!(
                "file size {} exceeds the {} byte limit",
                total_size, MAX_FILE_SIZE
            )));
        }
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) || !chunk_size.is_power_of_two()
        {
            return Err(UploadError::Validation(format!(
                "chunk size {} must be a power of two in [{}, {}]",
                chunk_size, MIN_CHUNK_SIZE, MAX_CHUNK_SIZE
            )));
        }
        if !(1..=8).contains(&concurrency) {
            return Err(UploadError::Validation(format!(
                "concurrency {} must be between 1 and 8",
                concurrency
            )));
        }

        let chunks = plan::plan(total_size, chunk_size);
        if chunks.len() > MAX_CHUNK_COUNT {
            return Err(UploadError::Validation(format!(
                "plan of {} chunks exceeds the {} chunk limit",
                chunks.len(),
                MAX_CHUNK_COUNT
            )));
        }

        Ok(Self {
            session_id: Uuid::new_v4().to_string(),
            upload_id: None,
            file_path,
            filename,
            mime_type,
            total_size,
            chunk_size,
            concurrency,
            auto_tune,
            provider,
            file_hash: None,
            chunks,
            completed_indices: BTreeSet::new(),
            failed_indices: BTreeSet::new(),
            etags: BTreeMap::new(),
            bytes_done: 0,
            status: SessionStatus::Pending,
            start_time: None,
            end_time: None,
            final_location: None,
            error: None,
            started_at: None,
        })
    }

    pub fn n_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Chunks that still need dispatching, in plan order
    pub fn pending_indices(&self) -> Vec<usize> {
        self.chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Pending && !self.completed_indices.contains(&c.index))
            .map(|c| c.index)
            .collect()
    }

    pub fn all_chunks_complete(&self) -> bool {
        self.completed_indices.len() == self.chunks.len()
    }

    /// Permanent failures allowed before the session escalates to Failed
    pub fn failure_threshold(&self) -> usize {
        self.n_chunks().div_ceil(10)
    }

    pub fn threshold_tripped(&self) -> bool {
        self.failed_indices.len() > self.failure_threshold()
    }

    /// Wall-clock elapsed since the session started uploading
    pub fn elapsed(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    // Transitions. Each checks its precondition and leaves the session
    // untouched on rejection.

    /// `start` requires Pending or Failed
    pub fn begin_upload(&mut self) -> UploadResult<()> {
        match self.status {
            SessionStatus::Pending | SessionStatus::Failed => {
                self.status = SessionStatus::Uploading;
                if self.started_at.is_none() {
                    self.started_at = Some(Instant::now());
                    self.start_time = Some(Utc::now());
                }
                Ok(())
            }
            other => Err(UploadError::Validation(format!(
                "cannot start upload from {:?} state",
                other
            ))),
        }
    }

    /// `pause` requires Uploading; in-flight chunks keep running
    pub fn pause(&mut self) -> UploadResult<()> {
        match self.status {
            SessionStatus::Uploading => {
                self.status = SessionStatus::Paused;
                Ok(())
            }
            other => Err(UploadError::Validation(format!(
                "cannot pause from {:?} state",
                other
            ))),
        }
    }

    /// `resume` requires Paused; dispatch continues on the current plan
    pub fn resume(&mut self) -> UploadResult<()> {
        match self.status {
            SessionStatus::Paused => {
                self.status = SessionStatus::Uploading;
                Ok(())
            }
            other => Err(UploadError::Validation(format!(
                "cannot resume from {:?} state",
                other
            ))),
        }
    }

    /// `cancel` is admissible from any non-terminal state. Returns false
    /// (and changes nothing) when the session is already terminal.
    pub fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = SessionStatus::Cancelled;
        self.end_time = Some(Utc::now());
        self.error = Some(FailureReport::new(&UploadError::Cancelled, None));
        true
    }

    /// `retry` from Failed: clear permanent failures, reset attempt
    /// counters, keep completed chunks
    pub fn prepare_retry(&mut self) -> UploadResult<()> {
        if self.status != SessionStatus::Failed {
            return Err(UploadError::Validation(format!(
                "cannot retry from {:?} state",
                self.status
            )));
        }
        self.failed_indices.clear();
        self.error = None;
        self.end_time = None;
        for chunk in &mut self.chunks {
            if chunk.status != ChunkStatus::Completed {
                chunk.status = ChunkStatus::Pending;
                chunk.attempts = 0;
            }
        }
        self.status = SessionStatus::Uploading;
        Ok(())
    }

    pub fn mark_completed(&mut self, final_url: String) {
        self.status = SessionStatus::Completed;
        self.final_location = Some(final_url);
        self.end_time = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: &UploadError, chunk_index: Option<usize>) {
        self.status = SessionStatus::Failed;
        self.error = Some(FailureReport::new(error, chunk_index));
        self.end_time = Some(Utc::now());
    }

    /// Record a chunk handed to a worker
    pub fn mark_chunk_dispatched(&mut self, index: usize) {
        if let Some(chunk) = self.chunks.get_mut(index) {
            chunk.status = ChunkStatus::Uploading;
            chunk.attempts += 1;
        }
    }

    /// Apply a successful chunk transfer
    pub fn record_chunk_completed(
        &mut self,
        index: usize,
        etag: Option<String>,
        hash: Option<[u8; 32]>,
    ) {
        if let Some(chunk) = self.chunks.get_mut(index) {
            chunk.status = ChunkStatus::Completed;
            if chunk.hash.is_none() {
                chunk.hash = hash;
            }
            if self.completed_indices.insert(index) {
                self.bytes_done += chunk.size;
            }
            self.failed_indices.remove(&index);
            if let Some(tag) = etag {
                self.etags.insert(index, tag);
            }
        }
    }

    /// Apply a permanent chunk failure
    pub fn record_chunk_failed(&mut self, index: usize) {
        if let Some(chunk) = self.chunks.get_mut(index) {
            chunk.status = ChunkStatus::Failed;
        }
        if !self.completed_indices.contains(&index) {
            self.failed_indices.insert(index);
        }
    }

    /// Current progress view, including speed and ETA
    pub fn progress_update(&self, active_chunks: usize) -> ProgressUpdate {
        ProgressUpdate::new(
            self.total_size,
            self.bytes_done,
            self.elapsed(),
            self.n_chunks(),
            self.completed_indices.len(),
            self.failed_indices.len(),
            active_chunks,
        )
    }

    /// Snapshot in the control-plane status shape, for embedding frontends
    pub fn status_report(&self) -> UploadStatusResponse {
        UploadStatusResponse {
            status: self.status.as_str().to_string(),
            progress: self.progress_update(0).progress_pct,
            completed_chunks: self.completed_indices.len(),
            total_chunks: self.n_chunks(),
            failed_chunks: self.failed_indices.len(),
            final_url: self.final_location.clone(),
        }
    }

    /// Multipart parts collected so far, sorted by ascending 1-based part
    /// number, as the S3 finalize payload requires
    pub fn completed_parts(&self) -> Vec<CompletedPart> {
        self.completed_indices
            .iter()
            .map(|&index| CompletedPart {
                part_number: index + 1,
                etag: self.etags.get(&index).cloned(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn session(total_size: u64, chunk_size: u64) -> UploadSession {
        UploadSession::new(
            PathBuf::from("/tmp/source.bin"),
            "source.bin".to_string(),
            None,
            total_size,
            chunk_size,
            3,
            false,
            ProviderKind::S3,
        )
        .unwrap()
    }

    #[test]
    fn validation_rejects_bad_parameters() {
        let make = |name: &str, size, chunk, conc| {
            UploadSession::new(
                PathBuf::from("/tmp/f"),
                name.to_string(),
                None,
                size,
                chunk,
                conc,
                false,
                ProviderKind::S3,
            )
        };
        assert!(matches!(
            make("", MIB, MIB, 3),
            Err(UploadError::Validation(_))
        ));
        assert!(matches!(
            make("f", 11 * 1024 * MIB, MIB, 3),
            Err(UploadError::Validation(_))
        ));
        assert!(matches!(
            make("f", MIB, 3 * MIB, 3),
            Err(UploadError::Validation(_))
        ));
        assert!(matches!(
            make("f", MIB, MIB, 0),
            Err(UploadError::Validation(_))
        ));
        assert!(matches!(
            make("f", MIB, MIB, 9),
            Err(UploadError::Validation(_))
        ));
        // 10 GiB at 256 KiB would be 40 960 chunks
        assert!(matches!(
            make("f", 10 * 1024 * MIB, 256 * 1024, 3),
            Err(UploadError::Validation(_))
        ));
    }

    #[test]
    fn chunk_size_clamp_boundaries_are_accepted() {
        for chunk_size in [MIN_CHUNK_SIZE, MAX_CHUNK_SIZE] {
            let s = UploadSession::new(
                PathBuf::from("/tmp/f"),
                "f".to_string(),
                None,
                64 * MIB,
                chunk_size,
                3,
                false,
                ProviderKind::S3,
            )
            .unwrap();
            assert_eq!(s.chunk_size, chunk_size);
        }
    }

    #[test]
    fn lifecycle_transitions() {
        let mut s = session(5 * MIB, MIB);
        assert_eq!(s.status, SessionStatus::Pending);
        assert!(s.pause().is_err());
        assert!(s.resume().is_err());

        s.begin_upload().unwrap();
        assert_eq!(s.status, SessionStatus::Uploading);
        assert!(s.begin_upload().is_err());

        s.pause().unwrap();
        assert_eq!(s.status, SessionStatus::Paused);
        s.resume().unwrap();
        assert_eq!(s.status, SessionStatus::Uploading);

        assert!(s.cancel());
        assert_eq!(s.status, SessionStatus::Cancelled);
    }

    #[test]
    fn cancel_on_terminal_session_is_a_noop() {
        let mut s = session(MIB, MIB);
        s.begin_upload().unwrap();
        s.mark_completed("https://bucket/object".to_string());
        let end_time = s.end_time;
        assert!(!s.cancel());
        assert_eq!(s.status, SessionStatus::Completed);
        assert_eq!(s.end_time, end_time);
    }

    #[test]
    fn completion_accounting_upholds_invariants() {
        let mut s = session(5 * MIB, MIB);
        s.begin_upload().unwrap();

        s.mark_chunk_dispatched(0);
        s.record_chunk_completed(0, Some("e1".to_string()), None);
        s.mark_chunk_dispatched(1);
        s.record_chunk_failed(1);

        assert_eq!(s.bytes_done, MIB);
        assert!(s.completed_indices.contains(&0));
        assert!(s.failed_indices.contains(&1));
        assert!(s.completed_indices.is_disjoint(&s.failed_indices));

        // Duplicate completion must not double-count
        s.record_chunk_completed(0, None, None);
        assert_eq!(s.bytes_done, MIB);

        // A failed chunk that later succeeds leaves the failed set
        s.record_chunk_completed(1, Some("e2".to_string()), None);
        assert!(s.failed_indices.is_empty());
        assert_eq!(s.bytes_done, 2 * MIB);
    }

    #[test]
    fn threshold_is_ceil_of_ten_percent() {
        let s = session(10 * MIB, MIB);
        assert_eq!(s.failure_threshold(), 1);

        let mut s = session(10 * MIB, MIB);
        s.begin_upload().unwrap();
        s.record_chunk_failed(3);
        assert!(!s.threshold_tripped());
        s.record_chunk_failed(7);
        assert!(s.threshold_tripped());
    }

    #[test]
    fn retry_clears_failures_and_keeps_completions() {
        let mut s = session(5 * MIB, MIB);
        s.begin_upload().unwrap();
        s.mark_chunk_dispatched(0);
        s.record_chunk_completed(0, Some("e1".to_string()), None);
        s.mark_chunk_dispatched(1);
        s.record_chunk_failed(1);
        s.mark_failed(&UploadError::http(400, "denied"), Some(1));

        s.prepare_retry().unwrap();
        assert_eq!(s.status, SessionStatus::Uploading);
        assert!(s.failed_indices.is_empty());
        assert!(s.error.is_none());
        assert!(s.completed_indices.contains(&0));
        assert_eq!(s.chunks[1].attempts, 0);
        assert_eq!(s.chunks[1].status, ChunkStatus::Pending);
    }

    #[test]
    fn completed_parts_are_one_based_and_sorted() {
        let mut s = session(5 * MIB, MIB);
        s.begin_upload().unwrap();
        for index in [4, 0, 2, 1, 3] {
            s.mark_chunk_dispatched(index);
            s.record_chunk_completed(index, Some(format!("e{}", index + 1)), None);
        }
        let parts = s.completed_parts();
        let numbers: Vec<usize> = parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert_eq!(parts[0].etag.as_deref(), Some("e1"));
    }

    #[test]
    fn status_report_mirrors_the_control_plane_shape() {
        let mut s = session(4 * MIB, MIB);
        s.begin_upload().unwrap();
        s.mark_chunk_dispatched(0);
        s.record_chunk_completed(0, None, None);
        let report = s.status_report();
        assert_eq!(report.status, "uploading");
        assert_eq!(report.total_chunks, 4);
        assert_eq!(report.completed_chunks, 1);
        assert_eq!(report.failed_chunks, 0);
        assert!((report.progress - 25.0).abs() < 1e-9);
        assert!(report.final_url.is_none());
    }

    #[test]
    fn pending_indices_skip_dispatched_and_completed() {
        let mut s = session(4 * MIB, MIB);
        s.begin_upload().unwrap();
        s.mark_chunk_dispatched(0);
        s.record_chunk_completed(0, None, None);
        s.mark_chunk_dispatched(1);
        assert_eq!(s.pending_indices(), vec![2, 3]);
    }
}
