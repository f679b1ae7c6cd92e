//! Bounded-concurrency chunk scheduling and the session control loop.
//!
//! The controller task exclusively owns the [`UploadSession`]; chunk workers
//! get an immutable chunk snapshot plus an owned semaphore permit that they
//! hold for their entire retry loop, and report back over an event channel.

use crate::uploader::diagnostics::NetworkDiagnostics;
use crate::uploader::error::{UploadError, UploadResult};
use crate::uploader::hash::{Hasher, hex_digest};
use crate::uploader::plan::{self, Chunk};
use crate::uploader::progress::ProgressCallback;
use crate::uploader::providers::{ChunkMeta, StorageAdapter};
use crate::uploader::retry::{self, RetryDecision, RetryPolicy};
use crate::uploader::session::{SessionStatus, UploadSession};
use crate::uploader::tune;
use bytes::Bytes;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::sync::mpsc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// User-driven control inputs delivered through the upload handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlCommand {
    Pause,
    Resume,
    Cancel,
    Retry,
}

/// Terminal report a worker sends for its chunk
#[derive(Debug)]
enum WorkerEvent {
    Completed {
        index: usize,
        etag: Option<String>,
        hash: Option<[u8; 32]>,
        speed_bps: f64,
        latency_ms: f64,
    },
    Failed {
        index: usize,
        error: UploadError,
    },
}

/// Everything a chunk worker needs, shared across workers
struct WorkerContext {
    adapter: Arc<dyn StorageAdapter>,
    hasher: Hasher,
    policy: RetryPolicy,
    file_path: std::path::PathBuf,
    total_size: u64,
    cancel: CancellationToken,
}

/// Drives one session from Uploading to a terminal state
pub(crate) struct SessionRunner {
    pub session: UploadSession,
    pub adapter: Arc<dyn StorageAdapter>,
    pub hasher: Hasher,
    pub policy: RetryPolicy,
    pub progress: Arc<dyn ProgressCallback>,
    pub cancel: CancellationToken,
    pub commands: mpsc::UnboundedReceiver<ControlCommand>,
    pub status_tx: watch::Sender<SessionStatus>,
}

impl SessionRunner {
    pub(crate) async fn run(mut self) -> UploadSession {
        let semaphore = Arc::new(Semaphore::new(self.session.concurrency));
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<WorkerEvent>();
        let mut diagnostics = NetworkDiagnostics::new();
        let mut in_flight: usize = 0;
        let mut commands_open = true;
        // First permanent chunk failure, kept for the session-level report
        let mut last_failure: Option<(UploadError, usize)> = None;
        let mut abort_sent = false;

        // Whole-file digest runs in the background for the session's lifetime
        let mut file_hash_fut: Pin<Box<dyn Future<Output = UploadResult<[u8; 32]>> + Send>> =
            Box::pin(
                self.hasher
                    .hash_file(self.session.file_path.clone())
                    .digest(),
            );
        let mut file_hash_done = self.session.file_hash.is_some();

        if self.session.begin_upload().is_err() {
            return self.session;
        }
        let _ = self.status_tx.send(self.session.status);

        loop {
            if self.session.status == SessionStatus::Uploading {
                if !self.session.threshold_tripped() {
                    self.dispatch_pending(&semaphore, &events_tx, &mut in_flight);
                }

                if in_flight == 0 {
                    if self.session.all_chunks_complete() {
                        self.finalize_session(&mut abort_sent).await;
                    } else if self.session.pending_indices().is_empty()
                        || self.session.threshold_tripped()
                    {
                        self.escalate_failure(&mut last_failure);
                    }
                }
            }

            match self.session.status {
                SessionStatus::Completed | SessionStatus::Cancelled => {
                    if in_flight == 0 {
                        break;
                    }
                    // Drain workers that are still unwinding
                    if let Some(event) = events_rx.recv().await {
                        self.apply_event(event, &mut in_flight, &mut diagnostics, &mut last_failure);
                    }
                    continue;
                }
                SessionStatus::Failed => {
                    if !commands_open {
                        break;
                    }
                    match self.commands.recv().await {
                        Some(ControlCommand::Retry) => {
                            if self.session.prepare_retry().is_ok() {
                                info!(
                                    target: "uploader::scheduler",
                                    session_id = %self.session.session_id,
                                    "Retrying failed session"
                                );
                                last_failure = None;
                                let _ = self.status_tx.send(self.session.status);
                            }
                        }
                        Some(ControlCommand::Cancel) => {
                            self.handle_cancel(&mut abort_sent).await;
                        }
                        Some(_) => {}
                        None => break,
                    }
                    continue;
                }
                SessionStatus::Paused if !commands_open && in_flight == 0 => {
                    // Nobody left to resume this session
                    self.handle_cancel(&mut abort_sent).await;
                    continue;
                }
                _ => {}
            }

            tokio::select! {
                cmd = self.commands.recv(), if commands_open => {
                    match cmd {
                        Some(command) => self.handle_command(command, &mut abort_sent).await,
                        None => commands_open = false,
                    }
                }
                maybe_event = events_rx.recv(), if in_flight > 0 => {
                    if let Some(event) = maybe_event {
                        self.apply_event(event, &mut in_flight, &mut diagnostics, &mut last_failure);
                    }
                }
                digest = &mut file_hash_fut, if !file_hash_done => {
                    file_hash_done = true;
                    match digest {
                        Ok(hash) => self.session.file_hash = Some(hash),
                        Err(e) => warn!(
                            target: "uploader::scheduler",
                            session_id = %self.session.session_id,
                            error = %e,
                            "Whole-file hash failed"
                        ),
                    }
                }
                _ = self.cancel.cancelled(), if !self.cancel.is_cancelled() => {
                    self.handle_cancel(&mut abort_sent).await;
                }
            }
        }

        let _ = self.status_tx.send(self.session.status);
        self.session
    }

    /// Hand pending chunks to workers while permits are free
    fn dispatch_pending(
        &mut self,
        semaphore: &Arc<Semaphore>,
        events_tx: &mpsc::UnboundedSender<WorkerEvent>,
        in_flight: &mut usize,
    ) {
        for index in self.session.pending_indices() {
            let permit = match semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => break,
            };
            self.session.mark_chunk_dispatched(index);
            let chunk = self.session.chunks[index].clone();
            let ctx = WorkerContext {
                adapter: Arc::clone(&self.adapter),
                hasher: self.hasher,
                policy: self.policy,
                file_path: self.session.file_path.clone(),
                total_size: self.session.total_size,
                cancel: self.cancel.clone(),
            };
            spawn_chunk_worker(ctx, chunk, permit, events_tx.clone());
            *in_flight += 1;
        }
    }

    fn apply_event(
        &mut self,
        event: WorkerEvent,
        in_flight: &mut usize,
        diagnostics: &mut NetworkDiagnostics,
        last_failure: &mut Option<(UploadError, usize)>,
    ) {
        *in_flight = in_flight.saturating_sub(1);
        match event {
            WorkerEvent::Completed {
                index,
                etag,
                hash,
                speed_bps,
                latency_ms,
            } => {
                self.session.record_chunk_completed(index, etag, hash);
                diagnostics.record(speed_bps, latency_ms);
                self.maybe_retune(diagnostics);
                self.progress
                    .on_progress(self.session.progress_update(*in_flight));
            }
            WorkerEvent::Failed { index, error } => {
                if error.is_cancelled() {
                    // The worker unwound cooperatively; not a chunk verdict
                    return;
                }
                warn!(
                    target: "uploader::scheduler",
                    session_id = %self.session.session_id,
                    chunk = index,
                    error = %error,
                    "Chunk permanently failed"
                );
                self.session.record_chunk_failed(index);
                if last_failure.is_none() {
                    *last_failure = Some((error, index));
                }
                self.progress
                    .on_progress(self.session.progress_update(*in_flight));
            }
        }
    }

    /// Re-plan the untouched tail when diagnostics justify a new chunk size
    fn maybe_retune(&mut self, diagnostics: &NetworkDiagnostics) {
        if !self.session.auto_tune || !self.adapter.supports_replanning() {
            return;
        }
        if self.session.completed_indices.len() <= tune::MIN_SAMPLES_FOR_TUNING {
            return;
        }
        let snapshot = diagnostics.snapshot();
        let proposed = tune::propose_chunk_size(
            snapshot.mean_speed,
            snapshot.mean_latency,
            self.session.total_size,
        );
        if !tune::should_retune(self.session.chunk_size, proposed) {
            return;
        }
        if plan::replan_pending(
            &mut self.session.chunks,
            self.session.total_size,
            proposed,
        ) {
            info!(
                target: "uploader::scheduler",
                session_id = %self.session.session_id,
                old_chunk_size = self.session.chunk_size,
                new_chunk_size = proposed,
                mean_speed = snapshot.mean_speed,
                mean_latency = snapshot.mean_latency,
                stability = snapshot.stability,
                "Re-planned pending chunks"
            );
            self.session.chunk_size = proposed;
        }
    }

    async fn handle_command(&mut self, command: ControlCommand, abort_sent: &mut bool) {
        match command {
            ControlCommand::Pause => {
                if self.session.pause().is_ok() {
                    info!(
                        target: "uploader::scheduler",
                        session_id = %self.session.session_id,
                        "Upload paused"
                    );
                    let _ = self.status_tx.send(self.session.status);
                }
            }
            ControlCommand::Resume => {
                if self.session.resume().is_ok() {
                    info!(
                        target: "uploader::scheduler",
                        session_id = %self.session.session_id,
                        "Upload resumed"
                    );
                    let _ = self.status_tx.send(self.session.status);
                }
            }
            ControlCommand::Cancel => self.handle_cancel(abort_sent).await,
            // Retry is only meaningful from the Failed state, handled there
            ControlCommand::Retry => {}
        }
    }

    async fn handle_cancel(&mut self, abort_sent: &mut bool) {
        if !self.session.cancel() {
            return;
        }
        info!(
            target: "uploader::scheduler",
            session_id = %self.session.session_id,
            "Upload cancelled"
        );
        self.cancel.cancel();
        let _ = self.status_tx.send(self.session.status);

        if !*abort_sent {
            *abort_sent = true;
            if let Err(e) = self.adapter.abort().await {
                warn!(
                    target: "uploader::scheduler",
                    session_id = %self.session.session_id,
                    error = %e,
                    "Best-effort abort failed"
                );
            }
        }
    }

    /// All chunks are done: run finalize, with one retry on failure
    async fn finalize_session(&mut self, abort_sent: &mut bool) {
        let parts = self.session.completed_parts();
        let first_error = match self.adapter.finalize(&parts).await {
            Ok(final_url) => {
                self.complete(final_url);
                return;
            }
            Err(e) => e,
        };

        warn!(
            target: "uploader::scheduler",
            session_id = %self.session.session_id,
            error = %first_error,
            "Finalize failed, retrying once"
        );
        let delay = retry::backoff_delay(0);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.cancel.cancelled() => {
                self.handle_cancel(abort_sent).await;
                return;
            }
        }

        match self.adapter.finalize(&parts).await {
            Ok(final_url) => self.complete(final_url),
            Err(e) => {
                let error = match e {
                    UploadError::Finalize(_) => e,
                    other => UploadError::Finalize(other.to_string()),
                };
                self.session.mark_failed(&error, None);
                let _ = self.status_tx.send(self.session.status);
            }
        }
    }

    fn complete(&mut self, final_url: String) {
        info!(
            target: "uploader::scheduler",
            session_id = %self.session.session_id,
            final_url = %final_url,
            "Upload completed"
        );
        self.session.mark_completed(final_url);
        let _ = self.status_tx.send(self.session.status);
        self.progress.on_progress(self.session.progress_update(0));
    }

    /// No dispatchable work remains but chunks failed: escalate
    fn escalate_failure(&mut self, last_failure: &mut Option<(UploadError, usize)>) {
        if self.session.threshold_tripped() {
            let error = UploadError::Threshold {
                failed: self.session.failed_indices.len(),
                total: self.session.n_chunks(),
            };
            self.session.mark_failed(&error, None);
        } else if let Some((error, index)) = last_failure.take() {
            self.session.mark_failed(&error, Some(index));
        } else {
            // Defensive: no failure recorded yet nothing is pending
            let error = UploadError::Validation("upload stalled with no pending work".to_string());
            self.session.mark_failed(&error, None);
        }
        let _ = self.status_tx.send(self.session.status);
    }
}

/// Spawn a worker that owns one chunk for one dispatch, holding its
/// concurrency permit across the full retry loop
fn spawn_chunk_worker(
    ctx: WorkerContext,
    chunk: Chunk,
    permit: OwnedSemaphorePermit,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    tokio::spawn(async move {
        let _permit = permit;
        let index = chunk.index;
        match run_chunk(&ctx, &chunk).await {
            Ok((etag, hash, speed_bps, latency_ms)) => {
                let _ = events.send(WorkerEvent::Completed {
                    index,
                    etag,
                    hash,
                    speed_bps,
                    latency_ms,
                });
            }
            Err(error) => {
                let _ = events.send(WorkerEvent::Failed { index, error });
            }
        }
    });
}

/// Retry loop for one chunk: hash, transfer, consult the policy on failure.
/// 308 continuations narrow the send window instead of resending the whole
/// chunk.
async fn run_chunk(
    ctx: &WorkerContext,
    chunk: &Chunk,
) -> UploadResult<(Option<String>, Option<[u8; 32]>, f64, f64)> {
    let mut window_start = chunk.start;
    let mut hash = chunk.hash;
    let mut attempt: u32 = 0;

    loop {
        if ctx.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        match attempt_chunk(ctx, chunk, &mut hash, window_start).await {
            Ok((etag, speed_bps, latency_ms)) => {
                debug!(
                    target: "uploader::scheduler",
                    chunk = chunk.index,
                    attempt,
                    etag = ?etag,
                    "Chunk uploaded"
                );
                return Ok((etag, hash, speed_bps, latency_ms));
            }
            Err(error) if error.is_cancelled() => return Err(error),
            Err(error) => {
                if let UploadError::Incomplete { next_byte } = error {
                    window_start = next_byte.clamp(chunk.start, chunk.end);
                }
                match ctx.policy.decide(attempt, &error) {
                    RetryDecision::Retry(delay) => {
                        debug!(
                            target: "uploader::scheduler",
                            chunk = chunk.index,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Retrying chunk"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = ctx.cancel.cancelled() => return Err(UploadError::Cancelled),
                        }
                    }
                    RetryDecision::GiveUp => return Err(error),
                }
                attempt += 1;
            }
        }
    }
}

/// One transfer attempt: fresh read, lazy digest, measured adapter call
async fn attempt_chunk(
    ctx: &WorkerContext,
    chunk: &Chunk,
    hash: &mut Option<[u8; 32]>,
    window_start: u64,
) -> UploadResult<(Option<String>, f64, f64)> {
    let data = read_chunk(&ctx.file_path, chunk.start, chunk.size).await?;

    if hash.is_none() {
        let digest = ctx
            .hasher
            .hash_chunk(chunk.index, data.clone())
            .digest()
            .await?;
        *hash = Some(digest);
    }

    let window = data.slice((window_start - chunk.start) as usize..);
    let sent_bytes = window.len() as u64;
    let meta = ChunkMeta {
        index: chunk.index,
        start: window_start,
        end: chunk.end,
        total_size: ctx.total_size,
        chunk_hash: hash.as_ref().map(hex_digest),
    };

    let started = Instant::now();
    let receipt = ctx.adapter.upload_chunk(window, &meta, &ctx.cancel).await?;
    let elapsed = started.elapsed();

    // Request/response timing is measured to header arrival, which bounds
    // both the throughput sample and the latency sample
    let secs = elapsed.as_secs_f64();
    let speed_bps = if secs > 0.0 {
        sent_bytes as f64 / secs
    } else {
        0.0
    };
    let latency_ms = secs * 1000.0;

    Ok((receipt.etag, speed_bps, latency_ms))
}

/// Read one chunk's byte range; the file handle is opened per attempt and
/// never shared mutably
async fn read_chunk(path: &Path, start: u64, size: u64) -> UploadResult<Bytes> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(start)).await?;
    let mut buf = vec![0u8; size as usize];
    file.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::error::ErrorKind;
    use crate::uploader::progress::{NoOpProgress, ProgressCallback, ProgressUpdate};
    use crate::uploader::providers::{ChunkReceipt, ChunkTarget, CompletedPart, ProviderKind};
    use std::collections::{HashMap, VecDeque};
    use std::io::Write;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::NamedTempFile;

    const MIB: u64 = 1024 * 1024;

    /// Scripted response for one upload attempt
    #[derive(Debug, Clone, Copy)]
    enum StubResponse {
        Accept,
        Status(u16),
        Incomplete(u64),
        /// Park until the session is cancelled
        Block,
    }

    #[derive(Debug, Clone)]
    struct RecordedUpload {
        index: usize,
        start: u64,
        end: u64,
        at: tokio::time::Instant,
    }

    /// In-memory transport with per-chunk scripted behavior
    struct StubAdapter {
        kind: ProviderKind,
        script: StdMutex<HashMap<usize, VecDeque<StubResponse>>>,
        uploads: StdMutex<Vec<RecordedUpload>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
        finalize_calls: AtomicUsize,
        /// Number of leading finalize calls that fail
        finalize_failures: AtomicUsize,
        finalized_parts: StdMutex<Option<Vec<CompletedPart>>>,
        abort_calls: AtomicUsize,
    }

    impl StubAdapter {
        fn new(kind: ProviderKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                script: StdMutex::new(HashMap::new()),
                uploads: StdMutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                finalize_calls: AtomicUsize::new(0),
                finalize_failures: AtomicUsize::new(0),
                finalized_parts: StdMutex::new(None),
                abort_calls: AtomicUsize::new(0),
            })
        }

        fn script_chunk(&self, index: usize, responses: &[StubResponse]) {
            self.script
                .lock()
                .unwrap()
                .insert(index, responses.iter().copied().collect());
        }

        fn attempts_for(&self, index: usize) -> Vec<RecordedUpload> {
            self.uploads
                .lock()
                .unwrap()
                .iter()
                .filter(|u| u.index == index)
                .cloned()
                .collect()
        }

        fn upload_count(&self) -> usize {
            self.uploads.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl StorageAdapter for StubAdapter {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn upload_id(&self) -> &str {
            "upload-stub-1"
        }

        fn supports_replanning(&self) -> bool {
            self.kind != ProviderKind::S3
        }

        fn chunk_target(&self, _meta: &ChunkMeta) -> UploadResult<ChunkTarget> {
            Ok(ChunkTarget {
                url: "stub://target".to_string(),
                method: "PUT",
                headers: Vec::new(),
            })
        }

        async fn upload_chunk(
            &self,
            data: Bytes,
            meta: &ChunkMeta,
            cancel: &CancellationToken,
        ) -> UploadResult<ChunkReceipt> {
            assert_eq!(data.len() as u64, meta.end - meta.start);

            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            self.uploads.lock().unwrap().push(RecordedUpload {
                index: meta.index,
                start: meta.start,
                end: meta.end,
                at: tokio::time::Instant::now(),
            });

            let response = self
                .script
                .lock()
                .unwrap()
                .get_mut(&meta.index)
                .and_then(|queue| queue.pop_front())
                .unwrap_or(StubResponse::Accept);

            let result = match response {
                StubResponse::Accept => Ok(ChunkReceipt {
                    etag: Some(format!("e{}", meta.index + 1)),
                }),
                StubResponse::Status(status) => Err(UploadError::http(status, "stubbed failure")),
                StubResponse::Incomplete(next_byte) => Err(UploadError::Incomplete { next_byte }),
                StubResponse::Block => {
                    cancel.cancelled().await;
                    Err(UploadError::Cancelled)
                }
            };
            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn finalize(&self, parts: &[CompletedPart]) -> UploadResult<String> {
            let call = self.finalize_calls.fetch_add(1, Ordering::SeqCst);
            if call < self.finalize_failures.load(Ordering::SeqCst) {
                return Err(UploadError::Finalize("stubbed finalize failure".to_string()));
            }
            *self.finalized_parts.lock().unwrap() = Some(parts.to_vec());
            Ok("https://bucket.example.com/object".to_string())
        }

        async fn abort(&self) -> UploadResult<()> {
            self.abort_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Progress callback that forwards updates over a channel
    struct ChannelProgress(mpsc::UnboundedSender<ProgressUpdate>);

    impl ProgressCallback for ChannelProgress {
        fn on_progress(&self, update: ProgressUpdate) {
            let _ = self.0.send(update);
        }
    }

    fn write_fixture(size: u64) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        file.write_all(&data).unwrap();
        file
    }

    #[allow(clippy::type_complexity)]
    fn make_runner(
        file: &NamedTempFile,
        total_size: u64,
        chunk_size: u64,
        concurrency: usize,
        adapter: Arc<StubAdapter>,
        progress: Arc<dyn ProgressCallback>,
    ) -> (
        SessionRunner,
        mpsc::UnboundedSender<ControlCommand>,
        watch::Receiver<SessionStatus>,
    ) {
        let mut session = UploadSession::new(
            file.path().to_path_buf(),
            "fixture.bin".to_string(),
            None,
            total_size,
            chunk_size,
            concurrency,
            false,
            adapter.kind(),
        )
        .unwrap();
        session.upload_id = Some(adapter.upload_id().to_string());

        let cancel = CancellationToken::new();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(session.status);
        let runner = SessionRunner {
            session,
            adapter,
            hasher: Hasher::new(),
            policy: RetryPolicy::default(),
            progress,
            cancel,
            commands: commands_rx,
            status_tx,
        };
        (runner, commands_tx, status_rx)
    }

    #[tokio::test]
    async fn clean_upload_completes_and_finalizes_in_order() {
        let file = write_fixture(5 * MIB);
        let adapter = StubAdapter::new(ProviderKind::S3);
        let (runner, commands, _status) = make_runner(
            &file,
            5 * MIB,
            MIB,
            3,
            Arc::clone(&adapter),
            Arc::new(NoOpProgress),
        );
        drop(commands);

        let session = runner.run().await;

        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.n_chunks(), 5);
        assert_eq!(session.completed_indices.len(), 5);
        assert_eq!(session.bytes_done, 5 * MIB);
        assert_eq!(session.progress_update(0).progress_pct, 100.0);
        assert_eq!(
            session.final_location.as_deref(),
            Some("https://bucket.example.com/object")
        );

        // Multipart parts arrive 1-based, sorted, with their ETags
        assert_eq!(adapter.finalize_calls.load(Ordering::SeqCst), 1);
        let parts = adapter.finalized_parts.lock().unwrap().clone().unwrap();
        let numbers: Vec<usize> = parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        for (i, part) in parts.iter().enumerate() {
            assert_eq!(part.etag.as_deref(), Some(format!("e{}", i + 1).as_str()));
        }

        // The semaphore never admits more than `concurrency` workers
        assert!(adapter.max_active.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn empty_file_uploads_a_single_zero_chunk() {
        let file = write_fixture(0);
        let adapter = StubAdapter::new(ProviderKind::S3);
        let (runner, commands, _status) =
            make_runner(&file, 0, MIB, 2, Arc::clone(&adapter), Arc::new(NoOpProgress));
        drop(commands);

        let session = runner.run().await;

        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.n_chunks(), 1);
        assert_eq!(session.bytes_done, 0);
        assert_eq!(session.progress_update(0).progress_pct, 100.0);
        assert_eq!(adapter.upload_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_retries_with_backoff() {
        let file = write_fixture(2 * MIB);
        let adapter = StubAdapter::new(ProviderKind::S3);
        adapter.script_chunk(0, &[StubResponse::Status(503)]);
        let (runner, commands, _status) = make_runner(
            &file,
            2 * MIB,
            MIB,
            2,
            Arc::clone(&adapter),
            Arc::new(NoOpProgress),
        );
        drop(commands);

        let session = runner.run().await;

        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(
            session.completed_indices.iter().copied().collect::<Vec<_>>(),
            vec![0, 1]
        );

        let attempts = adapter.attempts_for(0);
        assert_eq!(attempts.len(), 2);
        let delay = attempts[1].at - attempts[0].at;
        assert!(delay >= std::time::Duration::from_millis(1_000), "{delay:?}");
        assert!(delay <= std::time::Duration::from_millis(1_200), "{delay:?}");
    }

    #[tokio::test]
    async fn fatal_chunk_failures_trip_the_threshold() {
        let file = write_fixture(10 * MIB);
        let adapter = StubAdapter::new(ProviderKind::S3);
        adapter.script_chunk(2, &[StubResponse::Status(400)]);
        adapter.script_chunk(7, &[StubResponse::Status(400)]);
        let (runner, commands, _status) = make_runner(
            &file,
            10 * MIB,
            MIB,
            3,
            Arc::clone(&adapter),
            Arc::new(NoOpProgress),
        );
        drop(commands);

        let session = runner.run().await;

        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(
            session.failed_indices.iter().copied().collect::<Vec<_>>(),
            vec![2, 7]
        );
        let report = session.error.as_ref().unwrap();
        assert_eq!(report.kind, ErrorKind::Threshold);
        // 400 is not retried
        assert_eq!(adapter.attempts_for(2).len(), 1);
        assert_eq!(adapter.attempts_for(7).len(), 1);
        assert_eq!(adapter.finalize_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn incomplete_range_reissues_the_tail() {
        let file = write_fixture(2 * MIB);
        let adapter = StubAdapter::new(ProviderKind::GoogleDrive);
        adapter.script_chunk(0, &[StubResponse::Incomplete(524_288)]);
        let (runner, commands, _status) = make_runner(
            &file,
            2 * MIB,
            MIB,
            1,
            Arc::clone(&adapter),
            Arc::new(NoOpProgress),
        );
        drop(commands);

        let session = runner.run().await;

        assert_eq!(session.status, SessionStatus::Completed);
        let attempts = adapter.attempts_for(0);
        assert_eq!(attempts.len(), 2);
        assert_eq!((attempts[0].start, attempts[0].end), (0, MIB));
        // Second attempt sends only the bytes the provider is missing
        assert_eq!((attempts[1].start, attempts[1].end), (524_288, MIB));
    }

    #[tokio::test]
    async fn pause_stops_dispatch_and_cancel_aborts_once() {
        let file = write_fixture(8 * MIB);
        let adapter = StubAdapter::new(ProviderKind::S3);
        for index in 3..8 {
            adapter.script_chunk(index, &[StubResponse::Block]);
        }
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let (runner, commands, mut status) = make_runner(
            &file,
            8 * MIB,
            MIB,
            3,
            Arc::clone(&adapter),
            Arc::new(ChannelProgress(progress_tx)),
        );
        let task = tokio::spawn(runner.run());

        while let Some(update) = progress_rx.recv().await {
            if update.completed_chunks >= 3 {
                break;
            }
        }
        commands.send(ControlCommand::Pause).unwrap();
        status
            .wait_for(|s| *s == SessionStatus::Paused)
            .await
            .unwrap();

        let dispatched_at_pause = adapter.upload_count();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(adapter.upload_count(), dispatched_at_pause);

        commands.send(ControlCommand::Cancel).unwrap();
        let session = task.await.unwrap();

        assert_eq!(session.status, SessionStatus::Cancelled);
        assert_eq!(adapter.abort_calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.completed_indices.len(), 3);
        assert_eq!(adapter.finalize_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn pause_then_resume_still_completes_every_chunk() {
        let file = write_fixture(6 * MIB);
        let adapter = StubAdapter::new(ProviderKind::S3);
        let (runner, commands, _status) = make_runner(
            &file,
            6 * MIB,
            MIB,
            2,
            Arc::clone(&adapter),
            Arc::new(NoOpProgress),
        );
        let task = tokio::spawn(runner.run());

        commands.send(ControlCommand::Pause).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        commands.send(ControlCommand::Resume).unwrap();
        drop(commands);

        let session = task.await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.completed_indices.len(), 6);
        assert_eq!(session.bytes_done, 6 * MIB);
    }

    #[tokio::test(start_paused = true)]
    async fn finalize_is_retried_once() {
        let file = write_fixture(MIB);
        let adapter = StubAdapter::new(ProviderKind::S3);
        adapter.finalize_failures.store(1, Ordering::SeqCst);
        let (runner, commands, _status) =
            make_runner(&file, MIB, MIB, 1, Arc::clone(&adapter), Arc::new(NoOpProgress));
        drop(commands);

        let session = runner.run().await;
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(adapter.finalize_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn finalize_failure_after_retry_fails_the_session() {
        let file = write_fixture(MIB);
        let adapter = StubAdapter::new(ProviderKind::S3);
        adapter.finalize_failures.store(2, Ordering::SeqCst);
        let (runner, commands, _status) =
            make_runner(&file, MIB, MIB, 1, Arc::clone(&adapter), Arc::new(NoOpProgress));
        drop(commands);

        let session = runner.run().await;
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(adapter.finalize_calls.load(Ordering::SeqCst), 2);
        assert_eq!(session.error.as_ref().unwrap().kind, ErrorKind::Finalize);
    }

    #[tokio::test]
    async fn retry_command_recovers_a_failed_session() {
        let file = write_fixture(3 * MIB);
        let adapter = StubAdapter::new(ProviderKind::S3);
        // Chunk 1 fails fatally on its first dispatch, then succeeds after
        // the manual retry
        adapter.script_chunk(1, &[StubResponse::Status(403)]);
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let (runner, commands, mut status) = make_runner(
            &file,
            3 * MIB,
            MIB,
            1,
            Arc::clone(&adapter),
            Arc::new(ChannelProgress(progress_tx)),
        );
        let task = tokio::spawn(runner.run());

        status
            .wait_for(|s| *s == SessionStatus::Failed)
            .await
            .unwrap();
        commands.send(ControlCommand::Retry).unwrap();
        status
            .wait_for(|s| *s == SessionStatus::Completed)
            .await
            .unwrap();
        drop(commands);

        let session = task.await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.completed_indices.len(), 3);
        // Drain any remaining progress updates
        while progress_rx.try_recv().is_ok() {}
    }

    #[tokio::test]
    async fn read_chunk_returns_exact_range() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
        file.write_all(&data).unwrap();

        let bytes = read_chunk(file.path(), 100, 256).await.unwrap();
        assert_eq!(&bytes[..], &data[100..356]);
    }

    #[tokio::test]
    async fn read_chunk_of_zero_bytes_is_empty() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let bytes = read_chunk(file.path(), 0, 0).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn read_past_end_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 10]).unwrap();
        let err = read_chunk(file.path(), 0, 64).await.unwrap_err();
        assert!(matches!(err, UploadError::FileRead(_)));
    }
}
