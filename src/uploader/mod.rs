//! Chunked upload engine
//!
//! This module drives a single file upload through planning, content
//! hashing, bounded-concurrency chunk transfer with retries, adaptive chunk
//! sizing, and the two-phase initialize/finalize session lifecycle across
//! the supported storage providers.

mod diagnostics;
mod error;
mod hash;
mod plan;
mod progress;
mod providers;
mod retry;
mod scheduler;
mod session;
mod tune;

pub use diagnostics::{DiagnosticsSnapshot, NetworkDiagnostics, Sample};
pub use error::{ErrorKind, FailureReport, UploadError, UploadResult};
pub use hash::{HashHandle, Hasher, hex_digest};
pub use plan::{Chunk, ChunkStatus, plan, replan_pending};
pub use progress::{FnProgress, NoOpProgress, ProgressCallback, ProgressUpdate};
pub use providers::{
    ChunkMeta, ChunkReceipt, ChunkTarget, CompletedPart, FileInfo, ProviderKind, StorageAdapter,
};
pub use retry::{RetryDecision, RetryPolicy};
pub use session::{SessionStatus, UploadSession};
pub use tune::{MAX_CHUNK_SIZE, MIN_CHUNK_SIZE, propose_chunk_size};

use scheduler::{ControlCommand, SessionRunner};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Attempts for the initialize call before the session is abandoned
const INITIALIZE_ATTEMPTS: u32 = 3;

/// Configuration for the uploader
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// Maximum transfer attempts per chunk
    pub max_attempts: u32,
    /// Request timeout for data-plane calls
    pub request_timeout: Duration,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            max_attempts: retry::MAX_ATTEMPTS,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Parameters for one upload session
#[derive(Debug, Clone)]
pub struct UploadParams {
    /// Local file path
    pub file_path: PathBuf,
    /// File name presented to the provider; derived from the path when None
    pub filename: Option<String>,
    /// MIME type; guessed from the file name when None
    pub mime_type: Option<String>,
    /// Target storage provider
    pub provider: ProviderKind,
    /// Chunk size in bytes, a power of two in [256 KiB, 16 MiB]
    pub chunk_size: u64,
    /// Concurrent chunk transfers, 1..=8
    pub concurrency: usize,
    /// Let diagnostics adjust the chunk size mid-session
    pub auto_tune: bool,
}

/// Main uploader: builds sessions against a control-plane client and drives
/// them to a terminal state
pub struct Uploader {
    api: Arc<skylift_api::Client>,
    http: reqwest::Client,
    hasher: Hasher,
    config: UploaderConfig,
}

impl Uploader {
    /// Create a new uploader instance
    pub fn new(api: Arc<skylift_api::Client>, config: UploaderConfig) -> UploadResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            api,
            http,
            hasher: Hasher::new(),
            config,
        })
    }

    /// Start an upload session, returning a handle for pause/resume/cancel
    /// and for awaiting the terminal result
    pub async fn start<P: ProgressCallback + 'static>(
        &self,
        params: UploadParams,
        progress: P,
    ) -> UploadResult<UploadHandle> {
        let metadata = tokio::fs::metadata(&params.file_path).await?;
        let total_size = metadata.len();

        let filename = match params.filename {
            Some(name) => name,
            None => params
                .file_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        };
        let mime_type = params.mime_type.or_else(|| {
            mime_guess::from_path(&filename)
                .first()
                .map(|m| m.essence_str().to_string())
        });

        let mut session = UploadSession::new(
            params.file_path,
            filename,
            mime_type,
            total_size,
            params.chunk_size,
            params.concurrency,
            params.auto_tune,
            params.provider,
        )?;

        info!(
            target: "uploader",
            session_id = %session.session_id,
            file = %session.file_path.display(),
            size = total_size,
            provider = session.provider.as_str(),
            chunks = session.n_chunks(),
            chunk_size = session.chunk_size,
            concurrency = session.concurrency,
            "Starting upload"
        );

        let file_info = FileInfo {
            filename: session.filename.clone(),
            total_size,
            file_hash: session.file_hash.as_ref().map(hex_digest),
            chunk_count: session.n_chunks(),
            mime_type: session.mime_type.clone(),
        };
        let adapter = self
            .initialize_with_retry(session.provider, &file_info)
            .await?;
        session.upload_id = Some(adapter.upload_id().to_string());

        Ok(self.spawn_session(session, adapter, Arc::new(progress)))
    }

    /// Run an upload to its terminal state
    pub async fn upload<P: ProgressCallback + 'static>(
        &self,
        params: UploadParams,
        progress: P,
    ) -> UploadResult<UploadSession> {
        let handle = self.start(params, progress).await?;
        handle.join().await
    }

    /// Wire the controller task around an initialized adapter
    fn spawn_session(
        &self,
        session: UploadSession,
        adapter: Arc<dyn StorageAdapter>,
        progress: Arc<dyn ProgressCallback>,
    ) -> UploadHandle {
        let cancel = CancellationToken::new();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(session.status);

        let runner = SessionRunner {
            session,
            adapter,
            hasher: self.hasher,
            policy: RetryPolicy::new(self.config.max_attempts),
            progress,
            cancel: cancel.clone(),
            commands: commands_rx,
            status_tx,
        };
        let task = tokio::spawn(runner.run());

        UploadHandle {
            commands: commands_tx,
            cancel,
            status: status_rx,
            task,
        }
    }

    /// Initialize the provider session, retrying transient failures
    async fn initialize_with_retry(
        &self,
        kind: ProviderKind,
        info: &FileInfo,
    ) -> UploadResult<Arc<dyn StorageAdapter>> {
        let mut attempt: u32 = 0;
        loop {
            match providers::initialize(kind, Arc::clone(&self.api), self.http.clone(), info).await
            {
                Ok(adapter) => return Ok(adapter),
                Err(error) => {
                    attempt += 1;
                    if !error.is_retryable() || attempt >= INITIALIZE_ATTEMPTS {
                        return Err(UploadError::Initialize(error.to_string()));
                    }
                    let delay = retry::backoff_delay(attempt - 1);
                    warn!(
                        target: "uploader",
                        provider = kind.as_str(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Initialize failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Handle to a running upload session.
///
/// Control is fire-and-forget: commands that are invalid for the current
/// state are ignored by the controller, matching the state machine's
/// preconditions.
#[derive(Debug)]
pub struct UploadHandle {
    commands: mpsc::UnboundedSender<ControlCommand>,
    cancel: CancellationToken,
    status: watch::Receiver<SessionStatus>,
    task: JoinHandle<UploadSession>,
}

impl UploadHandle {
    /// Stop dispatching new chunks; in-flight chunks run to completion
    pub fn pause(&self) {
        let _ = self.commands.send(ControlCommand::Pause);
    }

    /// Continue dispatching from the current plan
    pub fn resume(&self) {
        let _ = self.commands.send(ControlCommand::Resume);
    }

    /// Cancel the session and abort the provider upload best-effort
    pub fn cancel(&self) {
        let _ = self.commands.send(ControlCommand::Cancel);
    }

    /// Retry a session that reached the Failed state
    pub fn retry(&self) {
        let _ = self.commands.send(ControlCommand::Retry);
    }

    /// Most recent session status published by the controller
    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Wait for the next status change and return it
    pub async fn status_changed(&mut self) -> Option<SessionStatus> {
        self.status.changed().await.ok()?;
        Some(*self.status.borrow())
    }

    /// Token observed by every worker at each suspension point
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Wait for the session to reach a terminal state.
    ///
    /// Consumes the handle; a Failed session is returned as-is rather than
    /// waiting for a retry command that can no longer arrive.
    pub async fn join(self) -> UploadResult<UploadSession> {
        let UploadHandle {
            commands, task, ..
        } = self;
        drop(commands);
        match task.await {
            Ok(session) => Ok(session),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(UploadError::Cancelled),
        }
    }
}
