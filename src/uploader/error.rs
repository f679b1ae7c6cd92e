//! Error types for the upload engine

use thiserror::Error;

/// Result type for upload operations
pub type UploadResult<T> = Result<T, UploadError>;

/// Coarse error classification surfaced to callers alongside the message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Initialize,
    TransportTransient,
    TransportFatal,
    Hash,
    Threshold,
    Finalize,
    Cancelled,
}

/// Upload error types
#[derive(Debug, Error)]
pub enum UploadError {
    /// Bad input (empty file name, size over limit, too many chunks)
    #[error("Invalid upload parameters: {0}")]
    Validation(String),

    /// Session initialization failed after retries
    #[error("Failed to initialize upload session: {0}")]
    Initialize(String),

    /// Transport-level failure; `status` is absent when no response arrived
    #[error("Transport error: {message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// Provider signalled an incomplete ranged upload (HTTP 308); the next
    /// byte the provider expects is carried so the worker can re-issue the
    /// tail of the chunk
    #[error("Upload incomplete, provider expects byte {next_byte}")]
    Incomplete { next_byte: u64 },

    /// Digest computation failed
    #[error("Hash computation failed: {message}")]
    Hash {
        index: Option<usize>,
        message: String,
    },

    /// Failed to read the source file
    #[error("Failed to read local file: {0}")]
    FileRead(String),

    /// More than 10% of chunks permanently failed
    #[error("Too many chunk failures ({failed} of {total})")]
    Threshold { failed: usize, total: usize },

    /// Finalization failed after its single retry
    #[error("Failed to finalize upload: {0}")]
    Finalize(String),

    /// Upload cancelled
    #[error("Upload cancelled")]
    Cancelled,
}

impl UploadError {
    /// Check if this error is retryable at the chunk level.
    ///
    /// Transport failures without a response, HTTP >= 500, 408, 429, hash
    /// failures, local read failures and 308-incomplete results are
    /// retryable; every other 4xx and all engine-level errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Transport { status, .. } => match status {
                None => true,
                Some(s) => *s >= 500 || *s == 408 || *s == 429,
            },
            UploadError::Incomplete { .. } => true,
            UploadError::Hash { .. } => true,
            UploadError::FileRead(_) => true,
            _ => false,
        }
    }

    /// Check if this error is due to cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadError::Cancelled)
    }

    /// Classification used in user-visible failure reports
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::Validation(_) => ErrorKind::Validation,
            UploadError::Initialize(_) => ErrorKind::Initialize,
            UploadError::Transport { .. } | UploadError::Incomplete { .. } => {
                if self.is_retryable() {
                    ErrorKind::TransportTransient
                } else {
                    ErrorKind::TransportFatal
                }
            }
            UploadError::Hash { .. } | UploadError::FileRead(_) => ErrorKind::Hash,
            UploadError::Threshold { .. } => ErrorKind::Threshold,
            UploadError::Finalize(_) => ErrorKind::Finalize,
            UploadError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Create a transport error from an HTTP status and response body
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        UploadError::Transport {
            status: Some(status),
            message: format!("HTTP {}: {}", status, body.into()),
        }
    }
}

/// User-visible failure report
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub kind: ErrorKind,
    pub message: String,
    pub chunk_index: Option<usize>,
}

impl FailureReport {
    pub fn new(error: &UploadError, chunk_index: Option<usize>) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            chunk_index,
        }
    }
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        UploadError::FileRead(err.to_string())
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        UploadError::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

impl From<skylift_api::ApiError> for UploadError {
    fn from(err: skylift_api::ApiError) -> Self {
        UploadError::Transport {
            status: err.status(),
            message: err.to_string(),
        }
    }
}
