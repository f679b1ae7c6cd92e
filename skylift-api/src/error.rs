use thiserror::Error;

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Main error type for the control-plane API client
#[derive(Error, Debug)]
pub enum ApiError {
    /// Server rejected the request with a non-success status
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// Server-side validation failure (400 with a validation body)
    #[error("Validation rejected by server: {0}")]
    Validation(String),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    RequestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl ApiError {
    /// HTTP status carried by this error, when one exists.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Api { status, .. } => Some(*status),
            ApiError::Validation(_) => Some(400),
            ApiError::RequestError(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the failure is a transport-level fault with no server verdict
    /// (connect failures, timeouts, aborted bodies).
    pub fn is_transport(&self) -> bool {
        match self {
            ApiError::RequestError(e) => e.status().is_none(),
            _ => false,
        }
    }
}
