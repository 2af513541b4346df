use std::time::Duration;

use nlm_rpc::{DecodeError, ShapeError};
use thiserror::Error;

/// Remote status: caller is not authenticated
pub const STATUS_UNAUTHENTICATED: i64 = 16;
/// Remote status: credentials lack permission (also seen on stale tokens)
pub const STATUS_PERMISSION_DENIED: i64 = 7;
/// Remote status: quota or rate limit hit
pub const STATUS_RESOURCE_EXHAUSTED: i64 = 8;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Decode error: {0}")]
    Decode(DecodeError),

    #[error("Method {method_id} not found in response (found: {found:?})")]
    MethodNotFound {
        method_id: String,
        found: Vec<String>,
    },

    #[error("Authentication expired: {0}")]
    AuthExpired(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Server error: HTTP {status}")]
    Server { status: u16 },

    #[error("HTTP error: {status}")]
    Http { status: u16 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out after {elapsed:?} (last state: {})", last.as_deref().unwrap_or("none"))]
    Timeout {
        elapsed: Duration,
        last: Option<String>,
    },

    #[error("Unexpected response shape: {0}")]
    Shape(#[from] ShapeError),

    #[error("Source {source_id} failed to process")]
    SourceFailed { source_id: String },

    #[error("Source {source_id} not found in notebook")]
    SourceNotFound { source_id: String },

    #[error("Generation task {task_id} failed")]
    GenerationFailed { task_id: String },

    #[error("No research session for notebook {notebook_id}")]
    NoResearch { notebook_id: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Upload error: {0}")]
    Upload(String),
}

impl Error {
    /// Failures a caller's own backoff may reasonably retry.
    ///
    /// The call driver itself never retries these.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RateLimited(_) | Error::Server { .. } | Error::Transport(_)
        )
    }

    #[must_use]
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Error::AuthExpired(_))
    }
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::MethodNotFoundInResponse { method_id, found } => {
                Error::MethodNotFound { method_id, found }
            }
            DecodeError::RemoteStatus {
                method_id,
                code: Some(code @ (STATUS_UNAUTHENTICATED | STATUS_PERMISSION_DENIED)),
            } => Error::AuthExpired(format!("{method_id} returned status {code}")),
            DecodeError::RemoteStatus {
                method_id,
                code: Some(STATUS_RESOURCE_EXHAUSTED),
            } => Error::RateLimited(format!("{method_id} returned resource exhausted")),
            other => Error::Decode(other),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
