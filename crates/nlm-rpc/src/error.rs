//! Error types for the nlm-rpc crate.
//!
//! Everything that can go wrong between a raw response body and a decoded
//! payload tree is a [`DecodeError`]. Positional mappers report [`ShapeError`].

use crate::transport::MAX_FRAME_CHARS;

/// Errors produced while reading frames, parsing envelopes or decoding payloads
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid frame length line: {0:?}")]
    InvalidLength(String),

    #[error("Truncated frame: declared {expected} characters, {available} available")]
    TruncatedFrame { expected: usize, available: usize },

    #[error("Frame too large: {0} characters (max: {MAX_FRAME_CHARS})")]
    FrameTooLarge(usize),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Invalid frame JSON: {0}")]
    InvalidFrameJson(#[source] serde_json::Error),

    #[error("Invalid payload for {method_id}: {source}")]
    InvalidPayload {
        method_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid request body: {0}")]
    InvalidRequest(String),

    #[error("Method {method_id} not found in response (found: {found:?})")]
    MethodNotFoundInResponse {
        method_id: String,
        found: Vec<String>,
    },

    #[error("Remote error for {method_id} (status: {code:?})")]
    RemoteStatus {
        method_id: String,
        code: Option<i64>,
    },
}

impl DecodeError {
    /// True for malformed framing, lengths or JSON. These are never recoverable.
    #[must_use]
    pub fn is_transport_decode(&self) -> bool {
        matches!(
            self,
            DecodeError::Io(_)
                | DecodeError::InvalidLength(_)
                | DecodeError::TruncatedFrame { .. }
                | DecodeError::FrameTooLarge(_)
                | DecodeError::Utf8(_)
                | DecodeError::InvalidFrameJson(_)
                | DecodeError::InvalidPayload { .. }
                | DecodeError::InvalidRequest(_)
        )
    }
}

/// A positional tree did not have the shape a mapper requires
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    #[error("{what}: expected a sequence, found {found}")]
    NotASequence {
        what: &'static str,
        found: &'static str,
    },

    #[error("{what}: expected at least {expected} positions, found {actual}")]
    TooShort {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

pub type Result<T> = std::result::Result<T, DecodeError>;
