//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding envelopes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize or parse JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame parsed as JSON but is not an object.
    #[error("expected a JSON object, got {found}")]
    NotAnObject { found: &'static str },

    /// Stream chunk payload could not be turned back into bytes.
    #[error("invalid stream chunk: {0}")]
    InvalidChunk(String),

    /// Empty frame received.
    #[error("empty message")]
    EmptyMessage,
}
