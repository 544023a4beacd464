//! Client error types.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use octopus_protocol::ProtocolError;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Stable error codes callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// `group` is missing or not a string.
    GroupNotString,
    /// `group` is empty after trimming.
    GroupEmpty,
    /// `name` is not a string.
    NameNotString,
    /// `name` is empty after trimming.
    NameEmpty,
    /// No response before the request deadline.
    Timeout,
    /// Request timeout is not a non-negative integer.
    InvalidTimeout,
    /// `name` equals `group`.
    NameEqualsGroup,
    /// The broker refused the identity.
    IdentityRejected,
    /// The connection closed while the operation was pending.
    ConnectionClosed,
    /// The stream source was already consumed.
    StreamNotReadable,
}

impl ErrorCode {
    /// Returns the wire-stable code string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GroupNotString => "E001",
            Self::GroupEmpty => "E002",
            Self::NameNotString => "E003",
            Self::NameEmpty => "E004",
            Self::Timeout => "E005",
            Self::InvalidTimeout => "E006",
            Self::NameEqualsGroup => "E007",
            Self::IdentityRejected => "E008",
            Self::ConnectionClosed => "E009",
            Self::StreamNotReadable => "E010",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in the client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("group must be a string")]
    GroupNotString,

    #[error("group must not be empty")]
    GroupEmpty,

    #[error("name must be a string")]
    NameNotString,

    #[error("name is an empty string")]
    NameEmpty,

    #[error("name must differ from group")]
    NameEqualsGroup,

    #[error("request timeout")]
    Timeout,

    #[error("timeout is not an integer number")]
    InvalidTimeout,

    /// Broker declined the identity handshake.
    #[error("identity rejected: {reason}")]
    IdentityRejected { reason: String },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("stream source is not readable")]
    StreamNotReadable,

    /// Peer answered a request with an error.
    #[error("{message}")]
    Remote {
        message: String,
        data: Option<Value>,
    },

    /// Transport-level failure, forwarded as reported.
    #[error("transport error: {0}")]
    Transport(String),

    /// Protocol/codec error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// IO error, including stream source failures.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No connection has been started, or the client task is gone.
    #[error("not connected")]
    NotConnected,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Returns the stable code for this error, if it has one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::GroupNotString => Some(ErrorCode::GroupNotString),
            Self::GroupEmpty => Some(ErrorCode::GroupEmpty),
            Self::NameNotString => Some(ErrorCode::NameNotString),
            Self::NameEmpty => Some(ErrorCode::NameEmpty),
            Self::NameEqualsGroup => Some(ErrorCode::NameEqualsGroup),
            Self::Timeout => Some(ErrorCode::Timeout),
            Self::InvalidTimeout => Some(ErrorCode::InvalidTimeout),
            Self::IdentityRejected { .. } => Some(ErrorCode::IdentityRejected),
            Self::ConnectionClosed => Some(ErrorCode::ConnectionClosed),
            Self::StreamNotReadable => Some(ErrorCode::StreamNotReadable),
            _ => None,
        }
    }

    /// Creates a remote error from an error response.
    pub fn remote(message: impl Into<String>, data: Option<Value>) -> Self {
        Self::Remote {
            message: message.into(),
            data,
        }
    }

    /// Payload attached to a remote error.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Remote { data, .. } => data.as_ref(),
            _ => None,
        }
    }
}
