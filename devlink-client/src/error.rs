//! Client error types.

use devlink_protocol::{CommandCode, PropertyId, Status};
use std::net::SocketAddr;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("protocol error: {0}")]
    Protocol(#[from] devlink_protocol::ProtocolError),

    #[error("request timeout")]
    Timeout,

    #[error("no target address: nothing received yet and none configured")]
    NoTarget,

    #[error("unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse {
        expected: CommandCode,
        actual: CommandCode,
    },

    #[error("device returned status {status}")]
    Status { status: Status },

    #[error("property mismatch: expected {expected}, got {actual}")]
    PropertyMismatch {
        expected: PropertyId,
        actual: PropertyId,
    },

    #[error("version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout => true,
            ClientError::Status { status } => status.is_retryable(),
            ClientError::Protocol(err) => err.is_sequence_error(),
            _ => false,
        }
    }

    /// Returns whether this error only means nothing arrived in time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout)
    }
}
