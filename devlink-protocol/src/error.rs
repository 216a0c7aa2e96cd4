//! Protocol error types and status codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Protocol-level errors that can occur during framing, reassembly or body decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame header: need 16 bytes, got {0}")]
    MalformedHeader(usize),

    #[error("frame length mismatch: header declares {declared} bytes, datagram has {actual}")]
    LengthMismatch { declared: u32, actual: usize },

    #[error("bad first frame: index {0}, expected 1")]
    BadFirstFrame(u32),

    #[error("zero frame total")]
    ZeroTotal,

    #[error(
        "frame sequence mismatch: expected msg {expected_id} frame {expected_index}/{expected_total}, \
         got msg {message_id} frame {index}/{total}"
    )]
    SequenceMismatch {
        expected_id: u32,
        expected_index: u32,
        expected_total: u32,
        message_id: u32,
        index: u32,
        total: u32,
    },

    #[error("invalid frame size: {size} bytes (allowed {min}..={max})")]
    InvalidFrameSize { size: usize, min: usize, max: usize },

    #[error("message too large: {0} bytes cannot be numbered in u32 frames")]
    MessageTooLarge(usize),

    #[error("truncated message: need {needed} bytes, got {actual}")]
    TruncatedMessage { needed: usize, actual: usize },

    #[error("invalid body: {0}")]
    InvalidBody(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Returns whether the datagram itself was unreadable.
    ///
    /// Malformed datagrams are skipped by the receive path; they never
    /// disturb an in-progress reassembly.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ProtocolError::MalformedHeader(_) | ProtocolError::LengthMismatch { .. }
        )
    }

    /// Returns whether this error aborted a reassembly attempt.
    pub fn is_sequence_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::BadFirstFrame(_)
                | ProtocolError::ZeroTotal
                | ProtocolError::SequenceMismatch { .. }
        )
    }
}

/// Status reported by the device in response bodies.
///
/// These codes are part of the device contract and must remain stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ok,
    Failed,
    InvalidParam,
    Unsupported,
    Busy,
}

impl Status {
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    /// Returns whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Status::Busy | Status::Failed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "OK"),
            Status::Failed => write!(f, "FAILED"),
            Status::InvalidParam => write!(f, "INVALID_PARAM"),
            Status::Unsupported => write!(f, "UNSUPPORTED"),
            Status::Busy => write!(f, "BUSY"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_retryable() {
        assert!(Status::Busy.is_retryable());
        assert!(Status::Failed.is_retryable());

        assert!(!Status::Ok.is_retryable());
        assert!(!Status::InvalidParam.is_retryable());
        assert!(!Status::Unsupported.is_retryable());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&Status::InvalidParam).unwrap();
        assert_eq!(json, "\"INVALID_PARAM\"");

        let parsed: Status = serde_json::from_str("\"OK\"").unwrap();
        assert_eq!(parsed, Status::Ok);
        assert_eq!(format!("{}", Status::Busy), "BUSY");
    }

    #[test]
    fn test_error_classification() {
        assert!(ProtocolError::MalformedHeader(3).is_malformed());
        assert!(ProtocolError::LengthMismatch {
            declared: 40,
            actual: 20
        }
        .is_malformed());
        assert!(!ProtocolError::ZeroTotal.is_malformed());

        assert!(ProtocolError::BadFirstFrame(2).is_sequence_error());
        assert!(ProtocolError::ZeroTotal.is_sequence_error());
        assert!(!ProtocolError::MalformedHeader(0).is_sequence_error());
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::MalformedHeader(7);
        assert!(err.to_string().contains('7'));

        let err = ProtocolError::BadFirstFrame(2);
        assert!(err.to_string().contains("bad first frame"));

        let err = ProtocolError::ZeroTotal;
        assert!(err.to_string().contains("zero"));

        let err = ProtocolError::SequenceMismatch {
            expected_id: 4,
            expected_index: 2,
            expected_total: 3,
            message_id: 5,
            index: 2,
            total: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("sequence mismatch"));
        assert!(msg.contains("msg 5"));

        let err = ProtocolError::TruncatedMessage {
            needed: 6,
            actual: 2,
        };
        assert!(err.to_string().contains('6'));
    }
}
