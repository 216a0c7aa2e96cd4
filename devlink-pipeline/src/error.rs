//! Pipeline error types.

use crate::config::ConfigError;
use thiserror::Error;

/// Pipeline errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("client error: {0}")]
    Client(#[from] devlink_client::ClientError),

    #[error("protocol error: {0}")]
    Protocol(#[from] devlink_protocol::ProtocolError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to spawn stage '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("stage '{0}' panicked")]
    WorkerPanicked(String),

    #[error("frame source error: {0}")]
    Source(String),
}

impl PipelineError {
    /// Returns whether the stage loop should keep going after this error.
    ///
    /// Transport hiccups and broken messages are local to one receive; only
    /// setup and programming errors end a stage.
    pub fn is_recoverable(&self) -> bool {
        match self {
            PipelineError::Client(e) => !matches!(
                e,
                devlink_client::ClientError::Bind { .. } | devlink_client::ClientError::NoTarget
            ),
            PipelineError::Protocol(_) => true,
            _ => false,
        }
    }
}
