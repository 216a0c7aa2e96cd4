//! # devlink-pipeline
//!
//! Threaded media pipeline for devlink.
//!
//! This crate provides:
//! - Bounded queues with blocking or evict-oldest overflow
//! - Stage/worker abstraction with cooperative cancellation
//! - Reader, sender, receiver and sync stages
//! - Session orchestration (device setup, stage wiring, display loop)
//! - UDP relay stages for the proxy
//! - Configuration from YAML and environment

pub mod config;
pub mod error;
pub mod fps;
pub mod queue;
pub mod reader;
pub mod receiver;
pub mod relay;
pub mod sender;
pub mod session;
pub mod source;
pub mod stage;
pub mod sync;

use bytes::Bytes;
use devlink_protocol::PoseResult;

pub use config::{
    Config, ConfigError, DeviceConfig, NetworkConfig, PipelineConfig, ProtocolConfig, SourceConfig,
};
pub use error::PipelineError;
pub use fps::FpsMeter;
pub use queue::{BoundedQueue, Feed, Indexed, OverflowPolicy};
pub use reader::SourceReader;
pub use receiver::StreamReceiver;
pub use relay::{Relay, RelayDirection, RelayStats};
pub use sender::MediaSender;
pub use session::{DisplaySink, LogSink, MediaSource, RunningPipeline, Session};
pub use source::{CaptureSource, FrameSource, ImageFiles, MemorySource, SourceEvent, SourceKind};
pub use stage::{CancelToken, Stage, Worker, DEFAULT_POLL_TIMEOUT};
pub use sync::{ShowQueue, Step, SyncStage, SyncedFrame};

/// Indexed frames, ended by [`Feed::End`] when the producer runs dry.
pub type FrameQueue = BoundedQueue<Feed<Indexed<Bytes>>>;

/// Pose results indexed by the image they were computed from.
pub type PoseQueue = BoundedQueue<Indexed<PoseResult>>;
