//! # devlink-protocol
//!
//! Wire protocol implementation for devlink.
//!
//! This crate provides:
//! - Fixed 16-byte frame header codec
//! - Segmentation of arbitrarily large messages into datagram-sized frames
//! - Reassembly state machine validating inbound frame sequences
//! - Message envelope with command codes and response correlation
//! - Application bodies exchanged with the device

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::{Assembled, Decoder, Encoder, Progress, Segments};
pub use error::{ProtocolError, Status};
pub use frame::{decode_header, encode_header, Frame, FrameHeader, FRAME_HEADER_SIZE};
pub use message::{
    encode_payload, Body, BoundingBox, CameraCtrl, CameraParam, CommandCode, DeviceStatus,
    GetPropertyRequest, GetPropertyResponse, HandDirs, ImageFrame, Keypoint2d, Keypoint3d,
    MediaSourceType, Message, PixelFormat, PoseResult, PropertyId, SetPropertyRequest,
    SetPropertyResponse, StatusResponse, StreamTarget, SwitchVersionRequest,
    SwitchVersionResponse, RESPONSE_FLAG,
};

/// Largest datagram the receive path will accept (64 KiB).
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Largest UDP payload over IPv4.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Default per-datagram ceiling, matching the device firmware.
pub const DEFAULT_FRAME_MAX_BYTES: usize = 65_000;

/// Default ceiling on a reassembled message (16 MiB).
pub const DEFAULT_PAYLOAD_MAX_BYTES: usize = 16 * 1024 * 1024;
