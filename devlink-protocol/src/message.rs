//! Message envelope, command codes and application bodies.
//!
//! A reassembled payload starts with a little-endian `u16` command code.
//! Responses (codes with [`RESPONSE_FLAG`] set) then carry the `u32` message id
//! of the request they answer. The rest is the body: JSON for structured
//! messages, a small binary layout for images.

use crate::error::{ProtocolError, Status};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// High bit marking a command code as a response.
pub const RESPONSE_FLAG: u16 = 0x8000;

const COMMAND_SIZE: usize = 2;
const REPLY_TO_SIZE: usize = 4;

/// Two-byte command code at the head of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandCode(pub u16);

impl CommandCode {
    // Control channel
    pub const GET_PROPERTY: CommandCode = CommandCode(0x0001);
    pub const SET_PROPERTY: CommandCode = CommandCode(0x0002);
    pub const SWITCH_APP_VERSION: CommandCode = CommandCode(0x0003);
    pub const REBOOT_SYSTEM: CommandCode = CommandCode(0x0004);

    // Stream channel
    pub const MEDIA_SOURCE_STREAM: CommandCode = CommandCode(0x0101);
    pub const STREAM_CAM_IMG: CommandCode = CommandCode(0x0201);
    pub const STREAM_HUMAN_POSE: CommandCode = CommandCode(0x0202);

    /// Response code for this request code.
    pub const fn response(self) -> CommandCode {
        CommandCode(self.0 | RESPONSE_FLAG)
    }

    /// Request code this code answers (identity for requests).
    pub const fn request(self) -> CommandCode {
        CommandCode(self.0 & !RESPONSE_FLAG)
    }

    pub const fn is_response(self) -> bool {
        self.0 & RESPONSE_FLAG != 0
    }

    /// Human-readable name of the request this code belongs to, if known.
    pub fn name(self) -> Option<&'static str> {
        let name = match self.request() {
            Self::GET_PROPERTY => "GET_PROPERTY",
            Self::SET_PROPERTY => "SET_PROPERTY",
            Self::SWITCH_APP_VERSION => "SWITCH_APP_VERSION",
            Self::REBOOT_SYSTEM => "REBOOT_SYSTEM",
            Self::MEDIA_SOURCE_STREAM => "MEDIA_SOURCE_STREAM",
            Self::STREAM_CAM_IMG => "STREAM_CAM_IMG",
            Self::STREAM_HUMAN_POSE => "STREAM_HUMAN_POSE",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.name(), self.is_response()) {
            (Some(name), false) => write!(f, "{}(0x{:04x})", name, self.0),
            (Some(name), true) => write!(f, "{}_RSP(0x{:04x})", name, self.0),
            (None, _) => write!(f, "0x{:04x}", self.0),
        }
    }
}

/// Encodes a message payload: command code, `reply_to` for responses, body.
///
/// `reply_to` is ignored for request codes and defaults to 0 for responses.
pub fn encode_payload(command: CommandCode, reply_to: Option<u32>, body: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(COMMAND_SIZE + REPLY_TO_SIZE + body.len());
    buf.put_u16_le(command.0);
    if command.is_response() {
        buf.put_u32_le(reply_to.unwrap_or(0));
    }
    buf.put_slice(body);
    buf
}

/// A reassembled application message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Message id taken from the frame headers.
    pub id: u32,
    pub command: CommandCode,
    /// Id of the request this message answers; present on responses only.
    pub reply_to: Option<u32>,
    pub body: Bytes,
}

impl Message {
    /// Parses a reassembled payload.
    pub fn decode(id: u32, mut payload: Bytes) -> Result<Self, ProtocolError> {
        if payload.len() < COMMAND_SIZE {
            return Err(ProtocolError::TruncatedMessage {
                needed: COMMAND_SIZE,
                actual: payload.len(),
            });
        }
        let command = CommandCode(payload.get_u16_le());

        let reply_to = if command.is_response() {
            if payload.len() < REPLY_TO_SIZE {
                return Err(ProtocolError::TruncatedMessage {
                    needed: COMMAND_SIZE + REPLY_TO_SIZE,
                    actual: COMMAND_SIZE + payload.len(),
                });
            }
            Some(payload.get_u32_le())
        } else {
            None
        };

        Ok(Self {
            id,
            command,
            reply_to,
            body: payload,
        })
    }

    /// Encodes this message back into a payload.
    pub fn encode(&self) -> BytesMut {
        encode_payload(self.command, self.reply_to, &self.body)
    }

    pub fn is_response(&self) -> bool {
        self.command.is_response()
    }

    /// Returns whether this message is the response to the given request.
    pub fn answers(&self, request_id: u32, request: CommandCode) -> bool {
        self.command == request.response() && self.reply_to == Some(request_id)
    }

    /// Decodes the body as `B`.
    pub fn body<B: Body>(&self) -> Result<B, ProtocolError> {
        B::from_bytes(self.body.clone())
    }
}

/// An application body that can cross the wire.
pub trait Body: Sized {
    fn to_bytes(&self) -> Result<Bytes, ProtocolError>;
    fn from_bytes(bytes: Bytes) -> Result<Self, ProtocolError>;
}

/// Empty body, used by commands without parameters.
impl Body for () {
    fn to_bytes(&self) -> Result<Bytes, ProtocolError> {
        Ok(Bytes::new())
    }

    fn from_bytes(_bytes: Bytes) -> Result<Self, ProtocolError> {
        Ok(())
    }
}

impl Body for Value {
    fn to_bytes(&self) -> Result<Bytes, ProtocolError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    fn from_bytes(bytes: Bytes) -> Result<Self, ProtocolError> {
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

macro_rules! json_body {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Body for $ty {
                fn to_bytes(&self) -> Result<Bytes, ProtocolError> {
                    Ok(Bytes::from(serde_json::to_vec(self)?))
                }

                fn from_bytes(bytes: Bytes) -> Result<Self, ProtocolError> {
                    Ok(serde_json::from_slice(&bytes)?)
                }
            }
        )*
    };
}

json_body!(
    GetPropertyRequest,
    GetPropertyResponse,
    SetPropertyRequest,
    SetPropertyResponse,
    SwitchVersionRequest,
    SwitchVersionResponse,
    StatusResponse,
    PoseResult,
);

/// Device property identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyId(pub u16);

impl PropertyId {
    pub const DEVICE_STATUS: PropertyId = PropertyId(0x0001);
    pub const DEVICE_BASE_INFO: PropertyId = PropertyId(0x0002);
    pub const TEMPERATURE: PropertyId = PropertyId(0x0003);
    pub const APP_NEW_VERSION: PropertyId = PropertyId(0x0004);
    pub const APP_VERSIONS: PropertyId = PropertyId(0x0005);
    pub const MEDIA_SOURCE: PropertyId = PropertyId(0x0010);
    pub const CAM_PARAM: PropertyId = PropertyId(0x0011);
    pub const CAM_REAL_PARAM: PropertyId = PropertyId(0x0012);
    pub const CAM_CTRL: PropertyId = PropertyId(0x0013);
    pub const ENABLE_CAM_IMG_STREAM: PropertyId = PropertyId(0x0020);
    pub const ENABLE_AI: PropertyId = PropertyId(0x0021);
    pub const STREAM_TARGET_ADDR: PropertyId = PropertyId(0x0022);
    pub const ENABLE_HUMAN_POSE_STREAM: PropertyId = PropertyId(0x0023);
    pub const HUMAN_BOX_MODEL_PARAM: PropertyId = PropertyId(0x0030);
    pub const HUMAN_POSE3D_MODEL_PARAM: PropertyId = PropertyId(0x0031);
    pub const HUMAN_BOX_TRACK_PARAM: PropertyId = PropertyId(0x0032);
    pub const HUMAN_POSE2D_FILTER_PARAM: PropertyId = PropertyId(0x0033);
    pub const HAND_ACTION_CLS_PARAM: PropertyId = PropertyId(0x0034);

    const NAMED: &'static [(&'static str, PropertyId)] = &[
        ("device_status", Self::DEVICE_STATUS),
        ("device_base_info", Self::DEVICE_BASE_INFO),
        ("temperature", Self::TEMPERATURE),
        ("app_new_version", Self::APP_NEW_VERSION),
        ("app_versions", Self::APP_VERSIONS),
        ("media_source", Self::MEDIA_SOURCE),
        ("cam_param", Self::CAM_PARAM),
        ("cam_real_param", Self::CAM_REAL_PARAM),
        ("cam_ctrl", Self::CAM_CTRL),
        ("enable_cam_img_stream", Self::ENABLE_CAM_IMG_STREAM),
        ("enable_ai", Self::ENABLE_AI),
        ("stream_target_addr", Self::STREAM_TARGET_ADDR),
        ("enable_human_pose_stream", Self::ENABLE_HUMAN_POSE_STREAM),
        ("human_box_model_param", Self::HUMAN_BOX_MODEL_PARAM),
        ("human_pose3d_model_param", Self::HUMAN_POSE3D_MODEL_PARAM),
        ("human_box_track_param", Self::HUMAN_BOX_TRACK_PARAM),
        ("human_pose2d_filter_param", Self::HUMAN_POSE2D_FILTER_PARAM),
        ("hand_action_cls_param", Self::HAND_ACTION_CLS_PARAM),
    ];

    pub fn name(self) -> Option<&'static str> {
        Self::NAMED
            .iter()
            .find(|(_, id)| *id == self)
            .map(|(name, _)| *name)
    }

    /// All named properties, in id order.
    pub fn all() -> impl Iterator<Item = (&'static str, PropertyId)> {
        Self::NAMED.iter().copied()
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}(0x{:04x})", name, self.0),
            None => write!(f, "0x{:04x}", self.0),
        }
    }
}

/// Parses a property name (`media_source`), hex id (`0x0010`) or decimal id.
impl FromStr for PropertyId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        if let Some((_, id)) = Self::NAMED.iter().find(|(name, _)| *name == lowered) {
            return Ok(*id);
        }
        let parsed = match lowered.strip_prefix("0x") {
            Some(hex) => u16::from_str_radix(hex, 16),
            None => lowered.parse::<u16>(),
        };
        parsed
            .map(PropertyId)
            .map_err(|_| ProtocolError::InvalidBody(format!("unknown property: {}", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetPropertyRequest {
    pub prop_id: PropertyId,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub args: Value,
}

impl GetPropertyRequest {
    pub fn new(prop_id: PropertyId) -> Self {
        Self {
            prop_id,
            args: Value::Null,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetPropertyResponse {
    pub status: Status,
    pub prop_id: PropertyId,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetPropertyRequest {
    pub prop_id: PropertyId,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetPropertyResponse {
    pub status: Status,
    pub prop_id: PropertyId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchVersionRequest {
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchVersionResponse {
    pub status: Status,
    pub version: String,
}

/// Response body carrying only a status.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: Status,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self { status: Status::Ok }
    }
}

/// Run state of the device's media pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    Play,
    Pause,
}

/// Where the device takes its input frames from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaSourceType {
    /// The device's own camera.
    Camera,
    /// Frames streamed to the device over the stream channel.
    ImageStream,
}

/// Address the device sends its stream channel traffic to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamTarget {
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraParam {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CameraParam {
    fn default() -> Self {
        Self {
            index: 0,
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraCtrl {
    pub id: u32,
    #[serde(default)]
    pub value: i64,
}

/// Pixel format of an image body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PixelFormat {
    Raw = 0,
    Jpeg = 1,
}

impl TryFrom<u8> for PixelFormat {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PixelFormat::Raw),
            1 => Ok(PixelFormat::Jpeg),
            other => Err(ProtocolError::InvalidBody(format!(
                "unknown pixel format: {}",
                other
            ))),
        }
    }
}

/// An indexed image, sent to the device or streamed back from its camera.
///
/// Layout: `idx: u64 LE`, `pix_fmt: u8`, image bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFrame {
    pub idx: u64,
    pub pix_fmt: PixelFormat,
    pub data: Bytes,
}

impl ImageFrame {
    const HEADER_SIZE: usize = 9;

    pub fn jpeg(idx: u64, data: Bytes) -> Self {
        Self {
            idx,
            pix_fmt: PixelFormat::Jpeg,
            data,
        }
    }
}

impl Body for ImageFrame {
    fn to_bytes(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(Self::HEADER_SIZE + self.data.len());
        buf.put_u64_le(self.idx);
        buf.put_u8(self.pix_fmt as u8);
        buf.put_slice(&self.data);
        Ok(buf.freeze())
    }

    fn from_bytes(mut bytes: Bytes) -> Result<Self, ProtocolError> {
        if bytes.len() < Self::HEADER_SIZE {
            return Err(ProtocolError::TruncatedMessage {
                needed: Self::HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        let idx = bytes.get_u64_le();
        let pix_fmt = PixelFormat::try_from(bytes.get_u8())?;
        Ok(Self {
            idx,
            pix_fmt,
            data: bytes,
        })
    }
}

/// Axis-aligned detection box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
    pub score: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        (self.xmax - self.xmin).max(0.0) * (self.ymax - self.ymin).max(0.0)
    }

    /// Intersection over union; 0 for disjoint boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let w = self.xmax.min(other.xmax) - self.xmin.max(other.xmin);
        let h = self.ymax.min(other.ymax) - self.ymin.max(other.ymin);
        if w <= 0.0 || h <= 0.0 {
            return 0.0;
        }
        let inter = w * h;
        inter / (self.area() + other.area() - inter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint2d {
    pub x: f32,
    pub y: f32,
    /// Visibility score.
    pub v: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint3d {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub v: f32,
}

/// Per-hand action bitmasks, one bit per direction class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandDirs {
    pub left: u8,
    pub right: u8,
}

/// Inference result for one image.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PoseResult {
    /// Index of the image this result was computed from.
    pub img_idx: u64,
    #[serde(default)]
    pub boxes: Vec<BoundingBox>,
    #[serde(default)]
    pub pose2ds: Vec<Vec<Keypoint2d>>,
    #[serde(default)]
    pub pose3ds: Vec<Vec<Keypoint3d>>,
    #[serde(default)]
    pub hand_dirs: Vec<HandDirs>,
}

impl PoseResult {
    pub fn new(img_idx: u64) -> Self {
        Self {
            img_idx,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty() && self.pose2ds.is_empty() && self.pose3ds.is_empty()
    }
}
