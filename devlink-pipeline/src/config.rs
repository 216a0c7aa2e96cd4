//! Link and pipeline configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via DEVLINK_CONFIG)
//! 3. Environment variables

use devlink_client::{ChannelConfig, TransportConfig};
use devlink_protocol::{
    CameraParam, DEFAULT_FRAME_MAX_BYTES, DEFAULT_PAYLOAD_MAX_BYTES, FRAME_HEADER_SIZE,
    MAX_UDP_PAYLOAD,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Complete configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Addresses and ports.
    pub network: NetworkConfig,
    /// Datagram and message ceilings.
    pub protocol: ProtocolConfig,
    /// Local frame source.
    pub source: SourceConfig,
    /// Queue sizes and pairing.
    pub pipeline: PipelineConfig,
    /// Device setup.
    pub device: DeviceConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("DEVLINK_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.protocol.apply_env_overrides();
        self.source.apply_env_overrides();
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Rejects values the link cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.protocol.validate()?;
        self.pipeline.validate()?;
        if self.network.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "network.timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Channel settings shared by the control and stream channels.
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig::new()
            .with_frame_max_bytes(self.protocol.frame_max_bytes)
            .with_payload_max_bytes(self.protocol.payload_max_bytes)
            .with_call_timeout(self.network.timeout())
    }

    pub fn control_transport(&self) -> TransportConfig {
        TransportConfig::new(self.network.control_bind()).with_target(self.network.target_control())
    }

    pub fn stream_transport(&self) -> TransportConfig {
        TransportConfig::new(self.network.stream_bind()).with_target(self.network.target_stream())
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local address both channels bind to.
    pub local_ip: IpAddr,
    pub control_port: u16,
    pub stream_port: u16,
    /// Device address.
    pub target_ip: IpAddr,
    pub target_control_port: u16,
    pub target_stream_port: u16,
    /// Address the device is told to stream back to.
    pub callback_ip: IpAddr,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            local_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            control_port: 30000,
            stream_port: 30001,
            target_ip: IpAddr::V4(Ipv4Addr::new(192, 168, 181, 2)),
            target_control_port: 30000,
            target_stream_port: 30001,
            callback_ip: IpAddr::V4(Ipv4Addr::new(192, 168, 181, 1)),
            timeout_ms: 1000,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        override_parsed("DEVLINK_LOCAL_IP", &mut self.local_ip);
        override_parsed("DEVLINK_CONTROL_PORT", &mut self.control_port);
        override_parsed("DEVLINK_STREAM_PORT", &mut self.stream_port);
        override_parsed("DEVLINK_TARGET_IP", &mut self.target_ip);
        override_parsed("DEVLINK_TARGET_CONTROL_PORT", &mut self.target_control_port);
        override_parsed("DEVLINK_TARGET_STREAM_PORT", &mut self.target_stream_port);
        override_parsed("DEVLINK_CALLBACK_IP", &mut self.callback_ip);
        override_parsed("DEVLINK_TIMEOUT_MS", &mut self.timeout_ms);
    }

    pub fn control_bind(&self) -> SocketAddr {
        SocketAddr::new(self.local_ip, self.control_port)
    }

    pub fn stream_bind(&self) -> SocketAddr {
        SocketAddr::new(self.local_ip, self.stream_port)
    }

    pub fn target_control(&self) -> SocketAddr {
        SocketAddr::new(self.target_ip, self.target_control_port)
    }

    pub fn target_stream(&self) -> SocketAddr {
        SocketAddr::new(self.target_ip, self.target_stream_port)
    }

    /// Returns the per-call timeout as Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Protocol ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Largest datagram sent, header included.
    pub frame_max_bytes: usize,
    /// Reassembled messages above this size are logged as errors.
    pub payload_max_bytes: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            frame_max_bytes: DEFAULT_FRAME_MAX_BYTES,
            payload_max_bytes: DEFAULT_PAYLOAD_MAX_BYTES,
        }
    }
}

impl ProtocolConfig {
    fn apply_env_overrides(&mut self) {
        override_parsed("DEVLINK_FRAME_MAX_BYTES", &mut self.frame_max_bytes);
        override_parsed("DEVLINK_PAYLOAD_MAX_BYTES", &mut self.payload_max_bytes);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_max_bytes <= FRAME_HEADER_SIZE || self.frame_max_bytes > MAX_UDP_PAYLOAD {
            return Err(ConfigError::Validation(format!(
                "protocol.frame_max_bytes must be in {}..={}, got {}",
                FRAME_HEADER_SIZE + 1,
                MAX_UDP_PAYLOAD,
                self.frame_max_bytes
            )));
        }
        Ok(())
    }
}

/// Local frame source.
///
/// Only file sources can be configured here. Live capture devices are
/// library-only: wrap the grab in a `CaptureSource` and hand it to
/// `Session::with_source`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Image file or directory of images. Unset means the device camera.
    pub path: Option<PathBuf>,
    /// Pace finite sources to this rate (frames per second).
    pub frame_rate: Option<f64>,
}

impl SourceConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(source) = std::env::var("DEVLINK_SOURCE") {
            self.path = if source.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(source))
            };
        }
    }

    /// Returns whether frames come from the device's own camera.
    pub fn is_device_camera(&self) -> bool {
        self.path.is_none()
    }
}

/// Queue capacities and pairing tolerance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Reader to sync stage.
    pub read_queue: usize,
    /// Sync stage to sender.
    pub send_queue: usize,
    /// Receiver to sync stage.
    pub pose_queue: usize,
    /// Frames handed to the display.
    pub show_queue: usize,
    /// Poses handed to the display in device camera mode.
    pub pose_show_queue: usize,
    /// Frames and poses pair when their indices differ by less than this.
    pub idx_max_diff: u64,
    /// Tolerance used for still-image sources.
    pub image_idx_max_diff: u64,
    /// Blocking queue and socket operations wait at most this long (ms).
    pub poll_timeout_ms: u64,
    /// Log the display rate every this many frames (0 = never).
    pub fps_log_every: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            read_queue: 2,
            send_queue: 1,
            pose_queue: 2,
            show_queue: 1,
            pose_show_queue: 1,
            idx_max_diff: 3,
            image_idx_max_diff: 1,
            poll_timeout_ms: 1000,
            fps_log_every: 100,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let queues = [
            ("read_queue", self.read_queue),
            ("send_queue", self.send_queue),
            ("pose_queue", self.pose_queue),
            ("show_queue", self.show_queue),
            ("pose_show_queue", self.pose_show_queue),
        ];
        if let Some((name, _)) = queues.iter().find(|(_, cap)| *cap == 0) {
            return Err(ConfigError::Validation(format!(
                "pipeline.{} must be at least 1",
                name
            )));
        }
        if self.idx_max_diff == 0 || self.image_idx_max_diff == 0 {
            return Err(ConfigError::Validation(
                "pipeline idx_max_diff values must be at least 1".to_string(),
            ));
        }
        if self.poll_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "pipeline.poll_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// Device setup performed when a session opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Run the setup sequence (pause, source selection, stream target, play).
    pub configure: bool,
    /// Camera settings applied in device camera mode.
    pub camera: CameraParam,
    /// How long to discard stale stream traffic after retargeting (ms).
    pub stream_drain_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            configure: true,
            camera: CameraParam::default(),
            stream_drain_ms: 100,
        }
    }
}

impl DeviceConfig {
    pub fn stream_drain(&self) -> Duration {
        Duration::from_millis(self.stream_drain_ms)
    }
}

fn override_parsed<T: std::str::FromStr>(var: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(var) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(var, value = %raw, "ignoring unparsable environment override"),
        }
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file '{}': {1}", .0.display())]
    Parse(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}
