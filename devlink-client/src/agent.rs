//! High-level device API over the control channel.

use crate::channel::CommandChannel;
use crate::error::ClientError;
use devlink_protocol::{
    CameraCtrl, CameraParam, CommandCode, DeviceStatus, GetPropertyRequest, GetPropertyResponse,
    MediaSourceType, PropertyId, SetPropertyRequest, SetPropertyResponse, Status, StatusResponse,
    StreamTarget, SwitchVersionRequest, SwitchVersionResponse,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Synchronous property and system calls against one device.
#[derive(Debug, Clone)]
pub struct DeviceAgent {
    channel: Arc<CommandChannel>,
    timeout: Duration,
}

impl DeviceAgent {
    /// Creates an agent using the channel's configured call timeout.
    pub fn new(channel: Arc<CommandChannel>) -> Self {
        let timeout = channel.config().call_timeout;
        Self { channel, timeout }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn channel(&self) -> &Arc<CommandChannel> {
        &self.channel
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    // =========================================================================
    // Properties
    // =========================================================================

    /// Reads a property.
    ///
    /// Fails unless the device answers OK for the same property.
    pub fn get_property(&self, prop: PropertyId, args: Value) -> Result<Value, ClientError> {
        let request = GetPropertyRequest::new(prop).with_args(args);
        let rsp: GetPropertyResponse =
            self.channel
                .call_body(CommandCode::GET_PROPERTY, &request, self.timeout)?;

        check_status(prop, rsp.status)?;
        check_property(prop, rsp.prop_id)?;
        Ok(rsp.value)
    }

    /// Reads a property and deserializes its value.
    pub fn get_property_as<T: DeserializeOwned>(&self, prop: PropertyId) -> Result<T, ClientError> {
        let value = self.get_property(prop, Value::Null)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Writes a property.
    pub fn set_property<T: Serialize>(&self, prop: PropertyId, value: T) -> Result<(), ClientError> {
        let request = SetPropertyRequest {
            prop_id: prop,
            value: serde_json::to_value(value)?,
        };
        let rsp: SetPropertyResponse =
            self.channel
                .call_body(CommandCode::SET_PROPERTY, &request, self.timeout)?;

        check_status(prop, rsp.status)?;
        check_property(prop, rsp.prop_id)?;
        Ok(())
    }

    pub fn device_status(&self) -> Result<DeviceStatus, ClientError> {
        self.get_property_as(PropertyId::DEVICE_STATUS)
    }

    pub fn set_device_status(&self, status: DeviceStatus) -> Result<(), ClientError> {
        self.set_property(PropertyId::DEVICE_STATUS, status)
    }

    pub fn play(&self) -> Result<(), ClientError> {
        self.set_device_status(DeviceStatus::Play)
    }

    pub fn pause(&self) -> Result<(), ClientError> {
        self.set_device_status(DeviceStatus::Pause)
    }

    /// Free-form base information (model, serial, firmware).
    pub fn device_info(&self) -> Result<Value, ClientError> {
        self.get_property(PropertyId::DEVICE_BASE_INFO, Value::Null)
    }

    pub fn temperature(&self) -> Result<f64, ClientError> {
        self.get_property_as(PropertyId::TEMPERATURE)
    }

    pub fn app_new_version(&self) -> Result<String, ClientError> {
        self.get_property_as(PropertyId::APP_NEW_VERSION)
    }

    pub fn app_versions(&self) -> Result<Vec<String>, ClientError> {
        self.get_property_as(PropertyId::APP_VERSIONS)
    }

    pub fn media_source(&self) -> Result<MediaSourceType, ClientError> {
        self.get_property_as(PropertyId::MEDIA_SOURCE)
    }

    pub fn set_media_source(&self, source: MediaSourceType) -> Result<(), ClientError> {
        self.set_property(PropertyId::MEDIA_SOURCE, source)
    }

    pub fn camera_param(&self) -> Result<CameraParam, ClientError> {
        self.get_property_as(PropertyId::CAM_PARAM)
    }

    pub fn camera_real_param(&self) -> Result<CameraParam, ClientError> {
        self.get_property_as(PropertyId::CAM_REAL_PARAM)
    }

    pub fn set_camera_param(&self, param: &CameraParam) -> Result<(), ClientError> {
        self.set_property(PropertyId::CAM_PARAM, param)
    }

    pub fn camera_ctrl(&self, id: u32) -> Result<CameraCtrl, ClientError> {
        let value = self.get_property(PropertyId::CAM_CTRL, json!({ "id": id }))?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn set_camera_ctrl(&self, ctrl: &CameraCtrl) -> Result<(), ClientError> {
        self.set_property(PropertyId::CAM_CTRL, ctrl)
    }

    pub fn cam_img_stream_enabled(&self) -> Result<bool, ClientError> {
        self.get_property_as(PropertyId::ENABLE_CAM_IMG_STREAM)
    }

    pub fn set_cam_img_stream(&self, enabled: bool) -> Result<(), ClientError> {
        self.set_property(PropertyId::ENABLE_CAM_IMG_STREAM, enabled)
    }

    pub fn ai_enabled(&self) -> Result<bool, ClientError> {
        self.get_property_as(PropertyId::ENABLE_AI)
    }

    pub fn set_ai_enabled(&self, enabled: bool) -> Result<(), ClientError> {
        self.set_property(PropertyId::ENABLE_AI, enabled)
    }

    pub fn stream_target(&self) -> Result<StreamTarget, ClientError> {
        self.get_property_as(PropertyId::STREAM_TARGET_ADDR)
    }

    /// Tells the device where to send stream channel traffic.
    pub fn set_stream_target(&self, ip: impl Into<String>, port: u16) -> Result<(), ClientError> {
        let target = StreamTarget {
            ip: ip.into(),
            port,
        };
        self.set_property(PropertyId::STREAM_TARGET_ADDR, target)
    }

    pub fn pose_stream_enabled(&self) -> Result<bool, ClientError> {
        self.get_property_as(PropertyId::ENABLE_HUMAN_POSE_STREAM)
    }

    pub fn set_pose_stream(&self, enabled: bool) -> Result<(), ClientError> {
        self.set_property(PropertyId::ENABLE_HUMAN_POSE_STREAM, enabled)
    }

    // =========================================================================
    // System
    // =========================================================================

    /// Switches the active application version.
    ///
    /// The device must answer OK and echo the requested version.
    pub fn switch_app_version(&self, version: &str) -> Result<(), ClientError> {
        let request = SwitchVersionRequest {
            version: version.to_string(),
        };
        let rsp: SwitchVersionResponse =
            self.channel
                .call_body(CommandCode::SWITCH_APP_VERSION, &request, self.timeout)?;

        if !rsp.status.is_ok() {
            tracing::warn!(version, status = %rsp.status, "switch app version failed");
            return Err(ClientError::Status { status: rsp.status });
        }
        if rsp.version != version {
            tracing::warn!(expected = version, actual = %rsp.version, "switch app version mismatch");
            return Err(ClientError::VersionMismatch {
                expected: version.to_string(),
                actual: rsp.version,
            });
        }
        Ok(())
    }

    /// Reboots the device.
    ///
    /// A device that goes down before answering counts as success.
    pub fn reboot_system(&self) -> Result<(), ClientError> {
        let result: Result<StatusResponse, _> =
            self.channel
                .call_body(CommandCode::REBOOT_SYSTEM, &(), self.timeout);

        match result {
            Ok(rsp) if rsp.status.is_ok() => Ok(()),
            Ok(rsp) => {
                tracing::warn!(status = %rsp.status, "reboot refused");
                Err(ClientError::Status { status: rsp.status })
            }
            Err(ClientError::Timeout) => {
                tracing::info!("no reboot response, assuming device is restarting");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn check_status(prop: PropertyId, status: Status) -> Result<(), ClientError> {
    if status.is_ok() {
        return Ok(());
    }
    tracing::warn!(%prop, %status, "property call failed");
    Err(ClientError::Status { status })
}

fn check_property(expected: PropertyId, actual: PropertyId) -> Result<(), ClientError> {
    if expected == actual {
        return Ok(());
    }
    tracing::warn!(%expected, %actual, "property id mismatch in response");
    Err(ClientError::PropertyMismatch { expected, actual })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_status() {
        assert!(check_status(PropertyId::ENABLE_AI, Status::Ok).is_ok());
        assert!(matches!(
            check_status(PropertyId::ENABLE_AI, Status::Unsupported),
            Err(ClientError::Status {
                status: Status::Unsupported
            })
        ));
    }

    #[test]
    fn test_check_property() {
        assert!(check_property(PropertyId::CAM_CTRL, PropertyId::CAM_CTRL).is_ok());
        assert!(matches!(
            check_property(PropertyId::CAM_CTRL, PropertyId::CAM_PARAM),
            Err(ClientError::PropertyMismatch { .. })
        ));
    }
}
