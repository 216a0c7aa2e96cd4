//! In-process stand-in for the device's control endpoint.
#![allow(dead_code)]

use devlink_client::{ChannelConfig, CommandChannel, DeviceAgent, TransportConfig};
use devlink_protocol::{
    Body, CommandCode, GetPropertyRequest, GetPropertyResponse, Message, PoseResult, PropertyId,
    SetPropertyRequest, SetPropertyResponse, Status, SwitchVersionRequest,
    SwitchVersionResponse,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Misbehaviours the fake device can be told to exhibit before answering.
#[derive(Debug, Clone, Copy, Default)]
pub struct Behavior {
    /// Send a correctly coded response for some other request id first.
    pub stale_first: bool,
    /// Push an unsolicited pose message first.
    pub noise_first: bool,
    /// Answer with the wrong response code only.
    pub wrong_code_only: bool,
    /// Echo a different property id.
    pub wrong_prop: bool,
    /// Status to report instead of OK.
    pub status: Option<Status>,
}

pub struct FakeDevice {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FakeDevice {
    pub fn spawn(behavior: Behavior) -> Self {
        let channel = CommandChannel::bind(
            TransportConfig::new("127.0.0.1:0".parse().unwrap()),
            ChannelConfig::new(),
        )
        .unwrap();
        let addr = channel.transport().local_addr().unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();

        let handle = std::thread::spawn(move || {
            let mut props = initial_props();
            while !flag.load(Ordering::SeqCst) {
                if let Ok(Some(req)) = channel.receive(Duration::from_millis(20)) {
                    serve(&channel, &mut props, behavior, req);
                }
            }
        });

        Self {
            addr,
            stop,
            handle: Some(handle),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn agent(&self, timeout: Duration) -> DeviceAgent {
        DeviceAgent::new(Arc::new(self.channel())).with_timeout(timeout)
    }

    pub fn channel(&self) -> CommandChannel {
        CommandChannel::bind(
            TransportConfig::new("127.0.0.1:0".parse().unwrap()).with_target(self.addr),
            ChannelConfig::new(),
        )
        .unwrap()
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn initial_props() -> HashMap<PropertyId, Value> {
    HashMap::from([
        (PropertyId::DEVICE_STATUS, json!("PAUSE")),
        (PropertyId::TEMPERATURE, json!(41.5)),
        (PropertyId::APP_VERSIONS, json!(["1.0.0", "1.1.0"])),
        (PropertyId::MEDIA_SOURCE, json!("CAMERA")),
        (
            PropertyId::STREAM_TARGET_ADDR,
            json!({"ip": "192.168.181.1", "port": 30001}),
        ),
    ])
}

fn serve(
    channel: &CommandChannel,
    props: &mut HashMap<PropertyId, Value>,
    behavior: Behavior,
    req: Message,
) {
    let status = behavior.status.unwrap_or(Status::Ok);

    if behavior.noise_first {
        let pose = PoseResult::new(7).to_bytes().unwrap();
        channel.send(CommandCode::STREAM_HUMAN_POSE, &pose).unwrap();
    }

    if behavior.stale_first {
        let earlier = Message {
            id: req.id.wrapping_add(100),
            ..req.clone()
        };
        let body = json!({"status": "OK", "prop_id": 0, "value": "stale"});
        channel
            .reply(&earlier, body.to_string().as_bytes())
            .unwrap();
    }

    if behavior.wrong_code_only {
        let other = Message {
            command: CommandCode::SET_PROPERTY,
            ..req
        };
        let body = SetPropertyResponse {
            status,
            prop_id: PropertyId::DEVICE_STATUS,
        };
        channel.reply_body(&other, &body).unwrap();
        return;
    }

    match req.command {
        CommandCode::GET_PROPERTY => {
            let get: GetPropertyRequest = req.body().unwrap();
            let mut value = props.get(&get.prop_id).cloned().unwrap_or(Value::Null);
            if get.prop_id == PropertyId::CAM_CTRL {
                value = json!({"id": get.args["id"], "value": 5});
            }
            let prop_id = if behavior.wrong_prop {
                PropertyId(get.prop_id.0 + 1)
            } else {
                get.prop_id
            };
            let rsp = GetPropertyResponse {
                status,
                prop_id,
                value,
            };
            channel.reply_body(&req, &rsp).unwrap();
        }
        CommandCode::SET_PROPERTY => {
            let set: SetPropertyRequest = req.body().unwrap();
            if status.is_ok() {
                props.insert(set.prop_id, set.value);
            }
            let rsp = SetPropertyResponse {
                status,
                prop_id: set.prop_id,
            };
            channel.reply_body(&req, &rsp).unwrap();
        }
        CommandCode::SWITCH_APP_VERSION => {
            let switch: SwitchVersionRequest = req.body().unwrap();
            let version = if switch.version == "bogus" {
                "1.0.0".to_string()
            } else {
                switch.version
            };
            let rsp = SwitchVersionResponse { status, version };
            channel.reply_body(&req, &rsp).unwrap();
        }
        // Goes silent, as a rebooting device would.
        CommandCode::REBOOT_SYSTEM => {}
        _ => {}
    }
}
