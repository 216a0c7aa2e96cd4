//! Loopback stand-in for a device: a control endpoint that stores
//! properties and a stream endpoint that answers every frame with a pose.
#![allow(dead_code)]

use devlink_client::{ChannelConfig, CommandChannel, TransportConfig};
use devlink_pipeline::Config;
use devlink_protocol::{
    CommandCode, GetPropertyRequest, GetPropertyResponse, ImageFrame, PoseResult, PropertyId,
    SetPropertyRequest, SetPropertyResponse, Status, StatusResponse,
};
use serde_json::Value;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub struct FakeDevice {
    control_addr: SocketAddr,
    stream_addr: SocketAddr,
    frames: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl FakeDevice {
    pub fn spawn() -> Self {
        let control = bind();
        let stream = bind();
        let control_addr = control.transport().local_addr().unwrap();
        let stream_addr = stream.transport().local_addr().unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let frames = Arc::new(AtomicU64::new(0));

        let control_stop = stop.clone();
        let control_handle = std::thread::spawn(move || {
            let mut props: HashMap<PropertyId, Value> = HashMap::new();
            while !control_stop.load(Ordering::SeqCst) {
                if let Ok(Some(req)) = control.receive(Duration::from_millis(20)) {
                    match req.command {
                        CommandCode::GET_PROPERTY => {
                            let get: GetPropertyRequest = req.body().unwrap();
                            let rsp = GetPropertyResponse {
                                status: Status::Ok,
                                prop_id: get.prop_id,
                                value: props.get(&get.prop_id).cloned().unwrap_or(Value::Null),
                            };
                            control.reply_body(&req, &rsp).unwrap();
                        }
                        CommandCode::SET_PROPERTY => {
                            let set: SetPropertyRequest = req.body().unwrap();
                            props.insert(set.prop_id, set.value);
                            let rsp = SetPropertyResponse {
                                status: Status::Ok,
                                prop_id: set.prop_id,
                            };
                            control.reply_body(&req, &rsp).unwrap();
                        }
                        _ => {}
                    }
                }
            }
        });

        let stream_stop = stop.clone();
        let stream_frames = frames.clone();
        let stream_handle = std::thread::spawn(move || {
            while !stream_stop.load(Ordering::SeqCst) {
                if let Ok(Some(msg)) = stream.receive(Duration::from_millis(20)) {
                    if msg.command != CommandCode::MEDIA_SOURCE_STREAM {
                        continue;
                    }
                    let frame: ImageFrame = msg.body().unwrap();
                    stream_frames.fetch_add(1, Ordering::SeqCst);
                    stream.reply_body(&msg, &StatusResponse::ok()).unwrap();
                    stream
                        .send_body(CommandCode::STREAM_HUMAN_POSE, &PoseResult::new(frame.idx))
                        .unwrap();
                }
            }
        });

        Self {
            control_addr,
            stream_addr,
            frames,
            stop,
            handles: vec![control_handle, stream_handle],
        }
    }

    /// Frames the stream endpoint has received.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    /// Configuration pointing a session at this device over loopback.
    pub fn config(&self) -> Config {
        let loopback = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let mut config = Config::default();
        config.network.local_ip = loopback;
        config.network.control_port = 0;
        config.network.stream_port = 0;
        config.network.target_ip = loopback;
        config.network.target_control_port = self.control_addr.port();
        config.network.target_stream_port = self.stream_addr.port();
        config.network.callback_ip = loopback;
        config.device.stream_drain_ms = 20;
        config.pipeline.poll_timeout_ms = 200;
        config
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn bind() -> CommandChannel {
    CommandChannel::bind(
        TransportConfig::new("127.0.0.1:0".parse().unwrap()),
        ChannelConfig::new(),
    )
    .unwrap()
}
