//! Session: configures the device and runs the pipeline against it.
//!
//! A session owns the control and stream channels. Opening binds both;
//! [`Session::configure_device`] walks the device through its setup
//! sequence; [`Session::start`] wires the stages and hands back a
//! [`RunningPipeline`] whose output the caller displays.

use crate::config::Config;
use crate::error::PipelineError;
use crate::fps::FpsMeter;
use crate::queue::{BoundedQueue, Feed};
use crate::reader::SourceReader;
use crate::receiver::StreamReceiver;
use crate::sender::MediaSender;
use crate::source::{FrameSource, ImageFiles, SourceKind};
use crate::stage::{receive, CancelToken, Worker};
use crate::sync::{ShowQueue, SyncStage, SyncedFrame};
use devlink_client::{CommandChannel, DeviceAgent};
use devlink_protocol::MediaSourceType;
use std::sync::Arc;
use std::time::Duration;

/// Where frames come from.
pub enum MediaSource {
    /// The device streams its own camera back.
    DeviceCamera,
    /// Frames are read locally and sent to the device.
    Local(Box<dyn FrameSource>),
}

impl MediaSource {
    /// Resolves the configured source: no path means the device camera.
    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        match &config.source.path {
            None => Ok(MediaSource::DeviceCamera),
            Some(path) => Ok(MediaSource::Local(Box::new(ImageFiles::from_path(path)?))),
        }
    }

    pub fn is_device_camera(&self) -> bool {
        matches!(self, MediaSource::DeviceCamera)
    }

    pub fn describe(&self) -> String {
        match self {
            MediaSource::DeviceCamera => "device camera".to_string(),
            MediaSource::Local(source) => source.describe(),
        }
    }
}

impl std::fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Receives every frame leaving the pipeline.
pub trait DisplaySink {
    fn show(&mut self, frame: &SyncedFrame, fps: f64);
}

/// Sink that only logs.
#[derive(Debug, Default)]
pub struct LogSink {
    every: u64,
    shown: u64,
    paired: u64,
}

impl LogSink {
    /// Logs the display rate every `every` frames (0 disables it).
    pub fn new(every: u64) -> Self {
        Self {
            every,
            ..Default::default()
        }
    }

    pub fn shown(&self) -> u64 {
        self.shown
    }

    pub fn paired(&self) -> u64 {
        self.paired
    }
}

impl DisplaySink for LogSink {
    fn show(&mut self, frame: &SyncedFrame, fps: f64) {
        self.shown += 1;
        if let Some(pose) = &frame.pose {
            self.paired += 1;
            tracing::debug!(
                frame = frame.index(),
                pose = pose.index,
                boxes = pose.value.boxes.len(),
                "pose result"
            );
        }
        if self.every > 0 && self.shown % self.every == 0 {
            tracing::info!(
                fps = %format!("{:.1}", fps),
                shown = self.shown,
                paired = self.paired,
                "display rate"
            );
        }
    }
}

/// Both channels to one device plus the configuration that drives them.
#[derive(Debug)]
pub struct Session {
    config: Config,
    control: Arc<CommandChannel>,
    stream: Arc<CommandChannel>,
    agent: DeviceAgent,
    source: MediaSource,
}

impl Session {
    /// Binds the control and stream channels and resolves the frame source.
    pub fn open(config: Config) -> Result<Self, PipelineError> {
        config.validate()?;
        let source = MediaSource::from_config(&config)?;

        let channel_config = config.channel_config();
        let control = Arc::new(CommandChannel::bind(
            config.control_transport(),
            channel_config.clone(),
        )?);
        let stream = Arc::new(CommandChannel::bind(config.stream_transport(), channel_config)?);
        let agent = DeviceAgent::new(control.clone());

        tracing::info!(
            control = ?control.transport().local_addr().ok(),
            stream = ?stream.transport().local_addr().ok(),
            device = %config.network.target_control(),
            source = %source.describe(),
            "session opened"
        );

        Ok(Self {
            config,
            control,
            stream,
            agent,
            source,
        })
    }

    /// Replaces the configured frame source.
    ///
    /// This is the only way to run a live source; its queues then evict the
    /// oldest frame instead of blocking.
    pub fn with_source(mut self, source: MediaSource) -> Self {
        self.source = source;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn agent(&self) -> &DeviceAgent {
        &self.agent
    }

    pub fn control(&self) -> &Arc<CommandChannel> {
        &self.control
    }

    pub fn stream(&self) -> &Arc<CommandChannel> {
        &self.stream
    }

    pub fn source(&self) -> &MediaSource {
        &self.source
    }

    /// Runs the device setup sequence.
    ///
    /// The device is paused, pointed at the right media source, told where
    /// to stream, and resumed. Stale stream traffic from an earlier session
    /// is drained before playing.
    pub fn configure_device(&self) -> Result<(), PipelineError> {
        let agent = &self.agent;
        agent.pause()?;

        if self.source.is_device_camera() {
            agent.set_camera_param(&self.config.device.camera)?;
            agent.set_cam_img_stream(true)?;
            agent.set_media_source(MediaSourceType::Camera)?;
        } else {
            agent.set_pose_stream(true)?;
            agent.set_cam_img_stream(false)?;
            agent.set_media_source(MediaSourceType::ImageStream)?;
        }

        // Opens the path so the device (or a NAT) sees our stream socket.
        self.stream.transport().send(&[])?;

        let callback_port = self.stream.transport().local_addr()?.port();
        agent.set_stream_target(self.config.network.callback_ip.to_string(), callback_port)?;

        self.stream.transport().drain(self.config.device.stream_drain())?;

        agent.play()?;
        self.log_device_state();
        Ok(())
    }

    fn log_device_state(&self) {
        let agent = &self.agent;
        match agent.device_status() {
            Ok(status) => tracing::info!(?status, "device status"),
            Err(e) => tracing::warn!(error = %e, "failed to read device status"),
        }
        match agent.media_source() {
            Ok(source) => tracing::info!(?source, "device media source"),
            Err(e) => tracing::warn!(error = %e, "failed to read media source"),
        }
        match agent.pose_stream_enabled() {
            Ok(enabled) => tracing::info!(enabled, "pose stream"),
            Err(e) => tracing::warn!(error = %e, "failed to read pose stream flag"),
        }
        match agent.stream_target() {
            Ok(target) => tracing::info!(ip = %target.ip, port = target.port, "stream target"),
            Err(e) => tracing::warn!(error = %e, "failed to read stream target"),
        }
    }

    /// Wires and starts the stages.
    pub fn start(self) -> Result<RunningPipeline, PipelineError> {
        self.start_with_token(CancelToken::new())
    }

    /// Starts the stages observing `token`.
    pub fn start_with_token(self, token: CancelToken) -> Result<RunningPipeline, PipelineError> {
        let pipeline = &self.config.pipeline;
        let poll = pipeline.poll_timeout();
        let mut workers = Vec::new();

        let output = match self.source {
            MediaSource::DeviceCamera => {
                let images = Arc::new(BoundedQueue::evicting(pipeline.show_queue));
                let poses = Arc::new(BoundedQueue::evicting(pipeline.pose_show_queue));
                let output = Arc::new(BoundedQueue::evicting(pipeline.show_queue));

                let receiver = StreamReceiver::new(self.stream.clone(), poses.clone(), poll)
                    .with_images(images.clone());
                let sync = SyncStage::new(images, poses, output.clone(), pipeline.idx_max_diff, poll);

                workers.push(Worker::start_with_token(receiver, token.clone())?);
                workers.push(Worker::start_with_token(sync, token.clone())?);
                output
            }
            MediaSource::Local(source) => {
                let kind = source.kind();
                let policy = kind.overflow_policy();
                let idx_max_diff = match kind {
                    SourceKind::Finite => pipeline.image_idx_max_diff,
                    SourceKind::Live => pipeline.idx_max_diff,
                };

                let read = Arc::new(BoundedQueue::new(pipeline.read_queue, policy));
                let send = Arc::new(BoundedQueue::new(pipeline.send_queue, policy));
                let poses = Arc::new(BoundedQueue::evicting(pipeline.pose_queue));
                let output: Arc<ShowQueue> = Arc::new(BoundedQueue::new(pipeline.show_queue, policy));

                let reader = SourceReader::new(source, read.clone(), poll)
                    .with_frame_rate(self.config.source.frame_rate);
                let sync = SyncStage::new(read, poses.clone(), output.clone(), idx_max_diff, poll)
                    .with_send_queue(send.clone());
                let sender = MediaSender::new(self.stream.clone(), send, poll);
                let receiver = StreamReceiver::new(self.stream.clone(), poses, poll);

                workers.push(Worker::start_with_token(receiver, token.clone())?);
                workers.push(Worker::start_with_token(sender, token.clone())?);
                workers.push(Worker::start_with_token(sync, token.clone())?);
                workers.push(Worker::start_with_token(reader, token.clone())?);
                output
            }
        };

        tracing::info!(stages = workers.len(), "pipeline started");
        Ok(RunningPipeline {
            workers,
            output,
            token,
            poll,
            fps_log_every: pipeline.fps_log_every,
            control: self.control,
            stream: self.stream,
        })
    }
}

/// Stages started by [`Session::start`].
#[derive(Debug)]
pub struct RunningPipeline {
    workers: Vec<Worker>,
    output: Arc<ShowQueue>,
    token: CancelToken,
    poll: Duration,
    fps_log_every: u64,
    control: Arc<CommandChannel>,
    stream: Arc<CommandChannel>,
}

impl RunningPipeline {
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Frames ready for display.
    pub fn output(&self) -> &Arc<ShowQueue> {
        &self.output
    }

    pub fn control(&self) -> &Arc<CommandChannel> {
        &self.control
    }

    pub fn stream(&self) -> &Arc<CommandChannel> {
        &self.stream
    }

    /// Feeds every output frame to `sink` until the stream ends or the
    /// pipeline is cancelled. Returns the number of frames shown.
    pub fn run_display(&self, sink: &mut dyn DisplaySink) -> u64 {
        let mut fps = FpsMeter::default();
        let mut shown = 0u64;

        while let Some(feed) = receive(&self.output, &self.token, self.poll) {
            match feed {
                Feed::Item(frame) => {
                    let rate = fps.update();
                    sink.show(&frame, rate);
                    shown += 1;
                }
                Feed::End => {
                    tracing::info!(shown, "end of stream");
                    break;
                }
            }
        }
        shown
    }

    /// Default display loop: logs results through a [`LogSink`].
    pub fn run_logging(&self) -> u64 {
        let mut sink = LogSink::new(self.fps_log_every);
        self.run_display(&mut sink)
    }

    /// Cancels every stage and waits for them. Returns the first stage error.
    pub fn shutdown(self) -> Result<(), PipelineError> {
        self.token.cancel();
        let mut first_err = None;
        for worker in self.workers {
            let name = worker.name().to_string();
            if let Err(e) = worker.join() {
                tracing::warn!(stage = %name, error = %e, "stage ended with error");
                first_err.get_or_insert(e);
            }
        }
        tracing::info!("pipeline stopped");
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Indexed;
    use bytes::Bytes;
    use devlink_protocol::PoseResult;

    struct Collect(Vec<SyncedFrame>);

    impl DisplaySink for Collect {
        fn show(&mut self, frame: &SyncedFrame, _fps: f64) {
            self.0.push(frame.clone());
        }
    }

    #[test]
    fn test_log_sink_counts() {
        let mut sink = LogSink::new(2);
        let frame = SyncedFrame {
            frame: Indexed::new(0, Bytes::new()),
            pose: Some(Indexed::new(0, PoseResult::new(0))),
        };
        sink.show(&frame, 30.0);
        sink.show(
            &SyncedFrame {
                frame: Indexed::new(1, Bytes::new()),
                pose: None,
            },
            30.0,
        );
        assert_eq!(sink.shown(), 2);
        assert_eq!(sink.paired(), 1);
    }

    #[test]
    fn test_source_from_config() {
        let config = Config::default();
        assert!(MediaSource::from_config(&config).unwrap().is_device_camera());

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0.jpg"), b"jpeg").unwrap();
        let mut config = Config::default();
        config.source.path = Some(dir.path().to_path_buf());
        let source = MediaSource::from_config(&config).unwrap();
        assert!(!source.is_device_camera());
    }

    #[test]
    fn test_display_stops_at_end() {
        let output = Arc::new(BoundedQueue::blocking(4));
        output
            .put(
                Feed::Item(SyncedFrame {
                    frame: Indexed::new(3, Bytes::from_static(b"x")),
                    pose: None,
                }),
                Duration::ZERO,
            )
            .unwrap();
        output.put(Feed::End, Duration::ZERO).unwrap();

        let local = "127.0.0.1:0".parse().unwrap();
        let channel = Arc::new(
            CommandChannel::bind(
                devlink_client::TransportConfig::new(local),
                devlink_client::ChannelConfig::default(),
            )
            .unwrap(),
        );
        let running = RunningPipeline {
            workers: Vec::new(),
            output,
            token: CancelToken::new(),
            poll: Duration::from_millis(20),
            fps_log_every: 0,
            control: channel.clone(),
            stream: channel,
        };

        let mut sink = Collect(Vec::new());
        assert_eq!(running.run_display(&mut sink), 1);
        assert_eq!(sink.0[0].index(), 3);
        running.shutdown().unwrap();
    }
}
