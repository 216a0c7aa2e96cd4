//! Receiver stage: reads the stream channel and routes by command code.

use crate::error::PipelineError;
use crate::queue::{Feed, Indexed};
use crate::stage::{CancelToken, Stage};
use crate::{FrameQueue, PoseQueue};
use devlink_client::{CommandChannel, Dispatcher};
use devlink_protocol::{CommandCode, ImageFrame, Message, PoseResult, StatusResponse};
use std::sync::Arc;
use std::time::Duration;

/// Pause after a receive error so a dead socket does not spin.
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Receives pose results (and device camera images) from the device.
///
/// Queues fed by this stage evict their oldest entry when full: stale
/// results are worth less than fresh ones.
pub struct StreamReceiver {
    channel: Arc<CommandChannel>,
    dispatcher: Dispatcher,
    poll: Duration,
    received: u64,
}

impl StreamReceiver {
    pub fn new(channel: Arc<CommandChannel>, poses: Arc<PoseQueue>, poll: Duration) -> Self {
        let dispatcher = Dispatcher::new()
            .on(CommandCode::STREAM_HUMAN_POSE, move |msg| on_pose(&poses, msg))
            .on(CommandCode::MEDIA_SOURCE_STREAM.response(), on_media_ack);

        Self {
            channel,
            dispatcher,
            poll,
            received: 0,
        }
    }

    /// Also accept camera images streamed by the device.
    pub fn with_images(mut self, images: Arc<FrameQueue>) -> Self {
        self.dispatcher
            .register(CommandCode::STREAM_CAM_IMG, move |msg| on_image(&images, msg));
        self
    }

    /// Messages received so far.
    pub fn received(&self) -> u64 {
        self.received
    }
}

fn on_pose(poses: &PoseQueue, msg: Message) {
    match msg.body::<PoseResult>() {
        Ok(pose) => {
            tracing::trace!(img_idx = pose.img_idx, boxes = pose.boxes.len(), "pose received");
            poses.put_evicting(Indexed::new(pose.img_idx, pose));
        }
        Err(e) => tracing::warn!(id = msg.id, error = %e, "dropping undecodable pose result"),
    }
}

fn on_image(images: &FrameQueue, msg: Message) {
    match msg.body::<ImageFrame>() {
        Ok(frame) => {
            tracing::trace!(idx = frame.idx, bytes = frame.data.len(), "camera image received");
            images.put_evicting(Feed::Item(Indexed::new(frame.idx, frame.data)));
        }
        Err(e) => tracing::warn!(id = msg.id, error = %e, "dropping undecodable camera image"),
    }
}

fn on_media_ack(msg: Message) {
    match msg.body::<StatusResponse>() {
        Ok(rsp) if rsp.status.is_ok() => {}
        Ok(rsp) => tracing::warn!(reply_to = ?msg.reply_to, status = %rsp.status, "device rejected frame"),
        Err(e) => tracing::warn!(id = msg.id, error = %e, "undecodable frame ack"),
    }
}

impl Stage for StreamReceiver {
    fn name(&self) -> &str {
        "receiver"
    }

    fn run(&mut self, token: &CancelToken) -> Result<(), PipelineError> {
        while token.is_running() {
            match self.channel.receive(self.poll) {
                Ok(Some(msg)) => {
                    self.received += 1;
                    self.dispatcher.dispatch(msg);
                }
                Ok(None) => {}
                Err(e) => {
                    let e = PipelineError::from(e);
                    if !e.is_recoverable() {
                        return Err(e);
                    }
                    tracing::warn!(error = %e, "stream receive failed");
                    token.sleep(ERROR_BACKOFF);
                }
            }
        }

        tracing::info!(
            received = self.received,
            unknown = self.dispatcher.unknown_count(),
            "receiver stopped"
        );
        Ok(())
    }
}

impl std::fmt::Debug for StreamReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReceiver")
            .field("channel", &self.channel)
            .field("dispatcher", &self.dispatcher)
            .field("received", &self.received)
            .finish()
    }
}
