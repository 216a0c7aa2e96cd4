//! Sender stage: ships local frames to the device.

use crate::error::PipelineError;
use crate::queue::Feed;
use crate::stage::{receive, CancelToken, Stage};
use crate::FrameQueue;
use devlink_client::CommandChannel;
use devlink_protocol::{Body, CommandCode, ImageFrame, PixelFormat};
use std::sync::Arc;
use std::time::Duration;

/// Sends each queued frame as a `MEDIA_SOURCE_STREAM` message.
///
/// Transport failures are logged and the frame is dropped; the device acks
/// are consumed by the receiver stage.
pub struct MediaSender {
    channel: Arc<CommandChannel>,
    input: Arc<FrameQueue>,
    poll: Duration,
    pix_fmt: PixelFormat,
    sent: u64,
    failed: u64,
}

impl MediaSender {
    pub fn new(channel: Arc<CommandChannel>, input: Arc<FrameQueue>, poll: Duration) -> Self {
        Self {
            channel,
            input,
            poll,
            pix_fmt: PixelFormat::Jpeg,
            sent: 0,
            failed: 0,
        }
    }

    pub fn with_pixel_format(mut self, pix_fmt: PixelFormat) -> Self {
        self.pix_fmt = pix_fmt;
        self
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }
}

impl Stage for MediaSender {
    fn name(&self) -> &str {
        "sender"
    }

    fn run(&mut self, token: &CancelToken) -> Result<(), PipelineError> {
        while let Some(feed) = receive(&self.input, token, self.poll) {
            let Feed::Item(frame) = feed else {
                tracing::debug!(sent = self.sent, "end of frames");
                break;
            };

            let index = frame.index;
            let body = ImageFrame {
                idx: index,
                pix_fmt: self.pix_fmt,
                data: frame.value,
            }
            .to_bytes()?;

            match self.channel.send(CommandCode::MEDIA_SOURCE_STREAM, &body) {
                Ok(id) => {
                    self.sent += 1;
                    tracing::trace!(index, id, bytes = body.len(), "frame sent");
                }
                Err(e) => {
                    let e = PipelineError::from(e);
                    if !e.is_recoverable() {
                        return Err(e);
                    }
                    self.failed += 1;
                    tracing::warn!(index, error = %e, "failed to send frame");
                }
            }
        }

        tracing::info!(sent = self.sent, failed = self.failed, "sender stopped");
        Ok(())
    }
}

impl std::fmt::Debug for MediaSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSender")
            .field("channel", &self.channel)
            .field("sent", &self.sent)
            .field("failed", &self.failed)
            .finish()
    }
}
