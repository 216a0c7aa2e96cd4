//! Reader stage: pulls frames from a local source and numbers them.

use crate::error::PipelineError;
use crate::queue::{Feed, Indexed};
use crate::source::{FrameSource, SourceEvent};
use crate::stage::{deliver, CancelToken, Stage};
use crate::FrameQueue;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Reads frames, tags each with the next index and enqueues it.
///
/// Indices start at zero and increase by one per delivered frame. When the
/// source is exhausted a single [`Feed::End`] follows the last frame.
pub struct SourceReader {
    source: Box<dyn FrameSource>,
    output: Arc<FrameQueue>,
    poll: Duration,
    frame_interval: Option<Duration>,
    next_index: u64,
}

impl SourceReader {
    pub fn new(source: Box<dyn FrameSource>, output: Arc<FrameQueue>, poll: Duration) -> Self {
        Self {
            source,
            output,
            poll,
            frame_interval: None,
            next_index: 0,
        }
    }

    /// Paces reads to at most `fps` frames per second. Non-positive rates
    /// disable pacing.
    pub fn with_frame_rate(mut self, fps: Option<f64>) -> Self {
        self.frame_interval = fps
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .map(|fps| Duration::from_secs_f64(1.0 / fps));
        self
    }

    /// Frames delivered so far.
    pub fn delivered(&self) -> u64 {
        self.next_index
    }
}

impl Stage for SourceReader {
    fn name(&self) -> &str {
        "reader"
    }

    fn run(&mut self, token: &CancelToken) -> Result<(), PipelineError> {
        tracing::info!(source = %self.source.describe(), "reading frames");
        let mut last_read: Option<Instant> = None;

        while token.is_running() {
            if let (Some(interval), Some(last)) = (self.frame_interval, last_read) {
                let wait = interval.saturating_sub(last.elapsed());
                if !wait.is_zero() && !token.sleep(wait) {
                    break;
                }
            }
            last_read = Some(Instant::now());

            match self.source.next_frame(token)? {
                SourceEvent::Frame(data) => {
                    let frame = Indexed::new(self.next_index, data);
                    if !deliver(&self.output, Feed::Item(frame), token, self.poll) {
                        break;
                    }
                    self.next_index += 1;
                }
                SourceEvent::Retry => continue,
                SourceEvent::Exhausted => {
                    tracing::info!(frames = self.next_index, "source exhausted");
                    deliver(&self.output, Feed::End, token, self.poll);
                    return Ok(());
                }
            }
        }

        tracing::debug!(frames = self.next_index, "reader stopped");
        Ok(())
    }
}

impl std::fmt::Debug for SourceReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceReader")
            .field("source", &self.source.describe())
            .field("next_index", &self.next_index)
            .field("frame_interval", &self.frame_interval)
            .finish()
    }
}
