//! Local frame sources.
//!
//! A source yields encoded frames (JPEG bytes). Decoding is left to whoever
//! consumes the frames.

use crate::error::PipelineError;
use crate::queue::OverflowPolicy;
use crate::stage::CancelToken;
use bytes::Bytes;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Delay before a failed live device is reopened.
pub const REOPEN_DELAY: Duration = Duration::from_secs(1);

/// Whether a source can run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// A device producing frames as long as it is open; favours freshness.
    Live,
    /// A replayable sequence; favours completeness.
    Finite,
}

impl SourceKind {
    /// Queue policy for the queues this source feeds.
    pub fn overflow_policy(self) -> OverflowPolicy {
        match self {
            SourceKind::Live => OverflowPolicy::EvictOldest,
            SourceKind::Finite => OverflowPolicy::Block,
        }
    }
}

/// Outcome of asking a source for its next frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Frame(Bytes),
    /// Nothing this time, ask again.
    Retry,
    /// The source has no more frames.
    Exhausted,
}

/// Produces an ordered, finite or infinite sequence of frames.
pub trait FrameSource: Send + 'static {
    fn kind(&self) -> SourceKind;

    /// Returns the next frame. May block, but must honour `token`.
    fn next_frame(&mut self, token: &CancelToken) -> Result<SourceEvent, PipelineError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Still images read from disk, in name order.
#[derive(Debug)]
pub struct ImageFiles {
    files: VecDeque<PathBuf>,
    origin: PathBuf,
}

impl ImageFiles {
    /// Opens a `.jpg`/`.jpeg` file or every such file in a directory.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let mut files = Vec::new();

        if path.is_dir() {
            for entry in std::fs::read_dir(path)? {
                let file = entry?.path();
                if file.is_file() && is_jpeg(&file) {
                    files.push(file);
                }
            }
            files.sort();
            if files.is_empty() {
                return Err(PipelineError::Source(format!(
                    "no .jpg/.jpeg images in {}",
                    path.display()
                )));
            }
        } else if path.is_file() && is_jpeg(path) {
            files.push(path.to_path_buf());
        } else {
            return Err(PipelineError::Source(format!(
                "unsupported source {}: expected a .jpg/.jpeg file or a directory of them",
                path.display()
            )));
        }

        Ok(Self {
            files: files.into(),
            origin: path.to_path_buf(),
        })
    }

    /// Files not yet read.
    pub fn remaining(&self) -> usize {
        self.files.len()
    }
}

impl FrameSource for ImageFiles {
    fn kind(&self) -> SourceKind {
        SourceKind::Finite
    }

    fn next_frame(&mut self, _token: &CancelToken) -> Result<SourceEvent, PipelineError> {
        let Some(file) = self.files.pop_front() else {
            return Ok(SourceEvent::Exhausted);
        };
        match std::fs::read(&file) {
            Ok(data) => Ok(SourceEvent::Frame(Bytes::from(data))),
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "skipping unreadable image");
                Ok(SourceEvent::Retry)
            }
        }
    }

    fn describe(&self) -> String {
        format!("images at {}", self.origin.display())
    }
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false)
}

/// In-memory finite sequence.
#[derive(Debug, Default)]
pub struct MemorySource {
    frames: VecDeque<Bytes>,
}

impl MemorySource {
    pub fn new(frames: impl IntoIterator<Item = Bytes>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    /// The same frame `count` times.
    pub fn repeat(frame: Bytes, count: usize) -> Self {
        Self::new(std::iter::repeat(frame).take(count))
    }
}

impl FrameSource for MemorySource {
    fn kind(&self) -> SourceKind {
        SourceKind::Finite
    }

    fn next_frame(&mut self, _token: &CancelToken) -> Result<SourceEvent, PipelineError> {
        Ok(match self.frames.pop_front() {
            Some(frame) => SourceEvent::Frame(frame),
            None => SourceEvent::Exhausted,
        })
    }

    fn describe(&self) -> String {
        format!("{} in-memory frames", self.frames.len())
    }
}

/// Grabs one frame from a live device.
pub type CaptureFn = Box<dyn FnMut() -> std::io::Result<Bytes> + Send>;

/// Live device behind a capture closure.
///
/// A failed grab is treated as the device going away: the source waits
/// [`REOPEN_DELAY`] (or until cancelled) and tries again.
pub struct CaptureSource {
    name: String,
    capture: CaptureFn,
    reopen_delay: Duration,
    failures: u64,
}

impl CaptureSource {
    pub fn new<F>(name: impl Into<String>, capture: F) -> Self
    where
        F: FnMut() -> std::io::Result<Bytes> + Send + 'static,
    {
        Self {
            name: name.into(),
            capture: Box::new(capture),
            reopen_delay: REOPEN_DELAY,
            failures: 0,
        }
    }

    pub fn with_reopen_delay(mut self, delay: Duration) -> Self {
        self.reopen_delay = delay;
        self
    }

    /// Grabs that failed so far.
    pub fn failures(&self) -> u64 {
        self.failures
    }
}

impl FrameSource for CaptureSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Live
    }

    fn next_frame(&mut self, token: &CancelToken) -> Result<SourceEvent, PipelineError> {
        match (self.capture)() {
            Ok(frame) => Ok(SourceEvent::Frame(frame)),
            Err(e) => {
                self.failures += 1;
                tracing::warn!(device = %self.name, error = %e, "capture failed, reopening");
                token.sleep(self.reopen_delay);
                Ok(SourceEvent::Retry)
            }
        }
    }

    fn describe(&self) -> String {
        format!("capture device {}", self.name)
    }
}

impl std::fmt::Debug for CaptureSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSource")
            .field("name", &self.name)
            .field("failures", &self.failures)
            .finish()
    }
}
