//! Sync stage: pairs frames with the pose results computed from them.
//!
//! Frames arrive in index order from the reader (or the device camera) and
//! poses arrive whenever the device finishes one. A frame is held until a
//! pose with a close enough index shows up, a newer frame supersedes it, or
//! the input ends. Every frame is eventually emitted, paired or not.
//!
//! A pose older than the pending frame is dropped. A pose ahead of it is
//! kept and tried against the next frame, since its own frame may still be
//! on the way.

use crate::error::PipelineError;
use crate::queue::{BoundedQueue, Feed, Indexed};
use crate::stage::{deliver, CancelToken, Stage};
use crate::{FrameQueue, PoseQueue};
use bytes::Bytes;
use devlink_protocol::PoseResult;
use std::sync::Arc;
use std::time::Duration;

/// A frame ready for display, with its pose if one matched.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncedFrame {
    pub frame: Indexed<Bytes>,
    pub pose: Option<Indexed<PoseResult>>,
}

impl SyncedFrame {
    pub fn index(&self) -> u64 {
        self.frame.index
    }

    pub fn is_paired(&self) -> bool {
        self.pose.is_some()
    }
}

/// Output of the sync stage.
pub type ShowQueue = BoundedQueue<Feed<SyncedFrame>>;

/// What one [`SyncStage::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The pending frame was emitted with a pose.
    Paired { frame: u64, pose: u64 },
    /// A pose arrived too far from the pending frame. Older poses are
    /// dropped; a pose ahead of the frame is held for the next one.
    Mismatched { frame: u64, pose: u64 },
    /// Nothing arrived within the poll window.
    Idle,
    /// Input ended and nothing is pending.
    Finished,
    /// Cancelled.
    Stopped,
}

pub struct SyncStage {
    frames: Arc<FrameQueue>,
    poses: Arc<PoseQueue>,
    send: Option<Arc<FrameQueue>>,
    output: Arc<ShowQueue>,
    idx_max_diff: u64,
    poll: Duration,
    pending: Option<Indexed<Bytes>>,
    held_pose: Option<Indexed<PoseResult>>,
    exhausted: bool,
    paired: u64,
    unpaired: u64,
}

impl SyncStage {
    /// Pairs frames whose index differs from a pose's by less than
    /// `idx_max_diff`.
    pub fn new(
        frames: Arc<FrameQueue>,
        poses: Arc<PoseQueue>,
        output: Arc<ShowQueue>,
        idx_max_diff: u64,
        poll: Duration,
    ) -> Self {
        Self {
            frames,
            poses,
            send: None,
            output,
            idx_max_diff,
            poll,
            pending: None,
            held_pose: None,
            exhausted: false,
            paired: 0,
            unpaired: 0,
        }
    }

    /// Forwards every incoming frame (and the end marker) to `send` before
    /// pairing it.
    pub fn with_send_queue(mut self, send: Arc<FrameQueue>) -> Self {
        self.send = Some(send);
        self
    }

    /// Index of the frame waiting for a pose.
    pub fn pending_index(&self) -> Option<u64> {
        self.pending.as_ref().map(|f| f.index)
    }

    /// Index of a pose that ran ahead of the pending frame.
    pub fn held_pose_index(&self) -> Option<u64> {
        self.held_pose.as_ref().map(|p| p.index)
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Frames emitted with and without a pose.
    pub fn counts(&self) -> (u64, u64) {
        (self.paired, self.unpaired)
    }

    /// Runs one iteration: take a frame, then wait for a pose.
    pub fn step(&mut self, token: &CancelToken) -> Step {
        if token.is_cancelled() {
            return Step::Stopped;
        }

        let mut fresh = false;
        if !self.exhausted {
            let next = if self.pending.is_some() {
                self.frames.try_get()
            } else {
                self.frames.get(self.poll)
            };
            match next {
                Some(Feed::Item(frame)) => {
                    if !self.forward(Feed::Item(frame.clone()), token) {
                        return Step::Stopped;
                    }
                    fresh = true;
                    if let Some(old) = self.pending.replace(frame) {
                        tracing::trace!(index = old.index, "frame superseded before a pose matched");
                        if !self.emit(old, None, token) {
                            return Step::Stopped;
                        }
                    }
                }
                Some(Feed::End) => {
                    tracing::debug!(pending = ?self.pending_index(), "frames exhausted");
                    self.exhausted = true;
                    if !self.forward(Feed::End, token) {
                        return Step::Stopped;
                    }
                }
                None => {}
            }
        }

        let Some(frame_index) = self.pending_index() else {
            return if self.exhausted {
                Step::Finished
            } else {
                Step::Idle
            };
        };

        let held = if fresh { self.held_pose.take() } else { None };
        let next_pose = match held {
            Some(pose) => Some(pose),
            None => self.poses.get(self.poll),
        };

        match next_pose {
            Some(pose) if pose.index.abs_diff(frame_index) < self.idx_max_diff => {
                let pose_index = pose.index;
                if let Some(frame) = self.pending.take() {
                    if !self.emit(frame, Some(pose), token) {
                        return Step::Stopped;
                    }
                }
                Step::Paired {
                    frame: frame_index,
                    pose: pose_index,
                }
            }
            Some(pose) => {
                let pose_index = pose.index;
                if pose_index > frame_index {
                    tracing::debug!(
                        frame = frame_index,
                        pose = pose_index,
                        max_diff = self.idx_max_diff,
                        "pose ahead of pending frame, held"
                    );
                    self.held_pose = Some(pose);
                } else {
                    tracing::debug!(
                        frame = frame_index,
                        pose = pose_index,
                        max_diff = self.idx_max_diff,
                        "pose behind pending frame, dropped"
                    );
                }
                Step::Mismatched {
                    frame: frame_index,
                    pose: pose_index,
                }
            }
            None if self.exhausted => {
                self.held_pose = None;
                if let Some(frame) = self.pending.take() {
                    tracing::debug!(index = frame.index, "no pose for last frame");
                    if !self.emit(frame, None, token) {
                        return Step::Stopped;
                    }
                }
                Step::Finished
            }
            None => Step::Idle,
        }
    }

    fn forward(&self, feed: Feed<Indexed<Bytes>>, token: &CancelToken) -> bool {
        match &self.send {
            Some(send) => deliver(send, feed, token, self.poll),
            None => true,
        }
    }

    fn emit(
        &mut self,
        frame: Indexed<Bytes>,
        pose: Option<Indexed<PoseResult>>,
        token: &CancelToken,
    ) -> bool {
        if pose.is_some() {
            self.paired += 1;
        } else {
            self.unpaired += 1;
        }
        deliver(&self.output, Feed::Item(SyncedFrame { frame, pose }), token, self.poll)
    }
}

impl Stage for SyncStage {
    fn name(&self) -> &str {
        "sync"
    }

    fn run(&mut self, token: &CancelToken) -> Result<(), PipelineError> {
        loop {
            match self.step(token) {
                Step::Finished => {
                    deliver(&self.output, Feed::End, token, self.poll);
                    break;
                }
                Step::Stopped => break,
                _ => {}
            }
        }

        tracing::info!(paired = self.paired, unpaired = self.unpaired, "sync stopped");
        Ok(())
    }
}

impl std::fmt::Debug for SyncStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStage")
            .field("pending", &self.pending_index())
            .field("held_pose", &self.held_pose_index())
            .field("exhausted", &self.exhausted)
            .field("idx_max_diff", &self.idx_max_diff)
            .field("paired", &self.paired)
            .field("unpaired", &self.unpaired)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLL: Duration = Duration::from_millis(20);

    struct Fixture {
        frames: Arc<FrameQueue>,
        poses: Arc<PoseQueue>,
        send: Arc<FrameQueue>,
        output: Arc<ShowQueue>,
        stage: SyncStage,
    }

    fn fixture(idx_max_diff: u64) -> Fixture {
        let frames = Arc::new(BoundedQueue::blocking(8));
        let poses = Arc::new(BoundedQueue::evicting(8));
        let send = Arc::new(BoundedQueue::blocking(8));
        let output = Arc::new(BoundedQueue::blocking(8));
        let stage = SyncStage::new(frames.clone(), poses.clone(), output.clone(), idx_max_diff, POLL)
            .with_send_queue(send.clone());
        Fixture {
            frames,
            poses,
            send,
            output,
            stage,
        }
    }

    fn frame(index: u64) -> Feed<Indexed<Bytes>> {
        Feed::Item(Indexed::new(index, Bytes::from(format!("img{}", index))))
    }

    fn pose(index: u64) -> Indexed<PoseResult> {
        Indexed::new(index, PoseResult::new(index))
    }

    #[test]
    fn test_pairs_within_tolerance() {
        let mut f = fixture(3);
        let token = CancelToken::new();
        f.frames.put(frame(10), Duration::ZERO).unwrap();
        f.poses.put(pose(12), Duration::ZERO).unwrap();

        assert_eq!(f.stage.step(&token), Step::Paired { frame: 10, pose: 12 });
        assert_eq!(f.stage.pending_index(), None);

        let synced = f.output.try_get().and_then(Feed::into_item).unwrap();
        assert_eq!(synced.index(), 10);
        assert_eq!(synced.pose.map(|p| p.index), Some(12));

        // Forwarded to the sender before pairing.
        assert_eq!(f.send.try_get().and_then(Feed::into_item).map(|f| f.index), Some(10));
    }

    #[test]
    fn test_distant_pose_leaves_frame_pending() {
        let mut f = fixture(3);
        let token = CancelToken::new();
        f.frames.put(frame(10), Duration::ZERO).unwrap();
        f.poses.put(pose(20), Duration::ZERO).unwrap();

        assert_eq!(f.stage.step(&token), Step::Mismatched { frame: 10, pose: 20 });
        assert_eq!(f.stage.pending_index(), Some(10));
        assert!(f.output.is_empty());
    }

    #[test]
    fn test_pose_ahead_pairs_with_next_frame() {
        let mut f = fixture(3);
        let token = CancelToken::new();
        f.frames.put(frame(10), Duration::ZERO).unwrap();
        f.poses.put(pose(20), Duration::ZERO).unwrap();
        assert_eq!(f.stage.step(&token), Step::Mismatched { frame: 10, pose: 20 });
        assert_eq!(f.stage.held_pose_index(), Some(20));

        // Frames 11..=18 were evicted upstream; 19 is the next to arrive.
        f.frames.put(frame(19), Duration::ZERO).unwrap();
        assert_eq!(f.stage.step(&token), Step::Paired { frame: 19, pose: 20 });
        assert_eq!(f.stage.held_pose_index(), None);

        let superseded = f.output.try_get().and_then(Feed::into_item).unwrap();
        assert_eq!(superseded.index(), 10);
        assert!(!superseded.is_paired());
        let paired = f.output.try_get().and_then(Feed::into_item).unwrap();
        assert_eq!(paired.index(), 19);
        assert_eq!(paired.pose.map(|p| p.index), Some(20));
    }

    #[test]
    fn test_pose_behind_is_dropped() {
        let mut f = fixture(3);
        let token = CancelToken::new();
        f.frames.put(frame(10), Duration::ZERO).unwrap();
        f.poses.put(pose(2), Duration::ZERO).unwrap();
        assert_eq!(f.stage.step(&token), Step::Mismatched { frame: 10, pose: 2 });
        assert_eq!(f.stage.held_pose_index(), None);

        f.frames.put(frame(11), Duration::ZERO).unwrap();
        assert_eq!(f.stage.step(&token), Step::Idle);
        assert_eq!(f.stage.pending_index(), Some(11));
        assert_eq!(f.stage.counts(), (0, 1));
    }

    #[test]
    fn test_tolerance_is_exclusive() {
        let mut f = fixture(1);
        let token = CancelToken::new();
        f.frames.put(frame(5), Duration::ZERO).unwrap();
        f.poses.put(pose(6), Duration::ZERO).unwrap();
        assert_eq!(f.stage.step(&token), Step::Mismatched { frame: 5, pose: 6 });

        f.poses.put(pose(5), Duration::ZERO).unwrap();
        assert_eq!(f.stage.step(&token), Step::Paired { frame: 5, pose: 5 });
    }

    #[test]
    fn test_newer_frame_supersedes_pending() {
        let mut f = fixture(3);
        let token = CancelToken::new();
        f.frames.put(frame(1), Duration::ZERO).unwrap();
        assert_eq!(f.stage.step(&token), Step::Idle);
        assert_eq!(f.stage.pending_index(), Some(1));

        f.frames.put(frame(2), Duration::ZERO).unwrap();
        f.poses.put(pose(2), Duration::ZERO).unwrap();
        assert_eq!(f.stage.step(&token), Step::Paired { frame: 2, pose: 2 });

        let first = f.output.try_get().and_then(Feed::into_item).unwrap();
        assert_eq!(first.index(), 1);
        assert!(!first.is_paired());
        let second = f.output.try_get().and_then(Feed::into_item).unwrap();
        assert!(second.is_paired());
        assert_eq!(f.stage.counts(), (1, 1));
    }

    #[test]
    fn test_end_flushes_pending_frame() {
        let mut f = fixture(3);
        let token = CancelToken::new();
        f.frames.put(frame(0), Duration::ZERO).unwrap();
        f.frames.put(Feed::End, Duration::ZERO).unwrap();

        assert_eq!(f.stage.step(&token), Step::Idle);
        assert_eq!(f.stage.step(&token), Step::Finished);
        assert!(f.stage.is_exhausted());
        assert_eq!(f.stage.pending_index(), None);

        let last = f.output.try_get().and_then(Feed::into_item).unwrap();
        assert_eq!(last.index(), 0);
        assert!(!last.is_paired());

        assert!(f.send.try_get().is_some_and(|feed| !feed.is_end()));
        assert_eq!(f.send.try_get(), Some(Feed::End));
    }

    #[test]
    fn test_run_emits_end() {
        let f = fixture(3);
        for i in 0..3 {
            f.frames.put(frame(i), Duration::ZERO).unwrap();
            f.poses.put(pose(i), Duration::ZERO).unwrap();
        }
        f.frames.put(Feed::End, Duration::ZERO).unwrap();

        let mut stage = f.stage;
        stage.run(&CancelToken::new()).unwrap();

        let mut seen = Vec::new();
        while let Some(Feed::Item(synced)) = f.output.try_get() {
            assert!(synced.is_paired());
            seen.push(synced.index());
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn test_stops_when_cancelled() {
        let mut f = fixture(3);
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(f.stage.step(&token), Step::Stopped);
        f.stage.run(&token).unwrap();
        assert!(f.output.is_empty());
    }
}
