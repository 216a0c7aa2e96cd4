//! Uniform worker abstraction for pipeline stages.
//!
//! Each stage runs on its own OS thread. Stopping is cooperative: every
//! blocking call a stage makes is bounded by a poll timeout, after which the
//! stage rechecks its [`CancelToken`].

use crate::error::PipelineError;
use crate::queue::BoundedQueue;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default bound on any single blocking queue or socket operation.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

/// Shared stop signal. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests every holder of this token to stop.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        let _guard = self.state.lock.lock();
        self.state.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        !self.is_cancelled()
    }

    /// Sleeps for `duration` or until cancelled, whichever comes first.
    ///
    /// Returns true if the full duration elapsed without cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.state.lock.lock();
        while !self.is_cancelled() {
            if self.state.wake.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        !self.is_cancelled()
    }
}

/// A pipeline stage: a loop run on a dedicated thread until cancelled or done.
pub trait Stage: Send + 'static {
    /// Short name used for the thread and in logs.
    fn name(&self) -> &str;

    /// Runs the stage loop. Must return within one poll window of cancellation.
    fn run(&mut self, token: &CancelToken) -> Result<(), PipelineError>;
}

/// Handle to a running stage.
#[derive(Debug)]
pub struct Worker {
    name: String,
    token: CancelToken,
    handle: Option<JoinHandle<Result<(), PipelineError>>>,
}

impl Worker {
    /// Starts `stage` with its own token.
    pub fn start<S: Stage>(stage: S) -> Result<Self, PipelineError> {
        Self::start_with_token(stage, CancelToken::new())
    }

    /// Starts `stage` observing `token`, which may be shared with other stages.
    pub fn start_with_token<S: Stage>(mut stage: S, token: CancelToken) -> Result<Self, PipelineError> {
        let name = stage.name().to_string();
        let thread_token = token.clone();

        let handle = thread::Builder::new()
            .name(format!("devlink-{}", name))
            .spawn(move || {
                tracing::debug!(stage = stage.name(), "stage started");
                let result = stage.run(&thread_token);
                match &result {
                    Ok(()) => tracing::debug!(stage = stage.name(), "stage finished"),
                    Err(e) => tracing::error!(stage = stage.name(), error = %e, "stage failed"),
                }
                result
            })
            .map_err(|source| PipelineError::Spawn {
                name: name.clone(),
                source,
            })?;

        Ok(Self {
            name,
            token,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Signals the stage to stop. Does not wait.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Returns whether the stage thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Waits for the stage thread and returns its result.
    pub fn join(mut self) -> Result<(), PipelineError> {
        self.join_inner()
    }

    /// Stops the stage and waits for it.
    pub fn shutdown(self) -> Result<(), PipelineError> {
        self.stop();
        self.join()
    }

    fn join_inner(&mut self) -> Result<(), PipelineError> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| PipelineError::WorkerPanicked(self.name.clone()))?,
            None => Ok(()),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.token.cancel();
            if let Err(e) = self.join_inner() {
                tracing::warn!(stage = %self.name, error = %e, "stage ended with error");
            }
        }
    }
}

/// Puts `item` following the queue's policy, retrying every `poll` until it
/// lands or `token` is cancelled.
///
/// Returns false if the item was dropped because of cancellation.
pub fn deliver<T>(queue: &BoundedQueue<T>, item: T, token: &CancelToken, poll: Duration) -> bool {
    let mut item = item;
    loop {
        match queue.push(item, poll) {
            Ok(()) => return true,
            Err(back) => {
                if token.is_cancelled() {
                    return false;
                }
                item = back;
            }
        }
    }
}

/// Takes the next item, polling every `poll` until one arrives or `token`
/// is cancelled.
pub fn receive<T>(queue: &BoundedQueue<T>, token: &CancelToken, poll: Duration) -> Option<T> {
    while token.is_running() {
        if let Some(item) = queue.get(poll) {
            return Some(item);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        ticks: Arc<Mutex<u32>>,
    }

    impl Stage for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn run(&mut self, token: &CancelToken) -> Result<(), PipelineError> {
            while token.sleep(Duration::from_millis(5)) {
                *self.ticks.lock() += 1;
            }
            Ok(())
        }
    }

    struct Panicker;

    impl Stage for Panicker {
        fn name(&self) -> &str {
            "panicker"
        }

        fn run(&mut self, _token: &CancelToken) -> Result<(), PipelineError> {
            panic!("boom");
        }
    }

    struct Failing;

    impl Stage for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn run(&mut self, _token: &CancelToken) -> Result<(), PipelineError> {
            Err(PipelineError::Source("camera unplugged".into()))
        }
    }

    #[test]
    fn test_cancel_wakes_sleep() {
        let token = CancelToken::new();
        let sleeper = {
            let token = token.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let completed = token.sleep(Duration::from_secs(10));
                (completed, start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        token.cancel();

        let (completed, elapsed) = sleeper.join().unwrap();
        assert!(!completed);
        assert!(elapsed < Duration::from_secs(5));
        assert!(!token.sleep(Duration::from_secs(10)));
    }

    #[test]
    fn test_sleep_full_duration() {
        let token = CancelToken::new();
        let start = Instant::now();
        assert!(token.sleep(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_worker_start_stop_join() {
        let ticks = Arc::new(Mutex::new(0));
        let worker = Worker::start(Counter {
            ticks: ticks.clone(),
        })
        .unwrap();
        assert_eq!(worker.name(), "counter");

        thread::sleep(Duration::from_millis(50));
        assert!(!worker.is_finished());
        worker.shutdown().unwrap();
        assert!(*ticks.lock() > 0);
    }

    #[test]
    fn test_shared_token_stops_all() {
        let token = CancelToken::new();
        let a = Worker::start_with_token(
            Counter {
                ticks: Arc::default(),
            },
            token.clone(),
        )
        .unwrap();
        let b = Worker::start_with_token(
            Counter {
                ticks: Arc::default(),
            },
            token.clone(),
        )
        .unwrap();

        a.stop();
        assert!(b.token().is_cancelled());
        a.join().unwrap();
        b.join().unwrap();
    }

    #[test]
    fn test_worker_panic_reported() {
        let worker = Worker::start(Panicker).unwrap();
        assert!(matches!(
            worker.join(),
            Err(PipelineError::WorkerPanicked(name)) if name == "panicker"
        ));
    }

    #[test]
    fn test_worker_error_returned() {
        let worker = Worker::start(Failing).unwrap();
        assert!(matches!(worker.join(), Err(PipelineError::Source(_))));
    }

    #[test]
    fn test_deliver_gives_up_when_cancelled() {
        let queue = BoundedQueue::blocking(1);
        let token = CancelToken::new();
        assert!(deliver(&queue, 1, &token, Duration::from_millis(10)));

        token.cancel();
        assert!(!deliver(&queue, 2, &token, Duration::from_millis(10)));
        assert_eq!(queue.try_get(), Some(1));
    }

    #[test]
    fn test_receive_returns_none_when_cancelled() {
        let queue: BoundedQueue<u8> = BoundedQueue::blocking(1);
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(receive(&queue, &token, Duration::from_millis(10)), None);

        let token = CancelToken::new();
        queue.put(7, Duration::ZERO).unwrap();
        assert_eq!(receive(&queue, &token, Duration::from_millis(10)), Some(7));
    }
}
