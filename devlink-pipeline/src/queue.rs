//! Bounded queues for handoff between stages.
//!
//! A queue is the only state two stages share. Values are moved in and moved
//! out; a producer never touches a value after enqueueing it.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// What a put does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for room, up to the caller's timeout.
    Block,
    /// Drop the oldest element to make room; never waits.
    EvictOldest,
}

/// An item tagged with the index assigned where it entered the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Indexed<T> {
    pub index: u64,
    pub value: T,
}

impl<T> Indexed<T> {
    pub fn new(index: u64, value: T) -> Self {
        Self { index, value }
    }

    /// Absolute index distance to another item.
    pub fn distance<U>(&self, other: &Indexed<U>) -> u64 {
        self.index.abs_diff(other.index)
    }
}

/// Element of a stream that can end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed<T> {
    Item(T),
    /// The producer is exhausted; nothing follows.
    End,
}

impl<T> Feed<T> {
    pub fn is_end(&self) -> bool {
        matches!(self, Feed::End)
    }

    pub fn into_item(self) -> Option<T> {
        match self {
            Feed::Item(item) => Some(item),
            Feed::End => None,
        }
    }
}

/// Fixed-capacity FIFO queue, safe for any number of producers and consumers.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    policy: OverflowPolicy,
}

impl<T> BoundedQueue<T> {
    /// Creates a queue. A zero capacity is raised to one.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            policy,
        }
    }

    pub fn blocking(capacity: usize) -> Self {
        Self::new(capacity, OverflowPolicy::Block)
    }

    pub fn evicting(capacity: usize) -> Self {
        Self::new(capacity, OverflowPolicy::EvictOldest)
    }

    /// Appends `item`, waiting up to `timeout` for room.
    ///
    /// Hands the item back if the queue stayed full for the whole window.
    pub fn put(&self, item: T, timeout: Duration) -> Result<(), T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();

        while items.len() >= self.capacity {
            if self.not_full.wait_until(&mut items, deadline).timed_out()
                && items.len() >= self.capacity
            {
                return Err(item);
            }
        }

        items.push_back(item);
        drop(items);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Appends `item`, dropping the oldest element first if full.
    ///
    /// Returns the evicted element.
    pub fn put_evicting(&self, item: T) -> Option<T> {
        let mut items = self.items.lock();
        let evicted = if items.len() >= self.capacity {
            items.pop_front()
        } else {
            None
        };
        items.push_back(item);
        drop(items);
        self.not_empty.notify_one();
        evicted
    }

    /// Appends `item` following the queue's own overflow policy.
    pub fn push(&self, item: T, timeout: Duration) -> Result<(), T> {
        match self.policy {
            OverflowPolicy::Block => self.put(item, timeout),
            OverflowPolicy::EvictOldest => {
                if self.put_evicting(item).is_some() {
                    tracing::trace!(capacity = self.capacity, "evicted oldest queued item");
                }
                Ok(())
            }
        }
    }

    /// Removes the oldest element, waiting up to `timeout` for one.
    pub fn get(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();

        loop {
            if let Some(item) = items.pop_front() {
                drop(items);
                self.not_full.notify_one();
                return Some(item);
            }
            if self.not_empty.wait_until(&mut items, deadline).timed_out() {
                let item = items.pop_front();
                if item.is_some() {
                    drop(items);
                    self.not_full.notify_one();
                }
                return item;
            }
        }
    }

    /// Removes the oldest element if one is ready.
    pub fn try_get(&self) -> Option<T> {
        let item = self.items.lock().pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Removes everything and returns the newest element.
    pub fn drain_to_latest(&self) -> Option<T> {
        let mut items = self.items.lock();
        let latest = items.pop_back();
        items.clear();
        drop(items);
        if latest.is_some() {
            self.not_full.notify_all();
        }
        latest
    }

    pub fn clear(&self) {
        self.items.lock().clear();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.lock().len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_evicting_keeps_newest() {
        let queue = BoundedQueue::evicting(1);
        assert_eq!(queue.put_evicting(1), None);
        assert_eq!(queue.put_evicting(2), Some(1));
        assert_eq!(queue.put_evicting(3), Some(2));

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_get(), Some(3));
        assert_eq!(queue.try_get(), None);
    }

    #[test]
    fn test_blocking_put_times_out() {
        let queue = BoundedQueue::blocking(1);
        queue.put(1, Duration::ZERO).unwrap();

        let timeout = Duration::from_millis(200);
        let start = Instant::now();
        assert_eq!(queue.put(2, timeout), Err(2));
        let elapsed = start.elapsed();

        assert!(elapsed >= timeout, "returned early after {:?}", elapsed);
        assert!(elapsed < timeout + Duration::from_secs(1));
        assert_eq!(queue.try_get(), Some(1));
    }

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::blocking(4);
        for i in 0..4 {
            queue.put(i, Duration::ZERO).unwrap();
        }
        assert!(queue.is_full());
        let drained: Vec<_> = (0..4).filter_map(|_| queue.try_get()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_get_times_out_empty() {
        let queue: BoundedQueue<u32> = BoundedQueue::blocking(1);
        let start = Instant::now();
        assert_eq!(queue.get(Duration::from_millis(50)), None);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_blocked_put_wakes_on_get() {
        let queue = Arc::new(BoundedQueue::blocking(1));
        queue.put(1, Duration::ZERO).unwrap();

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.put(2, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.get(Duration::from_secs(1)), Some(1));

        assert_eq!(producer.join().unwrap(), Ok(()));
        assert_eq!(queue.get(Duration::from_secs(1)), Some(2));
    }

    #[test]
    fn test_drain_to_latest() {
        let queue = BoundedQueue::blocking(3);
        for i in 0..3 {
            queue.put(i, Duration::ZERO).unwrap();
        }
        assert_eq!(queue.drain_to_latest(), Some(2));
        assert!(queue.is_empty());
        assert_eq!(queue.drain_to_latest(), None);
    }

    #[test]
    fn test_push_follows_policy() {
        let evicting = BoundedQueue::evicting(2);
        for i in 0..5 {
            evicting.push(i, Duration::ZERO).unwrap();
        }
        assert_eq!(evicting.try_get(), Some(3));

        let blocking = BoundedQueue::blocking(1);
        blocking.push(0, Duration::ZERO).unwrap();
        assert_eq!(blocking.push(1, Duration::from_millis(10)), Err(1));
    }

    #[test]
    fn test_zero_capacity_raised() {
        let queue = BoundedQueue::<u8>::new(0, OverflowPolicy::Block);
        assert_eq!(queue.capacity(), 1);
    }

    #[test]
    fn test_many_producers_and_consumers() {
        let queue = Arc::new(BoundedQueue::blocking(4));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..250u32 {
                        queue.put(p * 1000 + i, Duration::from_secs(5)).unwrap();
                    }
                })
            })
            .collect();

        let mut seen = Vec::new();
        while seen.len() < 1000 {
            if let Some(v) = queue.get(Duration::from_secs(5)) {
                seen.push(v);
            }
        }
        for producer in producers {
            producer.join().unwrap();
        }

        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn test_indexed_distance() {
        let a = Indexed::new(10, "frame");
        let b = Indexed::new(12, 0u8);
        assert_eq!(a.distance(&b), 2);
        assert_eq!(b.distance(&a), 2);
    }
}
