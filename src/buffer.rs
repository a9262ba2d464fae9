use crate::error::{PipelineError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Outcome of a blocking [`BoundedQueue::push`]
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    /// The item was enqueued
    Accepted,
    /// The queue was closed; the item was dropped and the caller should stop producing
    Rejected,
}

impl PushStatus {
    /// Check if the item was enqueued
    pub fn is_accepted(self) -> bool {
        self == PushStatus::Accepted
    }
}

/// Error of a non-blocking [`BoundedQueue::try_push`], handing the item back
#[derive(Debug, PartialEq, Eq)]
pub enum TryPushError<T> {
    Full(T),
    Closed(T),
}

impl<T> TryPushError<T> {
    pub fn into_inner(self) -> T {
        match self {
            TryPushError::Full(item) | TryPushError::Closed(item) => item,
        }
    }
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
    aborted: bool,
    peak: usize,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    block_count: AtomicU64,
}

/// A fixed-capacity FIFO with blocking push/pop and an explicit closed state.
///
/// Cloning yields another handle to the same queue. All fields are guarded
/// by a single mutex; nothing is logged or written while it is held.
pub struct BoundedQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.shared.capacity)
            .field("len", &state.items.len())
            .field("closed", &state.closed)
            .field("aborted", &state.aborted)
            .finish()
    }
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(PipelineError::Config(
                "queue capacity must be at least 1".into(),
            ));
        }
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    items: VecDeque::with_capacity(capacity),
                    closed: false,
                    aborted: false,
                    peak: 0,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                capacity,
                block_count: AtomicU64::new(0),
            }),
        })
    }

    /// Push an item, blocking while the queue is full.
    ///
    /// Returns [`PushStatus::Rejected`] without inserting if the queue is
    /// closed, including when it gets closed while this call is waiting.
    pub fn push(&self, item: T) -> PushStatus {
        let shared = &*self.shared;
        let mut state = shared.state.lock();
        if state.items.len() == shared.capacity && !state.closed {
            shared.block_count.fetch_add(1, Ordering::Relaxed);
            while state.items.len() == shared.capacity && !state.closed {
                shared.not_full.wait(&mut state);
            }
        }
        if state.closed {
            return PushStatus::Rejected;
        }
        state.items.push_back(item);
        state.peak = state.peak.max(state.items.len());
        drop(state);

        shared.not_empty.notify_one();
        PushStatus::Accepted
    }

    /// Push without blocking
    pub fn try_push(&self, item: T) -> std::result::Result<(), TryPushError<T>> {
        let shared = &*self.shared;
        let mut state = shared.state.lock();
        if state.closed {
            return Err(TryPushError::Closed(item));
        }
        if state.items.len() == shared.capacity {
            return Err(TryPushError::Full(item));
        }
        state.items.push_back(item);
        state.peak = state.peak.max(state.items.len());
        drop(state);

        shared.not_empty.notify_one();
        Ok(())
    }

    /// Pop the oldest item, blocking while the queue is empty and open.
    ///
    /// Returns `None` only once the queue is closed and drained; that is the
    /// end-of-stream signal.
    pub fn pop(&self) -> Option<T> {
        let shared = &*self.shared;
        let mut state = shared.state.lock();
        while state.items.is_empty() && !state.closed {
            shared.not_empty.wait(&mut state);
        }
        let item = state.items.pop_front();
        drop(state);

        if item.is_some() {
            shared.not_full.notify_one();
        }
        item
    }

    /// Pop without blocking; `None` if nothing is buffered right now
    pub fn try_pop(&self) -> Option<T> {
        let item = self.shared.state.lock().items.pop_front();
        if item.is_some() {
            self.shared.not_full.notify_one();
        }
        item
    }

    /// Half-close: refuse further pushes, let poppers drain what is buffered.
    ///
    /// Wakes every blocked pusher and popper. Idempotent; returns `true` only
    /// for the call that actually closed the queue.
    pub fn close(&self) -> bool {
        let shared = &*self.shared;
        let mut state = shared.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        let remaining = state.items.len();
        drop(state);

        shared.not_empty.notify_all();
        shared.not_full.notify_all();
        debug!(remaining, "queue closed");
        true
    }

    /// Full close: refuse further pushes and discard what is buffered, so
    /// every popper observes end-of-stream immediately.
    ///
    /// Returns the discarded items in FIFO order.
    pub fn abort(&self) -> Vec<T> {
        let shared = &*self.shared;
        let mut state = shared.state.lock();
        state.closed = true;
        state.aborted = true;
        let discarded: Vec<T> = state.items.drain(..).collect();
        drop(state);

        shared.not_empty.notify_all();
        shared.not_full.notify_all();
        debug!(discarded = discarded.len(), "queue aborted");
        discarded
    }

    /// Get the current number of buffered items
    pub fn len(&self) -> usize {
        self.shared.state.lock().items.len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().items.is_empty()
    }

    /// Get the capacity of the queue
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Check if the queue refuses further pushes
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Check if the queue was fully closed by `abort`
    pub fn is_aborted(&self) -> bool {
        self.shared.state.lock().aborted
    }

    /// Closed and empty: no pop will ever return an item again
    pub fn is_drained(&self) -> bool {
        let state = self.shared.state.lock();
        state.closed && state.items.is_empty()
    }

    /// Get the utilization of the queue as a percentage (0-100)
    pub fn utilization(&self) -> u32 {
        ((self.len() * 100) / self.capacity()).min(100) as u32
    }

    /// Highest number of items ever buffered at once
    pub fn peak_len(&self) -> usize {
        self.shared.state.lock().peak
    }

    /// Number of pushes that found the queue full and had to wait
    pub fn block_count(&self) -> u64 {
        self.shared.block_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_queue_push_pop() {
        let queue = BoundedQueue::new(10).unwrap();
        assert_eq!(queue.push(42), PushStatus::Accepted);
        assert_eq!(queue.pop(), Some(42));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result: Result<BoundedQueue<u8>> = BoundedQueue::new(0);
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::new(4).unwrap();
        for i in 0..4 {
            assert!(queue.push(i).is_accepted());
        }
        let drained: Vec<_> = (0..4).filter_map(|_| queue.pop()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_queue_utilization() {
        let queue = BoundedQueue::new(10).unwrap();
        for i in 0..5 {
            let _ = queue.push(i);
        }
        assert_eq!(queue.utilization(), 50);
    }

    #[test]
    fn test_push_after_close_rejected() {
        let queue = BoundedQueue::new(2).unwrap();
        assert!(queue.close());
        assert_eq!(queue.push(1), PushStatus::Rejected);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_drains_before_end_of_stream() {
        let queue = BoundedQueue::new(3).unwrap();
        let _ = queue.push(1);
        let _ = queue.push(2);
        queue.close();
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.pop(), None);
        assert!(queue.is_drained());
    }

    #[test]
    fn test_close_is_idempotent() {
        let queue: BoundedQueue<u8> = BoundedQueue::new(1).unwrap();
        assert!(queue.close());
        assert!(!queue.close());
        assert!(!queue.close());
        assert!(queue.is_closed());
    }

    #[test]
    fn test_try_push_full_and_closed() {
        let queue = BoundedQueue::new(1).unwrap();
        assert!(queue.try_push(1).is_ok());
        assert_eq!(queue.try_push(2), Err(TryPushError::Full(2)));
        queue.close();
        assert_eq!(queue.try_push(3), Err(TryPushError::Closed(3)));
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_close_wakes_all_blocked_poppers() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(1).unwrap();
        let poppers: Vec<_> = (0..4)
            .map(|_| {
                let q = queue.clone();
                thread::spawn(move || q.pop())
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        queue.close();

        for handle in poppers {
            assert_eq!(handle.join().unwrap(), None);
        }
    }

    #[test]
    fn test_close_wakes_blocked_pusher() {
        let queue = BoundedQueue::new(1).unwrap();
        let _ = queue.push(1);

        let q = queue.clone();
        let pusher = thread::spawn(move || q.push(2));

        thread::sleep(Duration::from_millis(50));
        queue.close();

        assert_eq!(pusher.join().unwrap(), PushStatus::Rejected);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_abort_discards_buffered_items() {
        let queue = BoundedQueue::new(4).unwrap();
        let _ = queue.push("a");
        let _ = queue.push("b");
        assert_eq!(queue.abort(), vec!["a", "b"]);
        assert_eq!(queue.pop(), None);
        assert!(queue.is_aborted());
        assert_eq!(queue.push("c"), PushStatus::Rejected);
    }

    #[test]
    fn test_abort_wakes_blocked_push_and_pop() {
        let full = BoundedQueue::new(1).unwrap();
        assert!(full.push(1).is_accepted());
        let empty: BoundedQueue<i32> = BoundedQueue::new(1).unwrap();

        let pusher = {
            let q = full.clone();
            thread::spawn(move || q.push(2))
        };
        let popper = {
            let q = empty.clone();
            thread::spawn(move || q.pop())
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(full.abort(), vec![1]);
        empty.abort();

        assert_eq!(pusher.join().unwrap(), PushStatus::Rejected);
        assert_eq!(popper.join().unwrap(), None);
    }

    #[test]
    fn test_peak_never_exceeds_capacity() {
        let queue = BoundedQueue::new(3).unwrap();
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = queue.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        assert!(q.push(p * 1000 + i).is_accepted());
                    }
                })
            })
            .collect();

        let consumer = {
            let q = queue.clone();
            thread::spawn(move || {
                let mut seen = 0;
                while q.pop().is_some() {
                    seen += 1;
                }
                seen
            })
        };

        for handle in producers {
            handle.join().unwrap();
        }
        queue.close();

        assert_eq!(consumer.join().unwrap(), 1000);
        assert!(queue.peak_len() <= queue.capacity());
    }
}
