//! Termination detection for queues fed by several threads.
//!
//! Every queue with feeders gets one [`TerminationGate`]. Each feeder thread
//! owns a [`Feeder`] handle; releasing the handle marks that feeder done, and
//! the one release that drives the gate to zero propagates end-of-stream to
//! the queue's consumers.

use crate::buffer::{BoundedQueue, PushStatus};
use crate::record::{Message, Record};
use crossbeam::utils::CachePadded;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Atomic count of feeders still active on one queue.
///
/// Exactly one call to [`mark_done`](TerminationGate::mark_done) returns
/// `true`: the one that moves the count from 1 to 0.
#[derive(Debug)]
pub struct TerminationGate {
    active: CachePadded<AtomicUsize>,
    feeders: usize,
}

impl TerminationGate {
    /// Create a gate expecting `feeders` calls to `mark_done`
    pub fn new(feeders: usize) -> Self {
        Self {
            active: CachePadded::new(AtomicUsize::new(feeders)),
            feeders,
        }
    }

    /// Record that one feeder finished. Returns `true` iff the caller was the
    /// last active feeder. Surplus calls return `false` and never underflow.
    pub fn mark_done(&self) -> bool {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            == Ok(1)
    }

    /// Feeders that have not finished yet
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Feeder count the gate was created with
    pub fn feeders(&self) -> usize {
        self.feeders
    }

    /// Check if every feeder has finished
    pub fn is_done(&self) -> bool {
        self.active() == 0
    }
}

/// How the last feeder propagates end-of-stream downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloseStrategy {
    /// Half-close the queue; blocked consumers are woken by broadcast
    Close,
    /// Push one [`Message::EndOfStream`] per downstream consumer
    Poison,
    /// Push the end-of-stream markers, then half-close
    #[default]
    PoisonAndClose,
}

type CloseHook = Box<dyn Fn() + Send + Sync>;

struct Downstream<T> {
    queue: BoundedQueue<Message<T>>,
    gate: TerminationGate,
    consumers: usize,
    strategy: CloseStrategy,
    on_close: Option<CloseHook>,
    name: String,
}

impl<T> Downstream<T> {
    fn propagate_end_of_stream(&self) {
        debug!(
            queue = %self.name,
            consumers = self.consumers,
            strategy = ?self.strategy,
            "last feeder done, closing downstream"
        );
        if matches!(
            self.strategy,
            CloseStrategy::Poison | CloseStrategy::PoisonAndClose
        ) {
            for _ in 0..self.consumers {
                if self.queue.push(Message::EndOfStream) == PushStatus::Rejected {
                    break;
                }
            }
        }
        if matches!(
            self.strategy,
            CloseStrategy::Close | CloseStrategy::PoisonAndClose
        ) {
            self.queue.close();
        }
        if let Some(hook) = &self.on_close {
            hook();
        }
    }
}

/// Describes the feeders and consumers of one queue, and hands out exactly
/// one [`Feeder`] per feeding thread
pub struct FeederGroup<T> {
    queue: BoundedQueue<Message<T>>,
    consumers: usize,
    strategy: CloseStrategy,
    on_close: Option<CloseHook>,
    name: String,
}

impl<T> FeederGroup<T> {
    /// One consumer and [`CloseStrategy::PoisonAndClose`] unless changed
    pub fn new(queue: BoundedQueue<Message<T>>) -> Self {
        Self {
            queue,
            consumers: 1,
            strategy: CloseStrategy::default(),
            on_close: None,
            name: String::from("queue"),
        }
    }

    /// Number of threads popping from the queue
    pub fn consumers(mut self, consumers: usize) -> Self {
        self.consumers = consumers;
        self
    }

    /// How the last feeder ends the stream
    pub fn strategy(mut self, strategy: CloseStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Name used in diagnostics
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Run `hook` once, right after end-of-stream has been propagated
    pub fn on_close<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_close = Some(Box::new(hook));
        self
    }

    /// Create the gate and `feeders` handles sharing it.
    ///
    /// With zero feeders there is nobody to close the queue later, so
    /// end-of-stream is propagated right away.
    pub fn split(self, feeders: usize) -> Vec<Feeder<T>> {
        let downstream = Arc::new(Downstream {
            queue: self.queue,
            gate: TerminationGate::new(feeders),
            consumers: self.consumers,
            strategy: self.strategy,
            on_close: self.on_close,
            name: self.name,
        });
        if feeders == 0 {
            downstream.propagate_end_of_stream();
        }
        (0..feeders)
            .map(|_| Feeder {
                downstream: Arc::clone(&downstream),
                finished: false,
            })
            .collect()
    }
}

/// Handle held by one thread feeding a queue.
///
/// Finishing (explicitly or by drop, including during a panic) marks the
/// feeder done exactly once.
pub struct Feeder<T> {
    downstream: Arc<Downstream<T>>,
    finished: bool,
}

impl<T> Feeder<T> {
    /// Push a record downstream, blocking while the queue is full
    pub fn push(&self, record: Record<T>) -> PushStatus {
        self.downstream.queue.push(Message::Data(record))
    }

    /// The queue this feeder writes to
    pub fn queue(&self) -> &BoundedQueue<Message<T>> {
        &self.downstream.queue
    }

    /// Feeders of this queue that have not finished yet
    pub fn active_feeders(&self) -> usize {
        self.downstream.gate.active()
    }

    /// Mark this feeder done. Returns `true` if it was the last one and
    /// therefore closed the downstream queue.
    pub fn finish(mut self) -> bool {
        self.release()
    }

    fn release(&mut self) -> bool {
        if self.finished {
            return false;
        }
        self.finished = true;
        let last = self.downstream.gate.mark_done();
        if last {
            self.downstream.propagate_end_of_stream();
        }
        last
    }
}

impl<T> Drop for Feeder<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T> fmt::Debug for Feeder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feeder")
            .field("queue", &self.downstream.name)
            .field("active", &self.downstream.gate.active())
            .field("finished", &self.finished)
            .finish()
    }
}
