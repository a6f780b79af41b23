//! Bounded receive ring buffer.
//!
//! Decouples the forwarding plane's receive callback from protocol
//! processing. The producer side runs in driver context: it takes only the
//! ring's own leaf lock (never the engine lock) and never blocks — when the
//! ring is full the frame is dropped and still reported consumed to the
//! driver. That is the documented availability/latency trade-off, not a bug.

use super::parser::{FrameDeliver, RawFrame};
use log::debug;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

/// Producer/consumer counters of the ring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    pub enqueued: u64,
    pub dropped_full: u64,
}

#[derive(Debug)]
struct RingInner {
    queue: VecDeque<RawFrame>,
    stats: RingStats,
}

/// Bounded MPSC frame queue with drop-on-full backpressure.
#[derive(Debug)]
pub struct RingBuffer {
    inner: Mutex<RingInner>,
    notify: Notify,
    capacity: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RingInner {
                queue: VecDeque::with_capacity(capacity),
                stats: RingStats::default(),
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Enqueues a frame. Returns false if the ring was full and the frame
    /// was dropped; the caller reports the frame consumed either way.
    pub fn push(&self, frame: RawFrame) -> bool {
        let queued = {
            let mut inner = match self.inner.lock() {
                Ok(inner) => inner,
                Err(poisoned) => poisoned.into_inner(),
            };
            if inner.queue.len() >= self.capacity {
                inner.stats.dropped_full += 1;
                false
            } else {
                inner.queue.push_back(frame);
                inner.stats.enqueued += 1;
                true
            }
        };
        if queued {
            self.notify.notify_one();
        } else {
            debug!("receive ring full, frame dropped");
        }
        queued
    }

    /// Dequeues the oldest frame, if any.
    pub fn pop(&self) -> Option<RawFrame> {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.queue.pop_front()
    }

    /// Waits until a producer signals new frames.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    /// Wakes the consumer without enqueueing (shutdown path).
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(inner) => inner.queue.len(),
            Err(poisoned) => poisoned.into_inner().queue.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RingStats {
        match self.inner.lock() {
            Ok(inner) => inner.stats,
            Err(poisoned) => poisoned.into_inner().stats,
        }
    }
}

impl FrameDeliver for RingBuffer {
    /// Driver-context entry point: every frame is consumed, full or not.
    fn deliver(&self, frame: RawFrame) -> bool {
        self.push(frame);
        true
    }
}
