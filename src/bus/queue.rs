//! # Per-subscriber bounded delivery queue.
//!
//! Every subscription owns one FIFO queue. Publishing never blocks: when the
//! queue is at capacity the configured [`OverflowPolicy`] decides which message
//! is lost, and the bus reports the loss as `bus.delivery.dropped`.
//!
//! ## Rules
//! - Single consumer per queue (the [`Subscription`](super::Subscription) handle).
//! - Delivery order equals push order.
//! - A closed queue rejects pushes and drains what it already holds.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use super::message::Message;
use super::router::TopicPattern;

/// What to lose when a subscriber queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Reject the incoming message (the queue keeps its oldest backlog).
    #[default]
    DropNewest,
    /// Evict the oldest queued message to make room for the incoming one.
    DropOldest,
}

/// Result of a single push.
#[derive(Debug)]
pub(crate) enum PushOutcome {
    Delivered,
    /// Incoming message rejected (queue full, `DropNewest`).
    Rejected,
    /// Oldest message evicted (queue full, `DropOldest`); the incoming one was queued.
    Evicted(Arc<Message>),
    /// Subscriber is gone.
    Closed,
}

/// Shared state between the bus (producer side) and the subscription (consumer).
pub(crate) struct DeliveryQueue {
    pub id: u64,
    pub subscriber: String,
    pub pattern: TopicPattern,
    capacity: usize,
    policy: OverflowPolicy,
    buf: Mutex<VecDeque<Arc<Message>>>,
    notify: Notify,
    closed: AtomicBool,
}

impl DeliveryQueue {
    pub fn new(
        id: u64,
        subscriber: String,
        pattern: TopicPattern,
        capacity: usize,
        policy: OverflowPolicy,
    ) -> Self {
        Self {
            id,
            subscriber,
            pattern,
            capacity: capacity.max(1),
            policy,
            buf: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn push(&self, msg: Arc<Message>) -> PushOutcome {
        if self.closed.load(Ordering::Acquire) {
            return PushOutcome::Closed;
        }
        let outcome = {
            let mut buf = self.buf.lock();
            if buf.len() < self.capacity {
                buf.push_back(msg);
                PushOutcome::Delivered
            } else {
                match self.policy {
                    OverflowPolicy::DropNewest => PushOutcome::Rejected,
                    OverflowPolicy::DropOldest => {
                        let evicted = buf.pop_front();
                        buf.push_back(msg);
                        match evicted {
                            Some(old) => PushOutcome::Evicted(old),
                            None => PushOutcome::Delivered,
                        }
                    }
                }
            }
        };
        if !matches!(outcome, PushOutcome::Rejected) {
            self.notify.notify_one();
        }
        outcome
    }

    pub fn pop(&self) -> Option<Arc<Message>> {
        self.buf.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.buf.lock().len()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Waits for the next message; `None` once closed and drained.
    pub async fn recv(&self) -> Option<Arc<Message>> {
        loop {
            if let Some(msg) = self.pop() {
                return Some(msg);
            }
            if self.is_closed() {
                return None;
            }
            self.notify.notified().await;
        }
    }
}
