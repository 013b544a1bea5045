//! # In-process topic bus.
//!
//! [`MessageBus`] routes each published [`Message`] to every subscription whose
//! pattern matches its topic (fan-out: one independent copy per subscriber) and
//! to the optional callback bound to the exact topic.
//!
//! ## Architecture
//! ```text
//! publish(source, topic, body, priority)
//!     │
//!     ├─► AclTable::is_allowed(source, topic)? ── no ──► None
//!     │                                            └──► spawn: publish bus.acl.violation
//!     ├─► Router::route(topic) ──► [queue S1] ──► Subscription::recv()
//!     │                       ├──► [queue S2] ──► Subscription::recv()
//!     │                       ├──► [queue SN] (full) ──► drop + bus.delivery.dropped
//!     │                       └──► [queue SX] (subscriber not listed for a restricted topic) ──► skip
//!     └─► callbacks[topic] ──► spawn: cb.on_message()  (panic caught)
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: never awaits, never applies back-pressure.
//! - **Per-subscriber FIFO**: each queue sees messages in publish order.
//! - **Explicit loss**: overflow follows [`OverflowPolicy`]; every loss is counted,
//!   logged and announced (except the loss of a loss notice).
//! - **No persistence**: messages published before a subscription exists are not replayed.
//! - **Restricted topics stay restricted**: a message on a restricted topic reaches
//!   only listed principals, whatever pattern they subscribed with. A `*` or `a.*`
//!   observer that must see such topics has to be listed for them.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::acl::AclTable;
use super::body::{AclViolation, Body, DeliveryDropped};
use super::callback::TopicCallback;
use super::config::BusConfig;
use super::message::{Message, MessageId, Priority};
use super::queue::{DeliveryQueue, OverflowPolicy, PushOutcome};
use super::router::{Router, TopicPattern};
use super::topics;
use crate::error::BusError;

/// Principal used for messages the bus emits about itself.
pub const BUS_SOURCE: &str = "bus";

/// Counters exposed by [`MessageBus::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Messages accepted for routing (including bus notices).
    pub published: u64,
    /// Queue insertions.
    pub delivered: u64,
    /// Per-subscriber losses (full, evicted, closed).
    pub dropped: u64,
    /// Publishes refused by the ACL.
    pub denied_publish: u64,
    /// Subscriptions refused by the ACL.
    pub denied_subscribe: u64,
    /// Copies withheld from wildcard subscribers not listed for a restricted topic.
    pub denied_delivery: u64,
    /// Live subscriptions.
    pub subscriptions: usize,
}

pub(crate) struct Inner {
    queue_capacity: usize,
    overflow: OverflowPolicy,
    acl: RwLock<AclTable>,
    router: RwLock<Router<Arc<DeliveryQueue>>>,
    callbacks: RwLock<HashMap<String, Arc<dyn TopicCallback>>>,
    next_id: AtomicU64,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    denied_publish: AtomicU64,
    denied_subscribe: AtomicU64,
    denied_delivery: AtomicU64,
}

/// Cloneable handle to the bus (all clones share one router).
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<Inner>,
}

impl MessageBus {
    /// Creates a bus from its configuration.
    pub fn new(cfg: BusConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue_capacity: cfg.queue_capacity.max(1),
                overflow: cfg.overflow,
                acl: RwLock::new(cfg.acl),
                router: RwLock::new(Router::new()),
                callbacks: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                denied_publish: AtomicU64::new(0),
                denied_subscribe: AtomicU64::new(0),
                denied_delivery: AtomicU64::new(0),
            }),
        }
    }

    /// Publishes a message built from parts.
    ///
    /// Returns `None` when the ACL denies `source` on `topic` (nothing is delivered
    /// and a `bus.acl.violation` notice is emitted asynchronously) or when the body
    /// does not fit a reserved topic.
    pub fn publish(
        &self,
        source: &str,
        topic: &str,
        body: Body,
        priority: Priority,
        correlation_id: Option<Uuid>,
    ) -> Option<MessageId> {
        match Message::new(source, topic, body, priority) {
            Ok(msg) => self.publish_message(msg.with_correlation(correlation_id)),
            Err(e) => {
                error!(source, topic, error = %e, "malformed message rejected");
                None
            }
        }
    }

    /// Publishes an already validated message.
    pub fn publish_message(&self, msg: Message) -> Option<MessageId> {
        if !self.inner.acl.read().is_allowed(&msg.source, &msg.topic) {
            self.inner.denied_publish.fetch_add(1, Ordering::Relaxed);
            warn!(source = %msg.source, topic = %msg.topic, "publish denied by acl");
            self.report_violation(&msg.source, &msg.topic);
            return None;
        }
        let id = msg.id;
        self.deliver(Arc::new(msg));
        Some(id)
    }

    /// Subscribes `subscriber` to `pattern` (`a.b`, `a.*` or `*`).
    ///
    /// The ACL is checked against the pattern string exactly as for publishing.
    /// Wildcard patterns are accepted, but they only receive restricted topics
    /// the subscriber is listed for.
    /// The returned handle owns a private FIFO queue; dropping it unsubscribes.
    pub fn subscribe(&self, subscriber: &str, pattern: &str) -> Result<Subscription, BusError> {
        if !self.inner.acl.read().is_allowed(subscriber, pattern) {
            self.inner.denied_subscribe.fetch_add(1, Ordering::Relaxed);
            warn!(subscriber, pattern, "subscribe denied by acl");
            return Err(BusError::AclDenied {
                principal: subscriber.to_string(),
                topic: pattern.to_string(),
            });
        }
        let pattern = TopicPattern::parse(pattern);
        let queue = Arc::new(DeliveryQueue::new(
            self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            subscriber.to_string(),
            pattern.clone(),
            self.inner.queue_capacity,
            self.inner.overflow,
        ));
        self.inner.router.write().insert(&pattern, Arc::clone(&queue));
        debug!(subscriber, pattern = %pattern, "subscribed");
        Ok(Subscription {
            queue,
            bus: Arc::downgrade(&self.inner),
        })
    }

    /// Explicit unsubscribe (same as dropping the handle).
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Binds `callback` to the exact `topic`, replacing (and returning) any previous one.
    pub fn bind_callback(
        &self,
        topic: &str,
        callback: Arc<dyn TopicCallback>,
    ) -> Option<Arc<dyn TopicCallback>> {
        self.inner
            .callbacks
            .write()
            .insert(topic.to_string(), callback)
    }

    /// Removes the callback bound to `topic`.
    pub fn unbind_callback(&self, topic: &str) -> Option<Arc<dyn TopicCallback>> {
        self.inner.callbacks.write().remove(topic)
    }

    /// Restricts `topic` to `principals` at runtime.
    pub fn restrict<I, S>(&self, topic: &str, principals: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.acl.write().insert(topic, principals);
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            denied_publish: self.inner.denied_publish.load(Ordering::Relaxed),
            denied_subscribe: self.inner.denied_subscribe.load(Ordering::Relaxed),
            denied_delivery: self.inner.denied_delivery.load(Ordering::Relaxed),
            subscriptions: self.inner.router.read().len(),
        }
    }

    /// Number of subscriptions that would receive a message on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.router.read().route(topic).len()
    }

    /// Subscriptions that would receive `topic`, without catch-all (`*`) observers
    /// and without subscribers the ACL withholds it from.
    pub fn consumer_count(&self, topic: &str) -> usize {
        let targets = self.inner.router.read().route(topic);
        let acl = self.inner.acl.read();
        targets
            .iter()
            .filter(|q| q.pattern != TopicPattern::All && acl.is_allowed(&q.subscriber, topic))
            .count()
    }

    /// Routes a message to the queues of allowed subscribers and to the topic callback.
    fn deliver(&self, msg: Arc<Message>) {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        let targets = self.inner.router.read().route(&msg.topic);

        let mut losses: Vec<(String, &'static str)> = Vec::new();
        let acl = self.inner.acl.read();
        for queue in targets {
            if !acl.is_allowed(&queue.subscriber, &msg.topic) {
                self.inner.denied_delivery.fetch_add(1, Ordering::Relaxed);
                debug!(subscriber = %queue.subscriber, topic = %msg.topic, "delivery withheld by acl");
                continue;
            }
            match queue.push(Arc::clone(&msg)) {
                PushOutcome::Delivered => {
                    self.inner.delivered.fetch_add(1, Ordering::Relaxed);
                }
                PushOutcome::Evicted(_) => {
                    self.inner.delivered.fetch_add(1, Ordering::Relaxed);
                    losses.push((queue.subscriber.clone(), "evicted"));
                }
                PushOutcome::Rejected => losses.push((queue.subscriber.clone(), "full")),
                PushOutcome::Closed => losses.push((queue.subscriber.clone(), "closed")),
            }
        }

        drop(acl);
        self.invoke_callback(&msg);

        if losses.is_empty() {
            return;
        }
        self.inner
            .dropped
            .fetch_add(losses.len() as u64, Ordering::Relaxed);
        if msg.topic == topics::BUS_DELIVERY_DROPPED {
            return;
        }
        for (subscriber, reason) in losses {
            warn!(subscriber = %subscriber, topic = %msg.topic, reason, "message dropped for subscriber");
            let notice = Message::new(
                BUS_SOURCE,
                topics::BUS_DELIVERY_DROPPED,
                Body::DeliveryDropped(DeliveryDropped {
                    subscriber,
                    topic: msg.topic.clone(),
                    reason: reason.to_string(),
                }),
                Priority::High,
            );
            if let Ok(notice) = notice {
                self.deliver(Arc::new(notice.with_correlation(Some(msg.id))));
            }
        }
    }

    fn invoke_callback(&self, msg: &Arc<Message>) {
        let Some(cb) = self.inner.callbacks.read().get(&msg.topic).cloned() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(topic = %msg.topic, callback = cb.name(), "no runtime; callback skipped");
            return;
        };
        let msg = Arc::clone(msg);
        handle.spawn(async move {
            let fut = cb.on_message(msg.as_ref());
            if let Err(panic_err) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                error!(
                    topic = %msg.topic,
                    callback = cb.name(),
                    info = %panic_info(&*panic_err),
                    "topic callback panicked"
                );
            }
        });
    }

    /// Emits `bus.acl.violation` off the publisher's call stack.
    fn report_violation(&self, principal: &str, topic: &str) {
        let notice = Message::new(
            BUS_SOURCE,
            topics::BUS_ACL_VIOLATION,
            Body::AclViolation(AclViolation {
                principal: principal.to_string(),
                topic: topic.to_string(),
            }),
            Priority::High,
        );
        let Ok(notice) = notice else { return };
        let notice = Arc::new(notice);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let bus = self.clone();
                handle.spawn(async move { bus.deliver(notice) });
            }
            Err(_) => self.deliver(notice),
        }
    }
}

/// Renders a panic payload as text.
pub(crate) fn panic_info(any: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = any.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = any.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Receiving end of one subscription.
///
/// Sharing one `Subscription` (e.g. behind an `Arc`) between several consumers
/// turns it into a competing-consumer queue; otherwise each handle sees every
/// matching message.
pub struct Subscription {
    queue: Arc<DeliveryQueue>,
    bus: Weak<Inner>,
}

impl Subscription {
    /// Waits for the next message. Returns `None` once the bus is gone and the queue drained.
    pub async fn recv(&self) -> Option<Arc<Message>> {
        if self.bus.strong_count() == 0 {
            self.queue.close();
        }
        self.queue.recv().await
    }

    /// Returns the next queued message without waiting.
    pub fn try_recv(&self) -> Option<Arc<Message>> {
        self.queue.pop()
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscriber name given at subscribe time.
    pub fn subscriber(&self) -> &str {
        &self.queue.subscriber
    }

    /// Subscribed pattern.
    pub fn pattern(&self) -> &TopicPattern {
        &self.queue.pattern
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("subscriber", &self.queue.subscriber)
            .field("pattern", &self.queue.pattern)
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.queue.close();
        if let Some(inner) = self.bus.upgrade() {
            let id = self.queue.id;
            inner
                .router
                .write()
                .remove(&self.queue.pattern, |q| q.id == id);
        }
    }
}
