//! # Topic callbacks.
//!
//! A topic may bind one [`TopicCallback`] in addition to its queue subscribers.
//! The callback is invoked on a freshly spawned task per message, concurrently
//! with and independently of queue delivery.
//!
//! ## Rules
//! - No ordering between callback invocations.
//! - Panics are caught; the bus logs them and keeps running.

use async_trait::async_trait;

use super::message::Message;

/// Handler bound to an exact topic.
///
/// ```
/// use async_trait::async_trait;
/// use healvisor::{Message, TopicCallback};
///
/// struct Audit;
///
/// #[async_trait]
/// impl TopicCallback for Audit {
///     async fn on_message(&self, msg: &Message) {
///         let _ = &msg.topic;
///     }
///     fn name(&self) -> &'static str { "audit" }
/// }
/// ```
#[async_trait]
pub trait TopicCallback: Send + Sync + 'static {
    /// Processes one message.
    async fn on_message(&self, msg: &Message);

    /// Short name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
