//! # Bus messages.
//!
//! A [`Message`] is the only thing components exchange. Its body is a closed,
//! tagged [`Body`] enum; reserved topics (see [`topics`](super::topics)) accept
//! exactly one body variant and the pairing is checked in [`Message::new`], so a
//! consumer never has to validate a payload it received.
//!
//! ## Ordering
//! Each message carries a process-wide monotonically increasing `seq`. Within one
//! subscriber queue delivery order equals publish order; across queues only
//! `seq` (or an explicit `correlation_id`) relates messages.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::body::Body;
use super::topics;
use crate::error::MessageError;

/// Message identifier returned by a successful publish.
pub type MessageId = Uuid;

/// Global sequence counter for message ordering.
static MESSAGE_SEQ: AtomicU64 = AtomicU64::new(1);

/// Four-level priority shared by bus messages and scheduler tasks.
///
/// Ordering is strict: `Critical > High > Normal > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    /// All priorities, highest first (the order workers drain queues in).
    pub const DESCENDING: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// Dense index for per-priority arrays (`Critical = 0`, `Low = 3`).
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }

    /// Stable lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A published unit of communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique id.
    pub id: MessageId,
    /// Process-wide publish sequence.
    pub seq: u64,
    /// Publishing component (the ACL principal).
    pub source: String,
    /// Concrete topic (never a pattern).
    pub topic: String,
    /// Typed payload.
    pub body: Body,
    /// Delivery priority (informational for consumers; queues stay FIFO).
    pub priority: Priority,
    /// Wall-clock creation time.
    pub timestamp: DateTime<Utc>,
    /// Links related messages (incident id, task id).
    pub correlation_id: Option<Uuid>,
}

impl Message {
    /// Builds a message, rejecting invalid topics and body/topic mismatches.
    ///
    /// ```
    /// use healvisor::{Body, Message, Priority};
    ///
    /// let ok = Message::new("demo", "custom.thing", Body::custom(serde_json::json!({"a": 1})), Priority::Low);
    /// assert!(ok.is_ok());
    ///
    /// // `task.completed` is reserved for task outcome bodies.
    /// let bad = Message::new("demo", "task.completed", Body::custom(serde_json::Value::Null), Priority::Low);
    /// assert!(bad.is_err());
    /// ```
    pub fn new(
        source: impl Into<String>,
        topic: impl Into<String>,
        body: Body,
        priority: Priority,
    ) -> Result<Self, MessageError> {
        let topic = topic.into();
        if !topics::is_valid_topic(&topic) {
            return Err(MessageError::InvalidTopic { topic });
        }
        if let Some(expected) = topics::required_body(&topic) {
            let actual = body.kind_name();
            if expected != actual {
                return Err(MessageError::BodyMismatch {
                    topic,
                    expected,
                    actual,
                });
            }
        }
        Ok(Self {
            id: Uuid::new_v4(),
            seq: MESSAGE_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            source: source.into(),
            topic,
            body,
            priority,
            timestamp: Utc::now(),
            correlation_id: None,
        })
    }

    /// Attaches a correlation id.
    #[inline]
    pub fn with_correlation(mut self, id: Option<Uuid>) -> Self {
        self.correlation_id = id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::body::Heartbeat;

    #[test]
    fn priority_is_strictly_ordered() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        let idx: Vec<usize> = Priority::DESCENDING.iter().map(|p| p.index()).collect();
        assert_eq!(idx, vec![0, 1, 2, 3]);
    }

    #[test]
    fn reserved_topic_requires_matching_body() {
        let hb = Body::Heartbeat(Heartbeat {
            component: "ingest".into(),
        });
        assert!(Message::new("k", topics::KERNEL_HEARTBEAT, hb.clone(), Priority::Low).is_ok());

        let err = Message::new("k", topics::EVENT_INCIDENT, hb, Priority::Low).unwrap_err();
        assert!(matches!(err, MessageError::BodyMismatch { expected: "incident", .. }));
    }

    #[test]
    fn rejects_empty_segments() {
        let body = Body::custom(serde_json::Value::Null);
        assert!(Message::new("x", "", body.clone(), Priority::Low).is_err());
        assert!(Message::new("x", "a..b", body.clone(), Priority::Low).is_err());
        assert!(Message::new("x", "a.*", body, Priority::Low).is_err());
    }

    #[test]
    fn sequence_is_monotonic() {
        let a = Message::new("x", "a", Body::custom(serde_json::Value::Null), Priority::Low).unwrap();
        let b = Message::new("x", "a", Body::custom(serde_json::Value::Null), Priority::Low).unwrap();
        assert!(b.seq > a.seq);
    }
}
