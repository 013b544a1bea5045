//! # Task model.
//!
//! A [`TaskRequest`] is what callers hand to [`Scheduler::enqueue_task`](super::Scheduler::enqueue_task);
//! a [`TaskRecord`] is the scheduler's view of one task instance.
//!
//! ## State machine
//! ```text
//! QUEUED ──► RUNNING ──► COMPLETED
//!   │           ├──────► FAILED
//!   │           └──────► QUEUED      (CRITICAL retry only)
//!   ├──► CANCELLED
//!   └──► DEFERRED
//! ```
//! QUEUED and RUNNING are the only non-terminal states.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use crate::bus::Priority;
use crate::bus::body::{TaskEnqueue, TaskExecute, TaskOutcome};

/// Task identifier.
pub type TaskId = Uuid;

/// Lifecycle status of a task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Deferred,
}

impl TaskStatus {
    /// True for every state except QUEUED and RUNNING.
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Queued | TaskStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Deferred => "deferred",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work to be scheduled.
///
/// ```
/// use std::time::Duration;
/// use healvisor::{Priority, TaskRequest};
///
/// let req = TaskRequest::new("self_healing", "restart_db")
///     .with_priority(Priority::High)
///     .with_deadline(Duration::from_secs(30))
///     .with_payload(serde_json::json!({"reason": "heartbeat"}));
/// assert_eq!(req.priority, Priority::High);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRequest {
    pub task_type: String,
    /// Executor name; dispatched on `task.execute.<handler>`.
    pub handler: String,
    pub payload: Value,
    pub priority: Priority,
    /// Relative deadline from enqueue time.
    pub deadline: Option<Duration>,
    /// When set, the request is re-enqueued every `interval`.
    pub interval: Option<Duration>,
    /// Propagated onto every message about this task.
    pub correlation_id: Option<Uuid>,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            handler: handler.into(),
            payload: Value::Null,
            priority: Priority::Normal,
            deadline: None,
            interval: None,
            correlation_id: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Makes the request recurring.
    pub fn recurring(mut self, interval: Duration) -> Self {
        self.interval = Some(interval).filter(|d| !d.is_zero());
        self
    }

    pub fn with_correlation(mut self, id: Option<Uuid>) -> Self {
        self.correlation_id = id;
        self
    }
}

impl From<TaskEnqueue> for TaskRequest {
    fn from(req: TaskEnqueue) -> Self {
        let mut out = TaskRequest::new(req.task_type, req.handler)
            .with_priority(req.priority)
            .with_payload(req.context);
        out.deadline = req.deadline_secs.map(Duration::from_secs);
        if let Some(secs) = req.interval_secs {
            out = out.recurring(Duration::from_secs(secs));
        }
        out
    }
}

/// The scheduler's record of one task instance.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: TaskId,
    pub task_type: String,
    pub handler: String,
    pub payload: Value,
    /// Current priority (CRITICAL after escalation).
    pub priority: Priority,
    /// Priority at enqueue time.
    pub original_priority: Priority,
    pub deadline: Option<Instant>,
    pub status: TaskStatus,
    pub retry_count: u32,
    /// Set once a missed deadline promoted the task.
    pub escalated: bool,
    pub error: Option<String>,
    pub correlation_id: Option<Uuid>,
    /// Recurring job that produced this instance.
    pub recurring_id: Option<TaskId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Arrival order inside a priority queue; kept across escalation and retry.
    pub(crate) seq: u64,
}

impl TaskRecord {
    pub(crate) fn new(id: TaskId, req: &TaskRequest, seq: u64, now: Instant) -> Self {
        Self {
            id,
            task_type: req.task_type.clone(),
            handler: req.handler.clone(),
            payload: req.payload.clone(),
            priority: req.priority,
            original_priority: req.priority,
            deadline: req.deadline.map(|d| now + d),
            status: TaskStatus::Queued,
            retry_count: 0,
            escalated: false,
            error: None,
            correlation_id: req.correlation_id,
            recurring_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            seq,
        }
    }

    /// QUEUED with a deadline in the past.
    pub fn is_overdue(&self, now: Instant) -> bool {
        self.status == TaskStatus::Queued && self.deadline.is_some_and(|d| d <= now)
    }

    pub(crate) fn execute_body(&self) -> TaskExecute {
        TaskExecute {
            task_id: self.id,
            task_type: self.task_type.clone(),
            handler: self.handler.clone(),
            priority: self.priority,
            payload: self.payload.clone(),
            attempt: self.retry_count + 1,
        }
    }

    pub(crate) fn outcome(&self, will_retry: bool, duration: Option<Duration>) -> TaskOutcome {
        TaskOutcome {
            task_id: self.id,
            task_type: self.task_type.clone(),
            handler: self.handler.clone(),
            priority: self.priority,
            status: self.status,
            retry_count: self.retry_count,
            error: self.error.clone(),
            will_retry,
            duration_ms: duration.map(|d| d.as_millis() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_queued_and_running_are_live() {
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        for s in [
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
            TaskStatus::Deferred,
        ] {
            assert!(s.is_terminal(), "{s} should be terminal");
        }
    }

    #[test]
    fn enqueue_body_converts_seconds() {
        let body = TaskEnqueue {
            task_type: "maintenance".into(),
            handler: "vacuum".into(),
            priority: Priority::Low,
            context: Value::Null,
            deadline_secs: Some(10),
            interval_secs: Some(0),
        };
        let req = TaskRequest::from(body);
        assert_eq!(req.deadline, Some(Duration::from_secs(10)));
        assert_eq!(req.interval, None);
    }

    #[tokio::test(start_paused = true)]
    async fn overdue_only_while_queued() {
        let now = Instant::now();
        let req = TaskRequest::new("t", "h").with_deadline(Duration::from_secs(1));
        let mut rec = TaskRecord::new(Uuid::new_v4(), &req, 1, now);
        assert!(!rec.is_overdue(now));
        assert!(rec.is_overdue(now + Duration::from_secs(1)));
        rec.status = TaskStatus::Running;
        assert!(!rec.is_overdue(now + Duration::from_secs(5)));
    }
}
