//! Error types used by the healvisor runtime and its components.
//!
//! - [`RuntimeError`]: errors raised by the runtime context itself (start/shutdown).
//! - [`TaskError`]: errors raised by one task execution (handler or external executor).
//! - [`ActionError`]: errors raised by a playbook action or a kernel restart.
//! - [`SchedulerError`]: caller mistakes against the scheduler API.
//! - [`BusError`] / [`MessageError`]: subscription denials and malformed messages.
//!
//! Every enum provides `as_label` (stable snake_case label for log fields and
//! failure payloads). Failures that cross component boundaries are carried as bus
//! messages, not as these types.

use std::time::Duration;
use thiserror::Error;

use crate::bus::Priority;

/// # Errors produced by the runtime context.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some loops remained stuck and were aborted.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}; forcing termination")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Names of the loops that did not stop in time.
        stuck: Vec<String>,
    },

    /// `start()` was called twice.
    #[error("runtime already started")]
    AlreadyStarted,

    /// Waiting for the OS shutdown signal failed.
    #[error("signal handling failed: {0}")]
    Signal(#[from] std::io::Error),

    /// A component could not subscribe to its input topics.
    #[error("component subscription failed: {0}")]
    Subscribe(#[from] BusError),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use healvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::AlreadyStarted => "runtime_already_started",
            RuntimeError::Signal(_) => "runtime_signal",
            RuntimeError::Subscribe(_) => "runtime_subscribe",
        }
    }
}

/// # Errors produced by a single task execution.
///
/// Only `Fail` and `Timeout` are retryable; the scheduler additionally restricts
/// automatic retries to CRITICAL tasks.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Execution exceeded its timeout (local handler or external executor reply).
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Non-recoverable error (never retried).
    #[error("fatal error (no retry): {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// Execution failed but may succeed if retried.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Execution was cancelled by runtime shutdown.
    #[error("context cancelled")]
    Canceled,

    /// Nothing handles `task.execute.<handler>`: no local handler, no subscriber.
    #[error("no executor for handler {handler}")]
    NoExecutor {
        /// Handler name of the task.
        handler: String,
    },
}

impl TaskError {
    /// Shorthand for [`TaskError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        TaskError::Fail {
            error: error.into(),
        }
    }

    /// Shorthand for [`TaskError::Fatal`].
    pub fn fatal(error: impl Into<String>) -> Self {
        TaskError::Fatal {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use healvisor::TaskError;
    /// use std::time::Duration;
    ///
    /// let err = TaskError::Timeout { timeout: Duration::from_secs(1) };
    /// assert_eq!(err.as_label(), "task_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::Fatal { .. } => "task_fatal",
            TaskError::Fail { .. } => "task_failed",
            TaskError::Canceled => "task_canceled",
            TaskError::NoExecutor { .. } => "task_no_executor",
        }
    }

    /// Indicates whether the error type is safe to retry.
    ///
    /// ```
    /// use healvisor::TaskError;
    ///
    /// assert!(TaskError::fail("boom").is_retryable());
    /// assert!(!TaskError::fatal("nope").is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Fail { .. } | TaskError::Timeout { .. })
    }
}

/// # Errors produced by remediation actions and kernel restarts.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// The action ran and reported failure.
    #[error("action {action} failed: {error}")]
    Failed {
        /// Action (or restart target) name.
        action: String,
        /// Failure message.
        error: String,
    },

    /// The action did not finish within its step timeout.
    #[error("action {action} timed out after {timeout:?}")]
    Timeout {
        /// Action name.
        action: String,
        /// The step timeout.
        timeout: Duration,
    },

    /// No executor is registered for the action.
    #[error("no executor registered for action {action}")]
    Unsupported {
        /// Action name.
        action: String,
    },

    /// The action panicked.
    #[error("action {action} panicked: {info}")]
    Panicked {
        /// Action name.
        action: String,
        /// Panic payload rendered as text.
        info: String,
    },
}

impl ActionError {
    /// Shorthand for [`ActionError::Failed`].
    pub fn failed(action: impl Into<String>, error: impl Into<String>) -> Self {
        ActionError::Failed {
            action: action.into(),
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ActionError::Failed { .. } => "action_failed",
            ActionError::Timeout { .. } => "action_timeout",
            ActionError::Unsupported { .. } => "action_unsupported",
            ActionError::Panicked { .. } => "action_panicked",
        }
    }
}

/// Errors returned by the [`Scheduler`](crate::Scheduler) API.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The scheduler has been shut down and accepts no more work.
    #[error("scheduler closed")]
    Closed,

    /// The priority queue reached its configured bound; the task was rejected.
    #[error("{priority} queue full ({capacity} tasks)")]
    QueueFull {
        /// Target queue.
        priority: Priority,
        /// Configured bound.
        capacity: usize,
    },

    /// No task with this id is known (never enqueued or evicted from history).
    #[error("task {id} not found")]
    NotFound {
        /// Task id.
        id: uuid::Uuid,
    },

    /// The requested transition is not allowed from the task's current status.
    #[error("task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Task id.
        id: uuid::Uuid,
        /// Current status.
        from: &'static str,
        /// Requested status.
        to: &'static str,
    },
}

impl SchedulerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SchedulerError::Closed => "scheduler_closed",
            SchedulerError::QueueFull { .. } => "scheduler_queue_full",
            SchedulerError::NotFound { .. } => "scheduler_not_found",
            SchedulerError::InvalidTransition { .. } => "scheduler_invalid_transition",
        }
    }
}

/// Errors returned by [`MessageBus::subscribe`](crate::MessageBus::subscribe).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The ACL table does not list the principal for this topic.
    #[error("{principal} is not allowed on topic {topic}")]
    AclDenied {
        /// Subscriber or publisher name.
        principal: String,
        /// Topic (or pattern) requested.
        topic: String,
    },
}

impl BusError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            BusError::AclDenied { .. } => "bus_acl_denied",
        }
    }
}

/// Rejection of a malformed [`Message`](crate::Message) at construction time.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// A reserved topic was given a body of the wrong variant.
    #[error("topic {topic} requires a {expected} body, got {actual}")]
    BodyMismatch {
        /// Topic of the message.
        topic: String,
        /// Body variant the topic requires.
        expected: &'static str,
        /// Body variant supplied.
        actual: &'static str,
    },

    /// Empty topics and topics with empty segments are rejected.
    #[error("invalid topic {topic:?}")]
    InvalidTopic {
        /// The offending topic.
        topic: String,
    },
}
