//! # Scheduler configuration.
//!
//! ## Sentinel values
//! - `workers = 0` → one worker
//! - `critical_cap = 0` → no ceiling on concurrent CRITICAL tasks
//! - `task_timeout = 0s` → no timeout (local handlers only; external replies always need one)
//! - `max_queued = 0` → unbounded priority queues
//! - `history_limit = 0` → finished records are dropped immediately

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policies::{BackoffPolicy, JitterPolicy};

/// Fallback wait for an external `task.result` when `task_timeout` is zero.
const EXTERNAL_REPLY_FALLBACK: Duration = Duration::from_secs(300);

/// Settings of the hierarchical task scheduler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Size of the fixed worker pool.
    pub workers: usize,

    /// Maximum number of CRITICAL tasks running at once.
    ///
    /// A worker that pops a CRITICAL task while the ceiling is reached puts it
    /// back and sleeps for `throttle_backoff`.
    pub critical_cap: usize,

    /// Sleep of a worker that hit the CRITICAL ceiling.
    pub throttle_backoff: Duration,

    /// Period of the deadline / preemption monitor.
    pub monitor_interval: Duration,

    /// Period of the recurring / maintenance loop.
    pub time_tick: Duration,

    /// Per-attempt execution timeout.
    pub task_timeout: Duration,

    /// Automatic retries of a failed CRITICAL task.
    pub max_critical_retries: u32,

    /// Delay before a failed CRITICAL task goes back to its queue.
    pub retry_backoff: BackoffPolicy,

    /// Running NORMAL+LOW tasks that, with CRITICAL work waiting, count as a preemption signal.
    pub preemption_threshold: usize,

    /// Per-priority queue bound.
    pub max_queued: usize,

    /// Finished task records kept for `get_task`.
    pub history_limit: usize,
}

impl SchedulerConfig {
    /// Worker pool size clamped to at least one.
    #[inline]
    pub fn worker_count(&self) -> usize {
        self.workers.max(1)
    }

    /// CRITICAL concurrency ceiling as an `Option`.
    #[inline]
    pub fn critical_limit(&self) -> Option<usize> {
        if self.critical_cap == 0 {
            None
        } else {
            Some(self.critical_cap)
        }
    }

    /// Per-attempt timeout as an `Option`.
    #[inline]
    pub fn timeout(&self) -> Option<Duration> {
        if self.task_timeout == Duration::ZERO {
            None
        } else {
            Some(self.task_timeout)
        }
    }

    /// How long a worker waits for an external `task.result`.
    #[inline]
    pub fn reply_timeout(&self) -> Duration {
        self.timeout().unwrap_or(EXTERNAL_REPLY_FALLBACK)
    }

    /// Queue bound as an `Option`.
    #[inline]
    pub fn queue_limit(&self) -> Option<usize> {
        if self.max_queued == 0 {
            None
        } else {
            Some(self.max_queued)
        }
    }
}

impl Default for SchedulerConfig {
    /// - `workers = 4`, `critical_cap = 2`, `throttle_backoff = 100ms`
    /// - `monitor_interval = 5s`, `time_tick = 30s`, `task_timeout = 300s`
    /// - `max_critical_retries = 3`, `retry_backoff = 1s × 2^n` (max 30s)
    /// - `preemption_threshold = 2`, `max_queued = 0`, `history_limit = 1000`
    fn default() -> Self {
        Self {
            workers: 4,
            critical_cap: 2,
            throttle_backoff: Duration::from_millis(100),
            monitor_interval: Duration::from_secs(5),
            time_tick: Duration::from_secs(30),
            task_timeout: Duration::from_secs(300),
            max_critical_retries: 3,
            retry_backoff: BackoffPolicy {
                first: Duration::from_secs(1),
                max: Duration::from_secs(30),
                factor: 2.0,
                jitter: JitterPolicy::None,
            },
            preemption_threshold: 2,
            max_queued: 0,
            history_limit: 1000,
        }
    }
}
