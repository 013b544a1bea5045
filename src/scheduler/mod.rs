//! Hierarchical task scheduler.
//!
//! Internal modules:
//! - [`config`]: [`SchedulerConfig`] and its sentinel accessors;
//! - [`task`]: [`TaskRequest`], [`TaskRecord`], [`TaskStatus`];
//! - [`queue`]: one heap per priority, deadline-then-arrival order;
//! - [`handler`]: in-process executors ([`Handler`], [`HandlerFn`]);
//! - [`runner`]: one attempt with timeout, child token and panic capture;
//! - [`maintenance`]: once-per-day / once-per-week jobs;
//! - [`scheduler`]: the [`Scheduler`] handle and its loops.

mod config;
mod handler;
mod maintenance;
mod queue;
mod runner;
#[allow(clippy::module_inception)]
mod scheduler;
mod task;

pub use config::SchedulerConfig;
pub use handler::{Handler, HandlerFn, HandlerRef};
pub use maintenance::{Cadence, MaintenanceSchedule};
pub use scheduler::{SCHEDULER_SOURCE, Scheduler, SchedulerStats};
pub use task::{TaskId, TaskRecord, TaskRequest, TaskStatus};
