//! # healvisor
//!
//! **Healvisor** is an in-process task orchestration and self-healing core.
//!
//! It detects operational anomalies, schedules remediation work by priority,
//! runs remediation playbooks and restarts silent components. Every component
//! talks to the others only through one [`MessageBus`].
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   kernel.heartbeat / api.error / metrics.resource / kpi.update / trust.score.report / *
//!        │                                                               │
//!        ▼                                                               ▼
//! ┌──────────────────────┐    event.incident    ┌──────────────────────────────┐
//! │  TriggerEvaluator    │ ───────────────────► │  Dispatcher                  │
//! │  (fast / slow tick)  │                      │  (playbooks, actions)        │
//! └──────────┬───────────┘                      └───┬───────────────▲──────────┘
//!            │ task.enqueue (self_healing)          │               │ task.execute.<playbook>
//!            ▼                                      │               │
//! ┌──────────────────────┐ task.execute.<handler>   │               │
//! │  Scheduler           │ ─────────────────────────┼───────────────┘
//! │  CRITICAL│HIGH│NORMAL│LOW queues, workers,      │ incident.resolved | incident.failed
//! │  monitor, clock      │ ◄── task.result ─────────┤ trust.score.update
//! └──────────┬───────────┘                          ▼
//!            │ task.completed | task.failed | task.escalated | task.preemption
//!            ▼
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │  MessageBus: topic trie, per-subscriber bounded FIFO, ACL, callbacks     │
//! └──────────────────────────────────────────────────────────────────────────┘
//!            ▲
//!            │ kernel.restart.* / system.alert.critical_component_down
//! ┌──────────┴───────────┐
//! │  KernelSupervisor    │  heartbeat ages, bounded restarts with cooldown
//! └──────────────────────┘
//! ```
//!
//! ### Lifecycle
//! ```text
//! Runtime::builder(cfg) ─► build() ─► start()
//!   log writer → scheduler → triggers → dispatcher → kernel      (start order)
//!
//! run_until_signal() / shutdown()
//!   system.shutdown.requested
//!   kernel → dispatcher → triggers → scheduler → log writer     (stop order, within grace)
//!   system.shutdown.completed
//! ```
//!
//! ## Features
//! | Area            | Description                                                    | Key types / traits                          |
//! |-----------------|----------------------------------------------------------------|---------------------------------------------|
//! | **Bus**         | Topic pub/sub with priorities, wildcards, ACLs, bounded queues | [`MessageBus`], [`Message`], [`Body`]       |
//! | **Scheduler**   | Four priority queues, deadlines, escalation, CRITICAL retries  | [`Scheduler`], [`TaskRequest`], [`Handler`] |
//! | **Triggers**    | Seven condition families, debounce, incident publication      | [`triggers::Trigger`], [`TriggerEvaluator`] |
//! | **Playbooks**   | Ordered remediation steps, trust deltas, de-duplication        | [`playbooks::Playbook`], [`Dispatcher`]     |
//! | **Kernel**      | Heartbeat tracking with bounded restarts                       | [`KernelSupervisor`], [`kernel::Restarter`] |
//! | **Errors**      | Typed errors with stable labels                                | [`TaskError`], [`RuntimeError`]             |
//! | **Config**      | One serde-friendly configuration tree                          | [`Config`]                                  |
//!
//! ## Optional features
//! - `logging` (default): exports [`LogWriter`], which renders bus traffic through `tracing`.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use healvisor::{Config, Runtime, Severity};
//! use healvisor::playbooks::{ActionKind, Playbook, Step};
//! use healvisor::triggers::{Trigger, conditions::HeartbeatFailure};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = Config::default();
//!     cfg.grace = Duration::from_secs(5);
//!
//!     let rt = Runtime::builder(cfg)
//!         .with_playbook(
//!             Playbook::new("restart_db")
//!                 .step(Step::new(ActionKind::RestartService))
//!                 .step(Step::new(ActionKind::UpdateStatus).continue_on_error()),
//!         )
//!         .with_trigger(
//!             Trigger::new("db-heartbeat", "restart_db", HeartbeatFailure::new("db", Duration::from_secs(30)))
//!                 .with_severity(Severity::Critical),
//!         )
//!         .with_component("db", Duration::from_secs(30), true)
//!         .build();
//!
//!     rt.start()?;
//!     // ... rt.run_until_signal().await? in a real process.
//!     rt.shutdown().await?;
//!     Ok(())
//! }
//! ```
pub mod bus;
mod config;
mod error;
mod incident;
pub mod kernel;
mod observers;
pub mod playbooks;
mod policies;
mod runtime;
pub mod scheduler;
pub mod triggers;

// ---- Public re-exports ----

pub use bus::{
    AclTable, Body, BusConfig, BusStats, Message, MessageBus, MessageId, OverflowPolicy, Priority,
    Subscription, TopicCallback, TopicPattern, body, topics,
};
pub use config::Config;
pub use error::{ActionError, BusError, MessageError, RuntimeError, SchedulerError, TaskError};
pub use incident::{Incident, IncidentKey, SELF_HEALING_TASK, Severity};
pub use kernel::{KernelConfig, KernelSupervisor};
pub use playbooks::{Dispatcher, DispatcherConfig};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use runtime::{LoopHandle, Runtime, RuntimeBuilder};
pub use scheduler::{
    Handler, HandlerFn, HandlerRef, Scheduler, SchedulerConfig, TaskId, TaskRecord, TaskRequest,
    TaskStatus,
};
pub use triggers::{TriggerConfig, TriggerEvaluator};

// Optional: expose the built-in bus logger.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use observers::LogWriter;
