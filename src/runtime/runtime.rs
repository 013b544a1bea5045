//! # Runtime: process-lifetime context for all components.
//!
//! [`Runtime`] owns one instance of each component, all sharing one
//! [`MessageBus`], and drives their lifecycle:
//!
//! ```text
//! start():     log writer → scheduler → triggers → dispatcher → kernel
//!              (each component gets a child token of the runtime token)
//!
//! shutdown():  system.shutdown.requested
//!              scheduler.close()                       (no new work)
//!              kernel → dispatcher → triggers → scheduler → log writer
//!                 └─ cancel component token, join its loops until the grace deadline
//!                    (loops still running at the deadline are aborted and reported)
//!              system.shutdown.completed
//! ```
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use healvisor::{Config, HandlerFn, Runtime, TaskRequest};
//! use healvisor::body::TaskExecute;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = Config::default();
//!     cfg.grace = Duration::from_secs(5);
//!
//!     let rt = Runtime::builder(cfg)
//!         .with_handler(HandlerFn::arc("reindex", |_t: TaskExecute, _ctx: CancellationToken| async move {
//!             Ok::<(), healvisor::TaskError>(())
//!         }))
//!         .build();
//!     rt.start()?;
//!
//!     let id = rt.scheduler().enqueue_task(TaskRequest::new("maintenance", "reindex"))?;
//!     for _ in 0..100 {
//!         if rt.scheduler().get_task(id).is_some_and(|t| t.status.is_terminal()) {
//!             break;
//!         }
//!         tokio::time::sleep(Duration::from_millis(10)).await;
//!     }
//!
//!     rt.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::json;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::builder::RuntimeBuilder;
use super::handle::LoopHandle;
use super::shutdown;
use crate::bus::{Body, MessageBus, Priority, topics};
use crate::config::Config;
use crate::error::{BusError, RuntimeError};
use crate::kernel::KernelSupervisor;
use crate::playbooks::Dispatcher;
use crate::scheduler::Scheduler;
use crate::triggers::TriggerEvaluator;

/// Bus principal of the runtime itself.
pub const RUNTIME_SOURCE: &str = "runtime";

/// Loops of one component, stopped together.
struct Group {
    component: &'static str,
    token: CancellationToken,
    loops: Vec<LoopHandle>,
}

/// Process-lifetime context: the bus plus one instance of every component.
pub struct Runtime {
    cfg: Config,
    bus: MessageBus,
    scheduler: Scheduler,
    triggers: TriggerEvaluator,
    dispatcher: Dispatcher,
    kernel: KernelSupervisor,
    #[cfg(feature = "logging")]
    pub(super) log_writer: Option<crate::observers::LogWriter>,

    token: CancellationToken,
    groups: Mutex<Vec<Group>>,
    started: AtomicBool,
}

impl Runtime {
    /// Returns a builder for a runtime with `cfg`.
    pub fn builder(cfg: Config) -> RuntimeBuilder {
        RuntimeBuilder::new(cfg)
    }

    pub(super) fn new_internal(cfg: Config) -> Self {
        let bus = MessageBus::new(cfg.bus.clone());
        Self {
            scheduler: Scheduler::new(bus.clone(), cfg.scheduler.clone()),
            triggers: TriggerEvaluator::new(bus.clone(), cfg.triggers.clone()),
            dispatcher: Dispatcher::new(bus.clone(), cfg.dispatcher.clone()),
            kernel: KernelSupervisor::new(bus.clone(), cfg.kernel.clone()),
            #[cfg(feature = "logging")]
            log_writer: None,
            bus,
            cfg,
            token: CancellationToken::new(),
            groups: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn triggers(&self) -> &TriggerEvaluator {
        &self.triggers
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn kernel(&self) -> &KernelSupervisor {
        &self.kernel
    }

    /// Names of the running loops, in start order.
    pub fn loop_names(&self) -> Vec<String> {
        self.groups
            .lock()
            .iter()
            .flat_map(|g| g.loops.iter().map(|l| l.name.clone()))
            .collect()
    }

    /// Spawns every component loop. Must be called inside a tokio runtime.
    ///
    /// A failed start cancels whatever was already spawned.
    pub fn start(&self) -> Result<(), RuntimeError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::AlreadyStarted);
        }
        let mut groups = Vec::new();
        let res = self.spawn_all(&mut groups);
        let loops: usize = groups.iter().map(|g| g.loops.len()).sum();
        *self.groups.lock() = groups;

        if let Err(e) = res {
            error!(error = %e, "runtime start failed");
            self.token.cancel();
            return Err(e.into());
        }
        info!(loops, "runtime started");
        Ok(())
    }

    fn spawn_all(&self, groups: &mut Vec<Group>) -> Result<(), BusError> {
        #[cfg(feature = "logging")]
        if let Some(writer) = &self.log_writer {
            let token = self.token.child_token();
            let loops = writer.start(&self.bus, &token)?;
            groups.push(Group { component: "log_writer", token, loops });
        }

        let token = self.token.child_token();
        let loops = self.scheduler.start(&token)?;
        groups.push(Group { component: "scheduler", token, loops });

        let token = self.token.child_token();
        let loops = self.triggers.start(&token)?;
        groups.push(Group { component: "triggers", token, loops });

        let token = self.token.child_token();
        let loops = self.dispatcher.start(&token)?;
        groups.push(Group { component: "dispatcher", token, loops });

        let token = self.token.child_token();
        let loops = self.kernel.start(&token)?;
        groups.push(Group { component: "kernel", token, loops });
        Ok(())
    }

    /// Stops all components in reverse start order within [`Config::grace`].
    ///
    /// Returns [`RuntimeError::GraceExceeded`] naming the loops that had to be aborted.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let grace = self.cfg.grace;
        let groups = std::mem::take(&mut *self.groups.lock());
        info!(?grace, "shutdown requested");
        self.bus.publish(
            RUNTIME_SOURCE,
            topics::SYSTEM_SHUTDOWN_REQUESTED,
            Body::custom(json!({ "grace_ms": grace.as_millis() as u64 })),
            Priority::Critical,
            None,
        );
        self.scheduler.close();

        let deadline = Instant::now() + grace;
        let mut stuck = Vec::new();
        for group in groups.into_iter().rev() {
            group.token.cancel();
            for mut lh in group.loops {
                match time::timeout_at(deadline, &mut lh.handle).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) if e.is_panic() => error!(name = %lh.name, "loop panicked"),
                    Ok(Err(_)) => {}
                    Err(_elapsed) => {
                        lh.handle.abort();
                        stuck.push(lh.name);
                    }
                }
            }
            debug!(component = group.component, "component stopped");
        }
        self.token.cancel();

        self.bus.publish(
            RUNTIME_SOURCE,
            topics::SYSTEM_SHUTDOWN_COMPLETED,
            Body::custom(json!({ "stuck": stuck })),
            Priority::Critical,
            None,
        );
        if stuck.is_empty() {
            info!("all loops stopped within grace");
            Ok(())
        } else {
            warn!(?stuck, "grace exceeded; loops aborted");
            Err(RuntimeError::GraceExceeded { grace, stuck })
        }
    }

    /// Starts (if needed), waits for SIGINT/SIGTERM/SIGQUIT (Ctrl-C elsewhere), then shuts down.
    pub async fn run_until_signal(&self) -> Result<(), RuntimeError> {
        match self.start() {
            Ok(()) | Err(RuntimeError::AlreadyStarted) => {}
            Err(e) => return Err(e),
        }
        shutdown::wait_for_shutdown_signal().await?;
        self.shutdown().await
    }
}
