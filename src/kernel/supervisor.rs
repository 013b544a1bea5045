//! # Kernel restart supervisor.
//!
//! Tracks the last heartbeat of every registered component and restarts the
//! silent ones, a bounded number of times:
//!
//! ```text
//! kernel.heartbeat ──► heartbeat(component) ──► last_beat = now, attempts = 0
//!
//! tick ──► age > timeout && !restarting && cooldown over
//!            ├─ attempts < max ──► kernel.restart.initiated ──► Restarter::restart()
//!            │                        ├─ Ok  ──► kernel.restart.success (fresh heartbeat window)
//!            │                        └─ Err ──► kernel.restart.failed
//!            │                                     └─ attempts == max ──► exhausted
//!            └─ attempts == max ──► exhausted
//!
//! exhausted ──► kernel.restart.max_attempts
//!           └─► system.alert.critical_component_down   (critical components only)
//! ```
//!
//! ## Rules
//! - At most one restart attempt per component per cooldown window.
//! - An exhausted component is never restarted again until it heartbeats.
//! - The component lock is never held across a restart call.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::KernelConfig;
use super::restarter::{BusRestarter, Restarter};
use crate::bus::body::{Alert, KernelRestart};
use crate::bus::{Body, MessageBus, Priority, Subscription, panic_info, topics};
use crate::error::{ActionError, BusError};
use crate::incident::Severity;
use crate::runtime::LoopHandle;

/// Bus principal of the kernel restart supervisor.
pub const KERNEL_SOURCE: &str = "kernel";

/// Supervision state of one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    Healthy,
    /// Heartbeat overdue, waiting for the cooldown to pass.
    Overdue,
    Restarting,
    /// Attempts used up; needs a human.
    Exhausted,
}

/// Snapshot of one supervised component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentStatus {
    pub component: String,
    pub critical: bool,
    pub timeout: Duration,
    pub state: ComponentState,
    pub attempts: u32,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Tracked {
    timeout: Duration,
    critical: bool,
    last_beat: Instant,
    last_beat_at: Option<DateTime<Utc>>,
    attempts: u32,
    restarting: bool,
    exhausted: bool,
    next_attempt: Option<Instant>,
}

impl Tracked {
    fn new(timeout: Duration, critical: bool, now: Instant) -> Self {
        Self {
            timeout,
            critical,
            last_beat: now,
            last_beat_at: None,
            attempts: 0,
            restarting: false,
            exhausted: false,
            next_attempt: None,
        }
    }

    fn is_silent(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_beat) > self.timeout
    }

    fn cooldown_over(&self, now: Instant) -> bool {
        self.next_attempt.is_none_or(|at| now >= at)
    }

    fn state(&self, now: Instant) -> ComponentState {
        if self.exhausted {
            ComponentState::Exhausted
        } else if self.restarting {
            ComponentState::Restarting
        } else if self.is_silent(now) {
            ComponentState::Overdue
        } else {
            ComponentState::Healthy
        }
    }
}

enum Due {
    Restart(KernelRestart),
    Exhausted(KernelRestart),
}

struct Inner {
    bus: MessageBus,
    cfg: KernelConfig,
    restarter: RwLock<Arc<dyn Restarter>>,
    components: Mutex<BTreeMap<String, Tracked>>,
}

/// Cloneable handle to the restart supervisor.
#[derive(Clone)]
pub struct KernelSupervisor {
    inner: Arc<Inner>,
}

impl KernelSupervisor {
    /// Creates the supervisor with a [`BusRestarter`] and the configured components.
    pub fn new(bus: MessageBus, cfg: KernelConfig) -> Self {
        let now = Instant::now();
        let components = cfg
            .components
            .iter()
            .map(|spec| {
                let timeout = spec.timeout.unwrap_or(cfg.default_timeout);
                (spec.name.clone(), Tracked::new(timeout, spec.critical, now))
            })
            .collect();
        let restarter: Arc<dyn Restarter> = Arc::new(BusRestarter::new(bus.clone(), KERNEL_SOURCE));
        Self {
            inner: Arc::new(Inner {
                bus,
                cfg,
                restarter: RwLock::new(restarter),
                components: Mutex::new(components),
            }),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.inner.cfg
    }

    /// Replaces the restart implementation.
    pub fn set_restarter<R: Restarter>(&self, restarter: R) {
        self.set_restarter_arc(Arc::new(restarter));
    }

    pub fn set_restarter_arc(&self, restarter: Arc<dyn Restarter>) {
        *self.inner.restarter.write() = restarter;
    }

    /// Starts supervising `component`. Its first heartbeat window opens now.
    pub fn register(&self, component: impl Into<String>, timeout: Duration, critical: bool) {
        let component = component.into();
        debug!(%component, ?timeout, critical, "component registered");
        self.inner
            .components
            .lock()
            .insert(component, Tracked::new(timeout, critical, Instant::now()));
    }

    pub fn deregister(&self, component: &str) -> bool {
        self.inner.components.lock().remove(component).is_some()
    }

    /// Records a heartbeat. Resets the attempt counter and clears exhaustion.
    pub fn heartbeat(&self, component: &str) {
        let now = Instant::now();
        let mut components = self.inner.components.lock();
        if !components.contains_key(component) {
            if !self.inner.cfg.auto_register {
                return;
            }
            debug!(component, "component registered by heartbeat");
            let tracked = Tracked::new(self.inner.cfg.default_timeout, false, now);
            components.insert(component.to_string(), tracked);
        }
        let Some(tracked) = components.get_mut(component) else {
            return;
        };
        if tracked.exhausted || tracked.attempts > 0 {
            info!(component, attempts = tracked.attempts, "component recovered");
        }
        tracked.last_beat = now;
        tracked.last_beat_at = Some(Utc::now());
        tracked.attempts = 0;
        tracked.exhausted = false;
        tracked.next_attempt = None;
    }

    /// Supervision state of every component, by name.
    pub fn status(&self) -> Vec<ComponentStatus> {
        let now = Instant::now();
        self.inner
            .components
            .lock()
            .iter()
            .map(|(name, t)| ComponentStatus {
                component: name.clone(),
                critical: t.critical,
                timeout: t.timeout,
                state: t.state(now),
                attempts: t.attempts,
                last_heartbeat: t.last_beat_at,
            })
            .collect()
    }

    /// Checks heartbeat ages and runs the restart attempts that are due.
    ///
    /// Returns the components a restart was attempted for.
    pub async fn tick(&self, token: &CancellationToken) -> Vec<String> {
        let due = self.collect_due(Instant::now());
        let mut attempts = Vec::new();
        for item in due {
            match item {
                Due::Exhausted(req) => self.report_exhausted(&req),
                Due::Restart(req) => attempts.push(req),
            }
        }

        let restarted = attempts.iter().map(|r| r.component.clone()).collect();
        join_all(attempts.into_iter().map(|req| self.attempt(req, token))).await;
        restarted
    }

    fn collect_due(&self, now: Instant) -> Vec<Due> {
        let limit = self.inner.cfg.attempt_limit();
        let mut components = self.inner.components.lock();
        let mut due = Vec::new();
        for (name, t) in components.iter_mut() {
            if t.restarting || t.exhausted || !t.is_silent(now) || !t.cooldown_over(now) {
                continue;
            }
            let mut req = KernelRestart {
                component: name.clone(),
                attempt: t.attempts,
                max_attempts: limit,
                critical: t.critical,
                error: None,
            };
            if t.attempts >= limit {
                t.exhausted = true;
                req.error = Some("component still silent after last restart".to_string());
                due.push(Due::Exhausted(req));
            } else {
                t.attempts += 1;
                t.restarting = true;
                req.attempt = t.attempts;
                due.push(Due::Restart(req));
            }
        }
        due
    }

    async fn attempt(&self, mut req: KernelRestart, token: &CancellationToken) {
        warn!(component = %req.component, attempt = req.attempt, max_attempts = req.max_attempts, "restarting silent component");
        self.publish(topics::KERNEL_RESTART_INITIATED, &req, Priority::High);

        let res = self.call_restarter(&req, token).await;

        let now = Instant::now();
        let exhausted = {
            let mut components = self.inner.components.lock();
            let Some(t) = components.get_mut(&req.component) else {
                return;
            };
            t.restarting = false;
            t.next_attempt = Some(now + self.inner.cfg.cooldown.next(req.attempt.saturating_sub(1)));
            match &res {
                Ok(()) => {
                    t.last_beat = now;
                    false
                }
                Err(_) => {
                    t.exhausted = t.attempts >= req.max_attempts;
                    t.exhausted
                }
            }
        };

        match res {
            Ok(()) => {
                info!(component = %req.component, attempt = req.attempt, "component restarted");
                self.publish(topics::KERNEL_RESTART_SUCCESS, &req, Priority::Normal);
            }
            Err(e) => {
                error!(component = %req.component, attempt = req.attempt, reason = e.as_label(), error = %e, "restart failed");
                req.error = Some(e.to_string());
                self.publish(topics::KERNEL_RESTART_FAILED, &req, Priority::High);
                if exhausted {
                    self.report_exhausted(&req);
                }
            }
        }
    }

    async fn call_restarter(&self, req: &KernelRestart, token: &CancellationToken) -> Result<(), ActionError> {
        let restarter = self.inner.restarter.read().clone();
        let child = token.child_token();
        let fut = AssertUnwindSafe(restarter.restart(req, child.clone())).catch_unwind();
        let limit = self.inner.cfg.restart_timeout;

        let res = if limit.is_zero() {
            fut.await
        } else {
            match time::timeout(limit, fut).await {
                Ok(r) => r,
                Err(_elapsed) => {
                    child.cancel();
                    return Err(ActionError::Timeout {
                        action: req.component.clone(),
                        timeout: limit,
                    });
                }
            }
        };
        res.unwrap_or_else(|panic_err| {
            Err(ActionError::Panicked {
                action: req.component.clone(),
                info: panic_info(&*panic_err),
            })
        })
    }

    fn report_exhausted(&self, req: &KernelRestart) {
        error!(component = %req.component, attempts = req.max_attempts, critical = req.critical, "restart attempts exhausted; manual intervention required");
        self.publish(topics::KERNEL_RESTART_MAX_ATTEMPTS, req, Priority::Critical);
        if req.critical {
            self.inner.bus.publish(
                KERNEL_SOURCE,
                topics::SYSTEM_ALERT_CRITICAL_DOWN,
                Body::Alert(Alert {
                    component: req.component.clone(),
                    severity: Severity::Critical,
                    message: format!(
                        "critical component {} down after {} restart attempts",
                        req.component, req.max_attempts
                    ),
                }),
                Priority::Critical,
                None,
            );
        }
    }

    fn publish(&self, topic: &str, req: &KernelRestart, priority: Priority) {
        self.inner
            .bus
            .publish(KERNEL_SOURCE, topic, Body::KernelRestart(req.clone()), priority, None);
    }

    /// Subscribes to heartbeats and spawns the feed and tick loops.
    pub fn start(&self, token: &CancellationToken) -> Result<Vec<LoopHandle>, BusError> {
        let beats = self.inner.bus.subscribe(KERNEL_SOURCE, topics::KERNEL_HEARTBEAT)?;
        Ok(vec![
            LoopHandle::spawn("kernel.heartbeats", self.clone().heartbeat_loop(beats, token.clone())),
            LoopHandle::spawn("kernel.tick", self.clone().tick_loop(token.clone())),
        ])
    }

    async fn heartbeat_loop(self, sub: Subscription, token: CancellationToken) {
        loop {
            let msg = tokio::select! {
                _ = token.cancelled() => break,
                msg = sub.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            if let Body::Heartbeat(beat) = &msg.body {
                self.heartbeat(&beat.component);
            }
        }
    }

    async fn tick_loop(self, token: CancellationToken) {
        let mut tick = time::interval(self.inner.cfg.tick.max(Duration::from_millis(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => {}
            }
            self.tick(&token).await;
        }
    }
}
