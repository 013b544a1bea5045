//! # Playbook dispatcher.
//!
//! Runs remediation playbooks for incidents, from two entry points:
//!
//! ```text
//! event.incident ── severity ≥ immediate_severity ──────────────┐
//!                                                               ├─► remediate(incident)
//! task.execute.<playbook> (one feed per registered playbook) ───┘        │
//!        (scheduled by the task scheduler)                              ├─► steps in order (timeout, panic isolation)
//!                                                                       ├─► incident.resolved | incident.failed
//!                                                                       ├─► trust.score.update (owner component)
//!                                                                       └─► task.result (scheduled path only)
//! ```
//!
//! ## Rules
//! - At most one execution runs per incident instance (`trigger_id`, `fire_count`).
//!   A scheduled task for an instance that is already running waits for that
//!   run and reports its result; a resolved instance is not run again.
//! - A failing step halts the playbook unless the step is `continue_on_error`.
//! - Failed instances are released, so a scheduler retry runs the playbook again.
//! - Only registered playbooks have a `task.execute.<name>` consumer, so the
//!   scheduler fails tasks for unknown playbooks as having no executor. Their
//!   incidents are failed on arrival regardless of severity.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::action::{Action, ActionContext, ActionRegistry};
use super::config::DispatcherConfig;
use super::playbook::{Playbook, Step, StepResult};
use super::registry::PlaybookRegistry;
use crate::bus::body::{IncidentOutcome, TaskExecute, TaskResult, TrustDelta};
use crate::bus::{Body, Message, MessageBus, Priority, Subscription, panic_info, topics};
use crate::error::{ActionError, BusError};
use crate::incident::{Incident, IncidentKey, SELF_HEALING_TASK};
use crate::runtime::LoopHandle;

/// Bus principal of the playbook dispatcher.
pub const DISPATCHER_SOURCE: &str = "dispatcher";

const TASK_FEED_CAPACITY: usize = 64;

/// One finished playbook execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRecord {
    pub incident_id: Uuid,
    pub trigger_id: String,
    pub fire_count: u64,
    pub playbook: String,
    pub success: bool,
    pub steps: Vec<StepResult>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

enum Claim {
    Running(watch::Receiver<Option<bool>>),
    Resolved,
}

#[derive(Default)]
struct Claims {
    by_key: HashMap<IncidentKey, Claim>,
    resolved: VecDeque<IncidentKey>,
}

enum Admission {
    Run(ClaimGuard),
    Running(watch::Receiver<Option<bool>>),
    Resolved,
}

/// Exclusive right to remediate one incident instance.
///
/// Dropping it without [`release`](ClaimGuard::release) frees the instance and
/// wakes waiters with a failure.
struct ClaimGuard {
    inner: Arc<Inner>,
    key: IncidentKey,
    tx: watch::Sender<Option<bool>>,
    released: bool,
}

impl ClaimGuard {
    fn release(mut self, success: bool) {
        self.released = true;
        {
            let mut claims = self.inner.claims.lock();
            if success {
                claims.by_key.insert(self.key.clone(), Claim::Resolved);
                claims.resolved.push_back(self.key.clone());
                while claims.resolved.len() > self.inner.cfg.dedup_capacity {
                    if let Some(old) = claims.resolved.pop_front() {
                        claims.by_key.remove(&old);
                    }
                }
            } else {
                claims.by_key.remove(&self.key);
            }
        }
        self.tx.send_replace(Some(success));
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.released {
            self.inner.claims.lock().by_key.remove(&self.key);
        }
    }
}

struct Inner {
    bus: MessageBus,
    cfg: DispatcherConfig,
    playbooks: RwLock<PlaybookRegistry>,
    actions: RwLock<ActionRegistry>,
    claims: Mutex<Claims>,
    history: Mutex<VecDeque<ExecutionRecord>>,
    feeds: Mutex<Option<TaskFeeds>>,
}

/// Cloneable handle to the dispatcher.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Creates a dispatcher with the configured playbooks and the default actions.
    pub fn new(bus: MessageBus, cfg: DispatcherConfig) -> Self {
        let playbooks = cfg.playbooks.iter().cloned().collect();
        Self {
            inner: Arc::new(Inner {
                bus,
                cfg,
                playbooks: RwLock::new(playbooks),
                actions: RwLock::new(ActionRegistry::with_defaults()),
                claims: Mutex::new(Claims::default()),
                history: Mutex::new(VecDeque::new()),
                feeds: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.cfg
    }

    /// Registers `playbook`, replacing (and returning) one with the same name.
    pub fn register_playbook(&self, playbook: Playbook) -> Option<Arc<Playbook>> {
        debug!(playbook = %playbook.name, steps = playbook.steps.len(), "playbook registered");
        let name = playbook.name.clone();
        let previous = self.inner.playbooks.write().register(playbook);
        if let Some(feeds) = self.inner.feeds.lock().as_mut() {
            if let Err(e) = feeds.open(&self.inner.bus, &name) {
                warn!(playbook = %name, error = %e, "task feed not opened");
            }
        }
        previous
    }

    pub fn remove_playbook(&self, name: &str) -> Option<Arc<Playbook>> {
        if let Some(feeds) = self.inner.feeds.lock().as_mut() {
            feeds.close(name);
        }
        self.inner.playbooks.write().remove(name)
    }

    pub fn playbook(&self, name: &str) -> Option<Arc<Playbook>> {
        self.inner.playbooks.read().get(name)
    }

    pub fn playbook_names(&self) -> Vec<String> {
        self.inner.playbooks.read().names()
    }

    /// Replaces the body of one action kind.
    pub fn register_action<A: Action>(&self, action: A) {
        self.inner.actions.write().register(action);
    }

    pub fn register_action_arc(&self, action: Arc<dyn Action>) {
        self.inner.actions.write().register_arc(action);
    }

    /// Finished executions, oldest first.
    pub fn history(&self) -> Vec<ExecutionRecord> {
        self.inner.history.lock().iter().cloned().collect()
    }

    /// Remediates `incident` now.
    ///
    /// Returns `None` when the instance is already running or resolved.
    pub async fn execute(&self, incident: Incident) -> Option<IncidentOutcome> {
        self.run(incident, &CancellationToken::new()).await
    }

    async fn run(&self, incident: Incident, token: &CancellationToken) -> Option<IncidentOutcome> {
        match self.admit(incident.key()) {
            Admission::Run(claim) => Some(self.remediate(incident, token, claim).await.0),
            Admission::Running(_) | Admission::Resolved => {
                debug!(incident = %incident.key(), "incident already handled");
                None
            }
        }
    }

    fn admit(&self, key: IncidentKey) -> Admission {
        let mut claims = self.inner.claims.lock();
        match claims.by_key.get(&key) {
            Some(Claim::Running(rx)) => Admission::Running(rx.clone()),
            Some(Claim::Resolved) => Admission::Resolved,
            None => {
                let (tx, rx) = watch::channel(None);
                claims.by_key.insert(key.clone(), Claim::Running(rx));
                Admission::Run(ClaimGuard {
                    inner: self.inner.clone(),
                    key,
                    tx,
                    released: false,
                })
            }
        }
    }

    /// Runs the incident's playbook and reports. The flag is false when a retry is pointless.
    async fn remediate(
        &self,
        incident: Incident,
        token: &CancellationToken,
        claim: ClaimGuard,
    ) -> (IncidentOutcome, bool) {
        let started_at = Utc::now();
        let incident = Arc::new(incident);
        let playbook = self.playbook(&incident.playbook);
        info!(
            incident = %claim.key,
            playbook = %incident.playbook,
            severity = %incident.severity,
            "remediation started"
        );

        let (steps, error, retryable) = match playbook {
            Some(pb) => {
                let (steps, error) = self.run_steps(&pb, &incident, token).await;
                (steps, error, true)
            }
            None => (
                Vec::new(),
                Some(format!("unknown playbook {}", incident.playbook)),
                false,
            ),
        };
        let outcome = IncidentOutcome {
            incident_id: incident.id,
            trigger_id: incident.trigger_id.clone(),
            playbook: incident.playbook.clone(),
            success: error.is_none(),
            steps,
            error,
        };

        self.report(&incident, &outcome);
        self.record(&incident, &outcome, started_at);
        claim.release(outcome.success);
        (outcome, retryable)
    }

    async fn run_steps(
        &self,
        playbook: &Playbook,
        incident: &Arc<Incident>,
        token: &CancellationToken,
    ) -> (Vec<StepResult>, Option<String>) {
        let mut results = Vec::with_capacity(playbook.steps.len());
        for (index, step) in playbook.steps.iter().enumerate() {
            if token.is_cancelled() {
                return (results, Some("cancelled by shutdown".to_string()));
            }
            let ctx = ActionContext {
                incident: incident.clone(),
                bus: self.inner.bus.clone(),
                cancel: token.child_token(),
                source: DISPATCHER_SOURCE,
            };
            let started = Instant::now();
            let res = self.run_step(step, &ctx).await;
            ctx.cancel.cancel();
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match res {
                Ok(()) => {
                    debug!(playbook = %playbook.name, index, action = %step.action, duration_ms, "step succeeded");
                    results.push(StepResult {
                        index,
                        action: step.action,
                        success: true,
                        error: None,
                        duration_ms,
                    });
                }
                Err(e) => {
                    warn!(
                        playbook = %playbook.name,
                        index,
                        action = %step.action,
                        reason = e.as_label(),
                        error = %e,
                        continue_on_error = step.continue_on_error,
                        "step failed"
                    );
                    results.push(StepResult {
                        index,
                        action: step.action,
                        success: false,
                        error: Some(e.to_string()),
                        duration_ms,
                    });
                    if !step.continue_on_error {
                        return (results, Some(e.to_string()));
                    }
                }
            }
        }
        (results, None)
    }

    async fn run_step(&self, step: &Step, ctx: &ActionContext) -> Result<(), ActionError> {
        let name = step.action.as_str();
        let action = self.inner.actions.read().get(step.action);
        let Some(action) = action else {
            return Err(ActionError::Unsupported {
                action: name.to_string(),
            });
        };
        let timeout = step.timeout.unwrap_or(self.inner.cfg.step_timeout);
        let fut = AssertUnwindSafe(action.execute(ctx, &step.params)).catch_unwind();

        let res = if timeout.is_zero() {
            fut.await
        } else {
            match time::timeout(timeout, fut).await {
                Ok(r) => r,
                Err(_elapsed) => {
                    return Err(ActionError::Timeout {
                        action: name.to_string(),
                        timeout,
                    });
                }
            }
        };
        res.unwrap_or_else(|panic_err| {
            Err(ActionError::Panicked {
                action: name.to_string(),
                info: panic_info(&*panic_err),
            })
        })
    }

    fn report(&self, incident: &Incident, outcome: &IncidentOutcome) {
        let bus = &self.inner.bus;
        let (topic, delta, verdict) = if outcome.success {
            info!(incident_id = %incident.id, playbook = %outcome.playbook, steps = outcome.steps.len(), "incident resolved");
            (topics::INCIDENT_RESOLVED, self.inner.cfg.success_delta, "resolved")
        } else {
            warn!(
                incident_id = %incident.id,
                playbook = %outcome.playbook,
                error = outcome.error.as_deref().unwrap_or_default(),
                "incident remediation failed"
            );
            (topics::INCIDENT_FAILED, self.inner.cfg.failure_delta, "failed")
        };

        bus.publish(
            DISPATCHER_SOURCE,
            topic,
            Body::IncidentOutcome(outcome.clone()),
            incident.severity.bus_priority(),
            Some(incident.id),
        );
        bus.publish(
            DISPATCHER_SOURCE,
            topics::TRUST_SCORE_UPDATE,
            Body::TrustDelta(TrustDelta {
                component: incident.owner().to_string(),
                delta,
                reason: format!("playbook {} {verdict}", outcome.playbook),
                incident_id: Some(incident.id),
            }),
            Priority::Normal,
            Some(incident.id),
        );
    }

    fn record(&self, incident: &Incident, outcome: &IncidentOutcome, started_at: DateTime<Utc>) {
        let mut history = self.inner.history.lock();
        history.push_back(ExecutionRecord {
            incident_id: incident.id,
            trigger_id: incident.trigger_id.clone(),
            fire_count: incident.fire_count,
            playbook: outcome.playbook.clone(),
            success: outcome.success,
            steps: outcome.steps.clone(),
            error: outcome.error.clone(),
            started_at,
            finished_at: Utc::now(),
        });
        while history.len() > self.inner.cfg.history_limit {
            history.pop_front();
        }
    }

    /// Handles one scheduled `self_healing` task and replies on `task.result`.
    async fn execute_task(&self, task: TaskExecute, token: &CancellationToken) {
        let parsed = if task.task_type == SELF_HEALING_TASK {
            serde_json::from_value::<Incident>(task.payload.clone()).map_err(|e| format!("invalid incident context: {e}"))
        } else {
            Err(format!("dispatcher cannot run {} tasks", task.task_type))
        };
        let (success, error, fatal) = match parsed {
            Err(e) => (false, Some(e), true),
            Ok(incident) => match self.admit(incident.key()) {
                Admission::Run(claim) => {
                    let (outcome, retryable) = self.remediate(incident, token, claim).await;
                    (outcome.success, outcome.error, !retryable)
                }
                Admission::Running(mut rx) => {
                    debug!(incident = %incident.key(), "waiting for running remediation");
                    let ok = matches!(rx.wait_for(Option::is_some).await.as_deref(), Ok(Some(true)));
                    let error = (!ok).then(|| "concurrent remediation failed".to_string());
                    (ok, error, false)
                }
                Admission::Resolved => (true, None, false),
            },
        };

        self.inner.bus.publish(
            DISPATCHER_SOURCE,
            topics::TASK_RESULT,
            Body::TaskResult(TaskResult {
                task_id: task.task_id,
                success,
                error,
                fatal,
            }),
            task.priority,
            Some(task.task_id),
        );
    }

    fn dispatch(&self, msg: &Message, running: &mut JoinSet<()>, token: &CancellationToken) {
        match &msg.body {
            // Incidents without a playbook fail right away; nothing would pick up their task.
            Body::Incident(incident)
                if incident.severity >= self.inner.cfg.immediate_severity
                    || self.playbook(&incident.playbook).is_none() =>
            {
                let this = self.clone();
                let incident = incident.clone();
                let token = token.clone();
                running.spawn(async move {
                    this.run(incident, &token).await;
                });
            }
            Body::TaskExecute(task) => {
                let this = self.clone();
                let task = task.clone();
                let token = token.clone();
                running.spawn(async move {
                    this.execute_task(task, &token).await;
                });
            }
            _ => {}
        }
    }

    /// Subscribes to incidents and to `task.execute.<playbook>` for every
    /// registered playbook, then spawns the dispatch loop.
    ///
    /// Playbooks registered or removed while running gain or lose their feed.
    pub fn start(&self, token: &CancellationToken) -> Result<Vec<LoopHandle>, BusError> {
        let incidents = self.inner.bus.subscribe(DISPATCHER_SOURCE, topics::EVENT_INCIDENT)?;
        let (tx, rx) = mpsc::channel(TASK_FEED_CAPACITY);
        let mut feeds = TaskFeeds {
            tx,
            token: token.child_token(),
            by_playbook: HashMap::new(),
        };
        for name in self.playbook_names() {
            if let Err(e) = feeds.open(&self.inner.bus, &name) {
                feeds.token.cancel();
                return Err(e);
            }
        }
        *self.inner.feeds.lock() = Some(feeds);
        Ok(vec![LoopHandle::spawn(
            "dispatcher",
            self.clone().serve(incidents, rx, token.clone()),
        )])
    }

    async fn serve(
        self,
        incidents: Subscription,
        mut tasks: mpsc::Receiver<Arc<Message>>,
        token: CancellationToken,
    ) {
        let mut running = JoinSet::new();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                Some(_) = running.join_next(), if !running.is_empty() => {}
                msg = incidents.recv() => match msg {
                    Some(msg) => self.dispatch(&msg, &mut running, &token),
                    None => break,
                },
                Some(msg) = tasks.recv() => self.dispatch(&msg, &mut running, &token),
            }
        }
        if let Some(feeds) = self.inner.feeds.lock().take() {
            feeds.token.cancel();
        }
        // In-flight playbooks stop at their next step boundary.
        while running.join_next().await.is_some() {}
    }
}

/// Per-playbook `task.execute.<name>` subscriptions, forwarded into the dispatch loop.
struct TaskFeeds {
    tx: mpsc::Sender<Arc<Message>>,
    token: CancellationToken,
    by_playbook: HashMap<String, CancellationToken>,
}

impl TaskFeeds {
    fn open(&mut self, bus: &MessageBus, playbook: &str) -> Result<(), BusError> {
        if self.by_playbook.contains_key(playbook) {
            return Ok(());
        }
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            warn!(playbook, "no tokio runtime; task feed not opened");
            return Ok(());
        };
        let sub = bus.subscribe(DISPATCHER_SOURCE, &topics::task_execute(playbook))?;
        let token = self.token.child_token();
        rt.spawn(forward(sub, self.tx.clone(), token.clone()));
        self.by_playbook.insert(playbook.to_string(), token);
        debug!(playbook, "task feed opened");
        Ok(())
    }

    fn close(&mut self, playbook: &str) {
        if let Some(token) = self.by_playbook.remove(playbook) {
            token.cancel();
            debug!(playbook, "task feed closed");
        }
    }
}

async fn forward(sub: Subscription, tx: mpsc::Sender<Arc<Message>>, token: CancellationToken) {
    loop {
        let msg = tokio::select! {
            _ = token.cancelled() => return,
            msg = sub.recv() => match msg {
                Some(msg) => msg,
                None => return,
            },
        };
        tokio::select! {
            _ = token.cancelled() => return,
            sent = tx.send(msg) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::bus::BusConfig;
    use crate::incident::Severity;
    use crate::playbooks::ActionKind;
    use crate::triggers::TriggerKind;

    fn incident(playbook: &str, severity: Severity) -> Incident {
        Incident {
            id: Uuid::new_v4(),
            trigger_id: "db-heartbeat".into(),
            trigger_kind: TriggerKind::HeartbeatFailure,
            playbook: playbook.into(),
            severity,
            component: Some("db".into()),
            fire_count: 1,
            detail: "no heartbeat".into(),
            fired_at: Utc::now(),
        }
    }

    fn setup() -> (MessageBus, Dispatcher) {
        let bus = MessageBus::new(BusConfig::default());
        let dispatcher = Dispatcher::new(bus.clone(), DispatcherConfig::default());
        (bus, dispatcher)
    }

    struct Failing(ActionKind);

    #[async_trait]
    impl Action for Failing {
        fn kind(&self) -> ActionKind {
            self.0
        }
        async fn execute(&self, _ctx: &ActionContext, _params: &Value) -> Result<(), ActionError> {
            Err(ActionError::failed(self.0.as_str(), "refused"))
        }
    }

    struct Counting(ActionKind, Arc<AtomicUsize>);

    #[async_trait]
    impl Action for Counting {
        fn kind(&self) -> ActionKind {
            self.0
        }
        async fn execute(&self, _ctx: &ActionContext, _params: &Value) -> Result<(), ActionError> {
            self.1.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Hanging;

    #[async_trait]
    impl Action for Hanging {
        fn kind(&self) -> ActionKind {
            ActionKind::HttpRequest
        }
        async fn execute(&self, ctx: &ActionContext, _params: &Value) -> Result<(), ActionError> {
            ctx.cancel.cancelled().await;
            Ok(())
        }
    }

    struct Panicking;

    #[async_trait]
    impl Action for Panicking {
        fn kind(&self) -> ActionKind {
            ActionKind::KillProcess
        }
        async fn execute(&self, _ctx: &ActionContext, _params: &Value) -> Result<(), ActionError> {
            panic!("segfault simulator");
        }
    }

    #[tokio::test]
    async fn successful_playbook_announces_actions_and_rewards_owner() {
        let (bus, dispatcher) = setup();
        let actions = bus.subscribe("t", "remediation.action.*").unwrap();
        let resolved = bus.subscribe("t", topics::INCIDENT_RESOLVED).unwrap();
        let trust = bus.subscribe("t", topics::TRUST_SCORE_UPDATE).unwrap();
        dispatcher.register_playbook(
            Playbook::new("restart_db")
                .step(Step::new(ActionKind::UpdateStatus))
                .step(Step::new(ActionKind::RestartService).with_params(serde_json::json!({ "service": "db" }))),
        );

        let outcome = dispatcher.execute(incident("restart_db", Severity::High)).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.steps.len(), 2);

        let first = actions.try_recv().unwrap();
        assert_eq!(first.topic, "remediation.action.update_status");
        let second = actions.try_recv().unwrap();
        match &second.body {
            Body::RemediationAction(a) => {
                assert_eq!(a.action, ActionKind::RestartService);
                assert_eq!(a.params["service"], "db");
            }
            other => panic!("unexpected body {other:?}"),
        }

        assert!(resolved.try_recv().is_some());
        match &trust.try_recv().unwrap().body {
            Body::TrustDelta(d) => {
                assert_eq!(d.component, "db");
                assert!((d.delta - 0.05).abs() < f64::EPSILON);
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[tokio::test]
    async fn failing_step_halts_unless_continue_on_error() {
        let (bus, dispatcher) = setup();
        let failed = bus.subscribe("t", topics::INCIDENT_FAILED).unwrap();
        let trust = bus.subscribe("t", topics::TRUST_SCORE_UPDATE).unwrap();
        dispatcher.register_action(Failing(ActionKind::Rollback));
        dispatcher.register_playbook(
            Playbook::new("pb")
                .step(Step::new(ActionKind::Rollback).continue_on_error())
                .step(Step::new(ActionKind::UpdateStatus))
                .step(Step::new(ActionKind::Rollback))
                .step(Step::new(ActionKind::UpdateStatus)),
        );

        let outcome = dispatcher.execute(incident("pb", Severity::Warning)).await.unwrap();
        assert!(!outcome.success);
        let flags: Vec<bool> = outcome.steps.iter().map(|s| s.success).collect();
        assert_eq!(flags, vec![false, true, false]);
        assert!(outcome.error.unwrap().contains("refused"));

        assert!(failed.try_recv().is_some());
        match &trust.try_recv().unwrap().body {
            Body::TrustDelta(d) => assert!((d.delta + 0.10).abs() < f64::EPSILON),
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_playbook_fails() {
        let (bus, dispatcher) = setup();
        let failed = bus.subscribe("t", topics::INCIDENT_FAILED).unwrap();
        let outcome = dispatcher.execute(incident("nope", Severity::Info)).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.steps.is_empty());
        assert!(failed.try_recv().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_step_times_out() {
        let (_bus, dispatcher) = setup();
        dispatcher.register_action(Hanging);
        dispatcher.register_playbook(
            Playbook::new("health_check").step(Step::new(ActionKind::HttpRequest).with_timeout(Duration::from_secs(2))),
        );
        let outcome = dispatcher.execute(incident("health_check", Severity::Warning)).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.steps[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn panicking_step_is_isolated() {
        let (_bus, dispatcher) = setup();
        dispatcher.register_action(Panicking);
        dispatcher.register_playbook(
            Playbook::new("kill")
                .step(Step::new(ActionKind::KillProcess).continue_on_error())
                .step(Step::new(ActionKind::UpdateStatus)),
        );
        let outcome = dispatcher.execute(incident("kill", Severity::Warning)).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.steps[0].error.as_deref().unwrap().contains("segfault simulator"));
    }

    #[tokio::test]
    async fn resolved_instance_runs_once_failed_instance_reruns() {
        let (_bus, dispatcher) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        dispatcher.register_action(Counting(ActionKind::RestartService, calls.clone()));
        dispatcher.register_playbook(Playbook::new("restart").step(Step::new(ActionKind::RestartService)));

        let inc = incident("restart", Severity::Critical);
        assert!(dispatcher.execute(inc.clone()).await.is_some());
        assert!(dispatcher.execute(inc).await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let failing = incident("missing", Severity::Critical);
        assert!(dispatcher.execute(failing.clone()).await.is_some());
        assert!(dispatcher.execute(failing).await.is_some());
        assert_eq!(dispatcher.history().len(), 3);
    }

    #[tokio::test]
    async fn scheduled_task_replies_and_immediate_run_is_not_repeated() {
        let (bus, dispatcher) = setup();
        let results = bus.subscribe("t", topics::TASK_RESULT).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        dispatcher.register_action(Counting(ActionKind::RestartService, calls.clone()));
        dispatcher.register_playbook(Playbook::new("restart_db").step(Step::new(ActionKind::RestartService)));

        let token = CancellationToken::new();
        let handles = dispatcher.start(&token).unwrap();

        let inc = incident("restart_db", Severity::Critical);
        bus.publish("triggers", topics::EVENT_INCIDENT, Body::Incident(inc.clone()), Priority::High, Some(inc.id));
        let task_id = Uuid::new_v4();
        bus.publish(
            "scheduler",
            &topics::task_execute("restart_db"),
            Body::TaskExecute(TaskExecute {
                task_id,
                task_type: SELF_HEALING_TASK.into(),
                handler: "restart_db".into(),
                priority: Priority::Critical,
                payload: serde_json::to_value(&inc).unwrap(),
                attempt: 1,
            }),
            Priority::Critical,
            Some(task_id),
        );

        let reply = tokio::time::timeout(Duration::from_secs(5), results.recv())
            .await
            .unwrap()
            .unwrap();
        match &reply.body {
            Body::TaskResult(r) => {
                assert_eq!(r.task_id, task_id);
                assert!(r.success);
            }
            other => panic!("unexpected body {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.history().len(), 1);

        token.cancel();
        for h in handles {
            h.handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn task_feeds_follow_registered_playbooks() {
        let (bus, dispatcher) = setup();
        dispatcher.register_playbook(Playbook::new("restart_db").step(Step::new(ActionKind::RestartService)));
        let token = CancellationToken::new();
        let handles = dispatcher.start(&token).unwrap();

        assert_eq!(bus.consumer_count(&topics::task_execute("restart_db")), 1);
        assert_eq!(bus.consumer_count(&topics::task_execute("nobody")), 0);

        dispatcher.register_playbook(Playbook::new("flush_cache").step(Step::new(ActionKind::UpdateStatus)));
        assert_eq!(bus.consumer_count(&topics::task_execute("flush_cache")), 1);

        dispatcher.remove_playbook("restart_db");
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(bus.consumer_count(&topics::task_execute("restart_db")), 0);

        token.cancel();
        for h in handles {
            h.handle.await.unwrap();
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(bus.consumer_count(&topics::task_execute("flush_cache")), 0);
    }

    #[tokio::test]
    async fn foreign_task_type_is_fatal() {
        let (bus, dispatcher) = setup();
        let results = bus.subscribe("t", topics::TASK_RESULT).unwrap();
        let task = TaskExecute {
            task_id: Uuid::new_v4(),
            task_type: "ingest".into(),
            handler: "restart_db".into(),
            priority: Priority::Normal,
            payload: Value::Null,
            attempt: 1,
        };
        dispatcher.execute_task(task, &CancellationToken::new()).await;
        match &results.try_recv().unwrap().body {
            Body::TaskResult(r) => {
                assert!(!r.success && r.fatal);
                assert!(r.error.as_deref().unwrap().contains("ingest"));
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[tokio::test]
    async fn bad_task_payload_is_fatal() {
        let (bus, dispatcher) = setup();
        let results = bus.subscribe("t", topics::TASK_RESULT).unwrap();
        let task = TaskExecute {
            task_id: Uuid::new_v4(),
            task_type: SELF_HEALING_TASK.into(),
            handler: "restart_db".into(),
            priority: Priority::Normal,
            payload: Value::Null,
            attempt: 1,
        };
        dispatcher.execute_task(task, &CancellationToken::new()).await;
        match &results.try_recv().unwrap().body {
            Body::TaskResult(r) => assert!(!r.success && r.fatal),
            other => panic!("unexpected body {other:?}"),
        }
    }
}
