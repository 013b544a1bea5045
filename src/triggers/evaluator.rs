//! # Trigger registry and evaluator.
//!
//! [`TriggerEvaluator`] owns every registered [`Trigger`], feeds them bus
//! traffic and polls them on two ticks. A firing becomes an [`Incident`] that
//! is published twice, for alerting and for scheduled remediation:
//!
//! ```text
//! bus "*" ──► feed loop ──► Trigger::observe()          (heartbeats, api errors, metrics, kpis, trust, any topic)
//!
//! fast tick (10s) ──► non-scheduled triggers ─┐
//! slow tick (1h)  ──► scheduled checks ───────┴─► Trigger::check() ── true ──► Trigger::fire() ──► Incident
//!                                                                                   │
//!                      event.incident  (severity → bus priority, correlation = incident id) ◄──┤
//!                      task.enqueue    (task_type self_healing, handler = playbook)        ◄──┘
//! ```
//!
//! ## Rules
//! - The registry lock is never held while publishing.
//! - Each firing publishes exactly one incident and one enqueue request.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::TriggerConfig;
use super::trigger::{Trigger, TriggerSnapshot};
use crate::bus::body::TaskEnqueue;
use crate::bus::{Body, Message, MessageBus, Subscription, topics};
use crate::error::BusError;
use crate::incident::{Incident, SELF_HEALING_TASK};
use crate::runtime::LoopHandle;

/// Bus principal of the trigger evaluator.
pub const TRIGGER_SOURCE: &str = "triggers";

struct Inner {
    bus: MessageBus,
    cfg: TriggerConfig,
    triggers: Mutex<BTreeMap<String, Trigger>>,
}

/// Cloneable handle to the trigger registry.
#[derive(Clone)]
pub struct TriggerEvaluator {
    inner: Arc<Inner>,
}

impl TriggerEvaluator {
    /// Creates the evaluator and registers every trigger listed in `cfg.triggers`.
    pub fn new(bus: MessageBus, cfg: TriggerConfig) -> Self {
        let triggers = cfg
            .triggers
            .iter()
            .map(|spec| (spec.id.clone(), spec.build(cfg.default_debounce)))
            .collect();
        Self {
            inner: Arc::new(Inner {
                bus,
                cfg,
                triggers: Mutex::new(triggers),
            }),
        }
    }

    /// Registers `trigger`, replacing (and returning) one with the same id.
    pub fn register(&self, trigger: Trigger) -> Option<Trigger> {
        debug!(trigger_id = trigger.id(), kind = %trigger.kind(), playbook = trigger.playbook(), "trigger registered");
        self.inner
            .triggers
            .lock()
            .insert(trigger.id().to_string(), trigger)
    }

    pub fn remove(&self, id: &str) -> Option<Trigger> {
        self.inner.triggers.lock().remove(id)
    }

    /// Enables or disables a trigger. Returns false for unknown ids.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        match self.inner.triggers.lock().get_mut(id) {
            Some(t) => {
                t.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    /// State of every trigger, ordered by id.
    pub fn snapshot(&self) -> Vec<TriggerSnapshot> {
        self.inner
            .triggers
            .lock()
            .values()
            .map(Trigger::snapshot)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.triggers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Feeds one bus message to every trigger.
    pub fn observe(&self, msg: &Message) {
        let now = Instant::now();
        for t in self.inner.triggers.lock().values_mut() {
            t.observe(msg, now);
        }
    }

    /// Polls non-scheduled triggers (`scheduled = false`) or scheduled checks
    /// (`scheduled = true`), publishing every firing. Returns the incidents.
    pub fn evaluate(&self, scheduled: bool) -> Vec<Incident> {
        let now = Instant::now();
        let incidents: Vec<Incident> = {
            let mut triggers = self.inner.triggers.lock();
            triggers
                .values_mut()
                .filter(|t| t.kind().is_scheduled() == scheduled)
                .filter_map(|t| t.check(now).then(|| t.fire(now)))
                .collect()
        };
        for incident in &incidents {
            self.publish(incident);
        }
        incidents
    }

    fn publish(&self, incident: &Incident) {
        info!(
            trigger_id = %incident.trigger_id,
            kind = %incident.trigger_kind,
            playbook = %incident.playbook,
            severity = %incident.severity,
            fire_count = incident.fire_count,
            detail = %incident.detail,
            "trigger fired"
        );
        let bus = &self.inner.bus;
        let priority = incident.severity.bus_priority();
        let alert = bus.publish(
            TRIGGER_SOURCE,
            topics::EVENT_INCIDENT,
            Body::Incident(incident.clone()),
            priority,
            Some(incident.id),
        );
        let request = TaskEnqueue {
            task_type: SELF_HEALING_TASK.to_string(),
            handler: incident.playbook.clone(),
            priority: incident.severity.task_priority(),
            context: serde_json::to_value(incident).unwrap_or_default(),
            deadline_secs: self.inner.cfg.deadline_secs(),
            interval_secs: None,
        };
        let enqueue = bus.publish(
            TRIGGER_SOURCE,
            topics::TASK_ENQUEUE,
            Body::TaskEnqueue(request),
            priority,
            Some(incident.id),
        );
        if alert.is_none() || enqueue.is_none() {
            warn!(trigger_id = %incident.trigger_id, "incident not fully published (acl?)");
        }
    }

    /// Subscribes to all traffic and spawns the feed loop and both ticks under `token`.
    pub fn start(&self, token: &CancellationToken) -> Result<Vec<LoopHandle>, BusError> {
        let feed = self.inner.bus.subscribe(TRIGGER_SOURCE, "*")?;
        let cfg = &self.inner.cfg;
        Ok(vec![
            LoopHandle::spawn("triggers.feed", self.clone().feed_loop(feed, token.clone())),
            LoopHandle::spawn(
                "triggers.fast",
                self.clone().tick_loop(cfg.fast_tick, false, token.clone()),
            ),
            LoopHandle::spawn(
                "triggers.slow",
                self.clone().tick_loop(cfg.slow_tick, true, token.clone()),
            ),
        ])
    }

    async fn feed_loop(self, sub: Subscription, token: CancellationToken) {
        loop {
            let msg = tokio::select! {
                _ = token.cancelled() => break,
                msg = sub.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            self.observe(&msg);
        }
    }

    async fn tick_loop(self, period: Duration, scheduled: bool, token: CancellationToken) {
        let mut tick = time::interval(period.max(Duration::from_millis(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => {}
            }
            self.evaluate(scheduled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::body::{ApiError, Heartbeat};
    use crate::bus::{BusConfig, Priority};
    use crate::incident::Severity;
    use crate::triggers::conditions::{ApiErrorRate, HeartbeatFailure, ScheduledCheck};
    use crate::triggers::{ConditionSpec, TriggerSpec};

    fn setup() -> (MessageBus, TriggerEvaluator) {
        let bus = MessageBus::new(BusConfig::default());
        let eval = TriggerEvaluator::new(bus.clone(), TriggerConfig::default());
        (bus, eval)
    }

    fn api_error() -> Message {
        Message::new(
            "gateway",
            topics::API_ERROR,
            Body::ApiError(ApiError {
                endpoint: "/v1/search".into(),
                status: Some(504),
                error: Some("timeout".into()),
            }),
            Priority::Normal,
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn error_rate_fires_once_and_publishes_pair() {
        let (bus, eval) = setup();
        let incidents = bus.subscribe("t", topics::EVENT_INCIDENT).unwrap();
        let enqueues = bus.subscribe("t", topics::TASK_ENQUEUE).unwrap();
        eval.register(
            Trigger::new("api-timeouts", "disable_integration", ApiErrorRate::new(5, Duration::from_secs(300)))
                .with_severity(Severity::Critical),
        );

        for _ in 0..4 {
            eval.observe(&api_error());
        }
        assert!(eval.evaluate(false).is_empty());
        eval.observe(&api_error());
        let fired = eval.evaluate(false);
        assert_eq!(fired.len(), 1);
        assert!(eval.evaluate(false).is_empty());

        let alert = incidents.try_recv().unwrap();
        assert_eq!(alert.priority, Priority::High);
        assert_eq!(alert.correlation_id, Some(fired[0].id));

        let req = enqueues.try_recv().unwrap();
        match &req.body {
            Body::TaskEnqueue(t) => {
                assert_eq!(t.task_type, SELF_HEALING_TASK);
                assert_eq!(t.handler, "disable_integration");
                assert_eq!(t.priority, Priority::Critical);
                let ctx: Incident = serde_json::from_value(t.context.clone()).unwrap();
                assert_eq!(ctx.fire_count, 1);
            }
            other => panic!("unexpected body {other:?}"),
        }
        assert!(incidents.is_empty() && enqueues.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_suppresses_refire() {
        let (_bus, eval) = setup();
        eval.register(
            Trigger::new("db", "restart_db", HeartbeatFailure::new("db", Duration::from_secs(5)))
                .with_debounce(Duration::from_secs(60)),
        );
        time::advance(Duration::from_secs(6)).await;
        assert_eq!(eval.evaluate(false).len(), 1);
        time::advance(Duration::from_secs(30)).await;
        assert!(eval.evaluate(false).is_empty());
        time::advance(Duration::from_secs(30)).await;
        assert_eq!(eval.evaluate(false).len(), 1);
        assert_eq!(eval.snapshot()[0].fire_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_checks_only_run_on_slow_tick() {
        let (_bus, eval) = setup();
        eval.register(Trigger::new("nightly", "audit", ScheduledCheck::new(Duration::from_secs(86_400))));
        assert!(eval.evaluate(false).is_empty());
        assert_eq!(eval.evaluate(true).len(), 1);
        assert!(eval.evaluate(true).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn registry_operations() {
        let bus = MessageBus::new(BusConfig::default());
        let cfg = TriggerConfig {
            triggers: vec![TriggerSpec {
                id: "kernel-a".into(),
                playbook: "restart_kernel".into(),
                severity: Severity::High,
                enabled: true,
                debounce_secs: None,
                component: None,
                condition: ConditionSpec::HeartbeatFailure {
                    component: "kernel-a".into(),
                    timeout_secs: 10,
                },
            }],
            ..TriggerConfig::default()
        };
        let eval = TriggerEvaluator::new(bus, cfg);
        assert_eq!(eval.len(), 1);

        assert!(eval.set_enabled("kernel-a", false));
        assert!(!eval.set_enabled("missing", false));
        time::advance(Duration::from_secs(11)).await;
        assert!(eval.evaluate(false).is_empty());
        assert!(!eval.snapshot()[0].enabled);

        assert!(eval.remove("kernel-a").is_some());
        assert!(eval.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn feed_loop_routes_heartbeats() {
        let (bus, eval) = setup();
        eval.register(Trigger::new("db", "restart_db", HeartbeatFailure::new("db", Duration::from_secs(20))));
        let token = CancellationToken::new();
        let _loops = eval.start(&token).unwrap();

        for _ in 0..3 {
            time::sleep(Duration::from_secs(10)).await;
            bus.publish(
                "db",
                topics::KERNEL_HEARTBEAT,
                Body::Heartbeat(Heartbeat { component: "db".into() }),
                Priority::Low,
                None,
            );
        }
        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(eval.snapshot()[0].fire_count, 0);
        token.cancel();
    }
}
