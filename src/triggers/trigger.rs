//! # Triggers: a condition plus firing bookkeeping.
//!
//! A [`Trigger`] wraps a type-specific [`Condition`] with the metadata every
//! trigger shares (target playbook, severity, enabled flag, fire counter,
//! debounce window). The evaluator only ever talks to [`Trigger`].
//!
//! ## Rules
//! - A disabled trigger never fires.
//! - A trigger never fires twice within its debounce window; the condition is
//!   not even consulted while the window is open.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::bus::Message;
use crate::incident::{Incident, Severity};

/// Trigger family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    HeartbeatFailure,
    ApiErrorRate,
    ResourceSpike,
    KpiThreshold,
    TrustScoreDrop,
    ScheduledCheck,
    EventAnomaly,
}

impl TriggerKind {
    /// Scheduled triggers are polled on the slow tick, all others on the fast tick.
    pub fn is_scheduled(self) -> bool {
        matches!(self, TriggerKind::ScheduledCheck)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::HeartbeatFailure => "heartbeat_failure",
            TriggerKind::ApiErrorRate => "api_error_rate",
            TriggerKind::ResourceSpike => "resource_spike",
            TriggerKind::KpiThreshold => "kpi_threshold",
            TriggerKind::TrustScoreDrop => "trust_score_drop",
            TriggerKind::ScheduledCheck => "scheduled_check",
            TriggerKind::EventAnomaly => "event_anomaly",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// # Type-specific trigger state.
///
/// `observe` is fed every bus message the evaluator sees; `check` is polled on
/// the evaluator's tick and returns true when the trigger should fire. A
/// condition resets whatever state must not cause an immediate second firing
/// (window cleared, spike timer re-armed) inside `check`.
pub trait Condition: Send + Sync + fmt::Debug + 'static {
    fn kind(&self) -> TriggerKind;

    /// Updates internal state from a bus message. Unrelated messages are ignored.
    fn observe(&mut self, _msg: &Message, _now: Instant) {}

    /// Evaluates the condition.
    fn check(&mut self, now: Instant) -> bool;

    /// Human-readable firing context, recorded on the incident.
    fn describe(&self) -> String;

    /// Component that owns the watched signal, if any.
    fn component(&self) -> Option<&str> {
        None
    }
}

/// Registry-visible state of one trigger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerSnapshot {
    pub id: String,
    pub kind: TriggerKind,
    pub playbook: String,
    pub severity: Severity,
    pub enabled: bool,
    pub fire_count: u64,
    pub last_fired: Option<DateTime<Utc>>,
}

/// A registered trigger.
#[derive(Debug)]
pub struct Trigger {
    id: String,
    playbook: String,
    severity: Severity,
    enabled: bool,
    debounce: Duration,
    component: Option<String>,
    fire_count: u64,
    last_fired: Option<Instant>,
    last_fired_at: Option<DateTime<Utc>>,
    condition: Box<dyn Condition>,
}

impl Trigger {
    /// Creates an enabled trigger with severity WARNING and a 60s debounce.
    pub fn new(id: impl Into<String>, playbook: impl Into<String>, condition: impl Condition) -> Self {
        Self {
            id: id.into(),
            playbook: playbook.into(),
            severity: Severity::Warning,
            enabled: true,
            debounce: Duration::from_secs(60),
            component: None,
            fire_count: 0,
            last_fired: None,
            last_fired_at: None,
            condition: Box::new(condition),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Overrides the component that receives trust deltas for this trigger's incidents.
    pub fn for_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TriggerKind {
        self.condition.kind()
    }

    pub fn playbook(&self) -> &str {
        &self.playbook
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn fire_count(&self) -> u64 {
        self.fire_count
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn observe(&mut self, msg: &Message, now: Instant) {
        self.condition.observe(msg, now);
    }

    /// True while the debounce window of the last firing is open.
    pub fn is_debounced(&self, now: Instant) -> bool {
        self.last_fired
            .is_some_and(|at| now.saturating_duration_since(at) < self.debounce)
    }

    /// Evaluates the trigger. Returns true if it should fire now.
    pub fn check(&mut self, now: Instant) -> bool {
        self.enabled && !self.is_debounced(now) && self.condition.check(now)
    }

    /// Records a firing and builds its incident.
    pub(crate) fn fire(&mut self, now: Instant) -> Incident {
        self.fire_count += 1;
        self.last_fired = Some(now);
        let fired_at = Utc::now();
        self.last_fired_at = Some(fired_at);
        Incident {
            id: Uuid::new_v4(),
            trigger_id: self.id.clone(),
            trigger_kind: self.kind(),
            playbook: self.playbook.clone(),
            severity: self.severity,
            component: self
                .component
                .clone()
                .or_else(|| self.condition.component().map(str::to_string)),
            fire_count: self.fire_count,
            detail: self.condition.describe(),
            fired_at,
        }
    }

    pub fn snapshot(&self) -> TriggerSnapshot {
        TriggerSnapshot {
            id: self.id.clone(),
            kind: self.kind(),
            playbook: self.playbook.clone(),
            severity: self.severity,
            enabled: self.enabled,
            fire_count: self.fire_count,
            last_fired: self.last_fired_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Always;

    impl Condition for Always {
        fn kind(&self) -> TriggerKind {
            TriggerKind::KpiThreshold
        }
        fn check(&mut self, _now: Instant) -> bool {
            true
        }
        fn describe(&self) -> String {
            "always".into()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_blocks_refire_within_window() {
        let mut t = Trigger::new("t", "pb", Always).with_debounce(Duration::from_secs(60));
        let start = Instant::now();
        assert!(t.check(start));
        let incident = t.fire(start);
        assert_eq!(incident.fire_count, 1);
        assert_eq!(incident.detail, "always");

        assert!(!t.check(start + Duration::from_secs(59)));
        assert!(t.check(start + Duration::from_secs(60)));
    }

    #[test]
    fn disabled_trigger_never_fires() {
        let mut t = Trigger::new("t", "pb", Always).disabled();
        assert!(!t.check(Instant::now()));
        t.set_enabled(true);
        assert!(t.check(Instant::now()));
    }

    #[test]
    fn snapshot_reflects_firings() {
        let mut t = Trigger::new("t", "pb", Always).with_severity(Severity::High);
        t.fire(Instant::now());
        let snap = t.snapshot();
        assert_eq!(snap.fire_count, 1);
        assert_eq!(snap.severity, Severity::High);
        assert!(snap.last_fired.is_some());
    }
}
