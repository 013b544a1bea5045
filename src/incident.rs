//! # Incidents: one record per trigger firing.
//!
//! An [`Incident`] travels on `event.incident` and inside the `context` of the
//! matching `task.enqueue`. It is never stored by this crate beyond the
//! dispatcher's bounded history.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bus::Priority;
use crate::triggers::TriggerKind;

/// `task_type` of the remediation task enqueued for every incident.
pub const SELF_HEALING_TASK: &str = "self_healing";

/// Incident severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    High,
    Critical,
}

impl Severity {
    /// Priority of the `event.incident` message (critical incidents go out at HIGH).
    pub fn bus_priority(self) -> Priority {
        match self {
            Severity::Critical => Priority::High,
            Severity::High | Severity::Warning => Priority::Normal,
            Severity::Info => Priority::Low,
        }
    }

    /// Priority of the remediation task enqueued for the incident.
    pub fn task_priority(self) -> Priority {
        match self {
            Severity::Critical => Priority::Critical,
            Severity::High => Priority::High,
            Severity::Warning => Priority::Normal,
            Severity::Info => Priority::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Warning
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one incident instance: `(trigger_id, fire_count)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IncidentKey {
    pub trigger_id: String,
    pub fire_count: u64,
}

impl fmt::Display for IncidentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.trigger_id, self.fire_count)
    }
}

/// The record of one trigger firing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub trigger_id: String,
    pub trigger_kind: TriggerKind,
    /// Playbook to run in response.
    pub playbook: String,
    pub severity: Severity,
    /// Component that owns the anomaly (receives the trust delta).
    #[serde(default)]
    pub component: Option<String>,
    /// The trigger's fire counter at the time of this firing (1-based).
    pub fire_count: u64,
    /// Human-readable firing context.
    pub detail: String,
    pub fired_at: DateTime<Utc>,
}

impl Incident {
    /// Instance identity used for de-duplication.
    pub fn key(&self) -> IncidentKey {
        IncidentKey {
            trigger_id: self.trigger_id.clone(),
            fire_count: self.fire_count,
        }
    }

    /// Component addressed by trust deltas: the owner if known, else the trigger.
    pub fn owner(&self) -> &str {
        self.component.as_deref().unwrap_or(&self.trigger_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_incidents_publish_at_high_bus_priority() {
        assert_eq!(Severity::Critical.bus_priority(), Priority::High);
        assert_eq!(Severity::Critical.task_priority(), Priority::Critical);
        assert_eq!(Severity::Info.task_priority(), Priority::Low);
    }

    #[test]
    fn key_combines_trigger_and_fire_count() {
        let incident = Incident {
            id: Uuid::new_v4(),
            trigger_id: "db-heartbeat".into(),
            trigger_kind: TriggerKind::HeartbeatFailure,
            playbook: "restart_db".into(),
            severity: Severity::Critical,
            component: None,
            fire_count: 3,
            detail: String::new(),
            fired_at: Utc::now(),
        };
        assert_eq!(incident.key().to_string(), "db-heartbeat#3");
        assert_eq!(incident.owner(), "db-heartbeat");
    }
}
