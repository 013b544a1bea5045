//! # Declarative trigger definitions.
//!
//! [`TriggerSpec`] is the serializable form of a [`Trigger`]; a bootstrap
//! process ships a list of them in [`TriggerConfig`](super::TriggerConfig).
//!
//! ```
//! use healvisor::triggers::TriggerSpec;
//!
//! let spec: TriggerSpec = serde_json::from_value(serde_json::json!({
//!     "id": "db-heartbeat",
//!     "playbook": "restart_db",
//!     "severity": "critical",
//!     "condition": { "kind": "heartbeat_failure", "component": "db", "timeout_secs": 30 }
//! })).unwrap();
//! assert_eq!(spec.id, "db-heartbeat");
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::conditions::{
    ANOMALY_WINDOW, ApiErrorRate, Comparison, EventAnomaly, HeartbeatFailure, KpiThreshold,
    ResourceSpike, ScheduledCheck, TrustScoreDrop,
};
use super::trigger::Trigger;
use crate::incident::Severity;

/// Condition parameters, tagged by trigger kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionSpec {
    HeartbeatFailure {
        component: String,
        timeout_secs: u64,
    },
    ApiErrorRate {
        #[serde(default)]
        endpoint: Option<String>,
        threshold: usize,
        window_secs: u64,
    },
    ResourceSpike {
        resource: String,
        threshold: f64,
        sustained_secs: u64,
    },
    KpiThreshold {
        name: String,
        comparison: Comparison,
        threshold: f64,
    },
    TrustScoreDrop {
        component: String,
        floor: f64,
    },
    ScheduledCheck {
        interval_secs: u64,
    },
    EventAnomaly {
        pattern: String,
        threshold: usize,
        #[serde(default)]
        window_secs: Option<u64>,
    },
}

/// Serializable trigger definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub id: String,
    pub playbook: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Falls back to the evaluator's default debounce.
    #[serde(default)]
    pub debounce_secs: Option<u64>,
    #[serde(default)]
    pub component: Option<String>,
    pub condition: ConditionSpec,
}

fn enabled() -> bool {
    true
}

impl TriggerSpec {
    /// Instantiates the trigger.
    pub fn build(&self, default_debounce: Duration) -> Trigger {
        let id = self.id.clone();
        let playbook = self.playbook.clone();
        let mut trigger = match &self.condition {
            ConditionSpec::HeartbeatFailure {
                component,
                timeout_secs,
            } => Trigger::new(
                id,
                playbook,
                HeartbeatFailure::new(component.clone(), Duration::from_secs(*timeout_secs)),
            ),
            ConditionSpec::ApiErrorRate {
                endpoint,
                threshold,
                window_secs,
            } => {
                let mut c = ApiErrorRate::new(*threshold, Duration::from_secs(*window_secs));
                if let Some(e) = endpoint {
                    c = c.for_endpoint(e.clone());
                }
                Trigger::new(id, playbook, c)
            }
            ConditionSpec::ResourceSpike {
                resource,
                threshold,
                sustained_secs,
            } => Trigger::new(
                id,
                playbook,
                ResourceSpike::new(resource.clone(), *threshold, Duration::from_secs(*sustained_secs)),
            ),
            ConditionSpec::KpiThreshold {
                name,
                comparison,
                threshold,
            } => Trigger::new(id, playbook, KpiThreshold::new(name.clone(), *comparison, *threshold)),
            ConditionSpec::TrustScoreDrop { component, floor } => {
                Trigger::new(id, playbook, TrustScoreDrop::new(component.clone(), *floor))
            }
            ConditionSpec::ScheduledCheck { interval_secs } => Trigger::new(
                id,
                playbook,
                ScheduledCheck::new(Duration::from_secs(*interval_secs)),
            ),
            ConditionSpec::EventAnomaly {
                pattern,
                threshold,
                window_secs,
            } => Trigger::new(
                id,
                playbook,
                EventAnomaly::new(pattern, *threshold)
                    .with_window(window_secs.map(Duration::from_secs).unwrap_or(ANOMALY_WINDOW)),
            ),
        };

        trigger = trigger
            .with_severity(self.severity)
            .with_debounce(
                self.debounce_secs
                    .map(Duration::from_secs)
                    .unwrap_or(default_debounce),
            );
        if let Some(c) = &self.component {
            trigger = trigger.for_component(c.clone());
        }
        if !self.enabled {
            trigger = trigger.disabled();
        }
        trigger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triggers::TriggerKind;

    #[test]
    fn builds_with_defaults() {
        let spec: TriggerSpec = serde_json::from_value(serde_json::json!({
            "id": "api-timeouts",
            "playbook": "disable_flaky_integration",
            "condition": { "kind": "api_error_rate", "threshold": 5, "window_secs": 300 }
        }))
        .unwrap();
        let t = spec.build(Duration::from_secs(45));
        assert_eq!(t.kind(), TriggerKind::ApiErrorRate);
        assert_eq!(t.severity(), Severity::Warning);
        assert_eq!(t.debounce(), Duration::from_secs(45));
        assert!(t.is_enabled());
    }

    #[test]
    fn explicit_fields_win() {
        let spec = TriggerSpec {
            id: "nightly".into(),
            playbook: "audit".into(),
            severity: Severity::Info,
            enabled: false,
            debounce_secs: Some(0),
            component: Some("auditor".into()),
            condition: ConditionSpec::ScheduledCheck { interval_secs: 86_400 },
        };
        let t = spec.build(Duration::from_secs(60));
        assert!(t.kind().is_scheduled());
        assert_eq!(t.debounce(), Duration::ZERO);
        assert!(!t.is_enabled());
    }
}
