//! Typed message bodies, one variant per wire topic family.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::message::Priority;
use crate::incident::{Incident, Severity};
use crate::playbooks::{ActionKind, StepResult};
use crate::scheduler::TaskStatus;

/// Closed set of message payloads.
///
/// Serialized adjacently tagged: `{"kind": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Body {
    TaskEnqueue(TaskEnqueue),
    TaskExecute(TaskExecute),
    TaskResult(TaskResult),
    TaskOutcome(TaskOutcome),
    Preemption(Preemption),
    Incident(Incident),
    IncidentOutcome(IncidentOutcome),
    Heartbeat(Heartbeat),
    KernelRestart(KernelRestart),
    Alert(Alert),
    TrustDelta(TrustDelta),
    TrustScore(TrustScore),
    ApiError(ApiError),
    ResourceUsage(ResourceUsage),
    Kpi(Kpi),
    AclViolation(AclViolation),
    DeliveryDropped(DeliveryDropped),
    RemediationAction(RemediationAction),
    /// Free-form payload for open (non-reserved) topics.
    Custom(Value),
}

impl Body {
    /// Wraps a JSON value for an open topic.
    pub fn custom(value: Value) -> Self {
        Body::Custom(value)
    }

    /// The serde tag of this variant; reserved topics are checked against it.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Body::TaskEnqueue(_) => "task_enqueue",
            Body::TaskExecute(_) => "task_execute",
            Body::TaskResult(_) => "task_result",
            Body::TaskOutcome(_) => "task_outcome",
            Body::Preemption(_) => "preemption",
            Body::Incident(_) => "incident",
            Body::IncidentOutcome(_) => "incident_outcome",
            Body::Heartbeat(_) => "heartbeat",
            Body::KernelRestart(_) => "kernel_restart",
            Body::Alert(_) => "alert",
            Body::TrustDelta(_) => "trust_delta",
            Body::TrustScore(_) => "trust_score",
            Body::ApiError(_) => "api_error",
            Body::ResourceUsage(_) => "resource_usage",
            Body::Kpi(_) => "kpi",
            Body::AclViolation(_) => "acl_violation",
            Body::DeliveryDropped(_) => "delivery_dropped",
            Body::RemediationAction(_) => "remediation_action",
            Body::Custom(_) => "custom",
        }
    }
}

/// `task.enqueue`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnqueue {
    pub task_type: String,
    pub handler: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub context: Value,
    /// Relative deadline in seconds from enqueue time.
    #[serde(default)]
    pub deadline_secs: Option<u64>,
    /// Recurrence interval in seconds.
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

/// `task.execute.<handler>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecute {
    pub task_id: Uuid,
    pub task_type: String,
    pub handler: String,
    pub priority: Priority,
    pub payload: Value,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// `task.result`: reply of an external executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    /// A fatal failure is never retried.
    #[serde(default)]
    pub fatal: bool,
}

/// `task.completed`, `task.failed`, `task.escalated`, `task.rejected`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: Uuid,
    pub task_type: String,
    pub handler: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub retry_count: u32,
    #[serde(default)]
    pub error: Option<String>,
    /// Set on `task.failed` when the task goes back to the critical queue.
    #[serde(default)]
    pub will_retry: bool,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

/// `task.preemption`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preemption {
    pub waiting_critical: usize,
    pub running_normal_low: usize,
}

/// `incident.resolved`, `incident.failed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentOutcome {
    pub incident_id: Uuid,
    pub trigger_id: String,
    pub playbook: String,
    pub success: bool,
    pub steps: Vec<StepResult>,
    #[serde(default)]
    pub error: Option<String>,
}

/// `kernel.heartbeat`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub component: String,
}

/// `kernel.restart.*`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelRestart {
    pub component: String,
    pub attempt: u32,
    pub max_attempts: u32,
    pub critical: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// `system.alert.*`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub component: String,
    pub severity: Severity,
    pub message: String,
}

/// `trust.score.update`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustDelta {
    pub component: String,
    pub delta: f64,
    pub reason: String,
    #[serde(default)]
    pub incident_id: Option<Uuid>,
}

/// `trust.score.report`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustScore {
    pub component: String,
    pub score: f64,
}

/// `api.error`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub endpoint: String,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub error: Option<String>,
}

/// `metrics.resource`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub resource: String,
    /// Usage in percent (0–100).
    pub percent: f64,
}

/// `kpi.update`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kpi {
    pub name: String,
    pub value: f64,
}

/// `bus.acl.violation`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AclViolation {
    pub principal: String,
    pub topic: String,
}

/// `bus.delivery.dropped`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryDropped {
    pub subscriber: String,
    pub topic: String,
    /// `"full"`, `"evicted"` or `"closed"`.
    pub reason: String,
}

/// `remediation.action.<action>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationAction {
    pub action: ActionKind,
    pub incident_id: Uuid,
    #[serde(default)]
    pub params: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_name_matches_serde_tag() {
        let body = Body::Kpi(Kpi {
            name: "latency_p99".into(),
            value: 12.5,
        });
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["kind"], body.kind_name());

        let custom = serde_json::to_value(Body::custom(Value::Null)).unwrap();
        assert_eq!(custom["kind"], "custom");
    }

    #[test]
    fn task_enqueue_defaults_optional_fields() {
        let raw = serde_json::json!({
            "kind": "task_enqueue",
            "data": { "task_type": "self_healing", "handler": "restart_db" }
        });
        let body: Body = serde_json::from_value(raw).unwrap();
        let Body::TaskEnqueue(req) = body else {
            panic!("expected task_enqueue");
        };
        assert_eq!(req.priority, Priority::Normal);
        assert!(req.deadline_secs.is_none());
    }
}
