//! Wire topics shared with external collaborators.
//!
//! Reserved topics accept a single [`Body`](super::Body) variant
//! (see [`required_body`]); every other topic is open and takes
//! [`Body::Custom`](super::Body::Custom) or any typed body.

/// Request to schedule work: `{task_type, handler, priority, context}`.
pub const TASK_ENQUEUE: &str = "task.enqueue";
/// Prefix of scheduler dispatches; the handler name is appended.
pub const TASK_EXECUTE_PREFIX: &str = "task.execute";
/// Reply from an external executor, correlated by task id.
pub const TASK_RESULT: &str = "task.result";
/// Task finished successfully.
pub const TASK_COMPLETED: &str = "task.completed";
/// Task attempt failed (terminal or followed by a retry).
pub const TASK_FAILED: &str = "task.failed";
/// Overdue task promoted to CRITICAL.
pub const TASK_ESCALATED: &str = "task.escalated";
/// Enqueue refused because the priority queue is full.
pub const TASK_REJECTED: &str = "task.rejected";
/// CRITICAL work waits while normal/low work occupies workers.
pub const TASK_PREEMPTION: &str = "task.preemption";

/// Trigger fired.
pub const EVENT_INCIDENT: &str = "event.incident";
/// Playbook ran to completion.
pub const INCIDENT_RESOLVED: &str = "incident.resolved";
/// Playbook halted, was unknown, or panicked.
pub const INCIDENT_FAILED: &str = "incident.failed";

/// Liveness signal from a kernel/component.
pub const KERNEL_HEARTBEAT: &str = "kernel.heartbeat";
/// Default restarter asks an external owner to restart a component.
pub const KERNEL_RESTART_REQUEST: &str = "kernel.restart.request";
pub const KERNEL_RESTART_INITIATED: &str = "kernel.restart.initiated";
pub const KERNEL_RESTART_SUCCESS: &str = "kernel.restart.success";
pub const KERNEL_RESTART_FAILED: &str = "kernel.restart.failed";
pub const KERNEL_RESTART_MAX_ATTEMPTS: &str = "kernel.restart.max_attempts";
/// A critical component exhausted its restarts; a human is required.
pub const SYSTEM_ALERT_CRITICAL_DOWN: &str = "system.alert.critical_component_down";

/// Trust delta addressed to the external trust store.
pub const TRUST_SCORE_UPDATE: &str = "trust.score.update";
/// Absolute score reported by the external trust store.
pub const TRUST_SCORE_REPORT: &str = "trust.score.report";

/// API error observation (feeds error-rate triggers).
pub const API_ERROR: &str = "api.error";
/// Resource usage sample (feeds resource-spike triggers).
pub const METRICS_RESOURCE: &str = "metrics.resource";
/// KPI value push (feeds KPI triggers).
pub const KPI_UPDATE: &str = "kpi.update";

/// Prefix of default remediation action announcements; the action name is appended.
pub const REMEDIATION_ACTION_PREFIX: &str = "remediation.action";

/// Publish denied by the ACL table.
pub const BUS_ACL_VIOLATION: &str = "bus.acl.violation";
/// Message dropped for one subscriber because its queue overflowed or closed.
pub const BUS_DELIVERY_DROPPED: &str = "bus.delivery.dropped";

pub const SYSTEM_SHUTDOWN_REQUESTED: &str = "system.shutdown.requested";
pub const SYSTEM_SHUTDOWN_COMPLETED: &str = "system.shutdown.completed";

/// `task.execute.<handler>`.
pub fn task_execute(handler: &str) -> String {
    format!("{TASK_EXECUTE_PREFIX}.{handler}")
}

/// `remediation.action.<action>`.
pub fn remediation_action(action: &str) -> String {
    format!("{REMEDIATION_ACTION_PREFIX}.{action}")
}

/// A concrete topic is non-empty, has no empty segments and no wildcard.
pub fn is_valid_topic(topic: &str) -> bool {
    !topic.is_empty() && topic.split('.').all(|seg| !seg.is_empty() && seg != "*")
}

/// Body variant required by a reserved topic, `None` for open topics.
pub fn required_body(topic: &str) -> Option<&'static str> {
    let kind = match topic {
        TASK_ENQUEUE => "task_enqueue",
        TASK_RESULT => "task_result",
        TASK_COMPLETED | TASK_FAILED | TASK_ESCALATED | TASK_REJECTED => "task_outcome",
        TASK_PREEMPTION => "preemption",
        EVENT_INCIDENT => "incident",
        INCIDENT_RESOLVED | INCIDENT_FAILED => "incident_outcome",
        KERNEL_HEARTBEAT => "heartbeat",
        KERNEL_RESTART_REQUEST
        | KERNEL_RESTART_INITIATED
        | KERNEL_RESTART_SUCCESS
        | KERNEL_RESTART_FAILED
        | KERNEL_RESTART_MAX_ATTEMPTS => "kernel_restart",
        SYSTEM_ALERT_CRITICAL_DOWN => "alert",
        TRUST_SCORE_UPDATE => "trust_delta",
        TRUST_SCORE_REPORT => "trust_score",
        API_ERROR => "api_error",
        METRICS_RESOURCE => "resource_usage",
        KPI_UPDATE => "kpi",
        BUS_ACL_VIOLATION => "acl_violation",
        BUS_DELIVERY_DROPPED => "delivery_dropped",
        _ if is_under(topic, TASK_EXECUTE_PREFIX) => "task_execute",
        _ if is_under(topic, REMEDIATION_ACTION_PREFIX) => "remediation_action",
        _ => return None,
    };
    Some(kind)
}

fn is_under(topic: &str, prefix: &str) -> bool {
    topic
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with('.') && rest.len() > 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_topics_are_reserved() {
        assert_eq!(task_execute("restart_db"), "task.execute.restart_db");
        assert_eq!(required_body("task.execute.restart_db"), Some("task_execute"));
        assert_eq!(required_body("task.executed"), None);
        assert_eq!(required_body("system.control"), None);
    }
}
