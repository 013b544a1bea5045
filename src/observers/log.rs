//! # LogWriter: bus traffic as `tracing` events.
//!
//! Subscribes to `*` and renders every message as one event whose level
//! follows the message priority (`critical` → ERROR, `high` → WARN,
//! `normal` → INFO, `low` → DEBUG).
//!
//! ## Example output
//! ```text
//! [incident] trigger=api-timeouts#1 playbook=disable_integration severity=critical
//! [task-failed] task=6f1c.. handler=restart_db status=failed retry=1 will_retry=true err="timed out after 5s"
//! [restart-initiated] component=vector-store attempt=1/3
//! [acl-violation] principal=random_service topic=system.control
//! ```

use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info, warn};

use crate::bus::{Body, Message, MessageBus, Priority, Subscription};
use crate::error::BusError;
use crate::runtime::LoopHandle;

/// Bus principal of the log writer.
pub const LOG_SOURCE: &str = "log_writer";

/// Message logger.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Level a message is logged at.
    pub fn level(priority: Priority) -> Level {
        match priority {
            Priority::Critical => Level::ERROR,
            Priority::High => Level::WARN,
            Priority::Normal => Level::INFO,
            Priority::Low => Level::DEBUG,
        }
    }

    /// One-line human-readable form of `msg`.
    pub fn render(msg: &Message) -> String {
        match &msg.body {
            Body::TaskEnqueue(t) => format!(
                "[enqueue] type={} handler={} priority={}",
                t.task_type, t.handler, t.priority.as_str()
            ),
            Body::TaskExecute(t) => format!(
                "[execute] task={} handler={} attempt={}",
                t.task_id, t.handler, t.attempt
            ),
            Body::TaskResult(r) => format!(
                "[result] task={} success={} err={:?}",
                r.task_id, r.success, r.error
            ),
            Body::TaskOutcome(o) => format!(
                "[{}] task={} handler={} status={} retry={} will_retry={} err={:?}",
                msg.topic.replace('.', "-"),
                o.task_id,
                o.handler,
                o.status.as_str(),
                o.retry_count,
                o.will_retry,
                o.error
            ),
            Body::Preemption(p) => format!(
                "[preemption] waiting_critical={} running_normal_low={}",
                p.waiting_critical, p.running_normal_low
            ),
            Body::Incident(i) => format!(
                "[incident] trigger={}#{} playbook={} severity={}",
                i.trigger_id, i.fire_count, i.playbook, i.severity
            ),
            Body::IncidentOutcome(o) => format!(
                "[{}] incident={} playbook={} steps={} err={:?}",
                if o.success { "resolved" } else { "remediation-failed" },
                o.incident_id,
                o.playbook,
                o.steps.len(),
                o.error
            ),
            Body::Heartbeat(h) => format!("[heartbeat] component={}", h.component),
            Body::KernelRestart(k) => format!(
                "[{}] component={} attempt={}/{} err={:?}",
                msg.topic.trim_start_matches("kernel.").replace('.', "-"),
                k.component,
                k.attempt,
                k.max_attempts,
                k.error
            ),
            Body::Alert(a) => format!("[alert] component={} severity={} {}", a.component, a.severity, a.message),
            Body::TrustDelta(d) => format!("[trust] component={} delta={:+.2} reason={}", d.component, d.delta, d.reason),
            Body::TrustScore(s) => format!("[trust-score] component={} score={:.2}", s.component, s.score),
            Body::ApiError(e) => format!("[api-error] endpoint={} status={:?} err={:?}", e.endpoint, e.status, e.error),
            Body::ResourceUsage(r) => format!("[resource] {}={:.1}%", r.resource, r.percent),
            Body::Kpi(k) => format!("[kpi] {}={}", k.name, k.value),
            Body::AclViolation(v) => format!("[acl-violation] principal={} topic={}", v.principal, v.topic),
            Body::DeliveryDropped(d) => format!(
                "[delivery-dropped] subscriber={} topic={} reason={}",
                d.subscriber, d.topic, d.reason
            ),
            Body::RemediationAction(a) => format!("[action] {} incident={}", a.action, a.incident_id),
            Body::Custom(v) => format!("[{}] {}", msg.topic, v),
        }
    }

    fn write(msg: &Message) {
        let line = Self::render(msg);
        let (source, topic) = (msg.source.as_str(), msg.topic.as_str());
        match Self::level(msg.priority) {
            Level::ERROR => error!(source, topic, "{line}"),
            Level::WARN => warn!(source, topic, "{line}"),
            Level::INFO => info!(source, topic, "{line}"),
            _ => debug!(source, topic, "{line}"),
        }
    }

    /// Subscribes to every topic and spawns the writer loop.
    pub fn start(&self, bus: &MessageBus, token: &CancellationToken) -> Result<Vec<LoopHandle>, BusError> {
        let sub = bus.subscribe(LOG_SOURCE, "*")?;
        Ok(vec![LoopHandle::spawn("log_writer", Self::run(sub, token.clone()))])
    }

    async fn run(sub: Subscription, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                msg = sub.recv() => match msg {
                    Some(msg) => Self::write(&msg),
                    None => break,
                },
            }
        }
        // Drain what was published before cancellation.
        while let Some(msg) = sub.try_recv() {
            Self::write(&msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::body::KernelRestart;
    use crate::bus::topics;

    #[test]
    fn renders_restart_topics_by_suffix() {
        let msg = Message::new(
            "kernel",
            topics::KERNEL_RESTART_MAX_ATTEMPTS,
            Body::KernelRestart(KernelRestart {
                component: "ocr".into(),
                attempt: 3,
                max_attempts: 3,
                critical: true,
                error: None,
            }),
            Priority::Critical,
        )
        .unwrap();
        assert_eq!(
            LogWriter::render(&msg),
            "[restart-max_attempts] component=ocr attempt=3/3 err=None"
        );
        assert_eq!(LogWriter::level(msg.priority), Level::ERROR);
    }
}
