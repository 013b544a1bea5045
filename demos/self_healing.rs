//! # Example: Self-healing loop
//!
//! An API error burst fires a trigger, the incident is scheduled as CRITICAL
//! remediation work, the dispatcher runs the playbook, and the trust score
//! of the failing integration is adjusted.
//!
//! Run with: `RUST_LOG=info cargo run --example self_healing`

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use healvisor::body::{ApiError, TaskExecute};
use healvisor::playbooks::{Action, ActionContext, ActionKind, Playbook, Step};
use healvisor::triggers::Trigger;
use healvisor::triggers::conditions::ApiErrorRate;
use healvisor::{ActionError, Body, Config, HandlerFn, Priority, Runtime, Severity, TaskError, TaskRequest, topics};

/// Quarantine that "talks" to an integration gateway.
struct Quarantine;

#[async_trait]
impl Action for Quarantine {
    fn kind(&self) -> ActionKind {
        ActionKind::QuarantineIntegration
    }

    async fn execute(&self, ctx: &ActionContext, params: &Value) -> Result<(), ActionError> {
        let target = params.get("integration").and_then(Value::as_str).unwrap_or("unknown");
        println!("[quarantine] isolating {target} for incident {}", ctx.incident.id);
        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(ActionError::failed("quarantine_integration", "cancelled")),
            _ = tokio::time::sleep(Duration::from_millis(200)) => Ok(()),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut cfg = Config::default();
    cfg.grace = Duration::from_secs(5);
    cfg.scheduler.workers = 2;
    cfg.triggers.fast_tick = Duration::from_millis(250);

    let rt = Runtime::builder(cfg)
        .with_log_writer()
        .with_playbook(
            Playbook::new("disable_integration")
                .describe("isolate a failing upstream integration")
                .step(Step::new(ActionKind::QuarantineIntegration).with_params(json!({ "integration": "crm" })))
                .step(Step::new(ActionKind::UpdateStatus).continue_on_error()),
        )
        .with_action(Quarantine)
        .with_trigger(
            Trigger::new(
                "crm-timeouts",
                "disable_integration",
                ApiErrorRate::new(5, Duration::from_secs(300)).for_endpoint("/crm/sync"),
            )
            .with_severity(Severity::High)
            .for_component("crm"),
        )
        .with_handler(HandlerFn::arc("reindex", |t: TaskExecute, _ctx: CancellationToken| async move {
            println!("[reindex] task {} attempt {}", t.task_id, t.attempt);
            Ok::<(), TaskError>(())
        }))
        .build();

    rt.start()?;
    rt.scheduler()
        .enqueue_task(TaskRequest::new("maintenance", "reindex").with_priority(Priority::Low))?;

    for _ in 0..5 {
        rt.bus().publish(
            "crm-gateway",
            topics::API_ERROR,
            Body::ApiError(ApiError {
                endpoint: "/crm/sync".into(),
                status: Some(504),
                error: Some("upstream timeout".into()),
            }),
            Priority::Normal,
            None,
        );
    }

    tokio::time::sleep(Duration::from_secs(2)).await;

    for exec in rt.dispatcher().history() {
        println!(
            "[history] playbook={} success={} steps={}",
            exec.playbook,
            exec.success,
            exec.steps.len()
        );
    }
    println!("[stats] {:?}", rt.scheduler().stats());

    rt.shutdown().await?;
    Ok(())
}
