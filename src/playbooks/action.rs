//! # Remediation actions.
//!
//! An [`Action`] is the body of one [`ActionKind`]. Concrete bodies (how a
//! service is actually restarted) live outside this crate; the registry built
//! by [`ActionRegistry::with_defaults`] announces every action on
//! `remediation.action.<kind>` and reports success, so an external executor
//! can pick it up.
//!
//! ```
//! use async_trait::async_trait;
//! use serde_json::Value;
//! use healvisor::ActionError;
//! use healvisor::playbooks::{Action, ActionContext, ActionKind, ActionRegistry};
//!
//! struct Rollback;
//!
//! #[async_trait]
//! impl Action for Rollback {
//!     fn kind(&self) -> ActionKind { ActionKind::Rollback }
//!
//!     async fn execute(&self, _ctx: &ActionContext, params: &Value) -> Result<(), ActionError> {
//!         match params.get("release") {
//!             Some(_) => Ok(()),
//!             None => Err(ActionError::failed("rollback", "missing release")),
//!         }
//!     }
//! }
//!
//! let mut actions = ActionRegistry::with_defaults();
//! actions.register(Rollback);
//! assert!(actions.get(ActionKind::Rollback).is_some());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::playbook::ActionKind;
use crate::bus::body::RemediationAction;
use crate::bus::{Body, MessageBus, topics};
use crate::error::ActionError;
use crate::incident::Incident;

/// What an action may use while it runs.
#[derive(Clone)]
pub struct ActionContext {
    /// Incident being remediated.
    pub incident: Arc<Incident>,
    pub bus: MessageBus,
    /// Cancelled on runtime shutdown or when the step times out.
    pub cancel: CancellationToken,
    /// Bus principal to publish as.
    pub source: &'static str,
}

/// Body of one remediation action.
#[async_trait]
pub trait Action: Send + Sync + 'static {
    fn kind(&self) -> ActionKind;

    async fn execute(&self, ctx: &ActionContext, params: &Value) -> Result<(), ActionError>;
}

/// Default action: publishes `remediation.action.<kind>` and succeeds.
#[derive(Debug, Clone, Copy)]
pub struct AnnounceAction(pub ActionKind);

#[async_trait]
impl Action for AnnounceAction {
    fn kind(&self) -> ActionKind {
        self.0
    }

    async fn execute(&self, ctx: &ActionContext, params: &Value) -> Result<(), ActionError> {
        let body = Body::RemediationAction(RemediationAction {
            action: self.0,
            incident_id: ctx.incident.id,
            params: params.clone(),
        });
        let priority = ctx.incident.severity.bus_priority();
        ctx.bus
            .publish(
                ctx.source,
                &topics::remediation_action(self.0.as_str()),
                body,
                priority,
                Some(ctx.incident.id),
            )
            .map(|_| ())
            .ok_or_else(|| ActionError::failed(self.0.as_str(), "announcement rejected by bus"))
    }
}

/// Actions by kind.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<ActionKind, Arc<dyn Action>>,
}

impl ActionRegistry {
    /// Empty registry: every step fails with [`ActionError::Unsupported`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with an [`AnnounceAction`] for every kind.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        for kind in ActionKind::ALL {
            reg.register(AnnounceAction(kind));
        }
        reg
    }

    /// Registers `action` under its kind, replacing any previous one.
    pub fn register<A: Action>(&mut self, action: A) {
        self.register_arc(Arc::new(action));
    }

    pub fn register_arc(&mut self, action: Arc<dyn Action>) {
        self.actions.insert(action.kind(), action);
    }

    pub fn get(&self, kind: ActionKind) -> Option<Arc<dyn Action>> {
        self.actions.get(&kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.actions.keys().collect();
        kinds.sort();
        f.debug_struct("ActionRegistry").field("kinds", &kinds).finish()
    }
}
