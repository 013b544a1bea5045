//! # Playbooks: named, ordered remediation sequences.
//!
//! ```
//! use std::time::Duration;
//! use healvisor::playbooks::{ActionKind, Playbook, Step};
//!
//! let pb = Playbook::new("restart_db")
//!     .step(Step::new(ActionKind::UpdateStatus).continue_on_error())
//!     .step(Step::new(ActionKind::RestartService).with_timeout(Duration::from_secs(30)));
//! assert_eq!(pb.steps.len(), 2);
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Built-in remediation actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    RestartService,
    DisableIntegration,
    Rollback,
    QuarantineIntegration,
    KillProcess,
    RestoreBackup,
    HttpRequest,
    UpdateStatus,
}

impl ActionKind {
    pub const ALL: [ActionKind; 8] = [
        ActionKind::RestartService,
        ActionKind::DisableIntegration,
        ActionKind::Rollback,
        ActionKind::QuarantineIntegration,
        ActionKind::KillProcess,
        ActionKind::RestoreBackup,
        ActionKind::HttpRequest,
        ActionKind::UpdateStatus,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::RestartService => "restart_service",
            ActionKind::DisableIntegration => "disable_integration",
            ActionKind::Rollback => "rollback",
            ActionKind::QuarantineIntegration => "quarantine_integration",
            ActionKind::KillProcess => "kill_process",
            ActionKind::RestoreBackup => "restore_backup",
            ActionKind::HttpRequest => "http_request",
            ActionKind::UpdateStatus => "update_status",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One action invocation inside a playbook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub action: ActionKind,
    #[serde(default)]
    pub params: Value,
    /// A failure of this step does not halt the sequence.
    #[serde(default)]
    pub continue_on_error: bool,
    /// Overrides the dispatcher's step timeout.
    #[serde(default)]
    pub timeout: Option<Duration>,
}

impl Step {
    pub fn new(action: ActionKind) -> Self {
        Self {
            action,
            params: Value::Null,
            continue_on_error: false,
            timeout: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playbook {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<Step>,
}

impl Playbook {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            steps: Vec::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }
}

/// Outcome of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Position in the playbook (0-based).
    pub index: usize,
    pub action: ActionKind,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub duration_ms: u64,
}
