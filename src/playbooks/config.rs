use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::playbook::Playbook;
use crate::incident::Severity;

/// Playbook dispatcher settings.
///
/// ## Field semantics
/// - `immediate_severity`: incidents at or above this severity run straight from
///   `event.incident`; the rest wait for the scheduled `self_healing` task
/// - `step_timeout`: per-step timeout unless the step sets its own
/// - `success_delta` / `failure_delta`: trust deltas published per outcome
/// - `history_limit`: executions kept for [`history`](crate::playbooks::Dispatcher::history)
/// - `dedup_capacity`: finished incident instances remembered for de-duplication
/// - `playbooks`: statically configured playbooks, registered at construction
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub immediate_severity: Severity,
    pub step_timeout: Duration,
    pub success_delta: f64,
    pub failure_delta: f64,
    pub history_limit: usize,
    pub dedup_capacity: usize,
    pub playbooks: Vec<Playbook>,
}

impl Default for DispatcherConfig {
    /// - `immediate_severity = Critical`, `step_timeout = 60s`
    /// - `success_delta = +0.05`, `failure_delta = -0.10`
    /// - `history_limit = 100`, `dedup_capacity = 1024`
    fn default() -> Self {
        Self {
            immediate_severity: Severity::Critical,
            step_timeout: Duration::from_secs(60),
            success_delta: 0.05,
            failure_delta: -0.10,
            history_limit: 100,
            dedup_capacity: 1024,
            playbooks: Vec::new(),
        }
    }
}
