use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::spec::TriggerSpec;

/// Trigger evaluator settings.
///
/// ## Field semantics
/// - `fast_tick`: poll period of non-scheduled triggers
/// - `slow_tick`: poll period of scheduled checks (each still honors its own interval)
/// - `default_debounce`: debounce of triggers built from `triggers` that set none
/// - `remediation_deadline`: deadline of the enqueued remediation task (`0s` = none)
/// - `triggers`: statically configured triggers, registered at start
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub fast_tick: Duration,
    pub slow_tick: Duration,
    pub default_debounce: Duration,
    pub remediation_deadline: Duration,
    pub triggers: Vec<TriggerSpec>,
}

impl TriggerConfig {
    /// Remediation deadline in whole seconds, `None` when disabled.
    #[inline]
    pub fn deadline_secs(&self) -> Option<u64> {
        if self.remediation_deadline.is_zero() {
            None
        } else {
            Some(self.remediation_deadline.as_secs().max(1))
        }
    }
}

impl Default for TriggerConfig {
    /// - `fast_tick = 10s`, `slow_tick = 1h`
    /// - `default_debounce = 60s`, `remediation_deadline = 0s`
    fn default() -> Self {
        Self {
            fast_tick: Duration::from_secs(10),
            slow_tick: Duration::from_secs(3600),
            default_debounce: Duration::from_secs(60),
            remediation_deadline: Duration::ZERO,
            triggers: Vec::new(),
        }
    }
}
