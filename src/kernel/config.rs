use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policies::BackoffPolicy;

/// A statically registered component.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    /// Heartbeat timeout; the supervisor default when absent.
    #[serde(default)]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub critical: bool,
}

/// Kernel restart supervisor settings.
///
/// ## Field semantics
/// - `tick`: how often heartbeat ages are checked
/// - `max_attempts`: restart attempts before giving up (`0` is treated as `1`)
/// - `cooldown`: delay after attempt `n` (0-based) before attempt `n + 1`
/// - `default_timeout`: heartbeat timeout of components registered without one
/// - `restart_timeout`: bound on a single restart call (`0s` = unbounded)
/// - `auto_register`: heartbeats from unknown components register them (non-critical)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub tick: Duration,
    pub max_attempts: u32,
    pub cooldown: BackoffPolicy,
    pub default_timeout: Duration,
    pub restart_timeout: Duration,
    pub auto_register: bool,
    pub components: Vec<ComponentSpec>,
}

impl KernelConfig {
    #[inline]
    pub fn attempt_limit(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for KernelConfig {
    /// - `tick = 5s`, `max_attempts = 3`, `cooldown = 30s` (constant)
    /// - `default_timeout = 30s`, `restart_timeout = 60s`, `auto_register = true`
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(5),
            max_attempts: 3,
            cooldown: BackoffPolicy::constant(Duration::from_secs(30)),
            default_timeout: Duration::from_secs(30),
            restart_timeout: Duration::from_secs(60),
            auto_register: true,
            components: Vec::new(),
        }
    }
}
