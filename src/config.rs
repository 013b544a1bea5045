//! # Runtime configuration.
//!
//! [`Config`] groups the settings of every component plus the shutdown grace.
//! All sections default field by field, so a bootstrap process can supply a
//! partial JSON document.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use healvisor::Config;
//!
//! let cfg: Config = serde_json::from_str(r#"{
//!     "grace": { "secs": 10, "nanos": 0 },
//!     "scheduler": { "workers": 1 },
//!     "kernel": { "max_attempts": 5 }
//! }"#).unwrap();
//!
//! assert_eq!(cfg.grace, Duration::from_secs(10));
//! assert_eq!(cfg.scheduler.worker_count(), 1);
//! assert_eq!(cfg.kernel.max_attempts, 5);
//! assert_eq!(cfg.bus.queue_capacity, 1024);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bus::BusConfig;
use crate::kernel::KernelConfig;
use crate::playbooks::DispatcherConfig;
use crate::scheduler::SchedulerConfig;
use crate::triggers::TriggerConfig;

/// Settings of the whole runtime.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How long shutdown waits for loops to stop before aborting them.
    pub grace: Duration,
    pub bus: BusConfig,
    pub scheduler: SchedulerConfig,
    pub triggers: TriggerConfig,
    pub dispatcher: DispatcherConfig,
    pub kernel: KernelConfig,
}

impl Default for Config {
    /// `grace = 30s`; every section at its own default.
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(30),
            bus: BusConfig::default(),
            scheduler: SchedulerConfig::default(),
            triggers: TriggerConfig::default(),
            dispatcher: DispatcherConfig::default(),
            kernel: KernelConfig::default(),
        }
    }
}
