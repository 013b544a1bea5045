//! Kernel restart supervisor: heartbeat tracking and bounded restarts.

mod config;
mod restarter;
mod supervisor;

pub use config::{ComponentSpec, KernelConfig};
pub use restarter::{BusRestarter, Restarter};
pub use supervisor::{ComponentState, ComponentStatus, KERNEL_SOURCE, KernelSupervisor};
