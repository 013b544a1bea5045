//! Playbook dispatcher: runs remediation playbooks for incidents.
//!
//! - [`playbook`]: [`Playbook`], [`Step`], [`ActionKind`], [`StepResult`];
//! - [`action`]: the [`Action`] seam and its [`ActionRegistry`];
//! - [`registry`]: playbooks by name;
//! - [`dispatcher`]: entry points, de-duplication and outcome reporting.

mod action;
mod config;
mod dispatcher;
mod playbook;
mod registry;

pub use action::{Action, ActionContext, ActionRegistry, AnnounceAction};
pub use config::DispatcherConfig;
pub use dispatcher::{DISPATCHER_SOURCE, Dispatcher, ExecutionRecord};
pub use playbook::{ActionKind, Playbook, Step, StepResult};
pub use registry::PlaybookRegistry;
