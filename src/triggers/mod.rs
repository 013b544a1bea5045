//! Trigger registry and evaluator.
//!
//! Internal modules:
//! - [`trigger`]: [`Trigger`] bookkeeping and the [`Condition`] seam;
//! - [`conditions`]: the seven built-in conditions;
//! - [`spec`]: serializable [`TriggerSpec`] definitions;
//! - [`config`]: [`TriggerConfig`] (ticks, default debounce, static triggers);
//! - [`evaluator`]: [`TriggerEvaluator`], its feed loop and ticks.

pub mod conditions;
mod config;
mod evaluator;
mod spec;
mod trigger;

pub use config::TriggerConfig;
pub use evaluator::{TRIGGER_SOURCE, TriggerEvaluator};
pub use spec::{ConditionSpec, TriggerSpec};
pub use trigger::{Condition, Trigger, TriggerKind, TriggerSnapshot};
