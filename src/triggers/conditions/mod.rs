//! Built-in trigger conditions, one per [`TriggerKind`](super::TriggerKind).

mod error_rate;
mod event_anomaly;
mod heartbeat;
mod kpi;
mod resource_spike;
mod scheduled;
mod trust_score;

pub use error_rate::ApiErrorRate;
pub use event_anomaly::{ANOMALY_WINDOW, EventAnomaly};
pub use heartbeat::HeartbeatFailure;
pub use kpi::{Comparison, KpiThreshold};
pub use resource_spike::ResourceSpike;
pub use scheduled::ScheduledCheck;
pub use trust_score::TrustScoreDrop;
