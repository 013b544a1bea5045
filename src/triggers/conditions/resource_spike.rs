//! Resource spike: usage must stay above the threshold for a sustained duration.

use std::time::Duration;

use tokio::time::Instant;

use crate::bus::{Body, Message, topics};
use crate::triggers::{Condition, TriggerKind};

/// Any sample at or below the threshold resets the spike timer, so transients never fire.
#[derive(Debug)]
pub struct ResourceSpike {
    resource: String,
    threshold: f64,
    sustained: Duration,
    spike_start: Option<Instant>,
    last_value: Option<f64>,
}

impl ResourceSpike {
    /// `threshold` is a percentage (e.g. `85.0`).
    pub fn new(resource: impl Into<String>, threshold: f64, sustained: Duration) -> Self {
        Self {
            resource: resource.into(),
            threshold,
            sustained,
            spike_start: None,
            last_value: None,
        }
    }

    pub fn record(&mut self, percent: f64, now: Instant) {
        self.last_value = Some(percent);
        if percent > self.threshold {
            self.spike_start.get_or_insert(now);
        } else {
            self.spike_start = None;
        }
    }
}

impl Condition for ResourceSpike {
    fn kind(&self) -> TriggerKind {
        TriggerKind::ResourceSpike
    }

    fn observe(&mut self, msg: &Message, now: Instant) {
        if msg.topic != topics::METRICS_RESOURCE {
            return;
        }
        if let Body::ResourceUsage(usage) = &msg.body {
            if usage.resource == self.resource {
                self.record(usage.percent, now);
            }
        }
    }

    fn check(&mut self, now: Instant) -> bool {
        let sustained = self
            .spike_start
            .is_some_and(|start| now.saturating_duration_since(start) >= self.sustained);
        if sustained {
            // re-arm: the next sample above threshold starts a new spike
            self.spike_start = None;
        }
        sustained
    }

    fn describe(&self) -> String {
        format!(
            "{} above {}% for {:?} (last {:.1}%)",
            self.resource,
            self.threshold,
            self.sustained,
            self.last_value.unwrap_or_default()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn transient_spike_does_not_fire() {
        let mut c = ResourceSpike::new("cpu", 85.0, Duration::from_secs(60));
        let t0 = Instant::now();
        for s in (0..=30).step_by(10) {
            c.record(90.0, t0 + Duration::from_secs(s));
            assert!(!c.check(t0 + Duration::from_secs(s)));
        }
        c.record(50.0, t0 + Duration::from_secs(31));
        assert!(!c.check(t0 + Duration::from_secs(90)));
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_spike_fires_once_then_rearms() {
        let mut c = ResourceSpike::new("cpu", 85.0, Duration::from_secs(60));
        let t0 = Instant::now();
        c.record(95.0, t0);
        c.record(96.0, t0 + Duration::from_secs(30));
        assert!(c.check(t0 + Duration::from_secs(60)));
        assert!(!c.check(t0 + Duration::from_secs(61)));
    }
}
