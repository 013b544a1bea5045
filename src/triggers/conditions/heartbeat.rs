//! Heartbeat failure: fires when a component has been silent for longer than its timeout.

use std::time::Duration;

use tokio::time::Instant;

use crate::bus::{Body, Message, topics};
use crate::triggers::{Condition, TriggerKind};

#[derive(Debug)]
pub struct HeartbeatFailure {
    component: String,
    timeout: Duration,
    last_heartbeat: Instant,
}

impl HeartbeatFailure {
    /// The silence clock starts at construction.
    pub fn new(component: impl Into<String>, timeout: Duration) -> Self {
        Self {
            component: component.into(),
            timeout,
            last_heartbeat: Instant::now(),
        }
    }

    pub fn beat(&mut self, now: Instant) {
        self.last_heartbeat = now;
    }
}

impl Condition for HeartbeatFailure {
    fn kind(&self) -> TriggerKind {
        TriggerKind::HeartbeatFailure
    }

    fn observe(&mut self, msg: &Message, now: Instant) {
        if msg.topic != topics::KERNEL_HEARTBEAT {
            return;
        }
        if let Body::Heartbeat(hb) = &msg.body {
            if hb.component == self.component {
                self.beat(now);
            }
        }
    }

    fn check(&mut self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_heartbeat) > self.timeout
    }

    fn describe(&self) -> String {
        format!("{} silent for more than {:?}", self.component, self.timeout)
    }

    fn component(&self) -> Option<&str> {
        Some(&self.component)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Priority;
    use crate::bus::body::Heartbeat;

    #[tokio::test(start_paused = true)]
    async fn fires_only_after_strictly_exceeding_timeout() {
        let mut c = HeartbeatFailure::new("kernel-a", Duration::from_secs(30));
        let t0 = Instant::now();
        assert!(!c.check(t0 + Duration::from_secs(30)));
        assert!(c.check(t0 + Duration::from_secs(31)));

        let hb = Message::new(
            "kernel-a",
            topics::KERNEL_HEARTBEAT,
            Body::Heartbeat(Heartbeat { component: "kernel-a".into() }),
            Priority::Low,
        )
        .unwrap();
        c.observe(&hb, t0 + Duration::from_secs(31));
        assert!(!c.check(t0 + Duration::from_secs(40)));
    }
}
