//! Event anomaly: burst of matching messages inside a rolling window.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::bus::{Message, TopicPattern};
use crate::triggers::{Condition, TriggerKind};

/// Rolling window used when none is given.
pub const ANOMALY_WINDOW: Duration = Duration::from_secs(60);

/// Fires when more than `threshold` messages matching `pattern` arrive within the window.
///
/// Messages published by the trigger evaluator itself are not counted.
#[derive(Debug)]
pub struct EventAnomaly {
    pattern: TopicPattern,
    threshold: usize,
    window: Duration,
    events: VecDeque<Instant>,
}

impl EventAnomaly {
    pub fn new(pattern: &str, threshold: usize) -> Self {
        Self {
            pattern: TopicPattern::parse(pattern),
            threshold,
            window: ANOMALY_WINDOW,
            events: VecDeque::new(),
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Keeps at most `threshold + 1` timestamps, enough to tell a burst apart.
    pub fn record(&mut self, now: Instant) {
        self.prune(now);
        self.events.push_back(now);
        while self.events.len() > self.threshold.saturating_add(1) {
            self.events.pop_front();
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&at) = self.events.front() {
            if now.saturating_duration_since(at) > self.window {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Condition for EventAnomaly {
    fn kind(&self) -> TriggerKind {
        TriggerKind::EventAnomaly
    }

    fn observe(&mut self, msg: &Message, now: Instant) {
        if msg.source != crate::triggers::TRIGGER_SOURCE && self.pattern.matches(&msg.topic) {
            self.record(now);
        }
    }

    fn check(&mut self, now: Instant) -> bool {
        self.prune(now);
        if self.events.len() <= self.threshold {
            return false;
        }
        self.events.clear();
        true
    }

    fn describe(&self) -> String {
        format!(
            "more than {} `{}` events within {:?}",
            self.threshold, self.pattern, self.window
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Body, Priority};

    fn msg(source: &str, topic: &str) -> Message {
        Message::new(source, topic, Body::custom(serde_json::Value::Null), Priority::Low).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn burst_past_threshold_fires() {
        let mut c = EventAnomaly::new("auth.*", 3);
        let t0 = Instant::now();
        for _ in 0..3 {
            c.observe(&msg("gw", "auth.login_failed"), t0);
        }
        c.observe(&msg("gw", "billing.charge"), t0);
        assert!(!c.check(t0));
        c.observe(&msg("gw", "auth.login_failed"), t0);
        assert!(c.check(t0));
        assert!(!c.check(t0));
    }

    #[tokio::test(start_paused = true)]
    async fn window_rolls_and_own_messages_are_ignored() {
        let mut c = EventAnomaly::new("*", 1).with_window(Duration::from_secs(10));
        let t0 = Instant::now();
        c.observe(&msg("gw", "x.y"), t0);
        c.observe(&msg(crate::triggers::TRIGGER_SOURCE, "x.y"), t0);
        c.observe(&msg("gw", "x.y"), t0 + Duration::from_secs(11));
        assert!(!c.check(t0 + Duration::from_secs(11)));
    }

    #[tokio::test(start_paused = true)]
    async fn flood_between_checks_keeps_window_bounded() {
        let mut c = EventAnomaly::new("auth.*", 3);
        let t0 = Instant::now();
        for i in 0..10_000u64 {
            c.observe(&msg("gw", "auth.login_failed"), t0 + Duration::from_millis(i));
        }
        assert_eq!(c.events.len(), 4);
        assert!(c.check(t0 + Duration::from_secs(10)));
        assert!(!c.check(t0 + Duration::from_secs(10)));
    }
}
