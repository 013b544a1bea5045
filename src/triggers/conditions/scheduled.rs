//! Scheduled check: fires on its first evaluation, then once per interval.

use std::time::Duration;

use tokio::time::Instant;

use crate::triggers::{Condition, TriggerKind};

#[derive(Debug)]
pub struct ScheduledCheck {
    interval: Duration,
    last_run: Option<Instant>,
}

impl ScheduledCheck {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_run: None,
        }
    }
}

impl Condition for ScheduledCheck {
    fn kind(&self) -> TriggerKind {
        TriggerKind::ScheduledCheck
    }

    fn check(&mut self, now: Instant) -> bool {
        let due = self
            .last_run
            .is_none_or(|at| now.saturating_duration_since(at) >= self.interval);
        if due {
            self.last_run = Some(now);
        }
        due
    }

    fn describe(&self) -> String {
        format!("scheduled check every {:?}", self.interval)
    }
}
