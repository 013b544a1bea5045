//! API error rate: sliding-window counter over `api.error` reports.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::bus::{Body, Message, topics};
use crate::triggers::{Condition, TriggerKind};

/// Fires when at least `threshold` errors fall within `window`, then clears the window.
#[derive(Debug)]
pub struct ApiErrorRate {
    /// Only errors for this endpoint count; `None` counts every endpoint.
    endpoint: Option<String>,
    threshold: usize,
    window: Duration,
    errors: VecDeque<Instant>,
}

impl ApiErrorRate {
    pub fn new(threshold: usize, window: Duration) -> Self {
        Self {
            endpoint: None,
            threshold: threshold.max(1),
            window,
            errors: VecDeque::new(),
        }
    }

    pub fn for_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Keeps at most `threshold` timestamps; the newest ones decide whether the window is full.
    pub fn record_error(&mut self, now: Instant) {
        self.prune(now);
        self.errors.push_back(now);
        while self.errors.len() > self.threshold {
            self.errors.pop_front();
        }
    }

    /// Errors currently inside the window, capped at `threshold`.
    pub fn count(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.errors.len()
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&at) = self.errors.front() {
            if now.saturating_duration_since(at) > self.window {
                self.errors.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Condition for ApiErrorRate {
    fn kind(&self) -> TriggerKind {
        TriggerKind::ApiErrorRate
    }

    fn observe(&mut self, msg: &Message, now: Instant) {
        if msg.topic != topics::API_ERROR {
            return;
        }
        if let Body::ApiError(err) = &msg.body {
            if self.endpoint.as_ref().is_none_or(|e| *e == err.endpoint) {
                self.record_error(now);
            }
        }
    }

    fn check(&mut self, now: Instant) -> bool {
        if self.count(now) < self.threshold {
            return false;
        }
        self.errors.clear();
        true
    }

    fn describe(&self) -> String {
        match &self.endpoint {
            Some(e) => format!("{} api errors on {e} within {:?}", self.threshold, self.window),
            None => format!("{} api errors within {:?}", self.threshold, self.window),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_at_threshold_and_clears() {
        let mut c = ApiErrorRate::new(5, Duration::from_secs(300));
        let t0 = Instant::now();
        for i in 0..4 {
            c.record_error(t0 + Duration::from_secs(i * 10));
        }
        assert!(!c.check(t0 + Duration::from_secs(40)));
        c.record_error(t0 + Duration::from_secs(50));
        assert!(c.check(t0 + Duration::from_secs(50)));
        assert_eq!(c.count(t0 + Duration::from_secs(50)), 0);
        assert!(!c.check(t0 + Duration::from_secs(51)));
    }

    #[tokio::test(start_paused = true)]
    async fn old_errors_leave_the_window() {
        let mut c = ApiErrorRate::new(2, Duration::from_secs(60));
        let t0 = Instant::now();
        c.record_error(t0);
        c.record_error(t0 + Duration::from_secs(61));
        assert!(!c.check(t0 + Duration::from_secs(61)));
    }

    #[tokio::test(start_paused = true)]
    async fn error_burst_between_checks_stays_bounded() {
        let mut c = ApiErrorRate::new(5, Duration::from_secs(300));
        let t0 = Instant::now();
        for i in 0..10_000u64 {
            c.record_error(t0 + Duration::from_millis(i));
        }
        assert_eq!(c.errors.len(), 5);
        assert!(c.check(t0 + Duration::from_secs(10)));
        assert_eq!(c.count(t0 + Duration::from_secs(10)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_errors_are_dropped_when_recording() {
        let mut c = ApiErrorRate::new(3, Duration::from_secs(60));
        let t0 = Instant::now();
        c.record_error(t0);
        c.record_error(t0 + Duration::from_secs(1));
        c.record_error(t0 + Duration::from_secs(120));
        assert_eq!(c.errors.len(), 1);
        assert!(!c.check(t0 + Duration::from_secs(120)));
    }
}
