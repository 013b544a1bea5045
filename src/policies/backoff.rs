//! # Backoff policy for retries and restart cooldowns.
//!
//! [`BackoffPolicy`] controls how delays grow after repeated failures: the wait
//! before a CRITICAL task goes back to its queue, and the cooldown between two
//! kernel restart attempts.
//! It is parameterized by:
//! - [`BackoffPolicy::factor`] the multiplicative growth factor;
//! - [`BackoffPolicy::first`] the initial delay;
//! - [`BackoffPolicy::max`] the maximum delay cap.
//!
//! The delay for attempt `n` is computed as `first × factor^n`, clamped to `max`,
//! then jitter is applied. The base delay is derived purely from the attempt number;
//! jitter output never feeds back into subsequent calculations.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use healvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(10),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! // Attempt 0: 'first' (100ms), clamped to max
//! assert_eq!(backoff.next(0), Duration::from_millis(100));
//!
//! // Attempt 1: first × factor^1 = 200ms
//! assert_eq!(backoff.next(1), Duration::from_millis(200));
//!
//! // Attempt 10: 100ms × 2^10 = 102_400ms → capped at max=10s
//! assert_eq!(backoff.next(10), Duration::from_secs(10));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policies::jitter::JitterPolicy;

/// Backoff policy.
///
/// Serialized with durations as `{ "secs": .., "nanos": .. }` (serde's native form).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Initial delay before the first retry.
    pub first: Duration,
    /// Maximum delay cap for retries.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Jitter applied on top of the clamped base.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Returns a strategy with:
    /// - `factor = 1.0` (constant delay);
    /// - `first = 100ms`;
    /// - `max = 30s`.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            jitter: JitterPolicy::None,
            factor: 1.0,
        }
    }
}

impl BackoffPolicy {
    /// Fixed delay: `first == max`, no growth, no jitter.
    pub fn constant(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Computes the delay for the given attempt number (0-indexed).
    ///
    /// The base delay is `first × factor^attempt`, clamped to [`BackoffPolicy::max`].
    /// Jitter is applied to the clamped base; each attempt derives its base independently.
    pub fn next(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        let base = if secs.is_finite() && secs >= 0.0 && secs <= self.max.as_secs_f64() {
            Duration::from_secs_f64(secs)
        } else {
            self.max
        };
        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn exp(first_ms: u64, max: Duration, jitter: JitterPolicy) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max,
            factor: 2.0,
            jitter,
        }
    }

    #[test]
    fn exponential_growth_without_jitter() {
        let policy = exp(100, Duration::from_secs(30), JitterPolicy::None);
        assert_eq!(policy.next(0), Duration::from_millis(100));
        assert_eq!(policy.next(1), Duration::from_millis(200));
        assert_eq!(policy.next(3), Duration::from_millis(800));
    }

    #[test]
    fn constant_policy_never_grows() {
        let policy = BackoffPolicy::constant(Duration::from_secs(5));
        for attempt in [0, 1, 2, 50] {
            assert_eq!(policy.next(attempt), Duration::from_secs(5));
        }
    }

    #[test]
    fn clamps_to_max_including_overflow() {
        let policy = exp(100, Duration::from_secs(10), JitterPolicy::None);
        assert_eq!(policy.next(10), Duration::from_secs(10));
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(10));

        let inverted = exp(10_000, Duration::from_secs(5), JitterPolicy::None);
        assert_eq!(inverted.next(0), Duration::from_secs(5));
    }

    #[test]
    fn equal_jitter_stays_within_half_and_base() {
        let policy = exp(100, Duration::from_secs(30), JitterPolicy::Equal);
        for attempt in 0..12 {
            let base_ms = (100.0 * 2.0f64.powi(attempt as i32)).min(30_000.0);
            let delay = policy.next(attempt);
            assert!(delay >= Duration::from_millis((base_ms / 2.0) as u64));
            assert!(delay <= Duration::from_millis(base_ms as u64));
        }
    }

    #[test]
    fn deserializes_with_defaults() {
        let policy: BackoffPolicy = serde_json::from_value(serde_json::json!({
            "factor": 2.0,
            "jitter": "equal"
        }))
        .unwrap();
        assert_eq!(policy.first, Duration::from_millis(100));
        assert_eq!(policy.jitter, JitterPolicy::Equal);
    }
}
