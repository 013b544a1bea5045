//! KPI threshold: compares the latest pushed value against a bound.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::bus::{Body, Message, topics};
use crate::triggers::{Condition, TriggerKind};

/// Comparison operator applied as `value <op> threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Equal,
    NotEqual,
}

impl Comparison {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::GreaterThan => value > threshold,
            Comparison::GreaterOrEqual => value >= threshold,
            Comparison::LessThan => value < threshold,
            Comparison::LessOrEqual => value <= threshold,
            Comparison::Equal => (value - threshold).abs() < f64::EPSILON,
            Comparison::NotEqual => (value - threshold).abs() >= f64::EPSILON,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::GreaterThan => ">",
            Comparison::GreaterOrEqual => ">=",
            Comparison::LessThan => "<",
            Comparison::LessOrEqual => "<=",
            Comparison::Equal => "==",
            Comparison::NotEqual => "!=",
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug)]
pub struct KpiThreshold {
    name: String,
    comparison: Comparison,
    threshold: f64,
    value: Option<f64>,
}

impl KpiThreshold {
    pub fn new(name: impl Into<String>, comparison: Comparison, threshold: f64) -> Self {
        Self {
            name: name.into(),
            comparison,
            threshold,
            value: None,
        }
    }

    pub fn push(&mut self, value: f64) {
        self.value = Some(value);
    }
}

impl Condition for KpiThreshold {
    fn kind(&self) -> TriggerKind {
        TriggerKind::KpiThreshold
    }

    fn observe(&mut self, msg: &Message, _now: Instant) {
        if msg.topic != topics::KPI_UPDATE {
            return;
        }
        if let Body::Kpi(kpi) = &msg.body {
            if kpi.name == self.name {
                self.push(kpi.value);
            }
        }
    }

    fn check(&mut self, _now: Instant) -> bool {
        self.value
            .is_some_and(|v| self.comparison.holds(v, self.threshold))
    }

    fn describe(&self) -> String {
        format!(
            "kpi {} = {} {} {}",
            self.name,
            self.value.unwrap_or_default(),
            self.comparison,
            self.threshold
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compares_latest_value() {
        let mut c = KpiThreshold::new("p99_ms", Comparison::GreaterThan, 500.0);
        let now = Instant::now();
        assert!(!c.check(now));
        c.push(420.0);
        assert!(!c.check(now));
        c.push(650.0);
        assert!(c.check(now));
        assert!(c.describe().contains("650 > 500"));
    }
}
