//! Trust-score drop: fires while a tracked component's score is below a floor.

use tokio::time::Instant;

use crate::bus::{Body, Message, topics};
use crate::triggers::{Condition, TriggerKind};

#[derive(Debug)]
pub struct TrustScoreDrop {
    component: String,
    floor: f64,
    score: Option<f64>,
}

impl TrustScoreDrop {
    pub fn new(component: impl Into<String>, floor: f64) -> Self {
        Self {
            component: component.into(),
            floor,
            score: None,
        }
    }

    pub fn report(&mut self, score: f64) {
        self.score = Some(score);
    }
}

impl Condition for TrustScoreDrop {
    fn kind(&self) -> TriggerKind {
        TriggerKind::TrustScoreDrop
    }

    fn observe(&mut self, msg: &Message, _now: Instant) {
        if msg.topic != topics::TRUST_SCORE_REPORT {
            return;
        }
        if let Body::TrustScore(ts) = &msg.body {
            if ts.component == self.component {
                self.report(ts.score);
            }
        }
    }

    fn check(&mut self, _now: Instant) -> bool {
        self.score.is_some_and(|s| s < self.floor)
    }

    fn describe(&self) -> String {
        format!(
            "trust score of {} at {:.2}, floor {:.2}",
            self.component,
            self.score.unwrap_or_default(),
            self.floor
        )
    }

    fn component(&self) -> Option<&str> {
        Some(&self.component)
    }
}
