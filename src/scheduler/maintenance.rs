//! # Fixed-schedule maintenance jobs.
//!
//! A [`MaintenanceSchedule`] enqueues its request at most once per calendar
//! period (UTC day or ISO week). The guard is the period key of the last run:
//! `"2026-10-16"` for daily jobs, `"2026-W42"` for weekly jobs.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

use super::task::TaskRequest;

/// How often a maintenance job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "every")]
pub enum Cadence {
    /// Once per UTC day, from `hour` on.
    Daily { hour: u32 },
    /// Once per ISO week, on `weekday` from `hour` on.
    Weekly { weekday: Weekday, hour: u32 },
}

impl Cadence {
    /// Period key for `now`.
    pub fn period_key(&self, now: DateTime<Utc>) -> String {
        match self {
            Cadence::Daily { .. } => now.format("%Y-%m-%d").to_string(),
            Cadence::Weekly { .. } => {
                let week = now.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
        }
    }

    /// True once the job's slot within the current period has started.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match *self {
            Cadence::Daily { hour } => now.hour() >= hour,
            Cadence::Weekly { weekday, hour } => {
                let today = now.weekday().num_days_from_monday();
                let target = weekday.num_days_from_monday();
                today > target || (today == target && now.hour() >= hour)
            }
        }
    }
}

/// A named maintenance job.
#[derive(Debug, Clone)]
pub struct MaintenanceSchedule {
    pub name: String,
    pub cadence: Cadence,
    pub request: TaskRequest,
    last_key: Option<String>,
}

impl MaintenanceSchedule {
    pub fn new(name: impl Into<String>, cadence: Cadence, request: TaskRequest) -> Self {
        Self {
            name: name.into(),
            cadence,
            request,
            last_key: None,
        }
    }

    pub fn daily(name: impl Into<String>, hour: u32, request: TaskRequest) -> Self {
        Self::new(name, Cadence::Daily { hour }, request)
    }

    pub fn weekly(name: impl Into<String>, weekday: Weekday, hour: u32, request: TaskRequest) -> Self {
        Self::new(name, Cadence::Weekly { weekday, hour }, request)
    }

    /// Claims the current period. Returns false if it already ran in it or is not due yet.
    pub(crate) fn claim(&mut self, now: DateTime<Utc>) -> bool {
        if !self.cadence.is_due(now) {
            return false;
        }
        let key = self.cadence.period_key(now);
        if self.last_key.as_deref() == Some(key.as_str()) {
            return false;
        }
        self.last_key = Some(key);
        true
    }

    /// Key of the last period the job ran in.
    pub fn last_period(&self) -> Option<&str> {
        self.last_key.as_deref()
    }
}
