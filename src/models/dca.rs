//! Dollar-cost-average strategy model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// How often a DCA strategy invests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    /// Distance between two executions.
    ///
    /// Months are a fixed 30 days, not calendar months.
    pub fn step(&self) -> Duration {
        match self {
            Frequency::Daily => Duration::days(1),
            Frequency::Weekly => Duration::days(7),
            Frequency::Monthly => Duration::days(30),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(EngineError::InvalidSpec(format!("unknown frequency '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DcaStatus {
    Active,
    Completed,
}

/// Caller-supplied parameters for a new DCA strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcaSpec {
    pub asset: String,
    pub investment_amount: Decimal,
    pub frequency: Frequency,

    /// Total run length such as "7days", "4weeks" or "3months"
    pub duration: String,

    /// First execution; defaults to creation time
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
}

/// A recurring fixed-amount investment schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcaStrategy {
    pub id: String,
    pub asset: String,
    pub investment_amount: Decimal,
    pub frequency: Frequency,
    pub duration: String,
    pub start_time: DateTime<Utc>,

    /// Strictly increasing, fixed at creation
    pub intervals: Vec<DateTime<Utc>>,

    /// Index into `intervals` of the next unexecuted slot
    pub cursor: usize,

    /// Interval timestamps that actually fired, in order
    pub executed_intervals: Vec<DateTime<Utc>>,

    pub status: DcaStatus,
    pub last_error: Option<String>,
    pub failed_attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl DcaStrategy {
    pub fn new(
        id: String,
        spec: DcaSpec,
        start_time: DateTime<Utc>,
        intervals: Vec<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        let status = if intervals.is_empty() {
            DcaStatus::Completed
        } else {
            DcaStatus::Active
        };

        Self {
            id,
            asset: spec.asset,
            investment_amount: spec.investment_amount,
            frequency: spec.frequency,
            duration: spec.duration,
            start_time,
            intervals,
            cursor: 0,
            executed_intervals: Vec::new(),
            status,
            last_error: None,
            failed_attempts: 0,
            created_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == DcaStatus::Active
    }

    pub fn next_execution_time(&self) -> Option<DateTime<Utc>> {
        if !self.is_active() {
            return None;
        }
        self.intervals.get(self.cursor).copied()
    }

    /// The interval that should fire at `now`, if any.
    pub fn due_interval(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.next_execution_time().filter(|next| *next <= now)
    }

    pub fn remaining_intervals(&self) -> usize {
        self.intervals.len().saturating_sub(self.cursor)
    }

    /// Record a successful execution of `interval` and advance the cursor.
    ///
    /// `interval` must be the current cursor slot, so a stale result from an
    /// overlapping cycle cannot advance the schedule twice.
    pub fn record_execution(&mut self, interval: DateTime<Utc>) -> EngineResult<()> {
        let expected = self.next_execution_time().ok_or_else(|| {
            EngineError::invalid_transition(&self.id, "strategy already completed")
        })?;
        if expected != interval {
            return Err(EngineError::invalid_transition(
                &self.id,
                format!("interval {} is not the next slot {}", interval, expected),
            ));
        }

        self.executed_intervals.push(interval);
        self.cursor += 1;
        self.last_error = None;
        if self.cursor >= self.intervals.len() {
            self.status = DcaStatus::Completed;
        }
        Ok(())
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.failed_attempts += 1;
        self.last_error = Some(error.into());
    }
}
