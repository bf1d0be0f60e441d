//! DCA interval generation and duration/expiry parsing.
//!
//! All month arithmetic uses a fixed 30-day month. Schedules are therefore
//! deterministic and drift from calendar months over long horizons.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::models::{DcaStrategy, Frequency};

/// Upper bound on executions in one DCA schedule.
pub const MAX_INTERVALS: i64 = 10_000;

/// Length of a DCA run parsed from strings such as "7days" or "3months".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationSpec {
    pub count: u32,
    pub unit: DurationUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUnit {
    Days,
    Weeks,
    Months,
}

impl DurationSpec {
    pub fn parse(input: &str) -> EngineResult<Self> {
        let (count, suffix) = split_count(input)?;
        let unit = match suffix.trim().to_lowercase().as_str() {
            "day" | "days" => DurationUnit::Days,
            "week" | "weeks" => DurationUnit::Weeks,
            "month" | "months" => DurationUnit::Months,
            other => {
                return Err(EngineError::InvalidSpec(format!(
                    "unknown duration unit '{}' in '{}'",
                    other, input
                )))
            }
        };
        Ok(Self { count, unit })
    }

    pub fn total(&self) -> EngineResult<Duration> {
        let days = match self.unit {
            DurationUnit::Days => 1,
            DurationUnit::Weeks => 7,
            DurationUnit::Months => 30,
        };
        i64::from(self.count)
            .checked_mul(days)
            .and_then(Duration::try_days)
            .ok_or_else(|| out_of_range(&format!("{}{:?}", self.count, self.unit).to_lowercase()))
    }
}

/// Parse a relative expiry ("12h", "7d") into an absolute timestamp.
pub fn parse_expiry(input: &str, now: DateTime<Utc>) -> EngineResult<DateTime<Utc>> {
    let (count, suffix) = split_count(input)?;
    let offset = match suffix.trim().to_lowercase().as_str() {
        "h" => Duration::try_hours(i64::from(count)),
        "d" => Duration::try_days(i64::from(count)),
        other => {
            return Err(EngineError::InvalidSpec(format!(
                "unknown expiry unit '{}' in '{}'",
                other, input
            )))
        }
    };
    offset
        .and_then(|offset| now.checked_add_signed(offset))
        .ok_or_else(|| out_of_range(input))
}

fn out_of_range(input: &str) -> EngineError {
    EngineError::InvalidSpec(format!("'{}' is out of range", input))
}

fn split_count(input: &str) -> EngineResult<(u32, &str)> {
    let trimmed = input.trim();
    let digits = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    if digits == 0 {
        return Err(EngineError::InvalidSpec(format!("missing count in '{}'", input)));
    }
    let count = trimmed[..digits]
        .parse::<u32>()
        .map_err(|e| EngineError::InvalidSpec(format!("bad count in '{}': {}", input, e)))?;
    Ok((count, &trimmed[digits..]))
}

/// Every execution time from `start` up to and including `start + total`,
/// one `frequency` step apart. Always contains `start`.
///
/// Fails with `InvalidSpec` when the run ends outside the representable time
/// range or would need more than [`MAX_INTERVALS`] executions.
pub fn build_intervals(
    start: DateTime<Utc>,
    frequency: Frequency,
    total: Duration,
) -> EngineResult<Vec<DateTime<Utc>>> {
    let step = frequency.step();
    let end = start
        .checked_add_signed(total)
        .ok_or_else(|| EngineError::InvalidSpec("schedule ends out of range".to_string()))?;

    let count = total.num_seconds() / step.num_seconds() + 1;
    if count > MAX_INTERVALS {
        return Err(EngineError::InvalidSpec(format!(
            "schedule needs {} executions, limit is {}",
            count, MAX_INTERVALS
        )));
    }

    let mut intervals = Vec::with_capacity(count.max(1) as usize);
    let mut current = Some(start);
    while let Some(at) = current.filter(|at| *at <= end) {
        intervals.push(at);
        current = at.checked_add_signed(step);
    }

    debug!(
        start = %start,
        frequency = %frequency,
        count = intervals.len(),
        "Built DCA intervals"
    );
    Ok(intervals)
}

/// Parse `duration` and build the schedule in one step.
pub fn schedule(
    start: DateTime<Utc>,
    frequency: Frequency,
    duration: &str,
) -> EngineResult<Vec<DateTime<Utc>>> {
    let spec = DurationSpec::parse(duration)?;
    build_intervals(start, frequency, spec.total()?)
}

/// Strategies with an interval due at `now`, paired with that interval.
pub fn due_strategies(
    strategies: &[DcaStrategy],
    now: DateTime<Utc>,
) -> Vec<(DcaStrategy, DateTime<Utc>)> {
    strategies
        .iter()
        .filter_map(|s| s.due_interval(now).map(|slot| (s.clone(), slot)))
        .collect()
}
