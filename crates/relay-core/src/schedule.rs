//! Recurring schedules: fixed intervals, cron-like expressions, one-shots.
//!
//! The cron evaluator is deliberately narrow: all five fields are parsed
//! and range-checked, but only minute and hour are resolved exactly when
//! computing the next run. Day, month, and weekday are accepted and
//! ignored, which covers the supported daily/weekly recurrence patterns.

use std::{fmt, time::Duration};

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// When a recurring definition fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Fire every fixed interval, measured from the previous firing.
    Interval {
        /// Interval between firings.
        #[serde(with = "duration_millis")]
        every: Duration,
    },
    /// Fire at the minute/hour given by a 5-field cron expression.
    Cron {
        /// Parsed expression.
        expr: CronExpr,
    },
    /// Fire once at an absolute instant, then disarm.
    Once {
        /// The firing instant.
        at: DateTime<Utc>,
    },
}

impl Schedule {
    /// Builds an interval schedule.
    ///
    /// Zero-length intervals are rejected: they would make every poll of
    /// the scheduler loop a due instant.
    pub fn interval(every: Duration) -> Result<Self> {
        if every.is_zero() {
            return Err(CoreError::invalid_input("interval must be greater than zero"));
        }
        Ok(Self::Interval { every })
    }

    /// Parses a 5-field cron expression into a schedule.
    pub fn cron(expression: &str) -> Result<Self> {
        Ok(Self::Cron { expr: CronExpr::parse(expression)? })
    }

    /// Builds a one-shot schedule for an absolute instant.
    pub fn once(at: DateTime<Utc>) -> Self {
        Self::Once { at }
    }

    /// Computes the first run for a freshly scheduled definition.
    pub fn first_run(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Interval { every } => now + chrono::Duration::from_std(*every).unwrap_or_default(),
            Self::Cron { expr } => expr.next_after(now),
            Self::Once { at } => *at,
        }
    }

    /// Computes the run after a firing at `now`.
    ///
    /// Returns `None` for one-shot schedules, which are not re-armed. The
    /// returned instant is strictly in the future relative to `now`, so a
    /// definition is never materialized twice for the same due instant.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Interval { every } => {
                Some(now + chrono::Duration::from_std(*every).unwrap_or_default())
            },
            Self::Cron { expr } => Some(expr.next_after(now)),
            Self::Once { .. } => None,
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interval { every } => write!(f, "every {}ms", every.as_millis()),
            Self::Cron { expr } => write!(f, "cron {}", expr),
            Self::Once { at } => write!(f, "once at {}", at.to_rfc3339()),
        }
    }
}

/// A validated 5-field cron-like expression.
///
/// Field order is `minute hour day month weekday`. Minute and hour must be
/// literal values; the remaining fields accept `*` or an in-range literal
/// but do not constrain evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronExpr {
    /// Minute of the hour (0-59).
    pub minute: u32,
    /// Hour of the day (0-23).
    pub hour: u32,
    /// Original expression, kept for display and round-tripping.
    pub expression: String,
}

impl CronExpr {
    /// Parses and validates a 5-field expression.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ScheduleParse`] when the field count is wrong,
    /// minute/hour are not literals, or any field is out of range.
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CoreError::schedule_parse(format!(
                "expected 5 fields (minute hour day month weekday), got {}",
                fields.len()
            )));
        }

        let minute = parse_literal(fields[0], "minute", 0, 59)?;
        let hour = parse_literal(fields[1], "hour", 0, 23)?;
        validate_wildcard_field(fields[2], "day", 1, 31)?;
        validate_wildcard_field(fields[3], "month", 1, 12)?;
        validate_wildcard_field(fields[4], "weekday", 0, 6)?;

        Ok(Self { minute, hour, expression: expression.to_string() })
    }

    /// Next instant strictly after `now` matching the minute/hour fields.
    ///
    /// If today's match is not in the future, rolls forward by one day.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let candidate = Utc
            .with_ymd_and_hms(now.year(), now.month(), now.day(), self.hour, self.minute, 0)
            .single()
            .unwrap_or(now);

        if candidate > now {
            candidate
        } else {
            candidate + chrono::Duration::days(1)
        }
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression)
    }
}

fn parse_literal(field: &str, name: &str, min: u32, max: u32) -> Result<u32> {
    let value: u32 = field.parse().map_err(|_| {
        CoreError::schedule_parse(format!("{name} field must be a number, got '{field}'"))
    })?;
    if value < min || value > max {
        return Err(CoreError::schedule_parse(format!(
            "{name} field out of range: {value} not in {min}..={max}"
        )));
    }
    Ok(value)
}

fn validate_wildcard_field(field: &str, name: &str, min: u32, max: u32) -> Result<()> {
    if field == "*" {
        return Ok(());
    }
    parse_literal(field, name, min, max).map(|_| ())
}

mod duration_millis {
    //! Serde representation of `std::time::Duration` as integer millis.

    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, hour, minute, second).unwrap()
    }

    #[test]
    fn interval_first_run_is_now_plus_interval() {
        let schedule = Schedule::interval(Duration::from_secs(60)).unwrap();
        let now = at(12, 0, 0);

        assert_eq!(schedule.first_run(now), now + chrono::Duration::seconds(60));
    }

    #[test]
    fn zero_interval_rejected() {
        assert!(Schedule::interval(Duration::ZERO).is_err());
    }

    #[test]
    fn cron_next_today_when_in_future() {
        let expr = CronExpr::parse("30 14 * * *").unwrap();
        let now = at(12, 0, 0);

        assert_eq!(expr.next_after(now), at(14, 30, 0));
    }

    #[test]
    fn cron_rolls_forward_one_day_when_past() {
        let expr = CronExpr::parse("30 14 * * *").unwrap();
        let now = at(15, 0, 0);

        assert_eq!(expr.next_after(now), at(14, 30, 0) + chrono::Duration::days(1));
    }

    #[test]
    fn cron_exact_match_rolls_forward() {
        // Firing exactly at the match instant must not re-fire the same
        // minute.
        let expr = CronExpr::parse("0 9 * * *").unwrap();
        let now = at(9, 0, 0);

        assert_eq!(expr.next_after(now), at(9, 0, 0) + chrono::Duration::days(1));
    }

    #[test]
    fn cron_wrong_field_count_rejected() {
        assert!(CronExpr::parse("0 9 * *").is_err());
        assert!(CronExpr::parse("0 9 * * * *").is_err());
    }

    #[test]
    fn cron_out_of_range_rejected() {
        assert!(CronExpr::parse("60 9 * * *").is_err());
        assert!(CronExpr::parse("0 24 * * *").is_err());
        assert!(CronExpr::parse("0 9 32 * *").is_err());
        assert!(CronExpr::parse("0 9 * 13 *").is_err());
        assert!(CronExpr::parse("0 9 * * 7").is_err());
    }

    #[test]
    fn cron_non_numeric_minute_rejected() {
        assert!(CronExpr::parse("* 9 * * *").is_err());
        assert!(CronExpr::parse("abc 9 * * *").is_err());
    }

    #[test]
    fn cron_ignored_fields_accept_literals() {
        assert!(CronExpr::parse("0 9 15 6 3").is_ok());
    }

    #[test]
    fn once_is_not_rearmed() {
        let fire = at(10, 0, 0);
        let schedule = Schedule::once(fire);

        assert_eq!(schedule.first_run(at(9, 0, 0)), fire);
        assert_eq!(schedule.next_after(fire), None);
    }

    #[test]
    fn interval_next_is_strictly_future() {
        let schedule = Schedule::interval(Duration::from_millis(1000)).unwrap();
        let now = at(12, 0, 0);

        let next = schedule.next_after(now).unwrap();
        assert!(next > now);
        assert_eq!(next, now + chrono::Duration::milliseconds(1000));
    }
}
