//! Cron schedules for repeatable tasks.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("invalid cron expression `{expression}`: {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("cron expression `{0}` has no upcoming time")]
    NoUpcoming(String),
}

/// A parsed cron expression.
///
/// Accepts the `cron` crate's seconds-resolution syntax (6 or 7 fields) and
/// the classic 5-field crontab syntax, which fires at second 0.
/// All times are UTC.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let trimmed = expression.trim();
        let normalized = if trimmed.split_whitespace().count() == 5 {
            format!("0 {trimmed}")
        } else {
            trimmed.to_string()
        };

        let schedule =
            Schedule::from_str(&normalized).map_err(|err| ScheduleError::InvalidCron {
                expression: expression.to_string(),
                reason: err.to_string(),
            })?;

        Ok(Self {
            expression: trimmed.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First matching instant strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

impl FromStr for CronSchedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn five_field_crontab_fires_at_second_zero() {
        let daily = CronSchedule::parse("0 1 * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 0, 30, 15).unwrap();
        assert_eq!(
            daily.next_after(now),
            Some(Utc.with_ymd_and_hms(2024, 3, 10, 1, 0, 0).unwrap())
        );
    }

    #[test]
    fn seconds_resolution_expression() {
        let every_ten = CronSchedule::parse("*/10 * * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 3).unwrap();
        assert_eq!(
            every_ten.next_after(now),
            Some(Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 10).unwrap())
        );
    }

    #[test]
    fn next_after_is_strictly_later() {
        let every_ten = CronSchedule::parse("*/10 * * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 10).unwrap();
        assert_eq!(
            every_ten.next_after(now),
            Some(Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 20).unwrap())
        );
    }

    #[test]
    fn garbage_is_rejected() {
        let err = CronSchedule::parse("every tuesday").unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidCron { .. }));
    }
}
