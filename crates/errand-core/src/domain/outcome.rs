//! Outcome model: what one pass through the pipeline produced.
//!
//! Re-scheduling is a value, not an error. A stage that wants the task to run
//! again returns `Repeat` / `Retry`; the stage (or worker) that owns
//! re-enqueueing matches on it explicitly.

use chrono::{DateTime, Utc};
use std::time::Duration;

use super::errors::TaskError;
use crate::ports::clock::add_duration;

/// When a re-armed task becomes eligible again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAt {
    /// Relative to the moment the outcome is settled.
    After(Duration),

    /// Absolute instant (cron schedules).
    At(DateTime<Utc>),
}

impl RunAt {
    pub fn resolve(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            RunAt::After(delay) => add_duration(now, delay),
            RunAt::At(at) => at,
        }
    }
}

/// A retryable failure that still has budget left.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryRequest {
    pub delay: Duration,
    pub source: Option<TaskError>,
}

/// Result of running a task through (part of) the middleware chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Target returned a value.
    Finished(serde_json::Value),

    /// Target failed; nobody has handled it yet.
    Failed(TaskError),

    /// Repeatable task asks to be re-armed.
    Repeat(RunAt),

    /// Retry middleware asks for another attempt.
    Retry(RetryRequest),

    /// Task was canceled; nothing ran or nothing will be re-armed.
    Canceled,

    /// A stage consumed the outcome (re-enqueued, or logged and swallowed).
    Handled,
}

impl Outcome {
    /// Does this outcome ask for the task to be enqueued again?
    pub fn is_reschedule(&self) -> bool {
        matches!(self, Outcome::Repeat(_) | Outcome::Retry(_))
    }

    /// The eligibility requested by a `Repeat` / `Retry`, if any.
    pub fn run_at(&self) -> Option<RunAt> {
        match self {
            Outcome::Repeat(at) => Some(*at),
            Outcome::Retry(request) => Some(RunAt::After(request.delay)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn relative_run_at_resolves_from_now() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let at = RunAt::After(Duration::from_secs(11)).resolve(now);
        assert_eq!(at, Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 11).unwrap());
    }

    #[test]
    fn absolute_run_at_ignores_now() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let target = Utc.with_ymd_and_hms(2024, 1, 2, 1, 0, 0).unwrap();
        assert_eq!(RunAt::At(target).resolve(now), target);
    }

    #[test]
    fn retry_is_a_reschedule_with_relative_delay() {
        let outcome = Outcome::Retry(RetryRequest {
            delay: Duration::from_secs(26),
            source: Some(TaskError::connection("down")),
        });
        assert!(outcome.is_reschedule());
        assert_eq!(outcome.run_at(), Some(RunAt::After(Duration::from_secs(26))));
        assert!(!Outcome::Handled.is_reschedule());
    }
}
