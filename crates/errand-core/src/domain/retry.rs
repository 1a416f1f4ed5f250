//! Retry policy: which failures are retried, how often, and how long to wait.

use std::collections::HashSet;
use std::time::Duration;

use super::errors::{ErrorKind, TaskError};

/// Upper bound for any computed retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30 * 60);

/// Backoff curve between attempts.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Backoff {
    /// `min(30 min, retries^4 + 10 s)`: 11 s, 26 s, 91 s, 266 s, ...
    #[default]
    Superlinear,

    /// Same delay every time.
    Fixed(Duration),

    /// `base * multiplier^(retries - 1)`, capped at `max`.
    Exponential {
        base: Duration,
        multiplier: f64,
        max: Duration,
    },
}

impl Backoff {
    /// Delay before the next attempt.
    ///
    /// # Arguments
    /// * `retries` - Number of retries scheduled so far, including this one (1-indexed).
    pub fn delay(&self, retries: u32) -> Duration {
        match self {
            Backoff::Superlinear => {
                let secs = u64::from(retries).saturating_pow(4).saturating_add(10);
                Duration::from_secs(secs).min(MAX_RETRY_DELAY)
            }
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential {
                base,
                multiplier,
                max,
            } => {
                let exponent = i32::try_from(retries.saturating_sub(1)).unwrap_or(i32::MAX);
                let secs = base.as_secs_f64() * multiplier.powi(exponent);
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    *max
                } else {
                    Duration::from_secs_f64(secs.max(0.0))
                }
            }
        }
    }
}

/// Which failures qualify for a retry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RetryOn {
    #[default]
    Any,
    Kinds(HashSet<ErrorKind>),
}

impl RetryOn {
    pub fn matches(&self, err: &TaskError) -> bool {
        match self {
            RetryOn::Any => true,
            RetryOn::Kinds(kinds) => kinds.contains(&err.kind()),
        }
    }
}

/// Retry policy for failed tasks.
///
/// The default allows no retries at all; callers opt in per task or per
/// worker (through the retry middleware).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_on: RetryOn,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Three superlinear retries for connection failures only.
    pub fn for_connection_errors() -> Self {
        Self::new(3).retry_on([ErrorKind::Connection])
    }

    pub fn retry_on(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retry_on = RetryOn::Kinds(kinds.into_iter().collect());
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn is_retryable(&self, err: &TaskError) -> bool {
        self.retry_on.matches(err)
    }

    /// Is the `retries`-th retry still within budget?
    pub fn allows(&self, retries: u32) -> bool {
        retries <= self.max_retries
    }

    pub fn next_delay(&self, retries: u32) -> Duration {
        self.backoff.delay(retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 11)]
    #[case(2, 26)]
    #[case(3, 91)]
    #[case(4, 266)]
    #[case(6, 1306)]
    #[case(7, 1800)]
    #[case(10, 1800)]
    #[case(12, 1800)]
    #[case(u32::MAX, 1800)]
    fn superlinear_backoff_curve(#[case] retries: u32, #[case] expected_secs: u64) {
        assert_eq!(
            Backoff::Superlinear.delay(retries),
            Duration::from_secs(expected_secs)
        );
    }

    #[test]
    fn exponential_backoff_increases_until_cap() {
        let backoff = Backoff::Exponential {
            base: Duration::from_secs(2),
            multiplier: 2.0,
            max: Duration::from_secs(10),
        };

        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(2), Duration::from_secs(4));
        assert_eq!(backoff.delay(3), Duration::from_secs(8));
        assert_eq!(backoff.delay(4), Duration::from_secs(10));
        assert_eq!(backoff.delay(400), Duration::from_secs(10));
    }

    #[test]
    fn default_policy_never_retries() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 0);
        assert!(!policy.allows(1));
        assert!(policy.is_retryable(&TaskError::other("x")));
    }

    #[test]
    fn kind_filter_only_matches_listed_kinds() {
        let policy = RetryPolicy::for_connection_errors();
        assert!(policy.is_retryable(&TaskError::connection("refused")));
        assert!(!policy.is_retryable(&TaskError::timeout("slow")));
        assert!(policy.allows(3));
        assert!(!policy.allows(4));
    }
}
