//! Retry policy: decides backoff delays for transient failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_ms;

/// Retry policy for head-of-line requests that fail transiently.
///
/// Default is a fixed interval (`multiplier = 1.0`); anything above 1.0
/// turns it into exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt. A request is sent at most
    /// `max_retries + 1` times.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry.
    #[serde(default = "default_interval", with = "duration_ms")]
    pub interval: Duration,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

/// Upper bound for a grown backoff delay. A configured `interval` above this
/// is still honoured as-is.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

fn default_max_retries() -> u32 {
    5
}

fn default_interval() -> Duration {
    Duration::from_millis(3000)
}

fn default_multiplier() -> f64 {
    1.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            interval: default_interval(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next send, given how many sends already failed
    /// (1-indexed).
    ///
    /// delay = interval * multiplier^(failures - 1), capped at
    /// `max(interval, MAX_BACKOFF)`. A multiplier that is not finite or is
    /// below 1.0 counts as 1.0.
    pub fn next_delay(&self, failures: u32) -> Duration {
        let cap = self.interval.max(MAX_BACKOFF);
        let factor = if self.multiplier.is_finite() && self.multiplier >= 1.0 {
            let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
            self.multiplier.powi(exponent)
        } else {
            1.0
        };
        Duration::try_from_secs_f64(self.interval.as_secs_f64() * factor).map_or(cap, |d| d.min(cap))
    }

    /// `multiplier` must be finite and at least 1.0.
    pub fn has_valid_multiplier(&self) -> bool {
        self.multiplier.is_finite() && self.multiplier >= 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_policy_is_fixed_interval() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.next_delay(1), Duration::from_millis(3000));
        assert_eq!(policy.next_delay(5), Duration::from_millis(3000));
    }

    #[test]
    fn multiplier_gives_exponential_backoff() {
        let policy = RetryPolicy {
            max_retries: 5,
            interval: Duration::from_secs(2),
            multiplier: 2.0,
        };

        assert_eq!(policy.next_delay(1), Duration::from_secs(2));
        assert_eq!(policy.next_delay(2), Duration::from_secs(4));
        assert_eq!(policy.next_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn deserializes_with_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"interval": 1000}"#).unwrap();
        assert_eq!(policy.interval, Duration::from_secs(1));
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.multiplier, 1.0);
    }

    #[rstest]
    #[case::negative(-2.0, 2, Duration::from_secs(1))]
    #[case::nan(f64::NAN, 3, Duration::from_secs(1))]
    #[case::below_one(0.5, 4, Duration::from_secs(1))]
    #[case::huge(1e300, 3, MAX_BACKOFF)]
    #[case::infinite(f64::INFINITY, 2, Duration::from_secs(1))]
    #[case::many_failures(2.0, u32::MAX, MAX_BACKOFF)]
    fn odd_multipliers_never_panic(#[case] multiplier: f64, #[case] failures: u32, #[case] expected: Duration) {
        let policy = RetryPolicy {
            max_retries: 5,
            interval: Duration::from_secs(1),
            multiplier,
        };
        assert_eq!(policy.next_delay(failures), expected);
    }

    #[test]
    fn long_interval_is_not_clipped() {
        let policy = RetryPolicy {
            max_retries: 5,
            interval: Duration::from_secs(600),
            multiplier: 2.0,
        };
        assert_eq!(policy.next_delay(1), Duration::from_secs(600));
        assert_eq!(policy.next_delay(4), Duration::from_secs(600));
    }
}
