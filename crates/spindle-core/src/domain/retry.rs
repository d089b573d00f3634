//! Retry policy: decides backoff delays.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff policy for retryable failures.
///
/// Exponential backoff with a cap:
/// `delay(attempt) = min(base_delay * multiplier^(attempt - 1), max_delay)`.
///
/// Example with base_delay=2s, multiplier=2.0, max_delay=60s:
/// - attempt 1: 2s
/// - attempt 2: 4s
/// - attempt 3: 8s
/// - attempt 6: 60s (capped at 64s)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for subsequent retries.
    pub multiplier: f64,

    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier,
            max_delay,
        }
    }

    /// Fixed delay on every retry (multiplier 1.0).
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
        }
    }

    /// Delay before retry number `attempt` (1-indexed).
    ///
    /// `attempt = 0` is treated as 1 so a miscounted caller still gets the
    /// base delay rather than a zero or negative exponent.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exponent = attempt.saturating_sub(1) as i32;
        let delay_secs = base_secs * self.multiplier.powi(exponent);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, Duration::from_secs(2))]
    #[case(2, Duration::from_secs(4))]
    #[case(3, Duration::from_secs(8))]
    #[case(4, Duration::from_secs(16))]
    fn exponential_backoff_doubles(#[case] attempt: u32, #[case] expected: Duration) {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(attempt), expected);
    }

    #[test]
    fn delay_is_capped_at_max() {
        let policy = RetryPolicy::new(Duration::from_secs(2), 2.0, Duration::from_secs(10));
        assert_eq!(policy.delay_for(10), Duration::from_secs(10));
    }

    #[test]
    fn fixed_policy_never_grows() {
        let policy = RetryPolicy::fixed(Duration::from_secs(5));
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(7), Duration::from_secs(5));
    }

    #[test]
    fn attempt_zero_falls_back_to_base_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), policy.base_delay);
    }
}
