//! Retry policy: decides when a failed task is due again.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Upper bound for a single backoff step.
const MAX_DELAY: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Retry policy for failed dispatch attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,

    /// Backoff multiplier. `1.0` keeps the delay constant.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Same delay after every failure.
    pub fn constant(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            multiplier: 1.0,
        }
    }

    /// Calculate the delay before the next attempt.
    ///
    /// # Arguments
    /// * `attempts` - Number of attempts already made (1-indexed).
    ///
    /// delay = base_delay * multiplier^(attempts - 1), never below `base_delay`
    ///
    /// Example with base_delay=60s, multiplier=2.0:
    /// - attempt 1 (first failure): 60s
    /// - attempt 2: 120s
    /// - attempt 3: 240s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        if self.multiplier <= 1.0 {
            return self.base_delay;
        }
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(delay_secs)
            .unwrap_or(MAX_DELAY)
            .clamp(self.base_delay, MAX_DELAY.max(self.base_delay))
    }

    /// Instant at which a task that just failed its `attempts`-th attempt is due again.
    pub fn retry_at(&self, now: DateTime<Utc>, attempts: u32) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.next_delay(attempts))
            .unwrap_or_else(|_| chrono::Duration::days(30));
        now.checked_add_signed(delay).unwrap_or(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn constant_policy_never_grows() {
        let policy = RetryPolicy::constant(Duration::from_secs(60));
        assert_eq!(policy.next_delay(1), Duration::from_secs(60));
        assert_eq!(policy.next_delay(42), Duration::from_secs(60));
    }

    #[test]
    fn exponential_backoff_increases() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
        };

        let d1 = policy.next_delay(1);
        let d2 = policy.next_delay(2);
        let d3 = policy.next_delay(3);

        assert!(d2 > d1);
        assert!(d3 > d2);
        assert_eq!(d1, Duration::from_secs(2));
        assert_eq!(d2, Duration::from_secs(4));
        assert_eq!(d3, Duration::from_secs(8));
    }

    #[test]
    fn huge_exponents_are_capped() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(60),
            multiplier: 10.0,
        };
        assert_eq!(policy.next_delay(500), MAX_DELAY);
    }

    #[test]
    fn retry_at_is_now_plus_delay() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let policy = RetryPolicy::constant(Duration::from_secs(90));
        assert_eq!(policy.retry_at(now, 1), now + chrono::Duration::seconds(90));
    }
}
