//! Retry policy: decides backoff delays.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::non_negative_secs;
use crate::error::ConfigError;

/// Retry policy for failed attempts.
///
/// Delay before re-queueing after failed attempt `n` (1-indexed):
/// `min(backoff_base * backoff_factor^(n-1), max_delay)`.
///
/// Construction validates every field, so a `RetryPolicy` value is always
/// usable. Deserialization goes through the same checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRetryPolicy", into = "RawRetryPolicy")]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_base: Duration,
    backoff_factor: f64,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        backoff_base: Duration,
        backoff_factor: f64,
        max_delay: Duration,
    ) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::invalid(
                "retry_policy.max_attempts",
                "must be at least 1",
            ));
        }
        if !backoff_factor.is_finite() || backoff_factor < 1.0 {
            return Err(ConfigError::invalid(
                "retry_policy.backoff_factor",
                format!("must be a finite number >= 1.0, got {backoff_factor}"),
            ));
        }
        if max_delay < backoff_base {
            return Err(ConfigError::invalid(
                "retry_policy.max_delay",
                format!("must be >= backoff_base ({backoff_base:?}), got {max_delay:?}"),
            ));
        }
        Ok(Self {
            max_attempts,
            backoff_base,
            backoff_factor,
            max_delay,
        })
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff_base: Duration::ZERO,
            backoff_factor: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Delay to wait after failed attempt `attempt` (1-indexed).
    ///
    /// `attempt = 0` is treated like the first attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.backoff_base.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !raw.is_finite() || raw >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(raw)
    }

    /// Have `attempts` used up the budget?
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// On-disk shape: durations as float seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawRetryPolicy {
    max_attempts: u32,
    backoff_base_seconds: f64,
    backoff_factor: f64,
    max_delay_seconds: f64,
}

impl TryFrom<RawRetryPolicy> for RetryPolicy {
    type Error = ConfigError;

    fn try_from(raw: RawRetryPolicy) -> Result<Self, Self::Error> {
        let base = non_negative_secs("retry_policy.backoff_base_seconds", raw.backoff_base_seconds)?;
        let max = non_negative_secs("retry_policy.max_delay_seconds", raw.max_delay_seconds)?;
        RetryPolicy::new(raw.max_attempts, base, raw.backoff_factor, max)
    }
}

impl From<RetryPolicy> for RawRetryPolicy {
    fn from(policy: RetryPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            backoff_base_seconds: policy.backoff_base.as_secs_f64(),
            backoff_factor: policy.backoff_factor,
            max_delay_seconds: policy.max_delay.as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn doubling() -> RetryPolicy {
        RetryPolicy::new(10, Duration::from_secs(1), 2.0, Duration::from_secs(30)).unwrap()
    }

    #[rstest]
    #[case(1, 1)]
    #[case(2, 2)]
    #[case(3, 4)]
    #[case(4, 8)]
    #[case(5, 16)]
    #[case(6, 30)]
    #[case(40, 30)]
    fn exponential_backoff_is_capped(#[case] attempt: u32, #[case] expected_secs: u64) {
        assert_eq!(doubling().delay_for(attempt), Duration::from_secs(expected_secs));
    }

    #[test]
    fn attempt_zero_uses_base_delay() {
        assert_eq!(doubling().delay_for(0), Duration::from_secs(1));
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        assert_eq!(doubling().delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn exhaustion_follows_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::ZERO, 1.0, Duration::ZERO).unwrap();
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
    }

    #[rstest]
    #[case::zero_attempts(0, 1.0, 1, 2)]
    #[case::shrinking_factor(3, 0.5, 1, 2)]
    #[case::nan_factor(3, f64::NAN, 1, 2)]
    #[case::cap_below_base(3, 2.0, 5, 2)]
    fn invalid_policies_are_rejected(
        #[case] max_attempts: u32,
        #[case] factor: f64,
        #[case] base_secs: u64,
        #[case] max_secs: u64,
    ) {
        let result = RetryPolicy::new(
            max_attempts,
            Duration::from_secs(base_secs),
            factor,
            Duration::from_secs(max_secs),
        );
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn deserialization_validates() {
        let ok: RetryPolicy = serde_json::from_value(serde_json::json!({
            "max_attempts": 4,
            "backoff_base_seconds": 0.5,
            "backoff_factor": 3.0,
            "max_delay_seconds": 10.0,
        }))
        .unwrap();
        assert_eq!(ok.max_attempts(), 4);
        assert_eq!(ok.backoff_base(), Duration::from_millis(500));

        let bad = serde_json::from_value::<RetryPolicy>(serde_json::json!({
            "max_attempts": 0,
            "backoff_base_seconds": 1.0,
            "backoff_factor": 2.0,
            "max_delay_seconds": 10.0,
        }));
        assert!(bad.is_err());
    }
}
