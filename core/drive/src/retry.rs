//! Retry policy for batch uploads.
//!
//! The default policy makes five immediate attempts per item; backoff and the
//! retryable-error predicate are configurable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use photodrive_common::Error;

/// Default number of attempts per item, first try included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Retry immediately.
    #[default]
    None,
    /// Wait the same amount before every retry.
    Fixed { delay_ms: u64 },
    /// Exponential growth from `initial_ms`, capped at `max_ms`.
    Exponential {
        initial_ms: u64,
        max_ms: u64,
        multiplier: f64,
        /// Add +/-25% random jitter.
        #[serde(default)]
        jitter: bool,
    },
}

impl Backoff {
    /// Delay before retry number `retry` (0-based).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential {
                initial_ms,
                max_ms,
                multiplier,
                jitter,
            } => {
                let base_delay = initial_ms as f64 * multiplier.powi(retry as i32);
                let capped_delay = base_delay.min(max_ms as f64);

                let final_delay = if jitter {
                    let jitter_factor = 0.75 + (rand::random::<f64>() * 0.5);
                    capped_delay * jitter_factor
                } else {
                    capped_delay
                };

                Duration::from_millis(final_delay as u64)
            }
        }
    }
}

/// Serializable part of a [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per item, first try included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay schedule between attempts.
    #[serde(default)]
    pub backoff: Backoff,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::None,
        }
    }
}

/// Retry policy: attempt budget, delay schedule and retryable-error predicate.
#[derive(Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
    retry_if: fn(&Error) -> bool,
}

impl RetryPolicy {
    /// Create a policy with `max_attempts` immediate attempts.
    ///
    /// A budget of zero is raised to one: every item is tried at least once.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::None,
            retry_if: Error::is_retryable,
        }
    }

    /// Try every operation exactly once.
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    /// Set the delay schedule.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the predicate deciding which errors are worth another attempt.
    pub fn with_retry_if(mut self, retry_if: fn(&Error) -> bool) -> Self {
        self.retry_if = retry_if;
        self
    }

    /// Total attempts per operation.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay schedule.
    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Decide what happens after attempt number `attempt` (1-based) failed with `err`.
    ///
    /// Returns the delay before the next attempt, or `None` to give up.
    pub fn next_delay(&self, attempt: u32, err: &Error) -> Option<Duration> {
        if attempt >= self.max_attempts || !(self.retry_if)(err) {
            return None;
        }
        Some(self.backoff.delay_for_retry(attempt.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts).with_backoff(config.backoff)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> Error {
        Error::Network("connection refused".to_string())
    }

    #[test]
    fn test_default_policy_allows_five_attempts() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 5);

        for attempt in 1..5 {
            assert_eq!(policy.next_delay(attempt, &network()), Some(Duration::ZERO));
        }
        assert_eq!(policy.next_delay(5, &network()), None);
    }

    #[test]
    fn test_non_retryable_error_stops_immediately() {
        let policy = RetryPolicy::default();
        let err = Error::InvalidInput("bad page size".to_string());
        assert_eq!(policy.next_delay(1, &err), None);
    }

    #[test]
    fn test_custom_predicate() {
        let policy = RetryPolicy::new(3).with_retry_if(|err| matches!(err, Error::Api { .. }));

        assert_eq!(policy.next_delay(1, &network()), None);
        let api = Error::Api {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert!(policy.next_delay(1, &api).is_some());
    }

    #[test]
    fn test_attempt_zero_does_not_underflow() {
        let policy = RetryPolicy::new(3).with_backoff(Backoff::Fixed { delay_ms: 100 });
        assert_eq!(
            policy.next_delay(0, &network()),
            Some(Duration::from_millis(100))
        );
    }

    #[test]
    fn test_zero_attempts_is_raised_to_one() {
        let policy = RetryPolicy::new(0);
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.next_delay(1, &network()), None);
    }

    #[test]
    fn test_exponential_delay_calculation() {
        let backoff = Backoff::Exponential {
            initial_ms: 1000,
            max_ms: 60_000,
            multiplier: 2.0,
            jitter: false,
        };

        assert_eq!(backoff.delay_for_retry(0), Duration::from_secs(1));
        assert_eq!(backoff.delay_for_retry(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_for_retry(2), Duration::from_secs(4));
    }

    #[test]
    fn test_max_delay_cap() {
        let backoff = Backoff::Exponential {
            initial_ms: 1000,
            max_ms: 10_000,
            multiplier: 10.0,
            jitter: false,
        };

        // 1 * 10^5 = 100000 seconds, but should be capped at 10
        assert_eq!(backoff.delay_for_retry(5), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let backoff = Backoff::Exponential {
            initial_ms: 1000,
            max_ms: 1000,
            multiplier: 1.0,
            jitter: true,
        };

        for _ in 0..50 {
            let delay = backoff.delay_for_retry(0);
            assert!(delay >= Duration::from_millis(750));
            assert!(delay <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn test_policy_from_config() {
        let config: RetryConfig = serde_json::from_str(
            r#"{"max_attempts": 3, "backoff": {"kind": "fixed", "delay_ms": 250}}"#,
        )
        .unwrap();
        let policy = RetryPolicy::from(&config);

        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(
            policy.next_delay(1, &network()),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_config_defaults() {
        let config: RetryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RetryConfig::default());
    }
}
