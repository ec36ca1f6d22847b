//! Retry and backoff policy.

use std::time::Duration;

use crate::config::QueueConfig;
use crate::job::FailureKind;

/// What to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run again after `delay`.
    Retry { delay: Duration },
    /// Mark the job terminally Failed.
    GiveUp,
}

/// Exponential backoff with a ceiling, bounded by `max_attempts`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.backoff_multiplier,
        }
    }

    /// Delay before the attempt following `attempt` (1-based):
    /// `initial * multiplier^(attempt - 1)`, capped at `max_backoff`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let cap = self.max_backoff.as_millis() as f64;

        if !millis.is_finite() || millis >= cap {
            self.max_backoff
        } else {
            Duration::from_millis(millis as u64)
        }
    }

    /// Decide after attempt number `attempt` failed with `kind`.
    ///
    /// Permanent failures and exhausted jobs give up; transient and
    /// ambiguous failures retry. Ambiguous retries are reconciled by the
    /// stage before any external call is repeated.
    pub fn decide(&self, attempt: u32, kind: FailureKind) -> RetryDecision {
        if kind == FailureKind::Permanent || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            delay: self.delay_for(attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(5000),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_delays_grow_exponentially_then_cap() {
        let p = policy();
        assert_eq!(p.delay_for(1), Duration::from_millis(1000));
        assert_eq!(p.delay_for(2), Duration::from_millis(2000));
        assert_eq!(p.delay_for(3), Duration::from_millis(4000));
        assert_eq!(p.delay_for(4), Duration::from_millis(5000));
        assert_eq!(p.delay_for(200), Duration::from_millis(5000));
    }

    #[test]
    fn test_decide_retries_transient_until_exhausted() {
        let p = policy();
        assert_eq!(
            p.decide(1, FailureKind::Transient),
            RetryDecision::Retry {
                delay: Duration::from_millis(1000)
            }
        );
        assert!(matches!(
            p.decide(2, FailureKind::Ambiguous),
            RetryDecision::Retry { .. }
        ));
        assert_eq!(p.decide(3, FailureKind::Transient), RetryDecision::GiveUp);
    }

    #[test]
    fn test_decide_never_retries_permanent() {
        assert_eq!(policy().decide(1, FailureKind::Permanent), RetryDecision::GiveUp);
    }

    #[test]
    fn test_from_config() {
        let config = QueueConfig::default()
            .with_max_attempts(5)
            .with_backoff(250, 10_000);
        let p = RetryPolicy::from_config(&config);
        assert_eq!(p.max_attempts, 5);
        assert_eq!(p.initial_backoff, Duration::from_millis(250));
        assert_eq!(p.max_backoff, Duration::from_millis(10_000));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: delays never decrease with the attempt number and never exceed the cap.
        #[test]
        fn delays_are_monotonic_and_capped(
            initial in 1u64..10_000,
            extra in 0u64..100_000,
            multiplier in 1.0f64..4.0,
            attempt in 1u32..64,
        ) {
            let p = RetryPolicy {
                max_attempts: 10,
                initial_backoff: Duration::from_millis(initial),
                max_backoff: Duration::from_millis(initial + extra),
                multiplier,
            };
            let this = p.delay_for(attempt);
            let next = p.delay_for(attempt + 1);
            prop_assert!(this <= next);
            prop_assert!(next <= p.max_backoff);
        }

        /// Property: no failure kind ever earns an attempt beyond max_attempts.
        #[test]
        fn never_retries_past_max_attempts(
            max_attempts in 1u32..10,
            attempt in 0u32..20,
            kind_idx in 0usize..3,
        ) {
            let kind = [FailureKind::Transient, FailureKind::Permanent, FailureKind::Ambiguous][kind_idx];
            let p = RetryPolicy { max_attempts, ..policy() };
            if let RetryDecision::Retry { .. } = p.decide(attempt, kind) {
                prop_assert!(attempt < max_attempts);
                prop_assert_ne!(kind, FailureKind::Permanent);
            }
        }
    }
}
