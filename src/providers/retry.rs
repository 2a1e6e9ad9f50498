//! Retry policy for transient provider failures
//!
//! Exponential backoff between attempts. An upstream `Retry-After` hint
//! replaces the computed delay for that attempt.

use super::ProviderError;
use crate::config::ProviderDescriptor;
use std::time::Duration;

/// Retry behaviour for one provider
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for computed delays
    pub max_delay: Duration,
    /// Multiplier applied per retry
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Policy described by a provider's tunables
    pub fn from_descriptor(descriptor: &ProviderDescriptor) -> Self {
        Self {
            max_retries: descriptor.max_retries,
            initial_delay: Duration::from_millis(descriptor.initial_backoff_ms),
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Computed delay before retry number `attempt` (1-indexed, 0 means no delay)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = delay_secs.min(self.max_delay.as_secs_f64());

        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    /// Whether another attempt is allowed after `attempt` retries
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Delay before retry number `attempt` after `error`, or `None` when the
    /// error must propagate
    pub fn backoff_for(&self, attempt: u32, error: &ProviderError) -> Option<Duration> {
        if !error.is_retryable() || !self.should_retry(attempt.saturating_sub(1)) {
            return None;
        }
        Some(
            error
                .retry_after()
                .unwrap_or_else(|| self.delay_for_attempt(attempt)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
        assert!(!RetryPolicy::no_retry().should_retry(0));
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(350));

        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(500), Duration::from_millis(350));
    }

    #[test]
    fn test_retry_after_hint_wins() {
        let policy = RetryPolicy::default();
        let limited = ProviderError::rate_limited(Some(Duration::from_secs(2)), "slow down");
        assert_eq!(policy.backoff_for(1, &limited), Some(Duration::from_secs(2)));

        let timeout = ProviderError::timeout("late");
        assert_eq!(policy.backoff_for(2, &timeout), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_budget_and_kind_limit_retries() {
        let policy = RetryPolicy::default().with_max_retries(2);
        let timeout = ProviderError::timeout("late");
        assert!(policy.backoff_for(2, &timeout).is_some());
        assert!(policy.backoff_for(3, &timeout).is_none());

        assert!(policy.backoff_for(1, &ProviderError::auth("denied")).is_none());
        assert!(policy.backoff_for(1, &ProviderError::invalid_request("bad")).is_none());
    }
}
