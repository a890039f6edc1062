use std::time::Duration;

use axiomflow_core::config::RetryConfig;
use axiomflow_core::error::Result;
use axiomflow_core::types::BackoffStrategy;
use axiomflow_dsl::schema::RetrySpec;

/// How many times a unit of work is attempted and how long to wait between
/// attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, strategy: BackoffStrategy) -> Self {
        Self {
            max_attempts,
            strategy,
            ..Self::default()
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Retry immediately, up to `max_attempts` times.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, BackoffStrategy::Exponential).with_base_delay(Duration::ZERO)
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            strategy: config.strategy,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// A step's declared retry block, with unset delays taken from `defaults`.
    pub fn from_spec(spec: &RetrySpec, defaults: &RetryConfig) -> Result<Self> {
        Ok(Self {
            max_attempts: spec.max_attempts,
            strategy: spec.strategy()?,
            base_delay: Duration::from_millis(spec.base_delay_ms.unwrap_or(defaults.base_delay_ms)),
            max_delay: Duration::from_millis(spec.max_delay_ms.unwrap_or(defaults.max_delay_ms)),
        })
    }

    /// Delay before the next attempt, given `attempt` failures so far.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = match self.strategy {
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let factor = 1u32
                    .checked_shl(attempt.saturating_sub(1))
                    .unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::new(5, BackoffStrategy::Linear)
            .with_base_delay(ms(100))
            .with_max_delay(ms(250));
        assert_eq!(policy.backoff(1), ms(100));
        assert_eq!(policy.backoff(2), ms(200));
        assert_eq!(policy.backoff(3), ms(250));
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::new(5, BackoffStrategy::Exponential)
            .with_base_delay(ms(100))
            .with_max_delay(ms(1000));
        assert_eq!(policy.backoff(1), ms(100));
        assert_eq!(policy.backoff(2), ms(200));
        assert_eq!(policy.backoff(3), ms(400));
        assert_eq!(policy.backoff(4), ms(800));
        assert_eq!(policy.backoff(5), ms(1000));
    }

    #[test]
    fn test_exponential_backoff_does_not_overflow() {
        let policy = RetryPolicy::new(100, BackoffStrategy::Exponential);
        assert_eq!(policy.backoff(64), policy.max_delay);
        assert_eq!(policy.backoff(u32::MAX), policy.max_delay);
    }

    #[test]
    fn test_defaults_follow_config() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.strategy, BackoffStrategy::Exponential);
        assert_eq!(policy.base_delay, ms(100));
        assert_eq!(policy.max_delay, ms(1000));
    }

    #[test]
    fn test_from_spec_fills_unset_delays() {
        let spec = RetrySpec {
            max_attempts: 4,
            backoff_strategy: Some("linear".into()),
            base_delay_ms: Some(5),
            max_delay_ms: None,
        };
        let policy = RetryPolicy::from_spec(&spec, &RetryConfig::default()).unwrap();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.strategy, BackoffStrategy::Linear);
        assert_eq!(policy.base_delay, ms(5));
        assert_eq!(policy.max_delay, ms(1000));
    }

    #[test]
    fn test_immediate_has_no_delay() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(policy.backoff(1), Duration::ZERO);
        assert_eq!(policy.backoff(3), Duration::ZERO);
    }
}
