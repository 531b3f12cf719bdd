//! Linear backoff between attempts of the same state.

use crate::config::ExecutionConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff policy: every retry waits one step longer than the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Increment added before each retry.
    pub step: Duration,
    /// Cap on a single delay.
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            step: Duration::from_millis(250),
            max_delay: None,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given step and no cap.
    #[must_use]
    pub const fn new(step: Duration) -> Self {
        Self {
            step,
            max_delay: None,
        }
    }

    /// Caps a single delay.
    #[must_use]
    pub const fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Builds the policy from configuration.
    #[must_use]
    pub fn from_config(config: &ExecutionConfig) -> Self {
        let policy = Self::new(config.retry_delay_step());
        match config.max_retry_delay_ms {
            Some(max) => policy.with_max_delay(Duration::from_millis(max)),
            None => policy,
        }
    }

    /// The delay following `previous`.
    #[must_use]
    pub fn next_delay(&self, previous: Duration) -> Duration {
        let delay = previous.saturating_add(self.step);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

/// Backoff progress within one state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Backoff {
    delay: Duration,
    retries: u32,
}

impl Backoff {
    /// Starts a fresh backoff.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            retries: 0,
        }
    }

    /// Advances to the next retry and returns how long to wait before it.
    pub fn advance(&mut self, policy: &RetryPolicy) -> Duration {
        self.delay = policy.next_delay(self.delay);
        self.retries += 1;
        self.delay
    }

    /// Retries scheduled so far.
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_delays() {
        let policy = RetryPolicy::default();
        let mut backoff = Backoff::new();

        let delays: Vec<u128> = (0..3).map(|_| backoff.advance(&policy).as_millis()).collect();
        assert_eq!(delays, vec![250, 500, 750]);
        assert_eq!(backoff.retries(), 3);
    }

    #[test]
    fn test_delay_cap() {
        let policy = RetryPolicy::new(Duration::from_millis(300))
            .with_max_delay(Duration::from_millis(500));
        let mut backoff = Backoff::new();

        assert_eq!(backoff.advance(&policy), Duration::from_millis(300));
        assert_eq!(backoff.advance(&policy), Duration::from_millis(500));
        assert_eq!(backoff.advance(&policy), Duration::from_millis(500));
    }

    #[test]
    fn test_from_config() {
        let config = ExecutionConfig::new()
            .with_retry_delay_step_ms(100)
            .with_max_retry_delay_ms(150);
        let policy = RetryPolicy::from_config(&config);

        assert_eq!(policy.step, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Some(Duration::from_millis(150)));
    }
}
