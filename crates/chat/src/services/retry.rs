//! Reconnect scheduling policies.

use std::time::Duration;

use waterchat_config::{ReconnectConfig, ReconnectStrategy};

/// Decides how long to wait before reconnect attempt `attempt` (1-based).
pub trait RetryPolicy: Send + Sync {
    /// `None` means stop reconnecting.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Same delay every time, optionally capped in attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedDelay {
    pub delay: Duration,
    pub max_attempts: Option<u32>,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000))
    }
}

impl RetryPolicy for FixedDelay {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        within_budget(attempt, self.max_attempts).then_some(self.delay)
    }
}

/// Doubles the delay per attempt up to `max`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub max_attempts: Option<u32>,
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !within_budget(attempt, self.max_attempts) {
            return None;
        }

        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .initial
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max);
        Some(delay.min(self.max))
    }
}

fn within_budget(attempt: u32, max_attempts: Option<u32>) -> bool {
    max_attempts.map_or(true, |max| attempt <= max)
}

/// Build the policy described by the `chat.reconnect` section.
pub fn policy_from_config(config: &ReconnectConfig) -> Box<dyn RetryPolicy> {
    let initial = Duration::from_millis(config.delay_ms);
    match config.strategy {
        ReconnectStrategy::Fixed => Box::new(FixedDelay {
            delay: initial,
            max_attempts: config.max_attempts,
        }),
        ReconnectStrategy::Exponential => Box::new(ExponentialBackoff {
            initial,
            max: Duration::from_millis(config.max_delay_ms.max(config.delay_ms)),
            max_attempts: config.max_attempts,
        }),
    }
}
