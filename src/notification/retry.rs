//! Retry timing: provider retry delays for notifications and exponential
//! backoff for workers hitting infrastructure failures.

use std::time::Duration;

use rand::Rng;

use crate::provider::{NotificationProvider, DEFAULT_RETRY_DELAY_SECS};

/// Spread applied to notification retry delays (±10%)
pub const RETRY_JITTER_FACTOR: f64 = 0.1;

/// Randomize `base` by up to `factor` in either direction
pub fn jittered(base: Duration, factor: f64) -> Duration {
    let millis = base.as_millis() as f64;
    if factor <= 0.0 || millis <= 0.0 {
        return base;
    }
    let range = millis * factor;
    let jitter = rand::rng().random_range(-range..=range);
    Duration::from_millis((millis + jitter).max(1.0) as u64)
}

/// Delay before automatic retry number `retry` (1-based).
///
/// Uses the provider's retry strategy when the failed attempt went through
/// one, the default delay otherwise.
pub fn retry_delay(provider: Option<&NotificationProvider>, retry: u32) -> Duration {
    let base_secs = provider
        .map(|p| p.retry_delay_secs(retry))
        .unwrap_or(DEFAULT_RETRY_DELAY_SECS);
    jittered(Duration::from_secs(base_secs), RETRY_JITTER_FACTOR)
}

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Initial delay in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential growth
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Delay for the `attempt`-th consecutive failure (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let base = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay_ms as f64).max(1.0);
        jittered(Duration::from_millis(capped as u64), self.jitter_factor)
    }
}

/// Stateful backoff over consecutive failures
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn with_config(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Get the next delay duration
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;
        self.config.delay_for(self.attempt)
    }

    /// Reset the backoff to initial state
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
