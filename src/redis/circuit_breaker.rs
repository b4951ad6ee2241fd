//! Circuit breaker shared by the Redis queue and the PostgreSQL store.
//!
//! After `failure_threshold` consecutive failures the breaker opens and
//! callers fail fast. Once `reset_timeout_seconds` have passed it lets trial
//! calls through (half-open); `success_threshold` successes close it again,
//! any failure reopens it.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Breaker thresholds, configurable per backing service
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_seconds: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_reset_timeout() -> u64 {
    30
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            reset_timeout_seconds: default_reset_timeout(),
        }
    }
}

/// Lock-free breaker; timestamps are monotonic offsets from `epoch`
pub struct CircuitBreaker {
    name: &'static str,
    state: AtomicU8,
    failures: AtomicU32,
    half_open_successes: AtomicU32,
    opened_at_ms: AtomicU64,
    epoch: Instant,
    failure_threshold: u32,
    success_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: &CircuitBreakerConfig) -> Self {
        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            failures: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            epoch: Instant::now(),
            failure_threshold: config.failure_threshold.max(1),
            success_threshold: config.success_threshold.max(1),
            reset_timeout: Duration::from_secs(config.reset_timeout_seconds),
        }
    }

    /// Test hook: same thresholds with a sub-second reset timeout
    #[cfg(test)]
    fn with_reset_timeout(mut self, reset_timeout: Duration) -> Self {
        self.reset_timeout = reset_timeout;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current state, moving OPEN to HALF_OPEN once the reset timeout passed
    pub fn state(&self) -> CircuitState {
        let current = CircuitState::from_u8(self.state.load(Ordering::Acquire));
        if current != CircuitState::Open || !self.reset_elapsed() {
            return current;
        }

        let promoted = self
            .state
            .compare_exchange(
                CircuitState::Open as u8,
                CircuitState::HalfOpen as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if promoted {
            self.half_open_successes.store(0, Ordering::Release);
            tracing::info!(breaker = self.name, "Circuit breaker half-open, allowing trial calls");
        }
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn allow_request(&self) -> bool {
        self.state() != CircuitState::Open
    }

    /// Consecutive failures seen while closed
    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    pub fn record_success(&self) {
        match CircuitState::from_u8(self.state.load(Ordering::Acquire)) {
            CircuitState::Closed => self.failures.store(0, Ordering::Release),
            CircuitState::HalfOpen => {
                let successes = self.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.success_threshold {
                    self.failures.store(0, Ordering::Release);
                    self.state.store(CircuitState::Closed as u8, Ordering::Release);
                    tracing::info!(breaker = self.name, "Circuit breaker closed");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        match CircuitState::from_u8(self.state.load(Ordering::Acquire)) {
            CircuitState::Closed => {
                let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.failure_threshold {
                    self.open();
                    tracing::warn!(breaker = self.name, failures, "Circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                self.open();
                tracing::warn!(breaker = self.name, "Trial call failed, circuit breaker reopened");
            }
            // Keep failing fast for a full timeout after the latest failure
            CircuitState::Open => self.stamp_open(),
        }
    }

    fn open(&self) {
        self.stamp_open();
        self.state.store(CircuitState::Open as u8, Ordering::Release);
    }

    fn stamp_open(&self) {
        self.opened_at_ms.store(self.now_ms(), Ordering::Release);
    }

    fn reset_elapsed(&self) -> bool {
        let opened = self.opened_at_ms.load(Ordering::Acquire);
        self.now_ms().saturating_sub(opened) >= self.reset_timeout.as_millis() as u64
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}
