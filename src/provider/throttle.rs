//! Token-bucket throttling of provider sends

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::SystemTime;

use super::adapter::RateLimits;

/// Token bucket refilled continuously over a window.
///
/// Tokens are kept in milli-tokens so that slow refill rates (a daily
/// ceiling) still make progress between calls.
#[derive(Debug)]
pub struct TokenBucket {
    /// Available milli-tokens
    tokens: AtomicU64,
    /// Last refill timestamp (Unix milliseconds)
    last_refill: AtomicI64,
    capacity: u64,
    window_ms: u64,
}

impl TokenBucket {
    /// Bucket allowing `capacity` sends per `window_ms`
    pub fn new(capacity: u32, window_ms: u64) -> Self {
        let capacity = capacity as u64 * 1000;
        Self {
            tokens: AtomicU64::new(capacity),
            last_refill: AtomicI64::new(Self::now_millis()),
            capacity,
            window_ms: window_ms.max(1),
        }
    }

    /// Get current time in milliseconds
    pub fn now_millis() -> i64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    fn refill(&self, now: i64) {
        let last = self.last_refill.load(Ordering::Relaxed);
        let elapsed_ms = (now - last).max(0) as u64;
        // capacity milli-tokens per window
        let to_add = elapsed_ms.saturating_mul(self.capacity) / self.window_ms;
        if to_add == 0 {
            return;
        }
        if self
            .last_refill
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            let _ = self
                .tokens
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                    Some((current + to_add).min(self.capacity))
                });
        }
    }

    /// Try to take one token
    pub fn try_consume(&self) -> bool {
        self.refill(Self::now_millis());
        self.tokens
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                current.checked_sub(1000)
            })
            .is_ok()
    }

    /// Return a previously taken token
    pub fn give_back(&self) {
        let _ = self
            .tokens
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some((current + 1000).min(self.capacity))
            });
    }

    /// Whole tokens currently available
    pub fn available(&self) -> u32 {
        self.refill(Self::now_millis());
        (self.tokens.load(Ordering::Relaxed) / 1000) as u32
    }
}

const MINUTE_MS: u64 = 60_000;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;

/// Minute/hour/day ceilings for one provider
#[derive(Debug)]
pub struct ProviderThrottle {
    buckets: Vec<(&'static str, TokenBucket)>,
}

impl ProviderThrottle {
    pub fn new(limits: RateLimits) -> Self {
        let mut buckets = Vec::with_capacity(3);
        for (label, limit, window) in [
            ("minute", limits.per_minute, MINUTE_MS),
            ("hour", limits.per_hour, HOUR_MS),
            ("day", limits.per_day, DAY_MS),
        ] {
            if limit > 0 {
                buckets.push((label, TokenBucket::new(limit, window)));
            }
        }
        Self { buckets }
    }

    pub fn is_unlimited(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Take one send from every window.
    ///
    /// On failure returns the exhausted window; tokens already taken from
    /// the other windows are returned.
    pub fn try_acquire(&self) -> Result<(), &'static str> {
        for (i, (label, bucket)) in self.buckets.iter().enumerate() {
            if !bucket.try_consume() {
                for (_, taken) in &self.buckets[..i] {
                    taken.give_back();
                }
                return Err(label);
            }
        }
        Ok(())
    }
}
