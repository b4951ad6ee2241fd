use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::notification::Channel;

/// Fallback retry delay when a provider lists none
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 60;

/// Ceiling for computed retry delays
pub const MAX_RETRY_DELAY_SECS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProviderStatus {
    #[default]
    Active,
    Inactive,
    Suspended,
}

impl ProviderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderStatus::Active => "ACTIVE",
            ProviderStatus::Inactive => "INACTIVE",
            ProviderStatus::Suspended => "SUSPENDED",
        }
    }
}

impl FromStr for ProviderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(ProviderStatus::Active),
            "INACTIVE" => Ok(ProviderStatus::Inactive),
            "SUSPENDED" => Ok(ProviderStatus::Suspended),
            other => Err(format!("unknown provider status: {}", other)),
        }
    }
}

/// How retry delays grow across attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum RetryStrategy {
    /// Use the listed delay for each attempt, repeating the last entry
    #[default]
    Fixed,
    /// Double the first listed delay per attempt
    Exponential,
}

impl RetryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryStrategy::Fixed => "FIXED",
            RetryStrategy::Exponential => "EXPONENTIAL",
        }
    }

    /// Base delay in seconds before retry number `retry` (1-based)
    pub fn delay_secs(&self, delays: &[u64], retry: u32) -> u64 {
        let index = retry.saturating_sub(1) as usize;
        let delay = match self {
            RetryStrategy::Fixed => delays
                .get(index)
                .or_else(|| delays.last())
                .copied()
                .unwrap_or(DEFAULT_RETRY_DELAY_SECS),
            RetryStrategy::Exponential => {
                let base = delays.first().copied().unwrap_or(DEFAULT_RETRY_DELAY_SECS);
                let factor = 1u64.checked_shl(index.min(32) as u32).unwrap_or(u64::MAX);
                base.saturating_mul(factor)
            }
        };
        delay.min(MAX_RETRY_DELAY_SECS)
    }
}

impl fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetryStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FIXED" => Ok(RetryStrategy::Fixed),
            "EXPONENTIAL" => Ok(RetryStrategy::Exponential),
            other => Err(format!("unknown retry strategy: {}", other)),
        }
    }
}

/// A configured delivery provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationProvider {
    pub id: Uuid,
    pub name: String,
    /// Registry key of the adapter (`smtp`, `sms_gateway`, ...)
    pub provider_type: String,
    pub channel: Channel,
    /// Adapter-specific settings (host, credentials, rate limits, timeout)
    pub configuration: serde_json::Value,
    pub status: ProviderStatus,
    /// Lower is tried first
    pub priority: i32,
    pub is_default: bool,
    pub retry_strategy: RetryStrategy,
    pub retry_delays: Vec<u64>,
    pub tenant_id: Option<String>,
    pub app_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationProvider {
    pub fn new(
        name: impl Into<String>,
        provider_type: impl Into<String>,
        channel: Channel,
        configuration: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            provider_type: provider_type.into(),
            channel,
            configuration,
            status: ProviderStatus::Active,
            priority: 100,
            is_default: false,
            retry_strategy: RetryStrategy::default(),
            retry_delays: vec![DEFAULT_RETRY_DELAY_SECS],
            tenant_id: None,
            app_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn default_for_channel(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }

    pub fn status(mut self, status: ProviderStatus) -> Self {
        self.status = status;
        self
    }

    pub fn retry(mut self, strategy: RetryStrategy, delays: Vec<u64>) -> Self {
        self.retry_strategy = strategy;
        self.retry_delays = delays;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == ProviderStatus::Active
    }

    /// Base delay before retry number `retry` (1-based)
    pub fn retry_delay_secs(&self, retry: u32) -> u64 {
        self.retry_strategy.delay_secs(&self.retry_delays, retry)
    }
}
