use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::notification::{Channel, ContentType};

/// Default provider call timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Provider adapter errors
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network, protocol or transient server failure
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider call timed out after {0}s")]
    Timeout(u64),

    #[error("Provider rate limit reached: {0}")]
    RateLimited(String),

    /// The provider explicitly refused the message
    #[error("Rejected by provider: {reason}")]
    Rejected {
        reason: String,
        response: Option<serde_json::Value>,
    },

    #[error("Provider misconfigured: {0}")]
    Configuration(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),
}

impl ProviderError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        ProviderError::Rejected {
            reason: reason.into(),
            response: None,
        }
    }

    /// Raw provider response carried by the error, if any
    pub fn response(&self) -> Option<&serde_json::Value> {
        match self {
            ProviderError::Rejected { response, .. } => response.as_ref(),
            _ => None,
        }
    }
}

/// Normalized outbound message handed to an adapter
#[derive(Debug, Clone, Default, Serialize)]
pub struct SendRequest {
    pub notification_id: Uuid,
    pub channel: Option<Channel>,
    pub recipient: String,
    pub subject: Option<String>,
    pub body: String,
    pub content_type: ContentType,
    pub from: Option<String>,
    pub from_name: Option<String>,
    pub reply_to: Option<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub media_url: Option<String>,
    pub dlr_url: Option<String>,
    pub dlr_mask: Option<u8>,
    pub tags: Vec<String>,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// How far the provider got with the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SendStatus {
    /// Handed off for delivery
    Sent,
    /// Accepted into the provider's own queue
    Queued,
}

/// Successful send result
#[derive(Debug, Clone, Serialize)]
pub struct SendOutcome {
    pub status: SendStatus,
    pub provider_message_id: Option<String>,
    pub response: serde_json::Value,
}

/// Delivery status as reported by the provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatusInfo {
    pub provider_message_id: String,
    /// Provider-specific status text
    pub status: String,
    pub delivered: Option<bool>,
    pub response: serde_json::Value,
}

/// Per-provider send ceilings; 0 means unlimited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    #[serde(default)]
    pub per_minute: u32,
    #[serde(default)]
    pub per_hour: u32,
    #[serde(default)]
    pub per_day: u32,
}

impl RateLimits {
    pub fn is_unlimited(&self) -> bool {
        self.per_minute == 0 && self.per_hour == 0 && self.per_day == 0
    }
}

/// A concrete delivery provider (SMTP server, SMS gateway, ...).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Send one message
    async fn send(&self, request: &SendRequest) -> Result<SendOutcome, ProviderError>;

    /// Query delivery status for a previously sent message
    async fn check_status(
        &self,
        provider_message_id: &str,
    ) -> Result<ProviderStatusInfo, ProviderError>;

    /// Whether the configuration is complete enough to send
    fn validate_config(&self) -> bool;

    /// Whether the provider reports delivery out of band
    fn supports_delivery_confirmation(&self) -> bool;

    fn rate_limits(&self) -> RateLimits;

    /// Upper bound for a single `send` call
    fn timeout(&self) -> Duration {
        Duration::from_secs(DEFAULT_TIMEOUT_SECS)
    }
}
