use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default retry budget for a notification
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Upper bound accepted for `max_retries`
pub const MAX_RETRIES_LIMIT: u32 = 20;

/// Delivery medium
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    Email,
    Sms,
    Push,
    Webhook,
    Inapp,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "EMAIL",
            Channel::Sms => "SMS",
            Channel::Push => "PUSH",
            Channel::Webhook => "WEBHOOK",
            Channel::Inapp => "INAPP",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "EMAIL" => Ok(Channel::Email),
            "SMS" => Ok(Channel::Sms),
            "PUSH" => Ok(Channel::Push),
            "WEBHOOK" => Ok(Channel::Webhook),
            "INAPP" => Ok(Channel::Inapp),
            other => Err(format!("unknown channel: {}", other)),
        }
    }
}

/// Priority levels for notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    /// Low priority, can be delayed
    Low,
    /// Normal priority (default)
    #[default]
    Normal,
    /// High priority, should be delivered promptly
    High,
    /// Urgent, immediate delivery required
    Urgent,
}

impl Priority {
    /// Get numeric value for priority comparison
    pub fn as_weight(&self) -> u8 {
        match self {
            Priority::Low => 1,
            Priority::Normal => 2,
            Priority::High => 3,
            Priority::Urgent => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Normal => "NORMAL",
            Priority::High => "HIGH",
            Priority::Urgent => "URGENT",
        }
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_weight().cmp(&other.as_weight())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(Priority::Low),
            "NORMAL" => Ok(Priority::Normal),
            "HIGH" => Ok(Priority::High),
            "URGENT" => Ok(Priority::Urgent),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// MIME type of the notification content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ContentType {
    #[default]
    #[serde(rename = "text/plain")]
    PlainText,
    #[serde(rename = "text/html")]
    Html,
    #[serde(rename = "text/markdown")]
    Markdown,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::PlainText => "text/plain",
            ContentType::Html => "text/html",
            ContentType::Markdown => "text/markdown",
        }
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text/plain" => Ok(ContentType::PlainText),
            "text/html" => Ok(ContentType::Html),
            "text/markdown" => Ok(ContentType::Markdown),
            other => Err(format!("unknown content type: {}", other)),
        }
    }
}

/// Delivery status.
///
/// ```text
/// PENDING ──► PROCESSING ──► SENT ──► DELIVERED | BOUNCED   (out-of-band)
///    ▲                 ├──► FAILED ───┐
///    │                 └──► REJECTED ─┤
///    └──────────── retry ◄────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationStatus {
    Pending,
    Processing,
    Sent,
    Delivered,
    Failed,
    Rejected,
    Bounced,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "PENDING",
            NotificationStatus::Processing => "PROCESSING",
            NotificationStatus::Sent => "SENT",
            NotificationStatus::Delivered => "DELIVERED",
            NotificationStatus::Failed => "FAILED",
            NotificationStatus::Rejected => "REJECTED",
            NotificationStatus::Bounced => "BOUNCED",
        }
    }

    /// Whether the edge `self → next` exists in the state graph.
    ///
    /// `REJECTED → PENDING` is only taken by the retry path while retry
    /// budget remains; see [`Notification::reopen_for_retry`].
    pub fn can_transition_to(&self, next: NotificationStatus) -> bool {
        use NotificationStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Sent)
                | (Processing, Failed)
                | (Processing, Rejected)
                | (Sent, Delivered)
                | (Sent, Bounced)
                | (Failed, Pending)
                | (Failed, Rejected)
                | (Rejected, Pending)
        )
    }

    /// States with no outgoing edge regardless of retry budget
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            NotificationStatus::Delivered | NotificationStatus::Bounced
        )
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(NotificationStatus::Pending),
            "PROCESSING" => Ok(NotificationStatus::Processing),
            "SENT" => Ok(NotificationStatus::Sent),
            "DELIVERED" => Ok(NotificationStatus::Delivered),
            "FAILED" => Ok(NotificationStatus::Failed),
            "REJECTED" => Ok(NotificationStatus::Rejected),
            "BOUNCED" => Ok(NotificationStatus::Bounced),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

/// Provider hints carried with a notification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// SMS delivery-receipt callback URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dlr_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dlr_mask: Option<u8>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A unit of outbound communication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub channel: Channel,
    pub recipient_address: String,
    pub recipient_id: Option<String>,
    pub sender_id: Option<String>,
    pub tenant_id: Option<String>,
    pub app_id: Option<String>,

    pub subject: Option<String>,
    pub body: Option<String>,
    pub template_key: Option<String>,
    pub template_version: Option<i32>,
    pub template_data: serde_json::Value,
    pub locale: Option<String>,
    pub content_type: ContentType,

    pub priority: Priority,
    pub status: NotificationStatus,

    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,

    pub error_message: Option<String>,
    pub error_code: Option<String>,

    pub retry_count: u32,
    pub max_retries: u32,

    pub provider_id: Option<Uuid>,
    pub provider_message_id: Option<String>,
    pub provider_response: Option<serde_json::Value>,

    pub tags: Vec<String>,
    pub meta: NotificationMeta,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of asking a notification to re-enter the send path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Moved back to PENDING with `retry_count` incremented
    Requeued,
    /// Budget exhausted; now REJECTED, counter untouched
    LimitExceeded,
    /// Current status does not allow a retry
    NotRetryable(NotificationStatus),
}

impl Notification {
    /// Whether the budget allows another attempt
    pub fn has_retry_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// 1-based number of the attempt the next send will be
    pub fn attempt_number(&self) -> u32 {
        self.retry_count + 1
    }

    /// Apply a status change, stamping the matching timestamp.
    pub fn set_status(&mut self, next: NotificationStatus, at: DateTime<Utc>) {
        match next {
            NotificationStatus::Sent => self.sent_at = Some(at),
            NotificationStatus::Delivered => self.delivered_at = Some(at),
            NotificationStatus::Failed
            | NotificationStatus::Rejected
            | NotificationStatus::Bounced => self.failed_at = Some(at),
            NotificationStatus::Pending | NotificationStatus::Processing => {}
        }
        self.status = next;
        self.updated_at = at;
    }

    /// Move a FAILED/REJECTED notification back to PENDING.
    ///
    /// Fails closed when `retry_count >= max_retries`: the notification
    /// becomes REJECTED and the counter is not incremented.
    pub fn reopen_for_retry(&mut self, at: DateTime<Utc>) -> RetryDecision {
        match self.status {
            NotificationStatus::Failed | NotificationStatus::Rejected => {
                if !self.has_retry_budget() {
                    if self.status != NotificationStatus::Rejected {
                        self.set_status(NotificationStatus::Rejected, at);
                    }
                    self.error_code = Some("RETRY_LIMIT_EXCEEDED".to_string());
                    return RetryDecision::LimitExceeded;
                }
                self.retry_count += 1;
                self.set_status(NotificationStatus::Pending, at);
                RetryDecision::Requeued
            }
            other => RetryDecision::NotRetryable(other),
        }
    }
}

/// Payload for creating a notification
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateNotification {
    pub channel: Option<Channel>,
    pub recipient_address: String,
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub template_key: Option<String>,
    #[serde(default)]
    pub template_version: Option<i32>,
    #[serde(default)]
    pub template_data: Option<serde_json::Value>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub provider_id: Option<Uuid>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub meta: NotificationMeta,
}

impl CreateNotification {
    /// Direct-content notification
    pub fn direct(channel: Channel, recipient: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            channel: Some(channel),
            recipient_address: recipient.into(),
            body: Some(body.into()),
            ..Default::default()
        }
    }

    /// Template-based notification
    pub fn templated(
        channel: Channel,
        recipient: impl Into<String>,
        template_key: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            channel: Some(channel),
            recipient_address: recipient.into(),
            template_key: Some(template_key.into()),
            template_data: Some(data),
            ..Default::default()
        }
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn scope(mut self, tenant_id: Option<&str>, app_id: Option<&str>) -> Self {
        self.tenant_id = tenant_id.map(str::to_string);
        self.app_id = app_id.map(str::to_string);
        self
    }

    pub fn content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn provider(mut self, provider_id: Uuid) -> Self {
        self.provider_id = Some(provider_id);
        self
    }

    pub fn meta(mut self, meta: NotificationMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Check creation invariants
    pub fn validate(&self) -> Result<(), String> {
        if self.channel.is_none() {
            return Err("channel is required".to_string());
        }

        if self.recipient_address.trim().is_empty() {
            return Err("recipient_address is required".to_string());
        }

        let has_body = self.body.as_deref().is_some_and(|b| !b.is_empty());
        let has_template = self
            .template_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty());

        match (has_body, has_template) {
            (false, false) => {
                return Err("either body or template_key must be provided".to_string())
            }
            (true, true) => {
                return Err("body and template_key are mutually exclusive".to_string())
            }
            _ => {}
        }

        if let Some(data) = &self.template_data {
            if !(data.is_object() || data.is_null()) {
                return Err("template_data must be an object".to_string());
            }
        }

        if self.max_retries.is_some_and(|m| m > MAX_RETRIES_LIMIT) {
            return Err(format!("max_retries must be at most {}", MAX_RETRIES_LIMIT));
        }

        Ok(())
    }

    /// Build the PENDING record. Call [`validate`](Self::validate) first.
    pub fn into_notification(self, now: DateTime<Utc>) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            channel: self.channel.unwrap_or(Channel::Email),
            recipient_address: self.recipient_address.trim().to_string(),
            recipient_id: self.recipient_id,
            sender_id: self.sender_id,
            tenant_id: self.tenant_id,
            app_id: self.app_id,
            subject: self.subject,
            body: self.body,
            template_key: self.template_key,
            template_version: self.template_version,
            template_data: self
                .template_data
                .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())),
            locale: self.locale,
            content_type: self.content_type,
            priority: self.priority,
            status: NotificationStatus::Pending,
            scheduled_at: self.scheduled_at,
            sent_at: None,
            delivered_at: None,
            failed_at: None,
            error_message: None,
            error_code: None,
            retry_count: 0,
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            provider_id: self.provider_id,
            provider_message_id: None,
            provider_response: None,
            tags: self.tags,
            meta: self.meta,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One recipient of a fan-out request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub address: String,
    #[serde(default)]
    pub recipient_id: Option<String>,
}

impl Recipient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            recipient_id: None,
        }
    }
}

/// Same logical message to many recipients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanOutRequest {
    /// Shared content; its `recipient_address` is ignored
    pub message: CreateNotification,
    pub recipients: Vec<Recipient>,
}

/// Per-recipient outcome of a fan-out
#[derive(Debug, Clone, Default, Serialize)]
pub struct FanOutResult {
    pub created: Vec<Uuid>,
    pub failed: Vec<FanOutFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FanOutFailure {
    pub address: String,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn failed_notification(retry_count: u32, max_retries: u32) -> Notification {
        let mut n = CreateNotification::direct(Channel::Email, "a@example.com", "hi")
            .max_retries(max_retries)
            .into_notification(Utc::now());
        n.status = NotificationStatus::Failed;
        n.retry_count = retry_count;
        n
    }

    #[test]
    fn test_validate_requires_exactly_one_content_source() {
        let neither = CreateNotification {
            channel: Some(Channel::Email),
            recipient_address: "a@example.com".into(),
            ..Default::default()
        };
        assert!(neither.validate().is_err());

        let both = CreateNotification::direct(Channel::Email, "a@example.com", "hi")
            .tap_template("welcome");
        assert!(both.validate().is_err());

        let direct = CreateNotification::direct(Channel::Email, "a@example.com", "hi");
        assert!(direct.validate().is_ok());

        let templated =
            CreateNotification::templated(Channel::Email, "a@example.com", "welcome", json!({}));
        assert!(templated.validate().is_ok());
    }

    impl CreateNotification {
        fn tap_template(mut self, key: &str) -> Self {
            self.template_key = Some(key.to_string());
            self
        }
    }

    #[test]
    fn test_validate_rejects_blank_recipient_and_bad_data() {
        let blank = CreateNotification::direct(Channel::Sms, "   ", "hi");
        assert!(blank.validate().is_err());

        let bad_data =
            CreateNotification::templated(Channel::Sms, "+15550001", "otp", json!(["x"]));
        assert!(bad_data.validate().is_err());
    }

    #[test]
    fn test_into_notification_defaults() {
        let n = CreateNotification::direct(Channel::Email, " a@example.com ", "Welcome")
            .into_notification(Utc::now());
        assert_eq!(n.status, NotificationStatus::Pending);
        assert_eq!(n.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(n.retry_count, 0);
        assert_eq!(n.recipient_address, "a@example.com");
        assert!(n.template_data.is_object());
    }

    #[test]
    fn test_transition_graph() {
        use NotificationStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(!Pending.can_transition_to(Sent));
        assert!(Processing.can_transition_to(Sent));
        assert!(Sent.can_transition_to(Delivered));
        assert!(!Failed.can_transition_to(Sent));
        for status in [Delivered, Bounced] {
            for next in [Pending, Processing, Sent, Delivered, Failed, Rejected, Bounced] {
                assert!(!status.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_reopen_for_retry_increments() {
        let mut n = failed_notification(0, 3);
        assert_eq!(n.reopen_for_retry(Utc::now()), RetryDecision::Requeued);
        assert_eq!(n.retry_count, 1);
        assert_eq!(n.status, NotificationStatus::Pending);
    }

    #[test]
    fn test_reopen_for_retry_limit() {
        let mut n = failed_notification(3, 3);
        assert_eq!(n.reopen_for_retry(Utc::now()), RetryDecision::LimitExceeded);
        assert_eq!(n.retry_count, 3);
        assert_eq!(n.status, NotificationStatus::Rejected);
        assert_eq!(n.error_code.as_deref(), Some("RETRY_LIMIT_EXCEEDED"));
    }

    #[test]
    fn test_reopen_for_retry_wrong_state() {
        let mut n = failed_notification(0, 3);
        n.status = NotificationStatus::Sent;
        assert_eq!(
            n.reopen_for_retry(Utc::now()),
            RetryDecision::NotRetryable(NotificationStatus::Sent)
        );
        assert_eq!(n.retry_count, 0);
    }

    #[test]
    fn test_set_status_stamps_timestamps() {
        let mut n = failed_notification(0, 3);
        n.status = NotificationStatus::Processing;
        let at = Utc::now();
        n.set_status(NotificationStatus::Sent, at);
        assert_eq!(n.sent_at, Some(at));
        n.set_status(NotificationStatus::Delivered, at);
        assert_eq!(n.delivered_at, Some(at));
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&NotificationStatus::Processing).unwrap();
        assert_eq!(json, "\"PROCESSING\"");
        assert_eq!(
            "rejected".parse::<NotificationStatus>().unwrap(),
            NotificationStatus::Rejected
        );
    }
}
