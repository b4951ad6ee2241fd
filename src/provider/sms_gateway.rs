//! HTTP SMS gateway adapter (Kannel-style `sendsms` GET interface).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::adapter::{
    ProviderAdapter, ProviderError, ProviderStatusInfo, RateLimits, SendOutcome, SendRequest,
    SendStatus, DEFAULT_TIMEOUT_SECS,
};
use super::types::NotificationProvider;

/// Words a gateway answers with when it takes a message
const SUCCESS_MARKERS: [&str; 3] = ["sent", "queued", "accepted"];

/// Words that turn an answer into a refusal wherever they appear
const FAILURE_MARKERS: [&str; 6] = ["err", "error", "failed", "failure", "rejected", "denied"];

/// Words that negate a success marker up to two words later ("not sent", "never been queued")
const NEGATIONS: [&str; 7] = ["not", "no", "never", "cannot", "isn", "wasn", "didn"];

#[derive(Debug, Clone, Deserialize)]
pub struct SmsGatewayConfig {
    pub base_url: String,
    #[serde(default = "default_send_path")]
    pub send_path: String,
    #[serde(default)]
    pub status_path: Option<String>,
    pub username: String,
    pub password: String,
    /// Default sender id
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub dlr_url: Option<String>,
    #[serde(default)]
    pub dlr_mask: Option<u8>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub rate_limits: RateLimits,
}

fn default_send_path() -> String {
    "/cgi-bin/sendsms".to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Sends SMS through an HTTP gateway
pub struct SmsGatewayAdapter {
    config: SmsGatewayConfig,
    client: reqwest::Client,
}

impl SmsGatewayAdapter {
    pub fn new(config: SmsGatewayConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Configuration(e.to_string()))?;
        Ok(Self { config, client })
    }

    /// Construct from a provider record
    pub fn from_provider(provider: &NotificationProvider) -> Result<Self, ProviderError> {
        let config: SmsGatewayConfig = serde_json::from_value(provider.configuration.clone())
            .map_err(|e| {
                ProviderError::Configuration(format!("sms_gateway '{}': {}", provider.name, e))
            })?;
        Self::new(config)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn query(&self, request: &SendRequest) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("username", self.config.username.clone()),
            ("password", self.config.password.clone()),
            ("to", request.recipient.clone()),
            ("text", request.body.clone()),
        ];

        if let Some(from) = request.from.as_ref().or(self.config.from.as_ref()) {
            query.push(("from", from.clone()));
        }

        if let Some(dlr_url) = request.dlr_url.as_ref().or(self.config.dlr_url.as_ref()) {
            query.push(("dlr-url", dlr_url.clone()));
            if let Some(mask) = request.dlr_mask.or(self.config.dlr_mask) {
                query.push(("dlr-mask", mask.to_string()));
            }
        }

        query
    }

    fn map_transport(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.config.timeout_seconds)
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

/// Classify a gateway answer; `None` when it is not an acceptance.
///
/// Markers match whole words only, so "absent" or "consent" never count as "sent".
fn classify(body: &str) -> Option<SendStatus> {
    let lower = body.to_ascii_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    if words.iter().any(|w| FAILURE_MARKERS.contains(w)) {
        return None;
    }

    let mut status = None;
    for (i, word) in words.iter().enumerate() {
        if !SUCCESS_MARKERS.contains(word) {
            continue;
        }
        let negated = words[i.saturating_sub(2)..i]
            .iter()
            .any(|w| NEGATIONS.contains(w));
        if negated {
            return None;
        }
        if *word == "queued" {
            status = Some(SendStatus::Queued);
        } else if status.is_none() {
            status = Some(SendStatus::Sent);
        }
    }
    status
}

#[async_trait]
impl ProviderAdapter for SmsGatewayAdapter {
    async fn send(&self, request: &SendRequest) -> Result<SendOutcome, ProviderError> {
        let response = self
            .client
            .get(self.url(&self.config.send_path))
            .query(&self.query(request))
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let http_status = response.status();
        let body = response.text().await.map_err(|e| self.map_transport(e))?;
        let raw = json!({ "http_status": http_status.as_u16(), "body": body.trim() });

        if http_status.is_server_error() {
            return Err(ProviderError::Transport(format!(
                "gateway returned {}: {}",
                http_status,
                body.trim()
            )));
        }

        match classify(&body) {
            Some(status) => Ok(SendOutcome {
                status,
                provider_message_id: Some(request.notification_id.to_string()),
                response: raw,
            }),
            None => Err(ProviderError::Rejected {
                reason: format!("gateway refused message: {}", body.trim()),
                response: Some(raw),
            }),
        }
    }

    async fn check_status(
        &self,
        provider_message_id: &str,
    ) -> Result<ProviderStatusInfo, ProviderError> {
        let Some(status_path) = &self.config.status_path else {
            return Err(ProviderError::Unsupported(
                "no status_path configured".to_string(),
            ));
        };

        let response = self
            .client
            .get(self.url(status_path))
            .query(&[
                ("username", self.config.username.as_str()),
                ("password", self.config.password.as_str()),
                ("id", provider_message_id),
            ])
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let http_status = response.status();
        let body = response.text().await.map_err(|e| self.map_transport(e))?;
        if !http_status.is_success() {
            return Err(ProviderError::Transport(format!(
                "status query returned {}",
                http_status
            )));
        }

        let status = body.trim().to_string();
        let lower = status.to_ascii_lowercase();
        let delivered = if lower.contains("undeliv") || lower.contains("failed") {
            Some(false)
        } else if lower.contains("delivered") {
            Some(true)
        } else {
            None
        };

        Ok(ProviderStatusInfo {
            provider_message_id: provider_message_id.to_string(),
            delivered,
            response: json!({ "http_status": http_status.as_u16(), "body": status.clone() }),
            status,
        })
    }

    fn validate_config(&self) -> bool {
        reqwest::Url::parse(&self.config.base_url).is_ok()
            && self.config.send_path.starts_with('/')
            && !self.config.username.is_empty()
    }

    fn supports_delivery_confirmation(&self) -> bool {
        self.config.dlr_url.is_some() || self.config.status_path.is_some()
    }

    fn rate_limits(&self) -> RateLimits {
        self.config.rate_limits
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::Channel;

    fn adapter(config: serde_json::Value) -> SmsGatewayAdapter {
        let provider = NotificationProvider::new("sms", "sms_gateway", Channel::Sms, config);
        SmsGatewayAdapter::from_provider(&provider).unwrap()
    }

    #[test]
    fn test_classify_markers() {
        assert_eq!(classify("0: Accepted for delivery"), Some(SendStatus::Sent));
        assert_eq!(classify("Sent."), Some(SendStatus::Sent));
        assert_eq!(classify("3: Queued for later delivery"), Some(SendStatus::Queued));
        assert_eq!(classify("Authorization failed"), None);
    }

    #[test]
    fn test_classify_matches_whole_words_only() {
        assert_eq!(classify("ERR: absent subscriber"), None);
        assert_eq!(classify("consent required"), None);
        assert_eq!(classify("unsent"), None);
        assert_eq!(classify("0: Accepted; sent-ok"), Some(SendStatus::Sent));
    }

    #[test]
    fn test_classify_negated_marker_is_refusal() {
        assert_eq!(classify("Message not sent: unknown subscriber"), None);
        assert_eq!(classify("message was never queued"), None);
        assert_eq!(classify("Sending failed, not accepted"), None);
        assert_eq!(classify("Accepted, queued for delivery"), Some(SendStatus::Queued));
    }

    #[test]
    fn test_query_includes_dlr_only_when_set() {
        let adapter = adapter(json!({
            "base_url": "http://gw.local:13013/",
            "username": "u",
            "password": "p",
            "from": "PORTAL"
        }));
        let request = SendRequest {
            recipient: "+15550001".into(),
            body: "code 1234".into(),
            ..Default::default()
        };
        let query = adapter.query(&request);
        let keys: Vec<&str> = query.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["username", "password", "to", "text", "from"]);
        assert_eq!(adapter.url("/cgi-bin/sendsms"), "http://gw.local:13013/cgi-bin/sendsms");

        let with_dlr = SendRequest {
            dlr_url: Some("http://portal/dlr".into()),
            dlr_mask: Some(31),
            ..request
        };
        let keys: Vec<&str> = adapter.query(&with_dlr).iter().map(|(k, _)| *k).collect();
        assert!(keys.contains(&"dlr-url"));
        assert!(keys.contains(&"dlr-mask"));
    }

    #[test]
    fn test_confirmation_support_follows_config() {
        let plain = adapter(json!({"base_url": "http://gw", "username": "u", "password": "p"}));
        assert!(!plain.supports_delivery_confirmation());
        assert!(plain.validate_config());

        let dlr = adapter(json!({
            "base_url": "http://gw",
            "username": "u",
            "password": "p",
            "dlr_url": "http://portal/dlr"
        }));
        assert!(dlr.supports_delivery_confirmation());
    }

    #[test]
    fn test_missing_credentials_is_configuration_error() {
        let provider = NotificationProvider::new(
            "sms",
            "sms_gateway",
            Channel::Sms,
            json!({"base_url": "http://gw"}),
        );
        assert!(matches!(
            SmsGatewayAdapter::from_provider(&provider),
            Err(ProviderError::Configuration(_))
        ));
    }
}
