//! SMTP email adapter built on `lettre`.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType as MimeType;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;
use serde_json::json;

use crate::notification::ContentType;

use super::adapter::{
    ProviderAdapter, ProviderError, ProviderStatusInfo, RateLimits, SendOutcome, SendRequest,
    SendStatus, DEFAULT_TIMEOUT_SECS,
};
use super::types::NotificationProvider;

/// Connection security
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Plain connection, no TLS
    None,
    /// Upgrade with STARTTLS (port 587)
    #[default]
    Starttls,
    /// TLS from the first byte (port 465)
    Implicit,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub tls: TlsMode,
    #[serde(default)]
    pub from_address: Option<String>,
    #[serde(default)]
    pub from_name: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub rate_limits: RateLimits,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl SmtpConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(match self.tls {
            TlsMode::None => 25,
            TlsMode::Starttls => 587,
            TlsMode::Implicit => 465,
        })
    }
}

/// Sends email through one SMTP relay
pub struct SmtpAdapter {
    config: SmtpConfig,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpAdapter {
    pub fn new(config: SmtpConfig) -> Result<Self, ProviderError> {
        let builder = match config.tls {
            TlsMode::None => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            }
            TlsMode::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| ProviderError::Configuration(e.to_string()))?,
            TlsMode::Implicit => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| ProviderError::Configuration(e.to_string()))?,
        };

        let mut builder = builder
            .port(config.port())
            .timeout(Some(Duration::from_secs(config.timeout_seconds)));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            mailer: builder.build(),
            config,
        })
    }

    /// Construct from a provider record
    pub fn from_provider(provider: &NotificationProvider) -> Result<Self, ProviderError> {
        let config: SmtpConfig = serde_json::from_value(provider.configuration.clone())
            .map_err(|e| ProviderError::Configuration(format!("smtp '{}': {}", provider.name, e)))?;
        Self::new(config)
    }

    fn sender(&self, request: &SendRequest) -> Result<Mailbox, ProviderError> {
        let address = request
            .from
            .as_deref()
            .or(self.config.from_address.as_deref())
            .ok_or_else(|| ProviderError::Configuration("no from address".to_string()))?;
        let address: Address = address
            .parse()
            .map_err(|e| ProviderError::Configuration(format!("invalid from address: {}", e)))?;
        let name = request
            .from_name
            .clone()
            .or_else(|| self.config.from_name.clone());
        Ok(Mailbox::new(name, address))
    }

    /// Build the MIME message and its Message-ID
    pub fn build_message(&self, request: &SendRequest) -> Result<(Message, String), ProviderError> {
        let from = self.sender(request)?;
        let message_id = format!("<{}@{}>", request.notification_id, from.email.domain());

        let mut builder = Message::builder()
            .from(from)
            .to(parse_recipient(&request.recipient)?)
            .subject(request.subject.clone().unwrap_or_default())
            .message_id(Some(message_id.clone()));

        for cc in &request.cc {
            builder = builder.cc(parse_recipient(cc)?);
        }
        for bcc in &request.bcc {
            builder = builder.bcc(parse_recipient(bcc)?);
        }
        if let Some(reply_to) = &request.reply_to {
            builder = builder.reply_to(parse_recipient(reply_to)?);
        }

        let message = match request.content_type {
            ContentType::Html | ContentType::Markdown => builder.multipart(
                MultiPart::alternative_plain_html(strip_tags(&request.body), request.body.clone()),
            ),
            ContentType::PlainText => builder
                .header(MimeType::TEXT_PLAIN)
                .body(request.body.clone()),
        }
        .map_err(|e| ProviderError::rejected(format!("failed to build email: {}", e)))?;

        Ok((message, message_id))
    }
}

fn parse_recipient(address: &str) -> Result<Mailbox, ProviderError> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| ProviderError::rejected(format!("invalid address '{}': {}", address, e)))
}

/// Plain-text alternative for an HTML body
fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

#[async_trait]
impl ProviderAdapter for SmtpAdapter {
    async fn send(&self, request: &SendRequest) -> Result<SendOutcome, ProviderError> {
        let (message, message_id) = self.build_message(request)?;

        match self.mailer.send(message).await {
            Ok(response) => Ok(SendOutcome {
                status: SendStatus::Sent,
                provider_message_id: Some(message_id),
                response: json!({
                    "code": response.code().to_string(),
                    "message": response.message().collect::<Vec<_>>(),
                }),
            }),
            Err(e) if e.is_permanent() => Err(ProviderError::Rejected {
                reason: e.to_string(),
                response: e.status().map(|code| json!({ "code": code.to_string() })),
            }),
            Err(e) if e.is_timeout() => Err(ProviderError::Timeout(self.config.timeout_seconds)),
            Err(e) => Err(ProviderError::Transport(e.to_string())),
        }
    }

    async fn check_status(
        &self,
        _provider_message_id: &str,
    ) -> Result<ProviderStatusInfo, ProviderError> {
        Err(ProviderError::Unsupported(
            "SMTP has no delivery status query".to_string(),
        ))
    }

    fn validate_config(&self) -> bool {
        let from_ok = self
            .config
            .from_address
            .as_deref()
            .is_some_and(|a| a.parse::<Address>().is_ok());
        let creds_ok = self.config.username.is_some() == self.config.password.is_some();
        !self.config.host.trim().is_empty() && from_ok && creds_ok
    }

    fn supports_delivery_confirmation(&self) -> bool {
        false
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
    use uuid::Uuid;

    fn adapter() -> SmtpAdapter {
        let provider = NotificationProvider::new(
            "mail",
            "smtp",
            Channel::Email,
            json!({
                "host": "localhost",
                "tls": "none",
                "from_address": "noreply@example.com",
                "from_name": "Portal",
                "rate_limits": {"per_minute": 60}
            }),
        );
        SmtpAdapter::from_provider(&provider).unwrap()
    }

    fn request(body: &str, content_type: ContentType) -> SendRequest {
        SendRequest {
            notification_id: Uuid::new_v4(),
            channel: Some(Channel::Email),
            recipient: "ada@example.com".to_string(),
            subject: Some("Welcome".to_string()),
            body: body.to_string(),
            content_type,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_config_defaults() {
        let adapter = adapter();
        assert_eq!(adapter.config.port(), 25);
        assert_eq!(adapter.timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(adapter.rate_limits().per_minute, 60);
        assert!(adapter.validate_config());
        assert!(!adapter.supports_delivery_confirmation());
    }

    #[test]
    fn test_missing_host_is_configuration_error() {
        let provider =
            NotificationProvider::new("mail", "smtp", Channel::Email, json!({"port": 25}));
        assert!(matches!(
            SmtpAdapter::from_provider(&provider),
            Err(ProviderError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_plain_message_headers() {
        let adapter = adapter();
        let mut req = request("Hello Ada", ContentType::PlainText);
        req.cc = vec!["boss@example.com".to_string()];
        req.reply_to = Some("support@example.com".to_string());

        let (message, message_id) = adapter.build_message(&req).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(message_id.ends_with("@example.com>"));
        assert!(raw.contains("Subject: Welcome"));
        assert!(raw.contains("Cc: boss@example.com"));
        assert!(raw.contains("Reply-To: support@example.com"));
        assert!(raw.contains("Content-Type: text/plain"));
        assert!(raw.contains("Hello Ada"));
    }

    #[tokio::test]
    async fn test_html_message_is_multipart() {
        let adapter = adapter();
        let (message, _) = adapter
            .build_message(&request("<p>Hello <b>Ada</b></p>", ContentType::Html))
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("text/html"));
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_rejected() {
        let adapter = adapter();
        let mut req = request("hi", ContentType::PlainText);
        req.recipient = "not an address".to_string();
        assert!(matches!(
            adapter.build_message(&req),
            Err(ProviderError::Rejected { .. })
        ));
    }

    #[test]
    fn test_strip_tags() {
        assert_eq!(strip_tags("<p>Hello <b>Ada</b></p>"), "Hello Ada");
    }
}
