use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

use crate::notification::Channel;
use crate::provider::{
    NotificationProvider, ProviderStatus, RetryStrategy, DEFAULT_RETRY_DELAY_SECS,
};
use crate::redis::CircuitBreakerConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    /// PostgreSQL; required when `store.backend = "postgres"`
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub templates: TemplatesConfig,
    #[serde(default)]
    pub otel: OtelConfig,
    /// Providers upserted into the provider repository at startup
    #[serde(default)]
    pub providers: Vec<ProviderSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    /// Shared key for the `/api/v1` routes (`X-API-Key`); open when unset
    pub key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u32,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u32,
    /// Apply `migrations/` on startup
    #[serde(default)]
    pub run_migrations: bool,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// List used by the Redis task queue
    #[serde(default = "default_queue_key")]
    pub queue_key: String,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// `memory` or `redis`
    #[serde(default = "default_memory_backend")]
    pub backend: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// `memory` or `postgres`
    #[serde(default = "default_memory_backend")]
    pub backend: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Schedule retries automatically after transport failures
    #[serde(default = "default_true")]
    pub auto_retry: bool,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_seconds: u64,
    /// Requeue backoff after infrastructure failures
    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplatesConfig {
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    /// Lifetime of a cached lookup when templates live in a shared store,
    /// where other instances' changes are not seen by local invalidation
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
}

/// OpenTelemetry exporter settings
#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

/// A provider as declared in configuration.
///
/// `settings` is handed to the adapter untouched, e.g. for `smtp`:
///
/// ```toml
/// [[providers]]
/// name = "primary-smtp"
/// provider_type = "smtp"
/// channel = "EMAIL"
/// priority = 10
/// settings = { host = "smtp.example.com", tls = "starttls", from_address = "noreply@example.com" }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    pub name: String,
    pub provider_type: String,
    pub channel: Channel,
    #[serde(default = "default_provider_priority")]
    pub priority: i32,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub status: ProviderStatus,
    #[serde(default)]
    pub retry_strategy: RetryStrategy,
    #[serde(default = "default_retry_delays")]
    pub retry_delays: Vec<u64>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl ProviderSettings {
    pub fn to_provider(&self) -> NotificationProvider {
        let mut provider = NotificationProvider::new(
            self.name.clone(),
            self.provider_type.clone(),
            self.channel,
            self.settings.clone(),
        )
        .priority(self.priority)
        .default_for_channel(self.is_default)
        .status(self.status)
        .retry(self.retry_strategy, self.retry_delays.clone());
        provider.tenant_id = self.tenant_id.clone();
        provider.app_id = self.app_id.clone();
        provider
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout() -> u32 {
    5
}

fn default_idle_timeout() -> u32 {
    600
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_queue_key() -> String {
    "notify:tasks".to_string()
}

fn default_memory_backend() -> String {
    "memory".to_string()
}

fn default_concurrency() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    60
}

fn default_poll_timeout() -> u64 {
    5
}

fn default_backoff_initial() -> u64 {
    500
}

fn default_backoff_max() -> u64 {
    30_000
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "notify-pipeline".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

fn default_provider_priority() -> i32 {
    100
}

fn default_retry_delays() -> Vec<u64> {
    vec![DEFAULT_RETRY_DELAY_SECS]
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("queue.backend", "memory")?
            .set_default("store.backend", "memory")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // NOTIFY_SERVER__PORT, NOTIFY_WORKER__AUTO_RETRY, NOTIFY_DATABASE__URL, ...
            .add_source(
                Environment::with_prefix("NOTIFY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins"),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            queue_key: default_queue_key(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            auto_retry: true,
            poll_timeout_seconds: default_poll_timeout(),
            backoff_initial_ms: default_backoff_initial(),
            backoff_max_ms: default_backoff_max(),
        }
    }
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl_seconds: default_cache_ttl(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            api: ApiConfig::default(),
            database: None,
            redis: RedisConfig::default(),
            queue: QueueConfig::default(),
            store: StoreConfig::default(),
            worker: WorkerConfig::default(),
            templates: TemplatesConfig::default(),
            otel: OtelConfig::default(),
            providers: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_values() {
        let settings = Settings::default();
        assert_eq!(settings.server_addr(), "0.0.0.0:8080");
        assert_eq!(settings.queue.backend, "memory");
        assert_eq!(settings.store.backend, "memory");
        assert_eq!(settings.worker.concurrency, 4);
        assert!(settings.worker.auto_retry);
        assert!(settings.templates.cache_enabled);
        assert_eq!(settings.templates.cache_ttl_seconds, 60);
        assert!(settings.database.is_none());
    }

    #[test]
    fn test_provider_settings_from_toml() {
        let toml = r#"
            [[providers]]
            name = "primary-smtp"
            provider_type = "smtp"
            channel = "EMAIL"
            priority = 10
            retry_strategy = "EXPONENTIAL"
            retry_delays = [30]

            [providers.settings]
            host = "smtp.example.com"
            tls = "implicit"
        "#;

        let settings: Settings = Config::builder()
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.providers.len(), 1);
        let provider = settings.providers[0].to_provider();
        assert_eq!(provider.name, "primary-smtp");
        assert_eq!(provider.channel, Channel::Email);
        assert_eq!(provider.priority, 10);
        assert_eq!(provider.retry_strategy, RetryStrategy::Exponential);
        assert_eq!(provider.retry_delays, vec![30]);
        assert!(provider.is_active());
        assert_eq!(provider.configuration["host"], json!("smtp.example.com"));
    }
}
