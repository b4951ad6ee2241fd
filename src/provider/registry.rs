use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::DeliveryError;
use crate::metrics::ProviderMetrics;
use crate::notification::Notification;

use super::adapter::{ProviderAdapter, ProviderError};
use super::repository::ProviderRepository;
use super::sms_gateway::SmsGatewayAdapter;
use super::smtp::SmtpAdapter;
use super::throttle::ProviderThrottle;
use super::types::NotificationProvider;

/// Builds an adapter for a provider record
pub type AdapterFactory = Arc<
    dyn Fn(&NotificationProvider) -> Result<Arc<dyn ProviderAdapter>, ProviderError>
        + Send
        + Sync,
>;

/// Provider chosen for one send, with its adapter
#[derive(Clone)]
pub struct SelectedProvider {
    pub provider: NotificationProvider,
    pub adapter: Arc<dyn ProviderAdapter>,
}

/// Maps provider types to adapter constructors and picks the provider for
/// each notification.
///
/// Adapters and throttles are built once per provider id; provider
/// configuration is treated as read-only while the process runs.
pub struct ProviderRegistry {
    repository: Arc<dyn ProviderRepository>,
    factories: HashMap<String, AdapterFactory>,
    adapters: DashMap<Uuid, Arc<dyn ProviderAdapter>>,
    throttles: DashMap<Uuid, Arc<ProviderThrottle>>,
}

impl ProviderRegistry {
    /// Registry with no adapter types
    pub fn new(repository: Arc<dyn ProviderRepository>) -> Self {
        Self {
            repository,
            factories: HashMap::new(),
            adapters: DashMap::new(),
            throttles: DashMap::new(),
        }
    }

    /// Registry with the `smtp` and `sms_gateway` adapters
    pub fn with_builtin(repository: Arc<dyn ProviderRepository>) -> Self {
        let mut registry = Self::new(repository);
        registry.register("smtp", |provider| {
            Ok(Arc::new(SmtpAdapter::from_provider(provider)?) as Arc<dyn ProviderAdapter>)
        });
        registry.register("sms_gateway", |provider| {
            Ok(Arc::new(SmsGatewayAdapter::from_provider(provider)?) as Arc<dyn ProviderAdapter>)
        });
        registry
    }

    /// Register a constructor for `provider_type`
    pub fn register<F>(&mut self, provider_type: &str, factory: F)
    where
        F: Fn(&NotificationProvider) -> Result<Arc<dyn ProviderAdapter>, ProviderError>
            + Send
            + Sync
            + 'static,
    {
        self.factories
            .insert(provider_type.to_string(), Arc::new(factory));
    }

    pub fn repository(&self) -> &Arc<dyn ProviderRepository> {
        &self.repository
    }

    /// Pick the provider for `notification`.
    ///
    /// An explicit `provider_id` is used as is, with no fallback. Otherwise
    /// the active providers of the channel whose scope covers the
    /// notification are ordered by priority (then default flag, then name)
    /// and the first wins.
    #[tracing::instrument(
        name = "provider.select",
        skip(self, notification),
        fields(notification_id = %notification.id, channel = %notification.channel)
    )]
    pub async fn select(&self, notification: &Notification) -> Result<SelectedProvider, DeliveryError> {
        let provider = match notification.provider_id {
            Some(id) => {
                let provider = self.repository.get(id).await?.ok_or_else(|| {
                    DeliveryError::NoProviderAvailable(format!("provider {} does not exist", id))
                })?;
                if !provider.is_active() {
                    return Err(DeliveryError::NoProviderAvailable(format!(
                        "provider '{}' is {}",
                        provider.name,
                        provider.status.as_str()
                    )));
                }
                provider
            }
            None => {
                let mut candidates: Vec<NotificationProvider> = self
                    .repository
                    .list_for_channel(notification.channel)
                    .await?
                    .into_iter()
                    .filter(|p| p.is_active() && covers_scope(p, notification))
                    .collect();

                candidates.sort_by(|a, b| {
                    a.priority
                        .cmp(&b.priority)
                        .then_with(|| b.is_default.cmp(&a.is_default))
                        .then_with(|| a.name.cmp(&b.name))
                });

                candidates.into_iter().next().ok_or_else(|| {
                    DeliveryError::NoProviderAvailable(format!(
                        "no active provider for channel {}",
                        notification.channel
                    ))
                })?
            }
        };

        let adapter = self.adapter_for(&provider)?;

        tracing::debug!(
            provider_id = %provider.id,
            provider = %provider.name,
            provider_type = %provider.provider_type,
            "Provider selected"
        );

        Ok(SelectedProvider { provider, adapter })
    }

    /// Cached adapter for a provider, built on first use
    pub fn adapter_for(
        &self,
        provider: &NotificationProvider,
    ) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        if let Some(adapter) = self.adapters.get(&provider.id) {
            return Ok(adapter.clone());
        }

        let factory = self.factories.get(&provider.provider_type).ok_or_else(|| {
            ProviderError::Configuration(format!(
                "unknown provider type '{}'",
                provider.provider_type
            ))
        })?;

        let adapter = factory(provider)?;
        if !adapter.validate_config() {
            tracing::warn!(
                provider_id = %provider.id,
                provider = %provider.name,
                "Provider configuration looks incomplete"
            );
        }

        Ok(self
            .adapters
            .entry(provider.id)
            .or_insert(adapter)
            .clone())
    }

    /// Take one send from the provider's rate limits
    pub fn acquire(&self, selected: &SelectedProvider) -> Result<(), ProviderError> {
        let throttle = self
            .throttles
            .entry(selected.provider.id)
            .or_insert_with(|| Arc::new(ProviderThrottle::new(selected.adapter.rate_limits())))
            .clone();

        throttle.try_acquire().map_err(|window| {
            ProviderMetrics::record_throttled(&selected.provider.name);
            ProviderError::RateLimited(format!(
                "provider '{}' per-{} limit reached",
                selected.provider.name, window
            ))
        })
    }
}

fn covers_scope(provider: &NotificationProvider, notification: &Notification) -> bool {
    let tenant_ok = provider.tenant_id.is_none() || provider.tenant_id == notification.tenant_id;
    let app_ok = provider.app_id.is_none() || provider.app_id == notification.app_id;
    tenant_ok && app_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::notification::{Channel, CreateNotification};
    use crate::provider::adapter::{MockProviderAdapter, RateLimits};
    use crate::provider::repository::{MemoryProviderRepository, MockProviderRepository};
    use crate::provider::types::ProviderStatus;
    use chrono::Utc;
    use serde_json::json;

    fn registry(repo: Arc<dyn ProviderRepository>, limits: RateLimits) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new(repo);
        registry.register("mock", move |_| {
            let mut adapter = MockProviderAdapter::new();
            adapter.expect_validate_config().return_const(true);
            adapter.expect_rate_limits().return_const(limits);
            Ok(Arc::new(adapter) as Arc<dyn ProviderAdapter>)
        });
        registry
    }

    fn email() -> Notification {
        CreateNotification::direct(Channel::Email, "a@example.com", "hi").into_notification(Utc::now())
    }

    #[tokio::test]
    async fn test_lowest_priority_active_wins() {
        let repo = Arc::new(MemoryProviderRepository::new());
        for (name, priority, status) in [
            ("a", 10, ProviderStatus::Active),
            ("b", 5, ProviderStatus::Active),
            ("c", 1, ProviderStatus::Inactive),
        ] {
            repo.upsert(
                NotificationProvider::new(name, "mock", Channel::Email, json!({}))
                    .priority(priority)
                    .status(status),
            )
            .await
            .unwrap();
        }

        let registry = registry(repo, RateLimits::default());
        let selected = registry.select(&email()).await.unwrap();
        assert_eq!(selected.provider.name, "b");
    }

    #[tokio::test]
    async fn test_default_breaks_priority_tie() {
        let repo = Arc::new(MemoryProviderRepository::new());
        repo.upsert(NotificationProvider::new("a", "mock", Channel::Email, json!({})).priority(1))
            .await
            .unwrap();
        repo.upsert(
            NotificationProvider::new("z", "mock", Channel::Email, json!({}))
                .priority(1)
                .default_for_channel(true),
        )
        .await
        .unwrap();

        let registry = registry(repo, RateLimits::default());
        assert_eq!(registry.select(&email()).await.unwrap().provider.name, "z");
    }

    #[tokio::test]
    async fn test_no_provider_for_channel() {
        let registry = registry(Arc::new(MemoryProviderRepository::new()), RateLimits::default());
        let err = registry.select(&email()).await.err().unwrap();
        assert!(matches!(err, DeliveryError::NoProviderAvailable(_)));
    }

    #[tokio::test]
    async fn test_explicit_provider_has_no_fallback() {
        let repo = Arc::new(MemoryProviderRepository::new());
        repo.upsert(NotificationProvider::new("a", "mock", Channel::Email, json!({})))
            .await
            .unwrap();
        let registry = registry(repo, RateLimits::default());

        let mut notification = email();
        notification.provider_id = Some(Uuid::new_v4());
        let err = registry.select(&notification).await.err().unwrap();
        assert!(matches!(err, DeliveryError::NoProviderAvailable(_)));
    }

    #[tokio::test]
    async fn test_tenant_scoped_provider_skipped_for_other_tenants() {
        let repo = Arc::new(MemoryProviderRepository::new());
        let mut scoped = NotificationProvider::new("acme", "mock", Channel::Email, json!({})).priority(1);
        scoped.tenant_id = Some("acme".into());
        repo.upsert(scoped).await.unwrap();
        repo.upsert(NotificationProvider::new("global", "mock", Channel::Email, json!({})).priority(9))
            .await
            .unwrap();

        let registry = registry(repo, RateLimits::default());
        assert_eq!(registry.select(&email()).await.unwrap().provider.name, "global");

        let mut acme = email();
        acme.tenant_id = Some("acme".into());
        assert_eq!(registry.select(&acme).await.unwrap().provider.name, "acme");
    }

    #[tokio::test]
    async fn test_unknown_type_is_no_provider() {
        let repo = Arc::new(MemoryProviderRepository::new());
        repo.upsert(NotificationProvider::new("x", "carrier-pigeon", Channel::Email, json!({})))
            .await
            .unwrap();
        let registry = registry(repo, RateLimits::default());
        let err = registry.select(&email()).await.err().unwrap();
        assert!(matches!(err, DeliveryError::NoProviderAvailable(_)));
    }

    #[tokio::test]
    async fn test_adapter_is_cached() {
        let repo = Arc::new(MemoryProviderRepository::new());
        repo.upsert(NotificationProvider::new("a", "mock", Channel::Email, json!({})))
            .await
            .unwrap();
        let registry = registry(repo, RateLimits::default());

        let first = registry.select(&email()).await.unwrap();
        let second = registry.select(&email()).await.unwrap();
        assert!(Arc::ptr_eq(&first.adapter, &second.adapter));
    }

    #[tokio::test]
    async fn test_throttle_limits_sends() {
        let repo = Arc::new(MemoryProviderRepository::new());
        repo.upsert(NotificationProvider::new("a", "mock", Channel::Email, json!({})))
            .await
            .unwrap();
        let limits = RateLimits {
            per_minute: 2,
            ..Default::default()
        };
        let registry = registry(repo, limits);
        let selected = registry.select(&email()).await.unwrap();

        assert!(registry.acquire(&selected).is_ok());
        assert!(registry.acquire(&selected).is_ok());
        assert!(matches!(
            registry.acquire(&selected),
            Err(ProviderError::RateLimited(_))
        ));
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let mut repo = MockProviderRepository::new();
        repo.expect_list_for_channel()
            .returning(|_| Err(StoreError::Unavailable("down".into())));
        let registry = registry(Arc::new(repo), RateLimits::default());
        let err = registry.select(&email()).await.err().unwrap();
        assert!(matches!(err, DeliveryError::Store(_)));
    }
}
