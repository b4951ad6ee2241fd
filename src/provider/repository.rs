//! Provider persistence.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::notification::Channel;

use super::types::{NotificationProvider, ProviderStatus, RetryStrategy};

/// Storage backend for provider records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<NotificationProvider>, StoreError>;

    /// Every provider registered for a channel, in no particular order
    async fn list_for_channel(
        &self,
        channel: Channel,
    ) -> Result<Vec<NotificationProvider>, StoreError>;

    async fn list(&self) -> Result<Vec<NotificationProvider>, StoreError>;

    /// Insert, or replace the provider with the same name keeping its id
    async fn upsert(&self, provider: NotificationProvider)
        -> Result<NotificationProvider, StoreError>;
}

/// In-memory provider repository
#[derive(Default)]
pub struct MemoryProviderRepository {
    providers: DashMap<Uuid, NotificationProvider>,
}

impl MemoryProviderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProviderRepository for MemoryProviderRepository {
    async fn get(&self, id: Uuid) -> Result<Option<NotificationProvider>, StoreError> {
        Ok(self.providers.get(&id).map(|p| p.clone()))
    }

    async fn list_for_channel(
        &self,
        channel: Channel,
    ) -> Result<Vec<NotificationProvider>, StoreError> {
        Ok(self
            .providers
            .iter()
            .filter(|entry| entry.channel == channel)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn list(&self) -> Result<Vec<NotificationProvider>, StoreError> {
        Ok(self.providers.iter().map(|e| e.value().clone()).collect())
    }

    async fn upsert(
        &self,
        mut provider: NotificationProvider,
    ) -> Result<NotificationProvider, StoreError> {
        let existing = self
            .providers
            .iter()
            .find(|entry| entry.name == provider.name)
            .map(|entry| (entry.id, entry.created_at));

        if let Some((id, created_at)) = existing {
            provider.id = id;
            provider.created_at = created_at;
            provider.updated_at = Utc::now();
        }

        self.providers.insert(provider.id, provider.clone());
        Ok(provider)
    }
}

#[derive(sqlx::FromRow)]
struct ProviderRow {
    id: Uuid,
    name: String,
    provider_type: String,
    channel: String,
    configuration: serde_json::Value,
    status: String,
    priority: i32,
    is_default: bool,
    retry_strategy: String,
    retry_delays: Vec<i64>,
    tenant_id: Option<String>,
    app_id: Option<String>,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

impl TryFrom<ProviderRow> for NotificationProvider {
    type Error = StoreError;

    fn try_from(row: ProviderRow) -> Result<Self, Self::Error> {
        Ok(NotificationProvider {
            id: row.id,
            name: row.name,
            provider_type: row.provider_type,
            channel: row.channel.parse::<Channel>().map_err(StoreError::Corrupt)?,
            configuration: row.configuration,
            status: row
                .status
                .parse::<ProviderStatus>()
                .map_err(StoreError::Corrupt)?,
            priority: row.priority,
            is_default: row.is_default,
            retry_strategy: row
                .retry_strategy
                .parse::<RetryStrategy>()
                .map_err(StoreError::Corrupt)?,
            retry_delays: row.retry_delays.into_iter().map(|d| d.max(0) as u64).collect(),
            tenant_id: row.tenant_id,
            app_id: row.app_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const PROVIDER_COLUMNS: &str = "id, name, provider_type, channel, configuration, status, \
     priority, is_default, retry_strategy, retry_delays, tenant_id, app_id, created_at, updated_at";

/// PostgreSQL provider repository (`notification_providers` table)
pub struct PgProviderRepository {
    pool: PgPool,
}

impl PgProviderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, sql: &str, bind: Option<&str>) -> Result<Vec<NotificationProvider>, StoreError> {
        let mut query = sqlx::query_as::<_, ProviderRow>(sql);
        if let Some(value) = bind {
            query = query.bind(value.to_string());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(NotificationProvider::try_from).collect()
    }
}

#[async_trait]
impl ProviderRepository for PgProviderRepository {
    async fn get(&self, id: Uuid) -> Result<Option<NotificationProvider>, StoreError> {
        let sql = format!("SELECT {PROVIDER_COLUMNS} FROM notification_providers WHERE id = $1");
        let row: Option<ProviderRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(NotificationProvider::try_from).transpose()
    }

    async fn list_for_channel(
        &self,
        channel: Channel,
    ) -> Result<Vec<NotificationProvider>, StoreError> {
        let sql =
            format!("SELECT {PROVIDER_COLUMNS} FROM notification_providers WHERE channel = $1");
        self.fetch(&sql, Some(channel.as_str())).await
    }

    async fn list(&self) -> Result<Vec<NotificationProvider>, StoreError> {
        let sql = format!("SELECT {PROVIDER_COLUMNS} FROM notification_providers ORDER BY name");
        self.fetch(&sql, None).await
    }

    async fn upsert(
        &self,
        provider: NotificationProvider,
    ) -> Result<NotificationProvider, StoreError> {
        let delays: Vec<i64> = provider.retry_delays.iter().map(|d| *d as i64).collect();
        let sql = format!(
            r#"
            INSERT INTO notification_providers
                (id, name, provider_type, channel, configuration, status, priority, is_default,
                 retry_strategy, retry_delays, tenant_id, app_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (name) DO UPDATE SET
                provider_type = EXCLUDED.provider_type,
                channel = EXCLUDED.channel,
                configuration = EXCLUDED.configuration,
                status = EXCLUDED.status,
                priority = EXCLUDED.priority,
                is_default = EXCLUDED.is_default,
                retry_strategy = EXCLUDED.retry_strategy,
                retry_delays = EXCLUDED.retry_delays,
                tenant_id = EXCLUDED.tenant_id,
                app_id = EXCLUDED.app_id,
                updated_at = EXCLUDED.updated_at
            RETURNING {PROVIDER_COLUMNS}
            "#
        );

        let row: ProviderRow = sqlx::query_as(&sql)
            .bind(provider.id)
            .bind(&provider.name)
            .bind(&provider.provider_type)
            .bind(provider.channel.as_str())
            .bind(&provider.configuration)
            .bind(provider.status.as_str())
            .bind(provider.priority)
            .bind(provider.is_default)
            .bind(provider.retry_strategy.as_str())
            .bind(&delays)
            .bind(&provider.tenant_id)
            .bind(&provider.app_id)
            .bind(provider.created_at)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await?;

        row.try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_keeps_id_by_name() {
        let repo = MemoryProviderRepository::new();
        let first = repo
            .upsert(NotificationProvider::new("mail", "smtp", Channel::Email, json!({})))
            .await
            .unwrap();
        let second = repo
            .upsert(
                NotificationProvider::new("mail", "smtp", Channel::Email, json!({"host": "x"}))
                    .priority(5),
            )
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(repo.list().await.unwrap().len(), 1);
        let stored = repo.get(first.id).await.unwrap().unwrap();
        assert_eq!(stored.priority, 5);
    }

    #[tokio::test]
    async fn test_list_for_channel_filters() {
        let repo = MemoryProviderRepository::new();
        repo.upsert(NotificationProvider::new("mail", "smtp", Channel::Email, json!({})))
            .await
            .unwrap();
        repo.upsert(NotificationProvider::new("sms", "sms_gateway", Channel::Sms, json!({})))
            .await
            .unwrap();

        let email = repo.list_for_channel(Channel::Email).await.unwrap();
        assert_eq!(email.len(), 1);
        assert_eq!(email[0].name, "mail");
    }
}
