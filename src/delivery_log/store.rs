use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::notification::NotificationStatus;

use super::DeliveryLogEntry;

#[async_trait]
pub trait DeliveryLogStore: Send + Sync {
    async fn append(&self, entry: DeliveryLogEntry) -> Result<(), StoreError>;

    /// Entries for one notification, oldest attempt first
    async fn list_for_notification(
        &self,
        notification_id: Uuid,
    ) -> Result<Vec<DeliveryLogEntry>, StoreError>;
}

/// In-memory delivery log, grouped by notification
#[derive(Default)]
pub struct MemoryDeliveryLogStore {
    entries: DashMap<Uuid, Vec<DeliveryLogEntry>>,
}

impl MemoryDeliveryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total entries across all notifications
    pub fn len(&self) -> usize {
        self.entries.iter().map(|e| e.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeliveryLogStore for MemoryDeliveryLogStore {
    async fn append(&self, entry: DeliveryLogEntry) -> Result<(), StoreError> {
        self.entries
            .entry(entry.notification_id)
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn list_for_notification(
        &self,
        notification_id: Uuid,
    ) -> Result<Vec<DeliveryLogEntry>, StoreError> {
        let mut entries = self
            .entries
            .get(&notification_id)
            .map(|e| e.clone())
            .unwrap_or_default();
        entries.sort_by_key(|e| (e.attempted_at, e.attempt_number));
        Ok(entries)
    }
}

#[derive(sqlx::FromRow)]
struct DeliveryLogRow {
    id: Uuid,
    notification_id: Uuid,
    provider_id: Option<Uuid>,
    attempt_number: i32,
    attempted_at: chrono::DateTime<chrono::Utc>,
    status: String,
    response: Option<serde_json::Value>,
    error_message: Option<String>,
    duration_ms: i64,
}

impl TryFrom<DeliveryLogRow> for DeliveryLogEntry {
    type Error = StoreError;

    fn try_from(row: DeliveryLogRow) -> Result<Self, Self::Error> {
        Ok(DeliveryLogEntry {
            id: row.id,
            notification_id: row.notification_id,
            provider_id: row.provider_id,
            attempt_number: u32::try_from(row.attempt_number)
                .map_err(|_| StoreError::Corrupt(format!("attempt_number {}", row.attempt_number)))?,
            attempted_at: row.attempted_at,
            status: row
                .status
                .parse::<NotificationStatus>()
                .map_err(StoreError::Corrupt)?,
            response: row.response,
            error_message: row.error_message,
            duration_ms: row.duration_ms.max(0) as u64,
        })
    }
}

/// PostgreSQL delivery log (`delivery_log` table)
pub struct PgDeliveryLogStore {
    pool: PgPool,
}

impl PgDeliveryLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryLogStore for PgDeliveryLogStore {
    async fn append(&self, entry: DeliveryLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO delivery_log
                (id, notification_id, provider_id, attempt_number, attempted_at,
                 status, response, error_message, duration_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(entry.id)
        .bind(entry.notification_id)
        .bind(entry.provider_id)
        .bind(entry.attempt_number as i32)
        .bind(entry.attempted_at)
        .bind(entry.status.as_str())
        .bind(&entry.response)
        .bind(&entry.error_message)
        .bind(entry.duration_ms as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_notification(
        &self,
        notification_id: Uuid,
    ) -> Result<Vec<DeliveryLogEntry>, StoreError> {
        let rows: Vec<DeliveryLogRow> = sqlx::query_as(
            r#"
            SELECT id, notification_id, provider_id, attempt_number, attempted_at,
                   status, response, error_message, duration_ms
            FROM delivery_log
            WHERE notification_id = $1
            ORDER BY attempted_at ASC, attempt_number ASC
            "#,
        )
        .bind(notification_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DeliveryLogEntry::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_entries_listed_in_attempt_order() {
        let store = MemoryDeliveryLogStore::new();
        let id = Uuid::new_v4();
        let now = Utc::now();

        store
            .append(DeliveryLogEntry::new(id, 2, NotificationStatus::Sent, now))
            .await
            .unwrap();
        store
            .append(
                DeliveryLogEntry::new(id, 1, NotificationStatus::Failed, now - Duration::seconds(60))
                    .error(Some("connection refused".to_string())),
            )
            .await
            .unwrap();
        store
            .append(DeliveryLogEntry::new(Uuid::new_v4(), 1, NotificationStatus::Sent, now))
            .await
            .unwrap();

        let entries = store.list_for_notification(id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].attempt_number, 1);
        assert_eq!(entries[0].status, NotificationStatus::Failed);
        assert_eq!(entries[1].attempt_number, 2);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_notification_has_no_entries() {
        let store = MemoryDeliveryLogStore::new();
        let entries = store.list_for_notification(Uuid::new_v4()).await.unwrap();
        assert!(entries.is_empty());
    }
}
