//! Notification persistence.
//!
//! The store is the only synchronization point of the pipeline: the
//! `PENDING → PROCESSING` claim is a compare-and-swap, so a notification is
//! sent at most once no matter how many workers pick up its task.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::error::StoreError;

use super::types::{
    Channel, ContentType, Notification, NotificationMeta, NotificationStatus, Priority,
    RetryDecision,
};

/// Result of a conditional status change
#[derive(Debug, Clone)]
pub enum CasOutcome {
    /// Status changed; carries the updated notification
    Swapped(Notification),
    /// Current status did not match the expected one
    Mismatch(NotificationStatus),
    NotFound,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: Notification) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Notification>, StoreError>;

    /// Atomically move `id` from `expected` to `next`, stamping the
    /// timestamp that belongs to `next`.
    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: NotificationStatus,
        next: NotificationStatus,
        at: DateTime<Utc>,
    ) -> Result<CasOutcome, StoreError>;

    /// Overwrite the mutable fields of an existing notification
    async fn save(&self, notification: &Notification) -> Result<(), StoreError>;

    /// Apply [`Notification::reopen_for_retry`] under the row lock.
    /// `None` when the notification does not exist.
    async fn reopen_for_retry(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<(RetryDecision, Notification)>, StoreError>;
}

/// In-memory notification store
#[derive(Default)]
pub struct MemoryNotificationStore {
    notifications: DashMap<Uuid, Notification>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn insert(&self, notification: Notification) -> Result<(), StoreError> {
        use dashmap::mapref::entry::Entry;

        match self.notifications.entry(notification.id) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "notification {} already exists",
                notification.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(notification);
                Ok(())
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notification>, StoreError> {
        Ok(self.notifications.get(&id).map(|n| n.clone()))
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: NotificationStatus,
        next: NotificationStatus,
        at: DateTime<Utc>,
    ) -> Result<CasOutcome, StoreError> {
        // The shard write lock held by get_mut makes check-and-set atomic
        let Some(mut entry) = self.notifications.get_mut(&id) else {
            return Ok(CasOutcome::NotFound);
        };
        if entry.status != expected {
            return Ok(CasOutcome::Mismatch(entry.status));
        }
        entry.set_status(next, at);
        Ok(CasOutcome::Swapped(entry.clone()))
    }

    async fn save(&self, notification: &Notification) -> Result<(), StoreError> {
        match self.notifications.get_mut(&notification.id) {
            Some(mut entry) => {
                *entry = notification.clone();
                Ok(())
            }
            None => Err(StoreError::Conflict(format!(
                "notification {} does not exist",
                notification.id
            ))),
        }
    }

    async fn reopen_for_retry(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<(RetryDecision, Notification)>, StoreError> {
        Ok(self.notifications.get_mut(&id).map(|mut entry| {
            let decision = entry.reopen_for_retry(at);
            (decision, entry.clone())
        }))
    }
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    channel: String,
    recipient_address: String,
    recipient_id: Option<String>,
    sender_id: Option<String>,
    tenant_id: Option<String>,
    app_id: Option<String>,
    subject: Option<String>,
    body: Option<String>,
    template_key: Option<String>,
    template_version: Option<i32>,
    template_data: serde_json::Value,
    locale: Option<String>,
    content_type: String,
    priority: String,
    status: String,
    scheduled_at: Option<DateTime<Utc>>,
    sent_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    error_code: Option<String>,
    retry_count: i32,
    max_retries: i32,
    provider_id: Option<Uuid>,
    provider_message_id: Option<String>,
    provider_response: Option<serde_json::Value>,
    tags: Vec<String>,
    meta: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn non_negative(value: i32, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column} = {value}")))
}

impl TryFrom<NotificationRow> for Notification {
    type Error = StoreError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        Ok(Notification {
            id: row.id,
            channel: row.channel.parse::<Channel>().map_err(StoreError::Corrupt)?,
            recipient_address: row.recipient_address,
            recipient_id: row.recipient_id,
            sender_id: row.sender_id,
            tenant_id: row.tenant_id,
            app_id: row.app_id,
            subject: row.subject,
            body: row.body,
            template_key: row.template_key,
            template_version: row.template_version,
            template_data: row.template_data,
            locale: row.locale,
            content_type: row
                .content_type
                .parse::<ContentType>()
                .map_err(StoreError::Corrupt)?,
            priority: row.priority.parse::<Priority>().map_err(StoreError::Corrupt)?,
            status: row
                .status
                .parse::<NotificationStatus>()
                .map_err(StoreError::Corrupt)?,
            scheduled_at: row.scheduled_at,
            sent_at: row.sent_at,
            delivered_at: row.delivered_at,
            failed_at: row.failed_at,
            error_message: row.error_message,
            error_code: row.error_code,
            retry_count: non_negative(row.retry_count, "retry_count")?,
            max_retries: non_negative(row.max_retries, "max_retries")?,
            provider_id: row.provider_id,
            provider_message_id: row.provider_message_id,
            provider_response: row.provider_response,
            tags: row.tags,
            meta: serde_json::from_value::<NotificationMeta>(row.meta)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const NOTIFICATION_COLUMNS: &str = "id, channel, recipient_address, recipient_id, sender_id, \
     tenant_id, app_id, subject, body, template_key, template_version, template_data, locale, \
     content_type, priority, status, scheduled_at, sent_at, delivered_at, failed_at, \
     error_message, error_code, retry_count, max_retries, provider_id, provider_message_id, \
     provider_response, tags, meta, created_at, updated_at";

/// PostgreSQL notification store (`notifications` table)
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn update<'e, E: PgExecutor<'e>>(
        executor: E,
        notification: &Notification,
    ) -> Result<u64, StoreError> {
        let meta = serde_json::to_value(&notification.meta)?;
        let result = sqlx::query(
            r#"
            UPDATE notifications SET
                status = $2,
                sent_at = $3,
                delivered_at = $4,
                failed_at = $5,
                error_message = $6,
                error_code = $7,
                retry_count = $8,
                provider_id = $9,
                provider_message_id = $10,
                provider_response = $11,
                meta = $12,
                updated_at = $13
            WHERE id = $1
            "#,
        )
        .bind(notification.id)
        .bind(notification.status.as_str())
        .bind(notification.sent_at)
        .bind(notification.delivered_at)
        .bind(notification.failed_at)
        .bind(&notification.error_message)
        .bind(&notification.error_code)
        .bind(notification.retry_count as i32)
        .bind(notification.provider_id)
        .bind(&notification.provider_message_id)
        .bind(&notification.provider_response)
        .bind(meta)
        .bind(notification.updated_at)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn insert(&self, n: Notification) -> Result<(), StoreError> {
        let meta = serde_json::to_value(&n.meta)?;
        let sql = format!(
            "INSERT INTO notifications ({NOTIFICATION_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
              $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31)"
        );

        sqlx::query(&sql)
            .bind(n.id)
            .bind(n.channel.as_str())
            .bind(&n.recipient_address)
            .bind(&n.recipient_id)
            .bind(&n.sender_id)
            .bind(&n.tenant_id)
            .bind(&n.app_id)
            .bind(&n.subject)
            .bind(&n.body)
            .bind(&n.template_key)
            .bind(n.template_version)
            .bind(&n.template_data)
            .bind(&n.locale)
            .bind(n.content_type.as_str())
            .bind(n.priority.as_str())
            .bind(n.status.as_str())
            .bind(n.scheduled_at)
            .bind(n.sent_at)
            .bind(n.delivered_at)
            .bind(n.failed_at)
            .bind(&n.error_message)
            .bind(&n.error_code)
            .bind(n.retry_count as i32)
            .bind(n.max_retries as i32)
            .bind(n.provider_id)
            .bind(&n.provider_message_id)
            .bind(&n.provider_response)
            .bind(&n.tags)
            .bind(meta)
            .bind(n.created_at)
            .bind(n.updated_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notification>, StoreError> {
        let sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = $1");
        let row: Option<NotificationRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Notification::try_from).transpose()
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: NotificationStatus,
        next: NotificationStatus,
        at: DateTime<Utc>,
    ) -> Result<CasOutcome, StoreError> {
        let sql = format!(
            r#"
            UPDATE notifications SET
                status = $3,
                updated_at = $4,
                sent_at = CASE WHEN $3 = 'SENT' THEN $4 ELSE sent_at END,
                delivered_at = CASE WHEN $3 = 'DELIVERED' THEN $4 ELSE delivered_at END,
                failed_at = CASE WHEN $3 IN ('FAILED', 'REJECTED', 'BOUNCED') THEN $4 ELSE failed_at END
            WHERE id = $1 AND status = $2
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        );

        let row: Option<NotificationRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(expected.as_str())
            .bind(next.as_str())
            .bind(at)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            return Ok(CasOutcome::Swapped(Notification::try_from(row)?));
        }

        let current: Option<(String,)> =
            sqlx::query_as("SELECT status FROM notifications WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match current {
            Some((status,)) => Ok(CasOutcome::Mismatch(
                status
                    .parse::<NotificationStatus>()
                    .map_err(StoreError::Corrupt)?,
            )),
            None => Ok(CasOutcome::NotFound),
        }
    }

    async fn save(&self, notification: &Notification) -> Result<(), StoreError> {
        match Self::update(&self.pool, notification).await? {
            0 => Err(StoreError::Conflict(format!(
                "notification {} does not exist",
                notification.id
            ))),
            _ => Ok(()),
        }
    }

    async fn reopen_for_retry(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<(RetryDecision, Notification)>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = $1 FOR UPDATE"
        );
        let row: Option<NotificationRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut notification = Notification::try_from(row)?;
        let decision = notification.reopen_for_retry(at);
        if !matches!(decision, RetryDecision::NotRetryable(_)) {
            Self::update(&mut *tx, &notification).await?;
        }
        tx.commit().await?;

        Ok(Some((decision, notification)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::CreateNotification;
    use std::sync::Arc;

    fn pending() -> Notification {
        CreateNotification::direct(Channel::Email, "a@example.com", "hi").into_notification(Utc::now())
    }

    #[tokio::test]
    async fn test_cas_claims_once() {
        let store = MemoryNotificationStore::new();
        let n = pending();
        let id = n.id;
        store.insert(n).await.unwrap();

        let first = store
            .compare_and_set_status(id, NotificationStatus::Pending, NotificationStatus::Processing, Utc::now())
            .await
            .unwrap();
        assert!(matches!(first, CasOutcome::Swapped(ref n) if n.status == NotificationStatus::Processing));

        let second = store
            .compare_and_set_status(id, NotificationStatus::Pending, NotificationStatus::Processing, Utc::now())
            .await
            .unwrap();
        assert!(matches!(second, CasOutcome::Mismatch(NotificationStatus::Processing)));

        let missing = store
            .compare_and_set_status(Uuid::new_v4(), NotificationStatus::Pending, NotificationStatus::Processing, Utc::now())
            .await
            .unwrap();
        assert!(matches!(missing, CasOutcome::NotFound));
    }

    #[tokio::test]
    async fn test_concurrent_cas_single_winner() {
        let store = Arc::new(MemoryNotificationStore::new());
        let n = pending();
        let id = n.id;
        store.insert(n).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .compare_and_set_status(
                        id,
                        NotificationStatus::Pending,
                        NotificationStatus::Processing,
                        Utc::now(),
                    )
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), CasOutcome::Swapped(_)) {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_cas_stamps_timestamp() {
        let store = MemoryNotificationStore::new();
        let mut n = pending();
        n.status = NotificationStatus::Sent;
        let id = n.id;
        store.insert(n).await.unwrap();

        let outcome = store
            .compare_and_set_status(id, NotificationStatus::Sent, NotificationStatus::Delivered, Utc::now())
            .await
            .unwrap();
        match outcome {
            CasOutcome::Swapped(n) => assert!(n.delivered_at.is_some()),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_insert_conflicts() {
        let store = MemoryNotificationStore::new();
        let n = pending();
        store.insert(n.clone()).await.unwrap();
        assert!(matches!(store.insert(n).await, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_reopen_for_retry_persists() {
        let store = MemoryNotificationStore::new();
        let mut n = pending();
        n.status = NotificationStatus::Failed;
        let id = n.id;
        store.insert(n).await.unwrap();

        let (decision, updated) = store.reopen_for_retry(id, Utc::now()).await.unwrap().unwrap();
        assert_eq!(decision, RetryDecision::Requeued);
        assert_eq!(updated.retry_count, 1);

        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Pending);
        assert_eq!(stored.retry_count, 1);

        assert!(store.reopen_for_retry(Uuid::new_v4(), Utc::now()).await.unwrap().is_none());
    }
}
