//! Template persistence.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::notification::{Channel, ContentType};

use super::types::{NewTemplate, NotificationTemplate, TemplateQuery};

/// Storage backend for templates.
///
/// Templates are never deleted. Creating a template under an existing
/// `(tenant, app, key, channel, locale)` allocates the next version.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    /// Active templates matching the query, highest version first
    async fn find(&self, query: &TemplateQuery) -> Result<Vec<NotificationTemplate>, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<NotificationTemplate>, StoreError>;

    /// Persist a new version and return it
    async fn create(&self, template: NewTemplate) -> Result<NotificationTemplate, StoreError>;

    /// Toggle `is_active`; returns the updated template if it exists
    async fn set_active(
        &self,
        id: Uuid,
        active: bool,
    ) -> Result<Option<NotificationTemplate>, StoreError>;
}

/// In-memory template repository
#[derive(Default)]
pub struct MemoryTemplateRepository {
    templates: DashMap<Uuid, NotificationTemplate>,
    /// Serializes version allocation
    create_lock: tokio::sync::Mutex<()>,
}

impl MemoryTemplateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[async_trait]
impl TemplateRepository for MemoryTemplateRepository {
    async fn find(&self, query: &TemplateQuery) -> Result<Vec<NotificationTemplate>, StoreError> {
        let mut found: Vec<NotificationTemplate> = self
            .templates
            .iter()
            .filter(|entry| query.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(found)
    }

    async fn get(&self, id: Uuid) -> Result<Option<NotificationTemplate>, StoreError> {
        Ok(self.templates.get(&id).map(|t| t.clone()))
    }

    async fn create(&self, template: NewTemplate) -> Result<NotificationTemplate, StoreError> {
        let _guard = self.create_lock.lock().await;

        let latest = self
            .templates
            .iter()
            .filter(|entry| {
                let t = entry.value();
                t.key == template.key
                    && t.channel == template.channel
                    && t.locale == template.locale
                    && t.tenant_id == template.tenant_id
                    && t.app_id == template.app_id
            })
            .map(|entry| entry.value().version)
            .max()
            .unwrap_or(0);

        let stored = template.into_template(latest + 1, Utc::now());
        self.templates.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn set_active(
        &self,
        id: Uuid,
        active: bool,
    ) -> Result<Option<NotificationTemplate>, StoreError> {
        Ok(self.templates.get_mut(&id).map(|mut entry| {
            entry.is_active = active;
            entry.updated_at = Utc::now();
            entry.clone()
        }))
    }
}

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: Uuid,
    key: String,
    version: i32,
    name: String,
    channel: String,
    locale: Option<String>,
    subject_template: Option<String>,
    body_template: String,
    engine: String,
    content_type: String,
    variables_schema: serde_json::Value,
    is_active: bool,
    tenant_id: Option<String>,
    app_id: Option<String>,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

impl TryFrom<TemplateRow> for NotificationTemplate {
    type Error = StoreError;

    fn try_from(row: TemplateRow) -> Result<Self, Self::Error> {
        Ok(NotificationTemplate {
            id: row.id,
            key: row.key,
            version: row.version,
            name: row.name,
            channel: row.channel.parse::<Channel>().map_err(StoreError::Corrupt)?,
            locale: row.locale,
            subject_template: row.subject_template,
            body_template: row.body_template,
            engine: row.engine,
            content_type: row
                .content_type
                .parse::<ContentType>()
                .map_err(StoreError::Corrupt)?,
            variables_schema: row.variables_schema,
            is_active: row.is_active,
            tenant_id: row.tenant_id,
            app_id: row.app_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const TEMPLATE_COLUMNS: &str = "id, key, version, name, channel, locale, subject_template, \
     body_template, engine, content_type, variables_schema, is_active, tenant_id, app_id, \
     created_at, updated_at";

/// PostgreSQL template repository (`notification_templates` table)
pub struct PgTemplateRepository {
    pool: PgPool,
}

impl PgTemplateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateRepository for PgTemplateRepository {
    async fn find(&self, query: &TemplateQuery) -> Result<Vec<NotificationTemplate>, StoreError> {
        // IS NOT DISTINCT FROM gives NULL = NULL semantics for the scope columns
        let sql = format!(
            r#"
            SELECT {TEMPLATE_COLUMNS}
            FROM notification_templates
            WHERE key = $1
              AND channel = $2
              AND is_active = TRUE
              AND tenant_id IS NOT DISTINCT FROM $3
              AND app_id IS NOT DISTINCT FROM $4
              AND ($5::TEXT IS NULL OR locale = $5)
              AND ($6::INT IS NULL OR version = $6)
            ORDER BY version DESC
            "#
        );

        let rows: Vec<TemplateRow> = sqlx::query_as(&sql)
            .bind(&query.key)
            .bind(query.channel.as_str())
            .bind(&query.tenant_id)
            .bind(&query.app_id)
            .bind(&query.locale)
            .bind(query.version)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(NotificationTemplate::try_from).collect()
    }

    async fn get(&self, id: Uuid) -> Result<Option<NotificationTemplate>, StoreError> {
        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM notification_templates WHERE id = $1");
        let row: Option<TemplateRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(NotificationTemplate::try_from).transpose()
    }

    async fn create(&self, template: NewTemplate) -> Result<NotificationTemplate, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serialize concurrent creators of the same logical template
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!(
                "{}|{}|{}|{}|{}",
                template.tenant_id.as_deref().unwrap_or(""),
                template.app_id.as_deref().unwrap_or(""),
                template.key,
                template.channel.as_str(),
                template.locale.as_deref().unwrap_or("")
            ))
            .execute(&mut *tx)
            .await?;

        let (latest,): (Option<i32>,) = sqlx::query_as(
            r#"
            SELECT MAX(version) FROM notification_templates
            WHERE key = $1
              AND channel = $2
              AND locale IS NOT DISTINCT FROM $3
              AND tenant_id IS NOT DISTINCT FROM $4
              AND app_id IS NOT DISTINCT FROM $5
            "#,
        )
        .bind(&template.key)
        .bind(template.channel.as_str())
        .bind(&template.locale)
        .bind(&template.tenant_id)
        .bind(&template.app_id)
        .fetch_one(&mut *tx)
        .await?;

        let stored = template.into_template(latest.unwrap_or(0) + 1, Utc::now());

        sqlx::query(
            r#"
            INSERT INTO notification_templates
                (id, key, version, name, channel, locale, subject_template, body_template,
                 engine, content_type, variables_schema, is_active, tenant_id, app_id,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(stored.id)
        .bind(&stored.key)
        .bind(stored.version)
        .bind(&stored.name)
        .bind(stored.channel.as_str())
        .bind(&stored.locale)
        .bind(&stored.subject_template)
        .bind(&stored.body_template)
        .bind(&stored.engine)
        .bind(stored.content_type.as_str())
        .bind(&stored.variables_schema)
        .bind(stored.is_active)
        .bind(&stored.tenant_id)
        .bind(&stored.app_id)
        .bind(stored.created_at)
        .bind(stored.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            template_id = %stored.id,
            key = %stored.key,
            version = stored.version,
            "Template version created"
        );

        Ok(stored)
    }

    async fn set_active(
        &self,
        id: Uuid,
        active: bool,
    ) -> Result<Option<NotificationTemplate>, StoreError> {
        let sql = format!(
            "UPDATE notification_templates SET is_active = $2, updated_at = $3 \
             WHERE id = $1 RETURNING {TEMPLATE_COLUMNS}"
        );
        let row: Option<TemplateRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(active)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;
        row.map(NotificationTemplate::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_increments_version_per_scope() {
        let repo = MemoryTemplateRepository::new();

        let v1 = repo
            .create(NewTemplate::new("welcome", Channel::Email, "static", "v1").locale("en"))
            .await
            .unwrap();
        let v2 = repo
            .create(NewTemplate::new("welcome", Channel::Email, "static", "v2").locale("en"))
            .await
            .unwrap();
        let other_scope = repo
            .create(
                NewTemplate::new("welcome", Channel::Email, "static", "acme")
                    .locale("en")
                    .scope(Some("acme"), None),
            )
            .await
            .unwrap();

        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);
        assert_eq!(other_scope.version, 1);
        assert_eq!(repo.len(), 3);
    }

    #[tokio::test]
    async fn test_find_orders_versions_descending() {
        let repo = MemoryTemplateRepository::new();
        for body in ["a", "b", "c"] {
            repo.create(NewTemplate::new("otp", Channel::Sms, "static", body))
                .await
                .unwrap();
        }

        let query = TemplateQuery {
            key: "otp".into(),
            channel: Channel::Sms,
            locale: None,
            tenant_id: None,
            app_id: None,
            version: None,
        };
        let found = repo.find(&query).await.unwrap();
        let versions: Vec<i32> = found.iter().map(|t| t.version).collect();
        assert_eq!(versions, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_set_active_hides_template() {
        let repo = MemoryTemplateRepository::new();
        let t = repo
            .create(NewTemplate::new("otp", Channel::Sms, "static", "x"))
            .await
            .unwrap();

        let updated = repo.set_active(t.id, false).await.unwrap().unwrap();
        assert!(!updated.is_active);

        let query = TemplateQuery {
            key: "otp".into(),
            channel: Channel::Sms,
            locale: None,
            tenant_id: None,
            app_id: None,
            version: None,
        };
        assert!(repo.find(&query).await.unwrap().is_empty());
        assert!(repo.set_active(Uuid::new_v4(), true).await.unwrap().is_none());
    }
}
