use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::engine::EngineError;
use crate::error::StoreError;
use crate::notification::{Channel, ContentType};

/// Template errors
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Invalid template: {0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type TemplateResult<T> = Result<T, TemplateError>;

/// A versioned content template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationTemplate {
    pub id: Uuid,
    pub key: String,
    pub version: i32,
    pub name: String,
    pub channel: Channel,
    pub locale: Option<String>,
    pub subject_template: Option<String>,
    pub body_template: String,
    /// Name of the engine in the engine registry
    pub engine: String,
    pub content_type: ContentType,
    /// JSON schema hint for `template_data`; informational only
    #[serde(default)]
    pub variables_schema: serde_json::Value,
    pub is_active: bool,
    pub tenant_id: Option<String>,
    pub app_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to create a new template version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTemplate {
    pub key: String,
    pub name: String,
    pub channel: Channel,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub subject_template: Option<String>,
    pub body_template: String,
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub variables_schema: serde_json::Value,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
}

fn default_engine() -> String {
    "handlebars".to_string()
}

impl NewTemplate {
    pub fn new(
        key: impl Into<String>,
        channel: Channel,
        engine: impl Into<String>,
        body_template: impl Into<String>,
    ) -> Self {
        let key = key.into();
        Self {
            name: key.clone(),
            key,
            channel,
            locale: None,
            subject_template: None,
            body_template: body_template.into(),
            engine: engine.into(),
            content_type: ContentType::default(),
            variables_schema: serde_json::Value::Null,
            tenant_id: None,
            app_id: None,
        }
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject_template = Some(subject.into());
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

    /// Structural checks that do not need an engine
    pub fn validate(&self) -> TemplateResult<()> {
        if self.key.trim().is_empty() {
            return Err(TemplateError::Invalid("key cannot be empty".to_string()));
        }

        if !self
            .key
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(TemplateError::Invalid(format!(
                "key '{}' may only contain alphanumerics, '_', '-' and '.'",
                self.key
            )));
        }

        if self.body_template.is_empty() {
            return Err(TemplateError::Invalid(
                "body_template cannot be empty".to_string(),
            ));
        }

        if self.app_id.is_some() && self.tenant_id.is_none() {
            return Err(TemplateError::Invalid(
                "app_id requires tenant_id".to_string(),
            ));
        }

        Ok(())
    }

    /// Materialize as a stored template with the given version
    pub fn into_template(self, version: i32, now: DateTime<Utc>) -> NotificationTemplate {
        NotificationTemplate {
            id: Uuid::new_v4(),
            key: self.key,
            version,
            name: self.name,
            channel: self.channel,
            locale: self.locale,
            subject_template: self.subject_template,
            body_template: self.body_template,
            engine: self.engine,
            content_type: self.content_type,
            variables_schema: self.variables_schema,
            is_active: true,
            tenant_id: self.tenant_id,
            app_id: self.app_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// What the caller asks the resolver for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateLookup {
    pub key: String,
    pub channel: Channel,
    pub tenant_id: Option<String>,
    pub app_id: Option<String>,
    pub locale: Option<String>,
    pub version: Option<i32>,
}

impl TemplateLookup {
    pub fn new(key: impl Into<String>, channel: Channel) -> Self {
        Self {
            key: key.into(),
            channel,
            tenant_id: None,
            app_id: None,
            locale: None,
            version: None,
        }
    }

    pub fn scope(mut self, tenant_id: Option<&str>, app_id: Option<&str>) -> Self {
        self.tenant_id = tenant_id.map(str::to_string);
        self.app_id = app_id.map(str::to_string);
        self
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn version(mut self, version: i32) -> Self {
        self.version = Some(version);
        self
    }
}

/// One repository query issued by the resolver.
///
/// `None` for `tenant_id`/`app_id` matches rows where the column is null.
/// `None` for `locale` applies no locale filter. Only active templates match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateQuery {
    pub key: String,
    pub channel: Channel,
    pub locale: Option<String>,
    pub tenant_id: Option<String>,
    pub app_id: Option<String>,
    pub version: Option<i32>,
}

impl TemplateQuery {
    /// Whether a stored template satisfies this query
    pub fn matches(&self, template: &NotificationTemplate) -> bool {
        template.is_active
            && template.key == self.key
            && template.channel == self.channel
            && template.tenant_id == self.tenant_id
            && template.app_id == self.app_id
            && self
                .locale
                .as_ref()
                .is_none_or(|l| template.locale.as_ref() == Some(l))
            && self.version.is_none_or(|v| template.version == v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_template_validation() {
        assert!(NewTemplate::new("welcome", Channel::Email, "static", "Hi")
            .validate()
            .is_ok());
        assert!(NewTemplate::new("", Channel::Email, "static", "Hi")
            .validate()
            .is_err());
        assert!(NewTemplate::new("bad key", Channel::Email, "static", "Hi")
            .validate()
            .is_err());
        assert!(NewTemplate::new("welcome", Channel::Email, "static", "")
            .validate()
            .is_err());
        assert!(NewTemplate::new("welcome", Channel::Email, "static", "Hi")
            .scope(None, Some("crm"))
            .validate()
            .is_err());
    }

    #[test]
    fn test_query_matches_null_scope_exactly() {
        let template = NewTemplate::new("welcome", Channel::Email, "static", "Hi")
            .locale("en")
            .into_template(1, Utc::now());

        let global = TemplateQuery {
            key: "welcome".into(),
            channel: Channel::Email,
            locale: Some("en".into()),
            tenant_id: None,
            app_id: None,
            version: None,
        };
        assert!(global.matches(&template));

        let tenant = TemplateQuery {
            tenant_id: Some("acme".into()),
            ..global.clone()
        };
        assert!(!tenant.matches(&template));

        let any_locale = TemplateQuery {
            locale: None,
            ..global
        };
        assert!(any_locale.matches(&template));
    }

    #[test]
    fn test_inactive_never_matches() {
        let mut template =
            NewTemplate::new("welcome", Channel::Sms, "static", "Hi").into_template(1, Utc::now());
        template.is_active = false;
        let query = TemplateQuery {
            key: "welcome".into(),
            channel: Channel::Sms,
            locale: None,
            tenant_id: None,
            app_id: None,
            version: None,
        };
        assert!(!query.matches(&template));
    }
}
