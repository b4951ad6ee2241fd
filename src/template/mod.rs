//! Notification templates.
//!
//! Templates are versioned per `(tenant, app, key, channel, locale)` and are
//! never deleted; a new version supersedes older ones and deactivation
//! hides a version from resolution.
//!
//! # Example
//!
//! ```ignore
//! let resolver = TemplateResolver::new(repo, Arc::new(EngineRegistry::with_builtin()));
//! resolver
//!     .create_template(NewTemplate::new("welcome", Channel::Email, "substitution", "Hi ${name}").locale("en"))
//!     .await?;
//!
//! // fr-CA falls back to fr, then to en
//! let lookup = TemplateLookup::new("welcome", Channel::Email).locale("fr-CA");
//! let template = resolver.resolve(&lookup).await?;
//! let content = resolver.render(&template, &json!({"name": "Ada"}))?;
//! ```

mod repository;
mod resolver;
mod types;

pub use repository::{MemoryTemplateRepository, PgTemplateRepository, TemplateRepository};
pub use resolver::{
    locale_candidates, scope_candidates, RenderedContent, ResolverStatsSnapshot,
    TemplateResolver, DEFAULT_LOCALE,
};
pub use types::{
    NewTemplate, NotificationTemplate, TemplateError, TemplateLookup, TemplateQuery,
    TemplateResult,
};
