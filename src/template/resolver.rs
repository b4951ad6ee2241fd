//! Locale/scope fallback resolution with a lookup cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::engine::{EngineError, EngineRegistry};
use crate::metrics::TemplateMetrics;

use super::repository::TemplateRepository;
use super::types::{
    NewTemplate, NotificationTemplate, TemplateError, TemplateLookup, TemplateQuery,
    TemplateResult,
};

/// Locale every lookup falls back to last
pub const DEFAULT_LOCALE: &str = "en";

/// Statistics for the resolver cache
#[derive(Debug, Default)]
pub struct ResolverStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub invalidations: AtomicU64,
}

/// Snapshot of resolver statistics for serialization
#[derive(Debug, Clone, Serialize)]
pub struct ResolverStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub cached_entries: usize,
}

/// Rendered subject and body
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedContent {
    pub subject: Option<String>,
    pub body: String,
}

/// Resolves the most specific active template for a lookup.
///
/// Candidates are tried locale-outer, scope-inner:
///
/// - locales: requested, its base language, then `en`
/// - scopes: `(tenant, app)`, `(tenant, -)`, `(-, -)`
///
/// The first candidate with a match wins and the repository's highest
/// version is taken.
///
/// Every invalidation bumps a per-key generation. A lookup only caches its
/// result when the generation it started under is still current, so a
/// template deactivated mid-lookup is never cached.
pub struct TemplateResolver {
    repository: Arc<dyn TemplateRepository>,
    engines: Arc<EngineRegistry>,
    cache: DashMap<TemplateLookup, CachedTemplate>,
    generations: DashMap<String, u64>,
    cache_enabled: bool,
    cache_ttl: Option<Duration>,
    stats: ResolverStats,
}

struct CachedTemplate {
    template: NotificationTemplate,
    cached_at: Instant,
}

impl TemplateResolver {
    pub fn new(repository: Arc<dyn TemplateRepository>, engines: Arc<EngineRegistry>) -> Self {
        Self {
            repository,
            engines,
            cache: DashMap::new(),
            generations: DashMap::new(),
            cache_enabled: true,
            cache_ttl: None,
            stats: ResolverStats::default(),
        }
    }

    /// Disable or enable the lookup cache
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Expire cached lookups after `ttl`; `None` keeps them until invalidated
    pub fn with_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn engines(&self) -> &Arc<EngineRegistry> {
        &self.engines
    }

    /// Resolve the template for `lookup`.
    #[tracing::instrument(
        name = "template.resolve",
        skip(self),
        fields(key = %lookup.key, channel = %lookup.channel)
    )]
    pub async fn resolve(&self, lookup: &TemplateLookup) -> TemplateResult<NotificationTemplate> {
        let generation = self.generation(&lookup.key);
        if self.cache_enabled {
            if let Some(hit) = self.cached(lookup) {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                TemplateMetrics::record_cache_hit();
                return Ok(hit);
            }
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            TemplateMetrics::record_cache_miss();
        }

        for locale in locale_candidates(lookup.locale.as_deref()) {
            for (tenant_id, app_id) in
                scope_candidates(lookup.tenant_id.as_deref(), lookup.app_id.as_deref())
            {
                let query = TemplateQuery {
                    key: lookup.key.clone(),
                    channel: lookup.channel,
                    locale: locale.clone(),
                    tenant_id,
                    app_id,
                    version: lookup.version,
                };

                if let Some(found) = self.repository.find(&query).await?.into_iter().next() {
                    tracing::debug!(
                        template_id = %found.id,
                        version = found.version,
                        locale = ?query.locale,
                        tenant_id = ?query.tenant_id,
                        app_id = ?query.app_id,
                        "Template resolved"
                    );
                    if self.cache_enabled {
                        self.cache_if_current(lookup, generation, &found);
                    }
                    return Ok(found);
                }
            }
        }

        Err(TemplateError::NotFound(describe(lookup)))
    }

    /// Render the template's subject and body with its engine
    pub fn render(
        &self,
        template: &NotificationTemplate,
        data: &serde_json::Value,
    ) -> TemplateResult<RenderedContent> {
        let subject = template
            .subject_template
            .as_deref()
            .map(|s| self.engines.render(&template.engine, s, data))
            .transpose()?;
        let body = self
            .engines
            .render(&template.engine, &template.body_template, data)?;
        Ok(RenderedContent { subject, body })
    }

    /// Validate and persist a new template version
    pub async fn create_template(&self, template: NewTemplate) -> TemplateResult<NotificationTemplate> {
        template.validate()?;

        let engine = self
            .engines
            .get(&template.engine)
            .ok_or_else(|| EngineError::EngineNotFound(template.engine.clone()))?;

        if !engine.validate_syntax(&template.body_template) {
            return Err(TemplateError::Invalid(format!(
                "body_template is not valid '{}' syntax",
                template.engine
            )));
        }
        if let Some(subject) = &template.subject_template {
            if !engine.validate_syntax(subject) {
                return Err(TemplateError::Invalid(format!(
                    "subject_template is not valid '{}' syntax",
                    template.engine
                )));
            }
        }

        let created = self.repository.create(template).await?;
        self.invalidate_key(&created.key);

        tracing::info!(
            template_id = %created.id,
            key = %created.key,
            version = created.version,
            channel = %created.channel,
            "Template created"
        );

        Ok(created)
    }

    /// Activate or deactivate a template version
    pub async fn set_active(&self, id: Uuid, active: bool) -> TemplateResult<NotificationTemplate> {
        let updated = self
            .repository
            .set_active(id, active)
            .await?
            .ok_or_else(|| TemplateError::NotFound(id.to_string()))?;
        self.invalidate_key(&updated.key);
        Ok(updated)
    }

    /// Drop every cached lookup for `key`
    pub fn invalidate_key(&self, key: &str) {
        // Generation lock is held across the sweep; inserts take it first too
        let mut generation = self.generations.entry(key.to_string()).or_insert(0);
        *generation += 1;

        let before = self.cache.len();
        self.cache.retain(|lookup, _| lookup.key != key);
        if self.cache.len() != before {
            self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn generation(&self, key: &str) -> u64 {
        self.generations.get(key).map(|g| *g).unwrap_or(0)
    }

    fn cached(&self, lookup: &TemplateLookup) -> Option<NotificationTemplate> {
        let entry = self.cache.get(lookup)?;
        let fresh = self
            .cache_ttl
            .map_or(true, |ttl| entry.cached_at.elapsed() < ttl);
        if fresh {
            return Some(entry.template.clone());
        }
        drop(entry);
        self.cache.remove(lookup);
        None
    }

    fn cache_if_current(&self, lookup: &TemplateLookup, seen: u64, template: &NotificationTemplate) {
        let generation = self.generations.entry(lookup.key.clone()).or_insert(0);
        if *generation != seen {
            tracing::debug!(key = %lookup.key, "Template changed during lookup, not caching");
            return;
        }
        self.cache.insert(
            lookup.clone(),
            CachedTemplate {
                template: template.clone(),
                cached_at: Instant::now(),
            },
        );
    }

    pub fn stats(&self) -> ResolverStatsSnapshot {
        ResolverStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            invalidations: self.stats.invalidations.load(Ordering::Relaxed),
            cached_entries: self.cache.len(),
        }
    }
}

fn describe(lookup: &TemplateLookup) -> String {
    format!(
        "{} (channel={}, locale={}, tenant={}, app={})",
        lookup.key,
        lookup.channel,
        lookup.locale.as_deref().unwrap_or("-"),
        lookup.tenant_id.as_deref().unwrap_or("-"),
        lookup.app_id.as_deref().unwrap_or("-"),
    )
}

/// Locale fallback order; `[None]` when no locale is requested.
pub fn locale_candidates(requested: Option<&str>) -> Vec<Option<String>> {
    let Some(requested) = requested.map(str::trim).filter(|l| !l.is_empty()) else {
        return vec![None];
    };

    let mut candidates = vec![requested.to_string()];

    if let Some((base, _region)) = requested.split_once(|c| c == '-' || c == '_') {
        if !base.is_empty() && !candidates.iter().any(|c| c == base) {
            candidates.push(base.to_string());
        }
    }

    if !candidates.iter().any(|c| c == DEFAULT_LOCALE) {
        candidates.push(DEFAULT_LOCALE.to_string());
    }

    candidates.into_iter().map(Some).collect()
}

/// Scope fallback order, most specific first, duplicates removed
pub fn scope_candidates(
    tenant_id: Option<&str>,
    app_id: Option<&str>,
) -> Vec<(Option<String>, Option<String>)> {
    let all = [
        (tenant_id, app_id),
        (tenant_id, None),
        (None, None),
    ];

    let mut candidates: Vec<(Option<String>, Option<String>)> = Vec::with_capacity(3);
    for (tenant, app) in all {
        let candidate = (tenant.map(str::to_string), app.map(str::to_string));
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }
    candidates
}
