//! Pluggable template engines.
//!
//! Every engine renders a template body against a JSON data object. The
//! registry maps engine names to implementations:
//!
//! - `handlebars`: structured templating with control flow, strict about undefined variables
//! - `substitution`: plain `${name}` placeholders
//! - `markdown`: substitution followed by Markdown to HTML conversion
//! - `static`: passthrough, data is ignored
//!
//! # Example
//!
//! ```ignore
//! let registry = EngineRegistry::with_builtin();
//! let text = registry.render("substitution", "Hi ${name}", &json!({"name": "Ada"}))?;
//! assert_eq!(text, "Hi Ada");
//! ```

mod markdown;
mod passthrough;
mod structured;
mod substitution;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

pub use markdown::{markdown_to_html, MarkdownEngine};
pub use passthrough::StaticEngine;
pub use structured::HandlebarsEngine;
pub use substitution::{substitute, SubstitutionEngine, SubstitutionError};

/// Boxed error carried by render failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Template engine not found: {0}")]
    EngineNotFound(String),

    #[error("Render failed in '{engine}' engine: {source}")]
    Render {
        engine: String,
        #[source]
        source: BoxError,
    },
}

impl EngineError {
    /// Wrap an engine-specific failure
    pub fn render(engine: &str, source: impl Into<BoxError>) -> Self {
        EngineError::Render {
            engine: engine.to_string(),
            source: source.into(),
        }
    }
}

/// A template renderer.
pub trait TemplateEngine: Send + Sync {
    /// Registry name of this engine
    fn name(&self) -> &str;

    /// Render `body` against `data`
    fn render(&self, body: &str, data: &serde_json::Value) -> Result<String, EngineError>;

    /// Render without treating data missing from `data` as an error.
    ///
    /// Engines that are strict about undefined variables relax it here.
    fn render_lenient(&self, body: &str, data: &serde_json::Value) -> Result<String, EngineError> {
        self.render(body, data)
    }

    /// Check whether `body` is a syntactically valid template.
    ///
    /// Renders leniently against an empty data set; any error means invalid
    /// syntax.
    fn validate_syntax(&self, body: &str) -> bool {
        self.render_lenient(body, &serde_json::Value::Object(serde_json::Map::new()))
            .is_ok()
    }
}

/// Name → engine map, populated at startup.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: HashMap<String, Arc<dyn TemplateEngine>>,
}

impl EngineRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the four built-in engines
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(HandlebarsEngine::new()));
        registry.register(Arc::new(SubstitutionEngine));
        registry.register(Arc::new(MarkdownEngine));
        registry.register(Arc::new(StaticEngine));
        registry
    }

    /// Register an engine under its own name, replacing any previous one
    pub fn register(&mut self, engine: Arc<dyn TemplateEngine>) {
        let name = engine.name().to_string();
        tracing::debug!(engine = %name, "Registered template engine");
        self.engines.insert(name, engine);
    }

    /// Look up an engine by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn TemplateEngine>> {
        self.engines.get(name).cloned()
    }

    /// Whether an engine with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.engines.contains_key(name)
    }

    /// Registered engine names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.engines.keys().cloned().collect();
        names.sort();
        names
    }

    /// Render `body` with the named engine
    pub fn render(
        &self,
        engine: &str,
        body: &str,
        data: &serde_json::Value,
    ) -> Result<String, EngineError> {
        let renderer = self
            .get(engine)
            .ok_or_else(|| EngineError::EngineNotFound(engine.to_string()))?;
        renderer.render(body, data)
    }

    /// Validate `body` with the named engine
    pub fn validate_syntax(&self, engine: &str, body: &str) -> Result<bool, EngineError> {
        let renderer = self
            .get(engine)
            .ok_or_else(|| EngineError::EngineNotFound(engine.to_string()))?;
        Ok(renderer.validate_syntax(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_engines_registered() {
        let registry = EngineRegistry::with_builtin();
        assert_eq!(
            registry.names(),
            vec!["handlebars", "markdown", "static", "substitution"]
        );
    }

    #[test]
    fn test_unknown_engine() {
        let registry = EngineRegistry::with_builtin();
        let err = registry.render("jinja", "x", &json!({})).unwrap_err();
        assert!(matches!(err, EngineError::EngineNotFound(name) if name == "jinja"));
    }

    #[test]
    fn test_static_returns_body_unchanged() {
        let registry = EngineRegistry::with_builtin();
        let body = "Hello ${name} {{name}}";
        let out = registry
            .render("static", body, &json!({"name": "Ada"}))
            .unwrap();
        assert_eq!(out, body);
    }

    #[test]
    fn test_substitution_round_trip() {
        let registry = EngineRegistry::with_builtin();
        let out = registry
            .render("substitution", "Hi ${name}", &json!({"name": "Ada"}))
            .unwrap();
        assert_eq!(out, "Hi Ada");
    }

    struct AlwaysFails;

    impl TemplateEngine for AlwaysFails {
        fn name(&self) -> &str {
            "broken"
        }

        fn render(&self, _body: &str, _data: &serde_json::Value) -> Result<String, EngineError> {
            Err(EngineError::render("broken", "nope"))
        }
    }

    #[test]
    fn test_default_validate_syntax_uses_render() {
        let mut registry = EngineRegistry::new();
        registry.register(Arc::new(AlwaysFails));
        assert!(!registry.validate_syntax("broken", "anything").unwrap());
    }
}
