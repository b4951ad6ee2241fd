//! Handlebars-backed structured templating

use handlebars::Handlebars;

use super::{EngineError, TemplateEngine};

/// Structured template engine (interpolation, `#if`, `#each`, helpers).
///
/// Runs in strict mode: referencing a variable missing from the data is a
/// render error rather than an empty string. Output is not HTML-escaped.
pub struct HandlebarsEngine {
    registry: Handlebars<'static>,
    /// Same setup without strict mode, for syntax checks
    lenient: Handlebars<'static>,
}

impl HandlebarsEngine {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(handlebars::no_escape);

        let mut lenient = Handlebars::new();
        lenient.register_escape_fn(handlebars::no_escape);

        Self { registry, lenient }
    }
}

impl Default for HandlebarsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine for HandlebarsEngine {
    fn name(&self) -> &str {
        "handlebars"
    }

    fn render(&self, body: &str, data: &serde_json::Value) -> Result<String, EngineError> {
        self.registry
            .render_template(body, data)
            .map_err(|e| EngineError::render(self.name(), e))
    }

    fn render_lenient(&self, body: &str, data: &serde_json::Value) -> Result<String, EngineError> {
        self.lenient
            .render_template(body, data)
            .map_err(|e| EngineError::render(self.name(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_interpolation_and_control_flow() {
        let engine = HandlebarsEngine::new();
        let out = engine
            .render(
                "Hi {{name}}{{#if vip}} (VIP){{/if}}:{{#each items}} {{this}}{{/each}}",
                &json!({"name": "Ada", "vip": true, "items": ["a", "b"]}),
            )
            .unwrap();
        assert_eq!(out, "Hi Ada (VIP): a b");
    }

    #[test]
    fn test_undefined_variable_is_error() {
        let engine = HandlebarsEngine::new();
        let err = engine.render("Hi {{name}}", &json!({})).unwrap_err();
        assert!(matches!(err, EngineError::Render { .. }));
    }

    #[test]
    fn test_no_html_escaping() {
        let engine = HandlebarsEngine::new();
        let out = engine
            .render("{{company}}", &json!({"company": "Smith & Sons"}))
            .unwrap();
        assert_eq!(out, "Smith & Sons");
    }

    #[test]
    fn test_validate_syntax() {
        let engine = HandlebarsEngine::new();
        assert!(engine.validate_syntax("Hi {{name}}"));
        assert!(engine.validate_syntax("{{#each items}}{{this.label}}{{/each}}"));
        assert!(!engine.validate_syntax("Hi {{#if name}}unclosed"));
        assert!(!engine.validate_syntax("{{#each items}}{{/if}}"));
    }

    #[test]
    fn test_lenient_render_leaves_missing_empty() {
        let engine = HandlebarsEngine::new();
        assert_eq!(engine.render_lenient("Hi {{name}}!", &json!({})).unwrap(), "Hi !");
        // Strict rendering is unchanged
        assert!(engine.render("Hi {{name}}!", &json!({})).is_err());
    }
}
