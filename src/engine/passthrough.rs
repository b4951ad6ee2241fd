use super::{EngineError, TemplateEngine};

/// Returns the body untouched; data is ignored.
pub struct StaticEngine;

impl TemplateEngine for StaticEngine {
    fn name(&self) -> &str {
        "static"
    }

    fn render(&self, body: &str, _data: &serde_json::Value) -> Result<String, EngineError> {
        Ok(body.to_string())
    }
}
