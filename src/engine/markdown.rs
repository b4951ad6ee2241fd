//! Markdown engine: `${name}` substitution, then Markdown → HTML

use pulldown_cmark::{html, Options, Parser};

use super::substitution::substitute;
use super::{EngineError, TemplateEngine};

pub struct MarkdownEngine;

impl TemplateEngine for MarkdownEngine {
    fn name(&self) -> &str {
        "markdown"
    }

    fn render(&self, body: &str, data: &serde_json::Value) -> Result<String, EngineError> {
        let text = substitute(body, data).map_err(|e| EngineError::render(self.name(), e))?;
        Ok(markdown_to_html(&text))
    }
}

/// Convert Markdown to an HTML fragment
pub fn markdown_to_html(text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(text, options);
    let mut out = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}
