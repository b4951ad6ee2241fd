//! `${name}` placeholder substitution

use thiserror::Error;

use super::{EngineError, TemplateEngine};

/// Substitution failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubstitutionError {
    #[error("Unterminated placeholder at byte {0}")]
    Unterminated(usize),

    #[error("Invalid placeholder name '{name}' at byte {position}")]
    InvalidName { name: String, position: usize },

    #[error("Variables must be an object")]
    NotAnObject,
}

/// Engine replacing `${name}` (or `${path.to.value}`) with values from data.
///
/// Unknown names are left verbatim and `$$` is an escaped `$`.
pub struct SubstitutionEngine;

impl TemplateEngine for SubstitutionEngine {
    fn name(&self) -> &str {
        "substitution"
    }

    fn render(&self, body: &str, data: &serde_json::Value) -> Result<String, EngineError> {
        substitute(body, data).map_err(|e| EngineError::render(self.name(), e))
    }
}

/// Substitute `${name}` placeholders in a string
pub fn substitute(template: &str, variables: &serde_json::Value) -> Result<String, SubstitutionError> {
    let empty = serde_json::Map::new();
    let vars = match variables {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Null => &empty,
        _ => return Err(SubstitutionError::NotAnObject),
    };

    let mut result = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            result.push('$');
            offset += pos + 2;
            rest = tail;
            continue;
        }

        let Some(inner) = after.strip_prefix('{') else {
            result.push('$');
            offset += pos + 1;
            rest = after;
            continue;
        };

        let close = inner
            .find('}')
            .ok_or(SubstitutionError::Unterminated(offset + pos))?;
        let name = inner[..close].trim();

        if !is_valid_name(name) {
            return Err(SubstitutionError::InvalidName {
                name: name.to_string(),
                position: offset + pos,
            });
        }

        match lookup(vars, name) {
            Some(value) => result.push_str(&value_to_string(value)),
            None => {
                result.push_str("${");
                result.push_str(&inner[..close]);
                result.push('}');
            }
        }

        let consumed = pos + 2 + close + 1;
        offset += consumed;
        rest = &rest[consumed..];
    }

    result.push_str(rest);
    Ok(result)
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.ends_with('.')
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

fn lookup<'a>(
    variables: &'a serde_json::Map<String, serde_json::Value>,
    path: &str,
) -> Option<&'a serde_json::Value> {
    let mut segments = path.split('.');
    let mut current = variables.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "".to_string(),
        // For arrays and objects, use JSON representation
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_substitute_simple() {
        let result = substitute("Hello, ${name}!", &json!({"name": "World"})).unwrap();
        assert_eq!(result, "Hello, World!");
    }

    #[test]
    fn test_substitute_multiple() {
        let result = substitute(
            "Your order ${order_id} is being delivered by ${carrier}",
            &json!({"order_id": "ORD-123", "carrier": "FedEx"}),
        )
        .unwrap();
        assert_eq!(result, "Your order ORD-123 is being delivered by FedEx");
    }

    #[test]
    fn test_substitute_nested_path() {
        let result = substitute(
            "Hi ${user.name}, first item ${items.0}",
            &json!({"user": {"name": "Alice"}, "items": ["book"]}),
        )
        .unwrap();
        assert_eq!(result, "Hi Alice, first item book");
    }

    #[test]
    fn test_substitute_number_variable() {
        let result = substitute("You have ${count} items", &json!({"count": 42})).unwrap();
        assert_eq!(result, "You have 42 items");
    }

    #[test]
    fn test_unknown_placeholder_left_verbatim() {
        let result = substitute("Hi ${name}", &json!({})).unwrap();
        assert_eq!(result, "Hi ${name}");
    }

    #[test]
    fn test_dollar_escape_and_bare_dollar() {
        let result = substitute("Cost: $$${price} or $5", &json!({"price": 10})).unwrap();
        assert_eq!(result, "Cost: $10 or $5");
    }

    #[test]
    fn test_unterminated_placeholder() {
        let err = substitute("Hi ${name", &json!({"name": "x"})).unwrap_err();
        assert_eq!(err, SubstitutionError::Unterminated(3));
    }

    #[test]
    fn test_invalid_placeholder_name() {
        let err = substitute("Hi ${first name}", &json!({})).unwrap_err();
        assert!(matches!(err, SubstitutionError::InvalidName { .. }));
    }

    #[test]
    fn test_validate_syntax() {
        let engine = SubstitutionEngine;
        assert!(engine.validate_syntax("Hi ${name}"));
        assert!(!engine.validate_syntax("Hi ${name"));
    }
}
