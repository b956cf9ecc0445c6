use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*\s*\n(?P<body>.*?)\n?```\s*$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq)]
pub struct StructuredOutputValidation {
    pub value: Option<Value>,
    pub error: Option<String>,
    pub errors: Vec<String>,
}

impl StructuredOutputValidation {
    pub fn is_valid(&self) -> bool {
        self.value.is_some() && self.error.is_none()
    }

    /// One-line description of every problem found.
    pub fn describe(&self) -> String {
        let mut parts: Vec<String> = self.error.iter().cloned().collect();
        parts.extend(self.errors.iter().cloned());
        parts.join("; ")
    }
}

/// Parses model output as JSON, tolerating surrounding whitespace and a single
/// markdown code fence.
pub fn resolve_structured_output(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    let body = CODE_FENCE.captures(trimmed)?.name("body")?.as_str().trim();
    serde_json::from_str(body).ok()
}

pub fn validate_structured_output(value: Option<Value>, schema: &Value) -> StructuredOutputValidation {
    let Some(value) = value else {
        return StructuredOutputValidation {
            value: None,
            error: Some("Structured output is missing or invalid JSON.".to_string()),
            errors: vec![],
        };
    };

    let compiled = match jsonschema::JSONSchema::compile(schema) {
        Ok(compiled) => compiled,
        Err(error) => {
            return StructuredOutputValidation {
                value: Some(value),
                error: Some(format!("Failed to compile structured output schema: {}", error)),
                errors: vec![],
            }
        }
    };

    let errors: Vec<String> = compiled
        .validate(&value)
        .err()
        .map(|errors| {
            errors
                .map(|error| {
                    let path = error.instance_path.to_string();
                    if path.is_empty() {
                        error.to_string()
                    } else {
                        format!("{}: {}", path, error)
                    }
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let error = if errors.is_empty() {
        None
    } else {
        Some("Structured output did not match schema.".to_string())
    };
    StructuredOutputValidation {
        value: Some(value),
        error,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::{resolve_structured_output, validate_structured_output};
    use serde_json::json;

    #[test]
    fn resolves_plain_and_fenced_json() {
        assert_eq!(resolve_structured_output(" {\"a\":1} "), Some(json!({"a": 1})));
        assert_eq!(
            resolve_structured_output("```json\n{\"a\": 2}\n```"),
            Some(json!({"a": 2}))
        );
        assert_eq!(resolve_structured_output("Sure! here it is"), None);
        assert_eq!(resolve_structured_output("   "), None);
    }

    #[test]
    fn validates_schema_and_reports_errors() {
        let schema = json!({
            "type": "object",
            "properties": {
                "ok": { "type": "boolean" }
            },
            "required": ["ok"],
            "additionalProperties": false
        });
        let validation = validate_structured_output(Some(json!({"ok": "nope"})), &schema);
        assert!(!validation.is_valid());
        assert!(!validation.errors.is_empty());
        assert!(validation.describe().contains("/ok"));

        let missing = validate_structured_output(None, &schema);
        assert!(missing.describe().contains("invalid JSON"));

        assert!(validate_structured_output(Some(json!({"ok": true})), &schema).is_valid());
    }
}
