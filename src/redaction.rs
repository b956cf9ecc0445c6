use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static NAMED_SECRET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?P<key>api[_-]?key|token|secret|password|passwd)\s*[:=]\s*["']?[A-Za-z0-9_\-\.]{6,}["']?"#)
        .expect("valid regex")
});

static SECRET_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9_\-\.=]{16,}").expect("valid regex"),
        Regex::new(r"\bsk-[A-Za-z0-9_\-]{20,}\b").expect("valid regex"),
        Regex::new(r"\bgh[pousr]_[A-Za-z0-9]{30,}\b").expect("valid regex"),
        Regex::new(r"\bAKIA[0-9A-Z]{16}\b").expect("valid regex"),
        Regex::new(r"\b[A-Fa-f0-9]{32,}\b").expect("valid regex"),
        Regex::new(r"(?s)-----BEGIN [A-Z ]*PRIVATE KEY-----.*?-----END [A-Z ]*PRIVATE KEY-----")
            .expect("valid regex"),
    ]
});

static LONG_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Za-z0-9_\-]{49,}\b").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactionResult {
    pub content: String,
    pub redaction_count: usize,
}

/// Masks credentials in text that is about to leave the process. Aggressive mode
/// also masks any long opaque token.
#[derive(Debug, Default, Clone)]
pub struct Redactor {
    aggressive: bool,
}

impl Redactor {
    pub fn new(aggressive: bool) -> Self {
        Self { aggressive }
    }

    pub fn redact(&self, input: &str) -> RedactionResult {
        if input.is_empty() {
            return RedactionResult {
                content: String::new(),
                redaction_count: 0,
            };
        }

        let mut redaction_count = NAMED_SECRET.find_iter(input).count();
        let mut result = NAMED_SECRET
            .replace_all(input, |caps: &regex::Captures<'_>| {
                let key = caps.name("key").map(|m| m.as_str()).unwrap_or("secret").to_ascii_lowercase();
                format!("{}=[REDACTED]", key)
            })
            .into_owned();

        for pattern in SECRET_PATTERNS.iter() {
            let matches = pattern.find_iter(&result).count();
            if matches == 0 {
                continue;
            }
            redaction_count += matches;
            result = pattern.replace_all(&result, "[REDACTED]").into_owned();
        }

        if self.aggressive {
            let matches = LONG_TOKEN.find_iter(&result).count();
            if matches > 0 {
                redaction_count += matches;
                result = LONG_TOKEN.replace_all(&result, "[REDACTED_LONG_TOKEN]").into_owned();
            }
        }

        RedactionResult {
            content: result,
            redaction_count,
        }
    }

    /// Redacts each entry, returning the cleaned texts and the total mask count.
    pub fn redact_all<'a, I>(&self, inputs: I) -> (Vec<String>, usize)
    where
        I: IntoIterator<Item = &'a str>,
    {
        inputs.into_iter().fold((Vec::new(), 0), |(mut texts, total), input| {
            let result = self.redact(input);
            texts.push(result.content);
            (texts, total + result.redaction_count)
        })
    }
}
