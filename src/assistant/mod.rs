pub mod structured_output;

use crate::errors::{AppError, AppResult};
use crate::models::{new_id, Block, BlockType, DatabaseData, Page};
use crate::payload::encode;
use crate::redaction::Redactor;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use structured_output::{resolve_structured_output, validate_structured_output};

const SYSTEM_PREAMBLE: &str = "You are a specialized productivity assistant for a local notes workspace. ";
const DEFAULT_TABLE_TOPIC: &str = "Project tracking";

static LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*+•]|\d+[.)])\s+").expect("valid regex"));

static DATABASE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "required": ["columns"],
        "properties": {
            "columns": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "required": ["id", "title", "type"],
                    "properties": {
                        "id": { "type": "string", "minLength": 1 },
                        "title": { "type": "string" },
                        "type": { "enum": ["text", "number", "checkbox", "date"] }
                    }
                }
            },
            "rows": {
                "type": "array",
                "items": { "type": "object" }
            }
        }
    })
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssistantMode {
    Expand,
    Table,
    Summarize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantRequest {
    pub page_title: String,
    pub block_contents: Vec<String>,
    pub user_prompt: String,
    pub mode: AssistantMode,
}

impl AssistantRequest {
    pub fn for_page(page: &Page, user_prompt: impl Into<String>, mode: AssistantMode) -> Self {
        Self {
            page_title: page.display_title().to_string(),
            block_contents: page
                .blocks
                .iter()
                .filter(|block| !block.block_type.is_structured() && !block.content.trim().is_empty())
                .map(|block| block.content.clone())
                .collect(),
            user_prompt: user_prompt.into(),
            mode,
        }
    }
}

/// What actually goes over the wire to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantPrompt {
    pub system_instruction: String,
    pub user_message: String,
    pub response_mime_type: &'static str,
    pub redaction_count: usize,
}

pub type AssistantFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;

/// Network seam for the language model. Implementations return the raw response text.
pub trait AssistantClient: Send + Sync {
    fn generate<'a>(&'a self, prompt: &'a AssistantPrompt) -> AssistantFuture<'a>;
}

pub fn build_prompt(request: &AssistantRequest, redactor: &Redactor) -> AssistantPrompt {
    let (contents, content_redactions) = redactor.redact_all(request.block_contents.iter().map(String::as_str));
    let user_prompt = redactor.redact(request.user_prompt.trim());
    let redaction_count = content_redactions + user_prompt.redaction_count;

    let (instruction, user_message, response_mime_type) = match request.mode {
        AssistantMode::Table => (
            "Generate a valid JSON for a database block. Schema: { \"columns\": [{ \"id\": \"c1\", \"title\": \"Task\", \"type\": \"text\" }], \"rows\": [] }",
            format!(
                "Generate a database structure for: {}. Return only raw JSON.",
                if user_prompt.content.is_empty() {
                    DEFAULT_TABLE_TOPIC
                } else {
                    user_prompt.content.as_str()
                }
            ),
            "application/json",
        ),
        AssistantMode::Expand => (
            "Provide actionable blocks in plain text, one per line.",
            format!(
                "Page title: {}. Context: {}. Suggest next blocks.",
                request.page_title, user_prompt.content
            ),
            "text/plain",
        ),
        AssistantMode::Summarize => (
            "Summarize the current page content into a concise insight.",
            format!("Summarize these blocks: {}", contents.join(" ")),
            "text/plain",
        ),
    };

    AssistantPrompt {
        system_instruction: format!("{}{}", SYSTEM_PREAMBLE, instruction),
        user_message,
        response_mime_type,
        redaction_count,
    }
}

/// Turns raw model output into blocks ready to append. Nothing is returned unless the
/// whole response is usable.
pub fn blocks_from_response(mode: AssistantMode, raw: &str) -> AppResult<Vec<Block>> {
    match mode {
        AssistantMode::Table => database_block_from_response(raw).map(|block| vec![block]),
        AssistantMode::Expand | AssistantMode::Summarize => {
            let blocks: Vec<Block> = raw
                .lines()
                .map(|line| LIST_MARKER.replace(line, "").trim().to_string())
                .filter(|line| !line.is_empty())
                .map(|line| Block::new(BlockType::Text, line))
                .collect();
            if blocks.is_empty() {
                return Err(AppError::Assistant("assistant returned no content".to_string()));
            }
            Ok(blocks)
        }
    }
}

pub async fn run_assistant(
    client: &dyn AssistantClient,
    request: &AssistantRequest,
    redactor: &Redactor,
) -> AppResult<Vec<Block>> {
    let prompt = build_prompt(request, redactor);
    if prompt.redaction_count > 0 {
        tracing::info!(redactions = prompt.redaction_count, "redacted secrets from assistant prompt");
    }
    let raw = client
        .generate(&prompt)
        .await
        .map_err(|error| AppError::Assistant(format!("{:#}", error)))?;
    let blocks = blocks_from_response(request.mode, &raw)?;
    tracing::debug!(mode = ?request.mode, blocks = blocks.len(), "assistant response accepted");
    Ok(blocks)
}

fn database_block_from_response(raw: &str) -> AppResult<Block> {
    let validation = validate_structured_output(resolve_structured_output(raw), &DATABASE_SCHEMA);
    if !validation.is_valid() {
        return Err(AppError::Assistant(validation.describe()));
    }
    let value = validation
        .value
        .ok_or_else(|| AppError::Assistant("structured output missing".to_string()))?;
    let mut data: DatabaseData =
        serde_json::from_value(value).map_err(|error| AppError::Assistant(error.to_string()))?;

    let mut seen = HashSet::new();
    if let Some(duplicate) = data.columns.iter().find(|column| !seen.insert(column.id.as_str())) {
        return Err(AppError::Assistant(format!("duplicate column id '{}'", duplicate.id)));
    }
    for row in &mut data.rows {
        if !row.get("id").map(Value::is_string).unwrap_or(false) {
            row.insert("id".to_string(), Value::String(new_id()));
        }
    }

    Ok(Block::new(BlockType::Database, encode(&data)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{parse_payload, BlockPayload};

    struct CannedClient {
        response: anyhow::Result<String>,
    }

    impl AssistantClient for CannedClient {
        fn generate<'a>(&'a self, _prompt: &'a AssistantPrompt) -> AssistantFuture<'a> {
            let response = match &self.response {
                Ok(text) => Ok(text.clone()),
                Err(error) => Err(anyhow::anyhow!("{}", error)),
            };
            Box::pin(async move { response })
        }
    }

    fn request(mode: AssistantMode, prompt: &str) -> AssistantRequest {
        AssistantRequest {
            page_title: "Launch".to_string(),
            block_contents: vec!["token=abcdef123456".to_string(), "ship friday".to_string()],
            user_prompt: prompt.to_string(),
            mode,
        }
    }

    #[test]
    fn prompt_redacts_block_contents() {
        let prompt = build_prompt(&request(AssistantMode::Summarize, ""), &Redactor::default());
        assert!(prompt.user_message.contains("token=[REDACTED]"));
        assert!(!prompt.user_message.contains("abcdef123456"));
        assert_eq!(prompt.redaction_count, 1);
        assert_eq!(prompt.response_mime_type, "text/plain");
    }

    #[test]
    fn table_prompt_falls_back_to_default_topic() {
        let prompt = build_prompt(&request(AssistantMode::Table, "  "), &Redactor::default());
        assert!(prompt.user_message.contains(DEFAULT_TABLE_TOPIC));
        assert_eq!(prompt.response_mime_type, "application/json");
    }

    #[test]
    fn freeform_lines_become_text_blocks() {
        let blocks = blocks_from_response(AssistantMode::Expand, "- Draft outline\n\n2. Book venue\n* Invite team\nplain").expect("blocks");
        let contents: Vec<&str> = blocks.iter().map(|block| block.content.as_str()).collect();
        assert_eq!(contents, vec!["Draft outline", "Book venue", "Invite team", "plain"]);
        assert!(blocks.iter().all(|block| block.block_type == BlockType::Text));
    }

    #[test]
    fn table_output_is_validated_before_becoming_a_block() {
        let raw = "```json\n{\"columns\": [{\"id\": \"c1\", \"title\": \"Task\", \"type\": \"text\"}], \"rows\": [{\"c1\": \"Plan\"}]}\n```";
        let blocks = blocks_from_response(AssistantMode::Table, raw).expect("table");
        assert_eq!(blocks.len(), 1);
        match parse_payload(&blocks[0]) {
            BlockPayload::Database(data) => {
                assert_eq!(data.columns[0].title, "Task");
                assert!(data.rows[0].get("id").map(Value::is_string).unwrap_or(false));
            }
            other => panic!("expected database, got {:?}", other),
        }
    }

    #[test]
    fn invalid_table_output_is_rejected() {
        let wrong_type = r#"{"columns": [{"id": "c1", "title": "Task", "type": "formula"}]}"#;
        assert!(matches!(
            blocks_from_response(AssistantMode::Table, wrong_type),
            Err(AppError::Assistant(_))
        ));
        assert!(blocks_from_response(AssistantMode::Table, "not json").is_err());
        let duplicate = r#"{"columns": [{"id": "c", "title": "A", "type": "text"}, {"id": "c", "title": "B", "type": "text"}]}"#;
        assert!(blocks_from_response(AssistantMode::Table, duplicate).is_err());
    }

    #[tokio::test]
    async fn client_failure_maps_to_assistant_error() {
        let client = CannedClient {
            response: Err(anyhow::anyhow!("quota exceeded")),
        };
        let error = run_assistant(&client, &request(AssistantMode::Expand, "next"), &Redactor::default())
            .await
            .expect_err("failure");
        assert!(error.to_string().starts_with("ASSISTANT_FAILURE"));
        assert!(error.to_string().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn successful_run_returns_blocks() {
        let client = CannedClient {
            response: Ok("- one\n- two".to_string()),
        };
        let blocks = run_assistant(&client, &request(AssistantMode::Expand, "next"), &Redactor::default())
            .await
            .expect("blocks");
        assert_eq!(blocks.len(), 2);
    }
}
