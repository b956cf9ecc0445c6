use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Text,
    Heading,
    Todo,
    Code,
    Divider,
    Kanban,
    Database,
    Mindmap,
    Callout,
    Embed,
    ProjectOs,
}

impl BlockType {
    pub const ALL: [BlockType; 11] = [
        Self::Text,
        Self::Heading,
        Self::Todo,
        Self::Code,
        Self::Divider,
        Self::Kanban,
        Self::Database,
        Self::Mindmap,
        Self::Callout,
        Self::Embed,
        Self::ProjectOs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Heading => "heading",
            Self::Todo => "todo",
            Self::Code => "code",
            Self::Divider => "divider",
            Self::Kanban => "kanban",
            Self::Database => "database",
            Self::Mindmap => "mindmap",
            Self::Callout => "callout",
            Self::Embed => "embed",
            Self::ProjectOs => "project_os",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|candidate| candidate.as_str() == raw)
    }

    /// Structured types keep a JSON payload in `content`.
    pub fn is_structured(self) -> bool {
        matches!(self, Self::Kanban | Self::Database | Self::Mindmap | Self::ProjectOs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schedule {
    Today,
    Week,
    Someday,
}

impl Schedule {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Week => "week",
            Self::Someday => "someday",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "today" => Some(Self::Today),
            "week" => Some(Self::Week),
            "someday" => Some(Self::Someday),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Live,
    Snapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkMetadata {
    pub source_page_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_block_id: Option<String>,
    #[serde(rename = "type")]
    pub link_type: LinkType,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_edited_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_metadata: Option<LinkMetadata>,
}

impl Block {
    pub fn new(block_type: BlockType, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            block_type,
            content: content.into(),
            checked: None,
            schedule: None,
            last_edited_at: Some(now_millis()),
            metadata: None,
            link_metadata: None,
        }
    }

    pub fn empty_text() -> Self {
        Self::new(BlockType::Text, "")
    }

    pub fn is_empty_text(&self) -> bool {
        self.block_type == BlockType::Text && self.content.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Page {
    pub fn new(title: impl Into<String>, blocks: Option<Vec<Block>>) -> Self {
        let blocks = match blocks {
            Some(blocks) if !blocks.is_empty() => blocks,
            _ => vec![Block::empty_text()],
        };
        Self {
            id: new_id(),
            title: title.into(),
            blocks,
            updated_at: now_millis(),
        }
    }

    pub fn block(&self, block_id: &str) -> Option<&Block> {
        self.blocks.iter().find(|block| block.id == block_id)
    }

    pub fn block_index(&self, block_id: &str) -> Option<usize> {
        self.blocks.iter().position(|block| block.id == block_id)
    }

    /// No blocks, or a single empty text block.
    pub fn is_empty(&self) -> bool {
        match self.blocks.as_slice() {
            [] => true,
            [only] => only.is_empty_text(),
            _ => false,
        }
    }

    /// Restores the one-block minimum on pages read from storage or a backup.
    pub fn ensure_block(mut self) -> Self {
        if self.blocks.is_empty() {
            self.blocks.push(Block::empty_text());
        }
        self
    }

    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            "Untitled"
        } else {
            &self.title
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KanbanCard {
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KanbanColumn {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub cards: Vec<KanbanCard>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KanbanData {
    pub columns: Vec<KanbanColumn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Number,
    Checkbox,
    Date,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseColumn {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseData {
    pub columns: Vec<DatabaseColumn>,
    #[serde(default)]
    pub rows: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MindMapNode {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub children: Vec<MindMapNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_expanded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl MindMapNode {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            children: Vec::new(),
            x: None,
            y: None,
            is_expanded: None,
            task_id: None,
        }
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.x = Some(x);
        self.y = Some(y);
        self
    }

    pub fn with_children(mut self, children: Vec<MindMapNode>) -> Self {
        self.children = children;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTask {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub checked: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<i64>,
    #[serde(default)]
    pub sub_tasks: Vec<SubTask>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub metadata: TaskMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectOsData {
    #[serde(default)]
    pub tasks: Vec<ProjectTask>,
    pub mind_map: MindMapNode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub theme: Theme,
    pub save_debounce_ms: u64,
    pub history_limit: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            theme: Theme::Light,
            save_debounce_ms: 300,
            history_limit: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub id: String,
    pub level: NoticeLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Notice {
    pub fn error(message: impl Into<String>) -> Self {
        Self::with_level(NoticeLevel::Error, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::with_level(NoticeLevel::Info, message)
    }

    fn with_level(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            level,
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    pub pages: Vec<Page>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub exported_at: DateTime<Utc>,
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current time truncated to the millisecond precision the store keeps.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Next modification stamp, strictly after `previous`.
pub fn advance_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = now_millis();
    if now > previous {
        now
    } else {
        previous + Duration::milliseconds(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_type_tags_match_wire_names() {
        for block_type in BlockType::ALL {
            let encoded = serde_json::to_value(block_type).expect("encode");
            assert_eq!(encoded, Value::String(block_type.as_str().to_string()));
            assert_eq!(BlockType::parse(block_type.as_str()), Some(block_type));
        }
        assert_eq!(BlockType::parse("spreadsheet"), None);
    }

    #[test]
    fn page_without_blocks_gets_blank_text_block() {
        let page = Page::new("Inbox", Some(vec![]));
        assert_eq!(page.blocks.len(), 1);
        assert!(page.blocks[0].is_empty_text());
        assert!(page.is_empty());
    }

    #[test]
    fn block_serializes_camel_case_and_millis() {
        let mut block = Block::new(BlockType::Todo, "ship it");
        block.schedule = Some(Schedule::Today);
        let value = serde_json::to_value(&block).expect("encode");
        assert_eq!(value["type"], "todo");
        assert_eq!(value["schedule"], "today");
        assert!(value["lastEditedAt"].is_i64());
        assert!(value.get("linkMetadata").is_none());
    }

    #[test]
    fn advance_timestamp_is_strictly_increasing() {
        let far_future = now_millis() + Duration::days(1);
        let next = advance_timestamp(far_future);
        assert!(next > far_future);
    }
}
