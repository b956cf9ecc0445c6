use crate::errors::{AppError, AppResult};
use crate::mindmap;
use crate::models::{
    Block, BlockType, ColumnType, DatabaseColumn, DatabaseData, KanbanColumn, KanbanData, LinkMetadata,
    MindMapNode, ProjectOsData,
};
use serde::Serialize;
use serde_json::{Map, Value};

/// Typed view over a block's `content`.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockPayload {
    Plain(String),
    Divider,
    Kanban(KanbanData),
    Database(DatabaseData),
    MindMap(MindMapNode),
    ProjectOs(ProjectOsData),
    Embed {
        link: Option<LinkMetadata>,
        content: String,
    },
    Corrupt {
        block_type: BlockType,
        raw: String,
        reason: String,
    },
}

impl BlockPayload {
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}

pub fn parse_payload(block: &Block) -> BlockPayload {
    match block.block_type {
        BlockType::Text | BlockType::Heading | BlockType::Todo | BlockType::Code | BlockType::Callout => {
            BlockPayload::Plain(block.content.clone())
        }
        BlockType::Divider => BlockPayload::Divider,
        BlockType::Embed => BlockPayload::Embed {
            link: block.link_metadata.clone(),
            content: block.content.clone(),
        },
        BlockType::Kanban => decode::<KanbanData>(block)
            .map(BlockPayload::Kanban)
            .unwrap_or_else(|reason| corrupt(block, reason)),
        BlockType::Database => decode::<DatabaseData>(block)
            .map(BlockPayload::Database)
            .unwrap_or_else(|reason| corrupt(block, reason)),
        BlockType::Mindmap => decode::<MindMapNode>(block)
            .and_then(|root| check_tree(&root).map(|_| root))
            .map(BlockPayload::MindMap)
            .unwrap_or_else(|reason| corrupt(block, reason)),
        BlockType::ProjectOs => decode::<ProjectOsData>(block)
            .and_then(|data| check_tree(&data.mind_map).map(|_| data))
            .map(BlockPayload::ProjectOs)
            .unwrap_or_else(|reason| corrupt(block, reason)),
    }
}

/// Default `content` for a freshly created or converted block.
pub fn default_content(block_type: BlockType) -> String {
    match block_type {
        BlockType::Kanban => encode_or_empty(&KanbanData {
            columns: vec![
                KanbanColumn {
                    id: "c1".to_string(),
                    title: "To Do".to_string(),
                    cards: Vec::new(),
                },
                KanbanColumn {
                    id: "c2".to_string(),
                    title: "Done".to_string(),
                    cards: Vec::new(),
                },
            ],
        }),
        BlockType::Database => encode_or_empty(&DatabaseData {
            columns: vec![DatabaseColumn {
                id: "c1".to_string(),
                title: "Item".to_string(),
                column_type: ColumnType::Text,
            }],
            rows: Vec::new(),
        }),
        BlockType::Mindmap => encode_or_empty(&MindMapNode::new("root", "Core Idea").at(400.0, 300.0)),
        BlockType::ProjectOs => encode_or_empty(&ProjectOsData {
            tasks: Vec::new(),
            mind_map: MindMapNode::new("root", "Master Plan").at(400.0, 300.0),
        }),
        _ => String::new(),
    }
}

pub fn encode<T: Serialize>(value: &T) -> AppResult<String> {
    serde_json::to_string(value).map_err(AppError::from)
}

pub fn database(block: &Block) -> AppResult<DatabaseData> {
    match parse_payload(block) {
        BlockPayload::Database(data) => Ok(data),
        other => Err(unexpected(block, other)),
    }
}

/// Value of a cell nobody has filled in yet.
pub fn empty_cell(column: &DatabaseColumn) -> Value {
    match column.column_type {
        ColumnType::Checkbox => Value::Bool(false),
        _ => Value::String(String::new()),
    }
}

/// Cell value with the column's empty default for missing keys.
pub fn cell_value(row: &Map<String, Value>, column: &DatabaseColumn) -> Value {
    match row.get(&column.id) {
        Some(Value::Null) | None => empty_cell(column),
        Some(value) => value.clone(),
    }
}

pub fn cell_text(row: &Map<String, Value>, column: &DatabaseColumn) -> String {
    match cell_value(row, column) {
        Value::String(text) => text,
        Value::Bool(true) => "x".to_string(),
        Value::Bool(false) => String::new(),
        other => other.to_string(),
    }
}

fn decode<T: serde::de::DeserializeOwned>(block: &Block) -> Result<T, String> {
    serde_json::from_str::<T>(&block.content).map_err(|error| error.to_string())
}

fn check_tree(root: &MindMapNode) -> Result<(), String> {
    let duplicates = mindmap::duplicate_ids(root);
    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(format!("duplicate node ids: {}", duplicates.join(", ")))
    }
}

fn corrupt(block: &Block, reason: String) -> BlockPayload {
    tracing::warn!(block_id = %block.id, block_type = block.block_type.as_str(), reason = %reason, "corrupt block payload");
    BlockPayload::Corrupt {
        block_type: block.block_type,
        raw: block.content.clone(),
        reason,
    }
}

fn unexpected(block: &Block, payload: BlockPayload) -> AppError {
    match payload {
        BlockPayload::Corrupt { reason, .. } => {
            AppError::CorruptPayload(format!("block {} ({}): {}", block.id, block.block_type.as_str(), reason))
        }
        _ => AppError::InvalidInput(format!(
            "block {} is a {} block",
            block.id,
            block.block_type.as_str()
        )),
    }
}

fn encode_or_empty<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn block_with(block_type: BlockType, content: &str) -> Block {
        let mut block = Block::new(block_type, "");
        block.content = content.to_string();
        block
    }

    #[test]
    fn every_structured_default_parses_back() {
        for block_type in BlockType::ALL.into_iter().filter(|value| value.is_structured()) {
            let block = block_with(block_type, &default_content(block_type));
            assert!(!parse_payload(&block).is_corrupt(), "{} default is corrupt", block_type.as_str());
        }
    }

    #[test]
    fn malformed_json_yields_corrupt_variant_with_raw_content() {
        let block = block_with(BlockType::Kanban, "{\"columns\": [");
        match parse_payload(&block) {
            BlockPayload::Corrupt { block_type, raw, .. } => {
                assert_eq!(block_type, BlockType::Kanban);
                assert_eq!(raw, "{\"columns\": [");
            }
            other => panic!("expected corrupt payload, got {:?}", other),
        }
    }

    #[test]
    fn wrong_shape_is_corrupt_even_when_valid_json() {
        let block = block_with(BlockType::Database, "{\"rows\": []}");
        assert!(parse_payload(&block).is_corrupt());
        assert!(database(&block).unwrap_err().to_string().starts_with("CORRUPT_PAYLOAD"));
    }

    #[test]
    fn duplicate_mind_map_ids_are_corrupt() {
        let content = json!({
            "id": "root",
            "text": "Root",
            "children": [
                {"id": "a", "text": "A", "children": []},
                {"id": "a", "text": "B", "children": []}
            ]
        })
        .to_string();
        let block = block_with(BlockType::Mindmap, &content);
        assert!(parse_payload(&block).is_corrupt());
    }

    #[test]
    fn missing_cells_read_as_empty_defaults() {
        let data: DatabaseData = serde_json::from_value(json!({
            "columns": [
                {"id": "c1", "title": "Item", "type": "text"},
                {"id": "done", "title": "Done", "type": "checkbox"}
            ],
            "rows": [{"id": "r1"}]
        }))
        .expect("database data");
        let row = &data.rows[0];
        assert_eq!(cell_value(row, &data.columns[0]), json!(""));
        assert_eq!(cell_value(row, &data.columns[1]), json!(false));
        assert_eq!(cell_text(row, &data.columns[1]), "");
    }

    #[test]
    fn plain_types_never_parse_as_corrupt() {
        let block = block_with(BlockType::Code, "{not json at all");
        assert_eq!(parse_payload(&block), BlockPayload::Plain("{not json at all".to_string()));
    }
}
