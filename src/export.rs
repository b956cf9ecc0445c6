use crate::document::Document;
use crate::errors::{AppError, AppResult};
use crate::models::{
    now_millis, Block, BlockType, DatabaseData, DocumentSnapshot, KanbanData, MindMapNode, Page, ProjectOsData,
};
use crate::payload::{cell_text, parse_payload, BlockPayload};
use serde::Serialize;

pub const DATA_ERROR_PLACEHOLDER: &str = "[Data Error]";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PageFrontMatter<'a> {
    id: &'a str,
    title: &'a str,
    updated_at: i64,
    blocks: usize,
}

pub fn encode_snapshot(pages: &[Page]) -> AppResult<Vec<u8>> {
    let snapshot = DocumentSnapshot {
        pages: pages.to_vec(),
        exported_at: now_millis(),
    };
    Ok(serde_json::to_vec_pretty(&snapshot)?)
}

pub fn decode_snapshot(bytes: &[u8]) -> AppResult<DocumentSnapshot> {
    let mut snapshot: DocumentSnapshot = serde_json::from_slice(bytes)
        .map_err(|error| AppError::InvalidInput(format!("unreadable snapshot: {}", error)))?;
    snapshot.pages = snapshot.pages.into_iter().map(Page::ensure_block).collect();
    Ok(snapshot)
}

/// Markdown rendition of a page with YAML front matter. Embeds are resolved against
/// `document`.
pub fn page_to_markdown(document: &Document, page: &Page) -> AppResult<String> {
    let front_matter = PageFrontMatter {
        id: &page.id,
        title: page.display_title(),
        updated_at: page.updated_at.timestamp_millis(),
        blocks: page.blocks.len(),
    };
    let metadata_yaml = serde_yaml::to_string(&front_matter).map_err(|error| AppError::Internal(error.to_string()))?;

    let body = page
        .blocks
        .iter()
        .map(|block| block_to_markdown(document, block))
        .collect::<Vec<_>>()
        .join("\n\n");
    Ok(format!("---\n{}---\n\n# {}\n\n{}\n", metadata_yaml, page.display_title(), body))
}

pub fn block_to_markdown(document: &Document, block: &Block) -> String {
    match parse_payload(block) {
        BlockPayload::Plain(content) => plain_to_markdown(block, &content),
        BlockPayload::Divider => "---".to_string(),
        BlockPayload::Kanban(data) => kanban_to_markdown(&data),
        BlockPayload::Database(data) => database_to_markdown(&data),
        BlockPayload::MindMap(root) => mind_map_to_markdown(&root),
        BlockPayload::ProjectOs(data) => project_os_to_markdown(&data),
        BlockPayload::Embed { content, .. } => {
            let resolved = document.resolve_link(block);
            let text = resolved.display_text().unwrap_or(&content);
            quote(text)
        }
        BlockPayload::Corrupt { .. } => DATA_ERROR_PLACEHOLDER.to_string(),
    }
}

/// Pipe table: a header row of column titles, a separator, then one line per row.
pub fn database_to_markdown(data: &DatabaseData) -> String {
    if data.columns.is_empty() {
        return String::new();
    }
    let header = table_line(data.columns.iter().map(|column| column.title.clone()));
    let separator = table_line(data.columns.iter().map(|_| "---".to_string()));
    let mut lines = vec![header, separator];
    for row in &data.rows {
        lines.push(table_line(data.columns.iter().map(|column| cell_text(row, column))));
    }
    lines.join("\n")
}

pub fn kanban_to_markdown(data: &KanbanData) -> String {
    data.columns
        .iter()
        .map(|column| {
            let mut section = format!("### {}", column.title);
            for card in &column.cards {
                section.push('\n');
                section.push_str(&checkbox_line(card.checked.unwrap_or(false), &card.content));
            }
            section
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn mind_map_to_markdown(root: &MindMapNode) -> String {
    let mut lines = Vec::new();
    push_node(root, 0, &mut lines);
    lines.join("\n")
}

fn project_os_to_markdown(data: &ProjectOsData) -> String {
    let mut lines = Vec::new();
    for task in &data.tasks {
        let labels: Vec<&str> = [task.metadata.status.as_deref(), task.metadata.importance.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        if labels.is_empty() {
            lines.push(format!("- {}", task.title));
        } else {
            lines.push(format!("- {} ({})", task.title, labels.join(", ")));
        }
        for sub_task in &task.metadata.sub_tasks {
            lines.push(format!("  {}", checkbox_line(sub_task.checked, &sub_task.text)));
        }
    }
    if !lines.is_empty() {
        lines.push(String::new());
    }
    push_node(&data.mind_map, 0, &mut lines);
    lines.join("\n")
}

fn plain_to_markdown(block: &Block, content: &str) -> String {
    match block.block_type {
        BlockType::Heading => format!("## {}", content),
        BlockType::Todo => {
            let mut line = checkbox_line(block.checked.unwrap_or(false), content);
            if let Some(schedule) = block.schedule {
                line.push_str(&format!(" @{}", schedule.as_str()));
            }
            line
        }
        BlockType::Code => {
            let language = block
                .metadata
                .as_ref()
                .and_then(|metadata| metadata.get("language"))
                .and_then(|value| value.as_str())
                .unwrap_or_default();
            format!("```{}\n{}\n```", language, content)
        }
        BlockType::Callout => quote(content),
        _ => content.to_string(),
    }
}

fn push_node(node: &MindMapNode, depth: usize, lines: &mut Vec<String>) {
    lines.push(format!("{}- {}", "  ".repeat(depth), node.text));
    for child in &node.children {
        push_node(child, depth + 1, lines);
    }
}

fn checkbox_line(checked: bool, text: &str) -> String {
    format!("- [{}] {}", if checked { "x" } else { " " }, text)
}

fn quote(text: &str) -> String {
    text.lines().map(|line| format!("> {}", line)).collect::<Vec<_>>().join("\n")
}

fn table_line(cells: impl Iterator<Item = String>) -> String {
    let cells: Vec<String> = cells.map(|cell| cell.replace('|', "\\|").replace('\n', " ")).collect();
    format!("| {} |", cells.join(" | "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Schedule;
    use serde_json::json;

    fn block_with(block_type: BlockType, content: &str) -> Block {
        let mut block = Block::new(block_type, "");
        block.content = content.to_string();
        block
    }

    #[test]
    fn database_export_has_header_and_data_rows() {
        let data: DatabaseData = serde_json::from_value(json!({
            "columns": [{"id": "c1", "title": "Item", "type": "text"}],
            "rows": [{"id": "r1", "c1": "X"}]
        }))
        .expect("database");

        let rendered = database_to_markdown(&data);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines, vec!["| Item |", "| --- |", "| X |"]);
    }

    #[test]
    fn missing_cells_and_pipes_render_safely() {
        let data: DatabaseData = serde_json::from_value(json!({
            "columns": [
                {"id": "a", "title": "A", "type": "text"},
                {"id": "b", "title": "Done", "type": "checkbox"}
            ],
            "rows": [{"id": "r1", "a": "x|y"}, {"id": "r2", "b": true}]
        }))
        .expect("database");
        let rendered = database_to_markdown(&data);
        assert!(rendered.contains("| x\\|y |  |"));
        assert!(rendered.contains("|  | x |"));
    }

    #[test]
    fn corrupt_blocks_render_placeholder() {
        let document = Document::seeded();
        let block = block_with(BlockType::Mindmap, "{broken");
        assert_eq!(block_to_markdown(&document, &block), DATA_ERROR_PLACEHOLDER);
    }

    #[test]
    fn page_export_carries_front_matter() {
        let mut todo = Block::new(BlockType::Todo, "ship");
        todo.checked = Some(true);
        todo.schedule = Some(Schedule::Today);
        let mut code = Block::new(BlockType::Code, "print(1)");
        code.metadata = Some(json!({"language": "python"}));
        let page = Page::new("Release", Some(vec![Block::new(BlockType::Heading, "Plan"), todo, code]));
        let document = Document::new(vec![page.clone()]);

        let markdown = page_to_markdown(&document, &page).expect("markdown");
        assert!(markdown.starts_with("---\n"));
        assert!(markdown.contains(&page.id));
        assert!(markdown.contains("title: Release"));
        assert!(markdown.contains("## Plan"));
        assert!(markdown.contains("- [x] ship @today"));
        assert!(markdown.contains("```python\nprint(1)\n```"));
    }

    #[test]
    fn mind_map_renders_as_nested_list() {
        let root = MindMapNode::new("root", "Root").with_children(vec![
            MindMapNode::new("a", "A").with_children(vec![MindMapNode::new("a1", "A1")]),
            MindMapNode::new("b", "B"),
        ]);
        assert_eq!(mind_map_to_markdown(&root), "- Root\n  - A\n    - A1\n  - B");
    }

    #[test]
    fn snapshot_codec_rejects_garbage() {
        let pages = vec![Page::new("One", None)];
        let bytes = encode_snapshot(&pages).expect("encode");
        assert_eq!(decode_snapshot(&bytes).expect("decode").pages, pages);
        assert!(matches!(decode_snapshot(b"[]"), Err(AppError::InvalidInput(_))));
    }
}
