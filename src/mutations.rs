use crate::errors::{AppError, AppResult};
use crate::models::{advance_timestamp, now_millis, Block, BlockType, LinkMetadata, Page, Schedule};
use crate::payload::default_content;
use crate::templates;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;

/// Shallow field merge for one block. `None` leaves a field alone; the nested options
/// distinguish "clear" (`Some(None)`) from "keep".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Option<Schedule>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Option<Value>>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub block_type: Option<BlockType>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub link_metadata: Option<Option<LinkMetadata>>,
}

impl BlockPatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn checked(checked: bool) -> Self {
        Self {
            checked: Some(checked),
            ..Self::default()
        }
    }

    pub fn schedule(schedule: Option<Schedule>) -> Self {
        Self {
            schedule: Some(schedule),
            ..Self::default()
        }
    }
}

fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Command-menu selections: a block type, `code:<language>` or `tpl:<template key>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Block(BlockType),
    Code { language: String },
    Template(String),
}

impl Command {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.starts_with("tpl:") {
            return Some(Self::Template(raw.to_string()));
        }
        if let Some(language) = raw.strip_prefix("code:") {
            let language = language.trim();
            if language.is_empty() {
                return None;
            }
            return Some(Self::Code {
                language: language.to_string(),
            });
        }
        BlockType::parse(raw).map(Self::Block)
    }
}

/// Text typed before the `/` trigger, kept as seed text for the converted block.
pub fn command_seed(content: &str) -> String {
    content.split('/').next().unwrap_or_default().trim().to_string()
}

pub fn insert_block(page: &Page, after_id: Option<&str>, block_type: BlockType, content: &str) -> (Page, String) {
    let content = if content.is_empty() && block_type.is_structured() {
        default_content(block_type)
    } else {
        content.to_string()
    };
    let block = Block::new(block_type, content);
    let block_id = block.id.clone();
    (insert_blocks_after(page, after_id, vec![block]), block_id)
}

/// Splices `blocks` right after `after_id`; `None` or an unknown id inserts at the head.
pub fn insert_blocks_after(page: &Page, after_id: Option<&str>, blocks: Vec<Block>) -> Page {
    let index = after_id
        .and_then(|id| page.block_index(id))
        .map(|index| index + 1)
        .unwrap_or(0);
    let mut next = page.clone();
    let tail = next.blocks.split_off(index);
    next.blocks.extend(blocks);
    next.blocks.extend(tail);
    touch(&mut next);
    next
}

pub fn append_blocks(page: &Page, blocks: Vec<Block>) -> Page {
    if blocks.is_empty() {
        return page.clone();
    }
    let mut next = page.clone();
    next.blocks.extend(blocks);
    touch(&mut next);
    next
}

pub fn delete_block(page: &Page, block_id: &str) -> Page {
    delete_blocks(page, &[block_id.to_string()])
}

/// Removes every listed block. A page is never left without blocks.
pub fn delete_blocks(page: &Page, block_ids: &[String]) -> Page {
    let targets: HashSet<&str> = block_ids.iter().map(String::as_str).collect();
    if !page.blocks.iter().any(|block| targets.contains(block.id.as_str())) {
        return page.clone();
    }

    let mut next = page.clone();
    next.blocks.retain(|block| !targets.contains(block.id.as_str()));
    if next.blocks.is_empty() {
        next.blocks.push(Block::empty_text());
    }
    touch(&mut next);
    next
}

/// Drag-and-drop move: the source takes the target's former index.
pub fn reorder_block(page: &Page, source_id: &str, target_id: &str) -> Page {
    if source_id == target_id {
        return page.clone();
    }
    let (Some(source_index), Some(target_index)) = (page.block_index(source_id), page.block_index(target_id)) else {
        return page.clone();
    };

    let mut next = page.clone();
    let moved = next.blocks.remove(source_index);
    next.blocks.insert(target_index, moved);
    touch(&mut next);
    next
}

pub fn update_block_field(page: &Page, block_id: &str, patch: &BlockPatch) -> Page {
    let Some(index) = page.block_index(block_id) else {
        return page.clone();
    };

    let mut next = page.clone();
    let block = &mut next.blocks[index];
    let previous_type = block.block_type;

    if let Some(block_type) = patch.block_type {
        block.block_type = block_type;
    }
    if let Some(content) = &patch.content {
        block.content = content.clone();
    } else if block.block_type != previous_type && block.block_type.is_structured() {
        block.content = default_content(block.block_type);
    }
    if let Some(checked) = patch.checked {
        block.checked = Some(checked);
    }
    if let Some(schedule) = patch.schedule {
        block.schedule = schedule;
    }
    if let Some(metadata) = &patch.metadata {
        block.metadata = metadata.clone();
    }
    if let Some(link_metadata) = &patch.link_metadata {
        block.link_metadata = link_metadata.clone();
    }
    stamp_block(block);
    touch(&mut next);
    next
}

/// Replaces type and content together. Structured types always start from their
/// default payload; other types take `seed_content`.
pub fn change_block_type(page: &Page, block_id: &str, new_type: BlockType, seed_content: &str) -> Page {
    convert_block(page, block_id, new_type, seed_content, None)
}

pub fn apply_command(page: &Page, focused_id: &str, raw_command: &str) -> AppResult<Page> {
    let focused = page
        .block(focused_id)
        .ok_or_else(|| AppError::NotFound(format!("block {} not found on page {}", focused_id, page.id)))?;
    let command = Command::parse(raw_command)
        .ok_or_else(|| AppError::InvalidInput(format!("unknown command '{}'", raw_command)))?;
    let seed = command_seed(&focused.content);

    match command {
        Command::Block(block_type) => Ok(convert_block(page, focused_id, block_type, &seed, None)),
        Command::Code { language } => Ok(convert_block(
            page,
            focused_id,
            BlockType::Code,
            &seed,
            Some(json!({ "language": language })),
        )),
        Command::Template(key) => {
            let template =
                templates::template(&key).ok_or_else(|| AppError::NotFound(format!("template {}", key)))?;
            let mut cleaned = page.clone();
            if let Some(index) = cleaned.block_index(focused_id) {
                if cleaned.blocks[index].content.contains('/') {
                    cleaned.blocks[index].content = seed;
                }
            }
            Ok(insert_blocks_after(
                &cleaned,
                Some(focused_id),
                templates::instantiate_blocks(template),
            ))
        }
    }
}

pub fn set_title(page: &Page, title: &str) -> Page {
    if page.title == title {
        return page.clone();
    }
    let mut next = page.clone();
    next.title = title.to_string();
    touch(&mut next);
    next
}

/// Replaces one block with the result of `edit`, used for payload-level edits
/// (mind-map trees, database rows).
pub fn edit_block<F>(page: &Page, block_id: &str, edit: F) -> AppResult<Page>
where
    F: FnOnce(&Block) -> AppResult<Block>,
{
    let index = page
        .block_index(block_id)
        .ok_or_else(|| AppError::NotFound(format!("block {} not found on page {}", block_id, page.id)))?;
    let mut updated = edit(&page.blocks[index])?;
    updated.id = page.blocks[index].id.clone();
    stamp_block(&mut updated);

    let mut next = page.clone();
    next.blocks[index] = updated;
    touch(&mut next);
    Ok(next)
}

pub(crate) fn touch(page: &mut Page) {
    page.updated_at = advance_timestamp(page.updated_at);
}

fn stamp_block(block: &mut Block) {
    block.last_edited_at = Some(match block.last_edited_at {
        Some(previous) => advance_timestamp(previous),
        None => now_millis(),
    });
}

fn convert_block(
    page: &Page,
    block_id: &str,
    new_type: BlockType,
    seed_content: &str,
    metadata: Option<Value>,
) -> Page {
    let Some(index) = page.block_index(block_id) else {
        return page.clone();
    };

    let mut next = page.clone();
    let block = &mut next.blocks[index];
    block.block_type = new_type;
    block.content = if new_type.is_structured() {
        default_content(new_type)
    } else {
        seed_content.to_string()
    };
    block.metadata = metadata;
    if new_type != BlockType::Embed {
        block.link_metadata = None;
    }
    stamp_block(block);
    touch(&mut next);
    next
}
