use crate::errors::{AppError, AppResult};
use crate::models::{advance_timestamp, new_id, now_millis, Block, MindMapNode};
use crate::payload::{encode, parse_payload, BlockPayload};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const NEW_NODE_TEXT: &str = "New Idea";
const CHILD_OFFSET_X: f64 = 100.0;
const CHILD_SPACING_Y: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePatch {
    pub text: Option<String>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub is_expanded: Option<bool>,
    pub task_id: Option<String>,
}

impl NodePatch {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn position(point: Point) -> Self {
        Self {
            x: Some(point.x),
            y: Some(point.y),
            ..Self::default()
        }
    }
}

pub fn find_node<'a>(root: &'a MindMapNode, node_id: &str) -> Option<&'a MindMapNode> {
    if root.id == node_id {
        return Some(root);
    }
    root.children.iter().find_map(|child| find_node(child, node_id))
}

pub fn node_count(root: &MindMapNode) -> usize {
    1 + root.children.iter().map(node_count).sum::<usize>()
}

pub fn duplicate_ids(root: &MindMapNode) -> Vec<String> {
    fn walk(node: &MindMapNode, seen: &mut HashSet<String>, duplicates: &mut Vec<String>) {
        if !seen.insert(node.id.clone()) && !duplicates.contains(&node.id) {
            duplicates.push(node.id.clone());
        }
        for child in &node.children {
            walk(child, seen, duplicates);
        }
    }

    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    walk(root, &mut seen, &mut duplicates);
    duplicates
}

/// Merges `patch` into the node with `node_id`. Unknown ids return the tree unchanged.
pub fn update_node(root: &MindMapNode, node_id: &str, patch: &NodePatch) -> MindMapNode {
    if find_node(root, node_id).is_none() {
        return root.clone();
    }
    update_recursive(root, node_id, patch)
}

/// Appends a fresh child under `parent_id` and returns the new tree plus the child's id.
pub fn add_child(root: &MindMapNode, parent_id: &str, seed: Option<Point>) -> (MindMapNode, Option<String>) {
    let Some(parent) = find_node(root, parent_id) else {
        return (root.clone(), None);
    };

    let position = seed.unwrap_or_else(|| {
        Point::new(
            parent.x.unwrap_or(0.0) + CHILD_OFFSET_X,
            parent.y.unwrap_or(0.0) + CHILD_SPACING_Y * parent.children.len() as f64,
        )
    });
    let child = MindMapNode::new(new_id(), NEW_NODE_TEXT).at(position.x, position.y);
    let child_id = child.id.clone();
    (add_recursive(root, parent_id, &child), Some(child_id))
}

/// Removes the node and its subtree. The root is never removed.
pub fn delete_node(root: &MindMapNode, node_id: &str) -> MindMapNode {
    if root.id == node_id || find_node(root, node_id).is_none() {
        return root.clone();
    }
    delete_recursive(root, node_id)
}

pub fn toggle_expanded(root: &MindMapNode, node_id: &str) -> MindMapNode {
    let Some(node) = find_node(root, node_id) else {
        return root.clone();
    };
    let patch = NodePatch {
        is_expanded: Some(!node.is_expanded.unwrap_or(true)),
        ..NodePatch::default()
    };
    update_node(root, node_id, &patch)
}

fn update_recursive(current: &MindMapNode, node_id: &str, patch: &NodePatch) -> MindMapNode {
    if current.id == node_id {
        let mut updated = current.clone();
        if let Some(text) = &patch.text {
            updated.text = text.clone();
        }
        if patch.x.is_some() {
            updated.x = patch.x;
        }
        if patch.y.is_some() {
            updated.y = patch.y;
        }
        if patch.is_expanded.is_some() {
            updated.is_expanded = patch.is_expanded;
        }
        if patch.task_id.is_some() {
            updated.task_id = patch.task_id.clone();
        }
        return updated;
    }
    rebuild(
        current,
        current
            .children
            .iter()
            .map(|child| update_recursive(child, node_id, patch))
            .collect(),
    )
}

fn add_recursive(current: &MindMapNode, parent_id: &str, child: &MindMapNode) -> MindMapNode {
    if current.id == parent_id {
        let mut children = current.children.clone();
        children.push(child.clone());
        return rebuild(current, children);
    }
    rebuild(
        current,
        current
            .children
            .iter()
            .map(|node| add_recursive(node, parent_id, child))
            .collect(),
    )
}

fn delete_recursive(current: &MindMapNode, node_id: &str) -> MindMapNode {
    rebuild(
        current,
        current
            .children
            .iter()
            .filter(|child| child.id != node_id)
            .map(|child| delete_recursive(child, node_id))
            .collect(),
    )
}

fn rebuild(current: &MindMapNode, children: Vec<MindMapNode>) -> MindMapNode {
    MindMapNode {
        id: current.id.clone(),
        text: current.text.clone(),
        children,
        x: current.x,
        y: current.y,
        is_expanded: current.is_expanded,
        task_id: current.task_id.clone(),
    }
}

/// Pointer drag of one node. The offset between pointer and node origin is fixed at
/// `begin` so the node follows the pointer without jumping.
#[derive(Debug, Clone, PartialEq)]
pub struct DragSession {
    node_id: String,
    offset: Point,
}

impl DragSession {
    pub fn begin(root: &MindMapNode, node_id: &str, pointer: Point) -> Option<Self> {
        let node = find_node(root, node_id)?;
        Some(Self {
            node_id: node.id.clone(),
            offset: Point::new(pointer.x - node.x.unwrap_or(0.0), pointer.y - node.y.unwrap_or(0.0)),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn position_for(&self, pointer: Point) -> Point {
        Point::new(pointer.x - self.offset.x, pointer.y - self.offset.y)
    }

    pub fn drag_to(&self, root: &MindMapNode, pointer: Point) -> MindMapNode {
        update_node(root, &self.node_id, &NodePatch::position(self.position_for(pointer)))
    }

    pub fn end(self) -> String {
        self.node_id
    }
}

/// Applies `edit` to the tree stored in a mindmap block or in a project_os block's
/// `mindMap`, returning the block with re-serialized content.
pub fn edit_block_tree<F>(block: &Block, edit: F) -> AppResult<Block>
where
    F: FnOnce(&MindMapNode) -> MindMapNode,
{
    let content = match parse_payload(block) {
        BlockPayload::MindMap(root) => encode(&edit(&root))?,
        BlockPayload::ProjectOs(mut data) => {
            data.mind_map = edit(&data.mind_map);
            encode(&data)?
        }
        BlockPayload::Corrupt { reason, .. } => {
            return Err(AppError::CorruptPayload(format!("block {}: {}", block.id, reason)));
        }
        _ => {
            return Err(AppError::InvalidInput(format!(
                "block {} ({}) has no mind map",
                block.id,
                block.block_type.as_str()
            )));
        }
    };

    let mut updated = block.clone();
    updated.content = content;
    updated.last_edited_at = Some(match block.last_edited_at {
        Some(previous) => advance_timestamp(previous),
        None => now_millis(),
    });
    Ok(updated)
}

pub fn block_tree(block: &Block) -> Option<MindMapNode> {
    match parse_payload(block) {
        BlockPayload::MindMap(root) => Some(root),
        BlockPayload::ProjectOs(data) => Some(data.mind_map),
        _ => None,
    }
}
