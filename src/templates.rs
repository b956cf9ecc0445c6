use crate::models::{new_id, now_millis, Block, BlockType, Page, Schedule};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde_json::{json, Value};

const DEADLINE_OFFSET_KEY: &str = "deadlineOffsetMs";

#[derive(Debug, Clone)]
pub struct Template {
    pub key: &'static str,
    pub title: &'static str,
    pub icon: &'static str,
    pub blocks: Vec<Block>,
}

static CATALOGUE: Lazy<Vec<Template>> = Lazy::new(|| {
    vec![
        Template {
            key: "tpl:project_mgmt",
            title: "Project Management",
            icon: "🛰️",
            blocks: vec![
                seed("p1", BlockType::Heading, "Central Project OS"),
                seed("p2", BlockType::Callout, "Goal: Optimize context engineering workflow."),
                seed_json(
                    "p3",
                    BlockType::ProjectOs,
                    json!({
                        "tasks": [
                            {
                                "id": "t1",
                                "title": "Initial Concept Draft",
                                "metadata": {
                                    "importance": "High",
                                    "status": "In Progress",
                                    "deadlineOffsetMs": 172_800_000i64,
                                    "subTasks": [
                                        {"id": "st1", "text": "Research market needs", "checked": true},
                                        {"id": "st2", "text": "Draft technical spec", "checked": false}
                                    ]
                                }
                            },
                            {
                                "id": "t2",
                                "title": "Future Extension A",
                                "metadata": {"importance": "Extension", "status": "Backlog", "subTasks": []}
                            }
                        ],
                        "mindMap": {
                            "id": "root",
                            "text": "Master Plan",
                            "x": 2000,
                            "y": 2000,
                            "children": [
                                {"id": "node1", "text": "Concept Phase", "x": 2200, "y": 1950, "children": []},
                                {"id": "node2", "text": "Build Phase", "x": 2200, "y": 2050, "children": []}
                            ]
                        }
                    }),
                ),
            ],
        },
        Template {
            key: "tpl:daily",
            title: "Daily Planner",
            icon: "☀️",
            blocks: vec![
                seed("d1", BlockType::Heading, "Daily Review"),
                seed("d2", BlockType::Callout, "Core priority for today: "),
                scheduled("d3", "Major Objective", Schedule::Today),
                scheduled("d4", "Secondary Objective", Schedule::Today),
                seed("d5", BlockType::Divider, ""),
                seed("d6", BlockType::Todo, "Administrative tasks"),
            ],
        },
        Template {
            key: "tpl:kanban_board",
            title: "Project Board",
            icon: "▥",
            blocks: vec![
                seed("kb1", BlockType::Heading, "Workflow Architecture"),
                seed_json(
                    "kb2",
                    BlockType::Kanban,
                    json!({
                        "columns": [
                            {"id": "c1", "title": "Backlog", "cards": [{"id": "k1", "content": "Draft initial concepts", "checked": false}]},
                            {"id": "c2", "title": "Active", "cards": []},
                            {"id": "c3", "title": "In Review", "cards": []},
                            {"id": "c4", "title": "Internalized", "cards": []}
                        ]
                    }),
                ),
            ],
        },
        Template {
            key: "tpl:project_db",
            title: "Project Database",
            icon: "▦",
            blocks: vec![
                seed("db1", BlockType::Heading, "Context Master Inventory"),
                seed_json(
                    "db2",
                    BlockType::Database,
                    json!({
                        "columns": [
                            {"id": "item", "title": "Component", "type": "text"},
                            {"id": "status", "title": "Status", "type": "text"},
                            {"id": "priority", "title": "Prio", "type": "number"},
                            {"id": "verify", "title": "Validated", "type": "checkbox"}
                        ],
                        "rows": [
                            {"id": "r1", "item": "Auth Module", "status": "Stable", "priority": 1, "verify": true},
                            {"id": "r2", "item": "Sync Engine", "status": "Testing", "priority": 2, "verify": false}
                        ]
                    }),
                ),
            ],
        },
        Template {
            key: "tpl:meeting",
            title: "Meeting Notes",
            icon: "👥",
            blocks: vec![
                seed("m1", BlockType::Heading, "Project Sync"),
                seed("m2", BlockType::Callout, "Context & Participants: "),
                seed("m3", BlockType::Heading, "Agenda"),
                seed("m4", BlockType::Text, "- "),
                seed("m5", BlockType::Heading, "Decisions & Actions"),
                seed("m6", BlockType::Todo, "Action assigned to: "),
            ],
        },
        Template {
            key: "tpl:goals",
            title: "Goal Setting",
            icon: "🎯",
            blocks: vec![
                seed("g1", BlockType::Heading, "Vision & Goals"),
                seed_json(
                    "g2",
                    BlockType::Database,
                    json!({
                        "columns": [
                            {"id": "goal", "title": "Objective", "type": "text"},
                            {"id": "status", "title": "Progress", "type": "text"},
                            {"id": "progress", "title": "%", "type": "number"}
                        ],
                        "rows": [{"id": "r1", "goal": "Example Goal", "status": "In Planning", "progress": 5}]
                    }),
                ),
            ],
        },
        Template {
            key: "tpl:mindmap",
            title: "Concept Map",
            icon: "☘",
            blocks: vec![
                seed("mm1", BlockType::Heading, "Idea Architecture"),
                seed_json(
                    "mm2",
                    BlockType::Mindmap,
                    json!({
                        "id": "root",
                        "text": "Core Thesis",
                        "x": 400,
                        "y": 300,
                        "children": [
                            {"id": "node1", "text": "Pillar One", "x": 200, "y": 150, "children": []},
                            {"id": "node2", "text": "Pillar Two", "x": 600, "y": 150, "children": []}
                        ]
                    }),
                ),
            ],
        },
        Template {
            key: "tpl:study",
            title: "Knowledge Lab",
            icon: "📚",
            blocks: vec![
                seed("st1", BlockType::Heading, "Learning Framework: [Topic]"),
                seed_json(
                    "st2",
                    BlockType::Kanban,
                    json!({
                        "columns": [
                            {"id": "c1", "title": "Curriculum", "cards": []},
                            {"id": "c2", "title": "Practicing", "cards": []},
                            {"id": "c3", "title": "Mastered", "cards": []}
                        ]
                    }),
                ),
            ],
        },
        Template {
            key: "tpl:habit",
            title: "Habit Engine",
            icon: "⚡",
            blocks: vec![
                seed("h1", BlockType::Heading, "System Optimization"),
                seed_json(
                    "h2",
                    BlockType::Database,
                    json!({
                        "columns": [
                            {"id": "c1", "title": "Habit", "type": "text"},
                            {"id": "m", "title": "M", "type": "checkbox"},
                            {"id": "t", "title": "T", "type": "checkbox"},
                            {"id": "w", "title": "W", "type": "checkbox"},
                            {"id": "th", "title": "Th", "type": "checkbox"},
                            {"id": "f", "title": "F", "type": "checkbox"},
                            {"id": "s", "title": "S", "type": "checkbox"},
                            {"id": "su", "title": "Su", "type": "checkbox"}
                        ],
                        "rows": [{"id": "r1", "c1": "Morning Deep Work Block"}]
                    }),
                ),
            ],
        },
        Template {
            key: "tpl:webdev",
            title: "Static Website",
            icon: "🌐",
            blocks: vec![
                seed("w1", BlockType::Heading, "UI Prototype"),
                code(
                    "w2",
                    "html",
                    "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n  <style>\n    body { font-family: system-ui, sans-serif; display: flex; align-items: center; justify-content: center; height: 100vh; margin: 0; }\n  </style>\n</head>\n<body>\n  <h1>Hello</h1>\n</body>\n</html>",
                ),
            ],
        },
        Template {
            key: "tpl:python_lab",
            title: "Python Lab",
            icon: "🐍",
            blocks: vec![
                seed("p1", BlockType::Heading, "Computation Engine"),
                code(
                    "p2",
                    "python",
                    "def fibonacci(n):\n    a, b = 0, 1\n    for _ in range(n):\n        yield a\n        a, b = b, a + b\n\nprint(list(fibonacci(10)))",
                ),
            ],
        },
    ]
});

pub fn catalogue() -> &'static [Template] {
    CATALOGUE.as_slice()
}

pub fn template(key: &str) -> Option<&'static Template> {
    CATALOGUE.iter().find(|template| template.key == key)
}

/// Copies of the template's blocks with every id re-minted and relative task
/// deadlines turned into absolute ones.
pub fn instantiate_blocks(template: &Template) -> Vec<Block> {
    let now = now_millis();
    template
        .blocks
        .iter()
        .map(|block| Block {
            id: new_id(),
            content: resolve_deadlines(block, now),
            last_edited_at: Some(now),
            ..block.clone()
        })
        .collect()
}

pub fn instantiate_page(key: &str) -> Option<Page> {
    let template = template(key)?;
    Some(Page::new(template.title, Some(instantiate_blocks(template))))
}

fn resolve_deadlines(block: &Block, now: DateTime<Utc>) -> String {
    if block.block_type != BlockType::ProjectOs {
        return block.content.clone();
    }
    let Ok(mut payload) = serde_json::from_str::<Value>(&block.content) else {
        return block.content.clone();
    };
    let Some(tasks) = payload.get_mut("tasks").and_then(Value::as_array_mut) else {
        return block.content.clone();
    };
    for metadata in tasks
        .iter_mut()
        .filter_map(|task| task.get_mut("metadata"))
        .filter_map(Value::as_object_mut)
    {
        if let Some(offset) = metadata.remove(DEADLINE_OFFSET_KEY).and_then(|value| value.as_i64()) {
            metadata.insert("deadline".to_string(), Value::from(now.timestamp_millis() + offset));
        }
    }
    payload.to_string()
}

fn seed(id: &str, block_type: BlockType, content: &str) -> Block {
    Block {
        id: id.to_string(),
        block_type,
        content: content.to_string(),
        checked: None,
        schedule: None,
        last_edited_at: None,
        metadata: None,
        link_metadata: None,
    }
}

fn seed_json(id: &str, block_type: BlockType, payload: Value) -> Block {
    seed(id, block_type, &payload.to_string())
}

fn scheduled(id: &str, content: &str, schedule: Schedule) -> Block {
    Block {
        schedule: Some(schedule),
        ..seed(id, BlockType::Todo, content)
    }
}

fn code(id: &str, language: &str, source: &str) -> Block {
    Block {
        metadata: Some(json!({ "language": language })),
        ..seed(id, BlockType::Code, source)
    }
}
