use crate::errors::AppResult;
use crate::models::{new_id, Block, DatabaseData};
use crate::payload::{self, empty_cell, encode};
use serde_json::{Map, Value};

const ROW_ID_KEY: &str = "id";

pub fn row_id(row: &Map<String, Value>) -> Option<&str> {
    row.get(ROW_ID_KEY).and_then(Value::as_str)
}

/// Appends a row with every column at its empty value and returns the row id.
pub fn add_row(data: &DatabaseData) -> (DatabaseData, String) {
    let id = new_id();
    let mut row = Map::new();
    row.insert(ROW_ID_KEY.to_string(), Value::String(id.clone()));
    for column in &data.columns {
        row.insert(column.id.clone(), empty_cell(column));
    }

    let mut next = data.clone();
    next.rows.push(row);
    (next, id)
}

/// Sets one cell. An unknown row or column leaves the table unchanged.
pub fn update_cell(data: &DatabaseData, row_id_value: &str, column_id: &str, value: Value) -> DatabaseData {
    if !data.columns.iter().any(|column| column.id == column_id) {
        return data.clone();
    }
    let mut next = data.clone();
    if let Some(row) = next.rows.iter_mut().find(|row| row_id(row) == Some(row_id_value)) {
        row.insert(column_id.to_string(), value);
    }
    next
}

pub fn delete_row(data: &DatabaseData, row_id_value: &str) -> DatabaseData {
    let mut next = data.clone();
    next.rows.retain(|row| row_id(row) != Some(row_id_value));
    next
}

/// Applies `edit` to the table stored in a database block. Corrupt payloads are
/// refused and keep their raw content.
pub fn edit_block_table<F>(block: &Block, edit: F) -> AppResult<Block>
where
    F: FnOnce(&DatabaseData) -> DatabaseData,
{
    let data = payload::database(block)?;
    let mut updated = block.clone();
    updated.content = encode(&edit(&data))?;
    Ok(updated)
}
