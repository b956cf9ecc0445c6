use crate::errors::{AppError, AppResult};
use crate::export;
use crate::models::{AppSettings, Block, BlockType, LinkMetadata, Page, Schedule};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA_SQL: &str = include_str!("schema.sql");

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };

        db.ensure_schema_extensions()?;
        db.ensure_default_settings()?;

        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Every stored page, most recently updated first. Read failures are logged and
    /// reported as an empty document.
    pub fn load_all(&self) -> Vec<Page> {
        match self.try_load_all() {
            Ok(pages) => pages,
            Err(error) => {
                tracing::error!(path = %self.db_path.display(), error = %error, "failed to load pages");
                Vec::new()
            }
        }
    }

    pub fn try_load_all(&self) -> AppResult<Vec<Page>> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;

        let mut stmt = conn.prepare(
            "SELECT id, pageId, type, content, checked, schedule, lastEditedAt, metadata, linkMetadata
             FROM blocks
             ORDER BY pageId ASC, sortOrder ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let page_id: String = row.get(1)?;
            Ok((page_id, parse_block_row(row)?))
        })?;
        let mut blocks_by_page: HashMap<String, Vec<Block>> = HashMap::new();
        for row in rows {
            let (page_id, block) = row?;
            blocks_by_page.entry(page_id).or_default().push(block);
        }

        let mut stmt = conn.prepare("SELECT id, title, updatedAt FROM pages ORDER BY updatedAt DESC, rowid ASC")?;
        let rows = stmt.query_map([], parse_page_row)?;
        let mut pages = Vec::new();
        for row in rows {
            let mut page = row?;
            page.blocks = blocks_by_page.remove(&page.id).unwrap_or_default();
            pages.push(page.ensure_block());
        }

        if !blocks_by_page.is_empty() {
            tracing::warn!(orphaned_pages = blocks_by_page.len(), "skipped blocks without a page");
        }
        Ok(pages)
    }

    /// Replaces the stored document with `pages` in one transaction. On failure the
    /// previous contents are kept.
    pub fn save_all(&self, pages: &[Page]) -> AppResult<()> {
        let mut conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM blocks", [])?;
        tx.execute("DELETE FROM pages", [])?;
        {
            let mut insert_page = tx.prepare("INSERT INTO pages (id, title, updatedAt) VALUES (?1, ?2, ?3)")?;
            let mut insert_block = tx.prepare(
                "INSERT INTO blocks (
                   id, pageId, type, content, checked, schedule, lastEditedAt, metadata, sortOrder, linkMetadata
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;

            for page in pages {
                insert_page.execute(params![page.id, page.title, page.updated_at.timestamp_millis()])?;
                for (index, block) in page.blocks.iter().enumerate() {
                    let metadata = block.metadata.as_ref().map(serde_json::to_string).transpose()?;
                    let link_metadata = block.link_metadata.as_ref().map(serde_json::to_string).transpose()?;
                    insert_block.execute(params![
                        block.id,
                        page.id,
                        block.block_type.as_str(),
                        block.content,
                        block.checked,
                        block.schedule.map(Schedule::as_str),
                        block.last_edited_at.map(|value| value.timestamp_millis()),
                        metadata,
                        index as i64,
                        link_metadata,
                    ])?;
                }
            }
        }
        tx.commit()?;

        tracing::debug!(pages = pages.len(), "document saved");
        Ok(())
    }

    /// Serialized backup of the stored document.
    pub fn export_snapshot(&self) -> AppResult<Vec<u8>> {
        export::encode_snapshot(&self.try_load_all()?)
    }

    /// Restores a backup written by `export_snapshot`, replacing the stored document.
    pub fn import_snapshot(&self, bytes: &[u8]) -> AppResult<Vec<Page>> {
        let snapshot = export::decode_snapshot(bytes)?;
        self.save_all(&snapshot.pages)?;
        tracing::info!(pages = snapshot.pages.len(), exported_at = %snapshot.exported_at, "snapshot imported");
        Ok(snapshot.pages)
    }

    pub fn get_settings(&self) -> AppResult<AppSettings> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = 'app'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => match serde_json::from_str::<AppSettings>(&raw) {
                Ok(settings) => Ok(settings),
                Err(error) => {
                    tracing::warn!(error = %error, "unreadable settings row; using defaults");
                    Ok(AppSettings::default())
                }
            },
            None => Ok(AppSettings::default()),
        }
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: AppSettings = serde_json::from_value(merged)
            .map_err(|error| AppError::InvalidInput(format!("invalid settings: {}", error)))?;

        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES ('app', ?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![serde_json::to_string(&settings)?, Utc::now().to_rfc3339()],
        )?;

        Ok(settings)
    }

    fn ensure_schema_extensions(&self) -> AppResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        if !column_exists(&conn, "blocks", "linkMetadata")? {
            conn.execute("ALTER TABLE blocks ADD COLUMN linkMetadata TEXT", [])?;
        }

        Ok(())
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let count: i64 = conn.query_row("SELECT COUNT(1) FROM settings WHERE key = 'app'", [], |row| row.get(0))?;
        if count == 0 {
            conn.execute(
                "INSERT INTO settings (key, value_json, updated_at) VALUES ('app', ?1, ?2)",
                params![
                    serde_json::to_string(&AppSettings::default())?,
                    Utc::now().to_rfc3339()
                ],
            )?;
        }
        Ok(())
    }
}

fn parse_page_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Page> {
    Ok(Page {
        id: row.get(0)?,
        title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        blocks: Vec::new(),
        updated_at: parse_millis(row.get(2)?)?,
    })
}

/// Columns: id, pageId, type, content, checked, schedule, lastEditedAt, metadata, linkMetadata.
fn parse_block_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Block> {
    let id: String = row.get(0)?;
    let schedule = row.get::<_, Option<String>>(5)?.and_then(|raw| {
        let parsed = Schedule::parse(&raw);
        if parsed.is_none() {
            tracing::warn!(block_id = %id, schedule = %raw, "ignoring unknown schedule");
        }
        parsed
    });
    let metadata = parse_json_column::<serde_json::Value>(&id, "metadata", row.get(7)?);
    let link_metadata = parse_json_column::<LinkMetadata>(&id, "linkMetadata", row.get(8)?);

    Ok(Block {
        block_type: parse_block_type(&row.get::<_, String>(2)?)?,
        content: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        checked: row.get(4)?,
        schedule,
        last_edited_at: row.get::<_, Option<i64>>(6)?.map(parse_millis).transpose()?,
        metadata,
        link_metadata,
        id,
    })
}

fn parse_json_column<T: serde::de::DeserializeOwned>(block_id: &str, column: &str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    match serde_json::from_str::<T>(&raw) {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::warn!(block_id = %block_id, column, error = %error, "dropping unreadable block column");
            None
        }
    }
}

fn parse_block_type(raw: &str) -> rusqlite::Result<BlockType> {
    BlockType::parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Unknown block type '{}'", raw),
            )),
        )
    })
}

fn parse_millis(raw: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("timestamp out of range: {}", raw),
            )),
        )
    })
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> AppResult<bool> {
    let pragma = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&pragma)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}
