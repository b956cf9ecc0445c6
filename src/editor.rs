use crate::assistant::{self, AssistantClient, AssistantMode, AssistantRequest};
use crate::db::Database;
use crate::document::{Confirmations, DeletePageOutcome, Document};
use crate::errors::{AppError, AppResult};
use crate::export;
use crate::history::History;
use crate::mindmap::{self, DragSession, Point};
use crate::models::{AppSettings, BlockType, DatabaseData, LinkType, MindMapNode, Notice, Page, Theme};
use crate::mutations::{self, BlockPatch};
use crate::persistence::SaveQueue;
use crate::redaction::Redactor;
use crate::sync::{self, SnapshotUploader, SyncReceipt};
use crate::table;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;

pub const DB_FILE_NAME: &str = "notes.sqlite";

struct ActiveDrag {
    page_id: String,
    block_id: String,
    session: DragSession,
    before: Document,
}

/// One editing session: the in-memory document, its undo history and the background
/// writer that persists it. Must be created inside a tokio runtime.
pub struct EditorCore {
    db: Arc<Database>,
    document: Document,
    active_page_id: Option<String>,
    history: History,
    settings: AppSettings,
    redactor: Redactor,
    saver: SaveQueue,
    notice_tx: mpsc::UnboundedSender<Notice>,
    notice_rx: mpsc::UnboundedReceiver<Notice>,
    drag: Option<ActiveDrag>,
}

impl EditorCore {
    pub fn open(app_data_dir: &Path) -> AppResult<Self> {
        let db = Database::new(&app_data_dir.join(DB_FILE_NAME))?;
        Self::with_database(Arc::new(db))
    }

    pub fn with_database(db: Arc<Database>) -> AppResult<Self> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(AppError::Internal("editor requires a running tokio runtime".to_string()));
        }

        let settings = db.get_settings()?;
        let pages = db.load_all();
        let seeded = pages.is_empty();
        let document = Document::from_loaded(pages);
        let active_page_id = document.pages.first().map(|page| page.id.clone());

        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let saver = SaveQueue::start(
            db.clone(),
            Duration::from_millis(settings.save_debounce_ms),
            notice_tx.clone(),
        );

        let core = Self {
            db,
            document,
            active_page_id,
            history: History::new(settings.history_limit),
            settings,
            redactor: Redactor::default(),
            saver,
            notice_tx,
            notice_rx,
            drag: None,
        };
        if seeded {
            core.schedule_save();
        }
        tracing::info!(
            path = %core.db.path().display(),
            pages = core.document.page_count(),
            seeded,
            "editor opened"
        );
        Ok(core)
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn pages(&self) -> &[Page] {
        &self.document.pages
    }

    pub fn page(&self, page_id: &str) -> Option<&Page> {
        self.document.page(page_id)
    }

    pub fn active_page(&self) -> Option<&Page> {
        self.active_page_id.as_deref().and_then(|id| self.document.page(id))
    }

    pub fn set_active_page(&mut self, page_id: &str) -> AppResult<()> {
        if self.document.page(page_id).is_none() {
            return Err(AppError::NotFound(format!("page {}", page_id)));
        }
        self.active_page_id = Some(page_id.to_string());
        Ok(())
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn update_settings(&mut self, update: serde_json::Value) -> AppResult<AppSettings> {
        let updated = self.db.update_settings(update)?;
        self.history.set_limit(updated.history_limit);
        if updated.save_debounce_ms != self.settings.save_debounce_ms {
            self.saver.set_debounce(Duration::from_millis(updated.save_debounce_ms))?;
        }
        self.settings = updated.clone();
        Ok(updated)
    }

    pub fn set_theme(&mut self, theme: Theme) -> AppResult<AppSettings> {
        self.update_settings(json!({ "theme": theme }))
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn undo(&mut self) -> bool {
        self.cancel_drag();
        match self.history.undo(self.document.clone()) {
            Some(previous) => {
                self.replace_document(previous);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        self.cancel_drag();
        match self.history.redo(self.document.clone()) {
            Some(next) => {
                self.replace_document(next);
                true
            }
            None => false,
        }
    }

    /// Applies a page-level mutation and records it for undo.
    pub fn apply_page<F>(&mut self, page_id: &str, mutate: F) -> AppResult<()>
    where
        F: FnOnce(&Page) -> AppResult<Page>,
    {
        let next = self.document.update_page(page_id, mutate)?;
        self.commit(next);
        Ok(())
    }

    pub fn apply_document<F>(&mut self, mutate: F) -> AppResult<()>
    where
        F: FnOnce(&Document) -> AppResult<Document>,
    {
        let next = mutate(&self.document)?;
        self.commit(next);
        Ok(())
    }

    pub fn insert_block(
        &mut self,
        page_id: &str,
        after_id: Option<&str>,
        block_type: BlockType,
        content: &str,
    ) -> AppResult<String> {
        let mut inserted = String::new();
        self.apply_page(page_id, |page| {
            let (next, block_id) = mutations::insert_block(page, after_id, block_type, content);
            inserted = block_id;
            Ok(next)
        })?;
        Ok(inserted)
    }

    pub fn update_block(&mut self, page_id: &str, block_id: &str, patch: &BlockPatch) -> AppResult<()> {
        self.apply_page(page_id, |page| Ok(mutations::update_block_field(page, block_id, patch)))
    }

    pub fn delete_block(&mut self, page_id: &str, block_id: &str) -> AppResult<()> {
        self.apply_page(page_id, |page| Ok(mutations::delete_block(page, block_id)))
    }

    pub fn delete_blocks(&mut self, page_id: &str, block_ids: &[String]) -> AppResult<()> {
        self.apply_page(page_id, |page| Ok(mutations::delete_blocks(page, block_ids)))
    }

    pub fn reorder_block(&mut self, page_id: &str, source_id: &str, target_id: &str) -> AppResult<()> {
        self.apply_page(page_id, |page| Ok(mutations::reorder_block(page, source_id, target_id)))
    }

    pub fn change_block_type(
        &mut self,
        page_id: &str,
        block_id: &str,
        new_type: BlockType,
        seed_content: &str,
    ) -> AppResult<()> {
        self.apply_page(page_id, |page| {
            Ok(mutations::change_block_type(page, block_id, new_type, seed_content))
        })
    }

    pub fn apply_command(&mut self, page_id: &str, focused_id: &str, command: &str) -> AppResult<()> {
        self.apply_page(page_id, |page| mutations::apply_command(page, focused_id, command))
    }

    pub fn set_title(&mut self, page_id: &str, title: &str) -> AppResult<()> {
        self.apply_page(page_id, |page| Ok(mutations::set_title(page, title)))
    }

    pub fn add_page(&mut self, title: &str) -> String {
        let (next, page_id) = self.document.add_page(title);
        self.commit(next);
        self.active_page_id = Some(page_id.clone());
        page_id
    }

    pub fn add_page_from_template(&mut self, key: &str) -> AppResult<String> {
        let (next, page_id) = self.document.add_page_from_template(key)?;
        self.commit(next);
        self.active_page_id = Some(page_id.clone());
        Ok(page_id)
    }

    /// Staged deletion. Only a `Deleted` outcome changes the document.
    pub fn delete_page(&mut self, page_id: &str, confirmations: Confirmations) -> DeletePageOutcome {
        let outcome = self.document.delete_page(page_id, confirmations);
        if let DeletePageOutcome::Deleted { document, .. } = &outcome {
            self.commit(document.clone());
        }
        outcome
    }

    pub fn insert_link_block(
        &mut self,
        page_id: &str,
        after_id: Option<&str>,
        source_page_id: &str,
        source_block_id: Option<&str>,
        link_type: LinkType,
    ) -> AppResult<String> {
        let (next, block_id) =
            self.document
                .insert_link_block(page_id, after_id, source_page_id, source_block_id, link_type)?;
        self.commit(next);
        Ok(block_id)
    }

    pub fn link_block(
        &mut self,
        page_id: &str,
        block_id: &str,
        source_page_id: &str,
        source_block_id: Option<&str>,
        link_type: LinkType,
    ) -> AppResult<()> {
        self.apply_document(|document| {
            document.link_block(page_id, block_id, source_page_id, source_block_id, link_type)
        })
    }

    pub fn unlink_block(&mut self, page_id: &str, block_id: &str) -> AppResult<()> {
        self.apply_document(|document| document.unlink_block(page_id, block_id))
    }

    pub fn refresh_link_block(&mut self, page_id: &str, block_id: &str) -> AppResult<()> {
        self.apply_document(|document| document.refresh_link_block(page_id, block_id))
    }

    pub fn set_link_type(&mut self, page_id: &str, block_id: &str, link_type: LinkType) -> AppResult<()> {
        self.apply_document(|document| document.set_link_type(page_id, block_id, link_type))
    }

    fn edit_table<F>(&mut self, page_id: &str, block_id: &str, edit: F) -> AppResult<()>
    where
        F: FnOnce(&DatabaseData) -> DatabaseData,
    {
        self.apply_page(page_id, |page| {
            mutations::edit_block(page, block_id, |block| table::edit_block_table(block, edit))
        })
    }

    pub fn add_database_row(&mut self, page_id: &str, block_id: &str) -> AppResult<String> {
        let mut added = String::new();
        self.edit_table(page_id, block_id, |data| {
            let (next, row_id) = table::add_row(data);
            added = row_id;
            next
        })?;
        Ok(added)
    }

    pub fn update_database_cell(
        &mut self,
        page_id: &str,
        block_id: &str,
        row_id: &str,
        column_id: &str,
        value: serde_json::Value,
    ) -> AppResult<()> {
        self.edit_table(page_id, block_id, |data| table::update_cell(data, row_id, column_id, value))
    }

    pub fn delete_database_row(&mut self, page_id: &str, block_id: &str, row_id: &str) -> AppResult<()> {
        self.edit_table(page_id, block_id, |data| table::delete_row(data, row_id))
    }

    /// Applies a tree edit to the mind map held by a mindmap or project_os block.
    pub fn edit_mind_map<F>(&mut self, page_id: &str, block_id: &str, edit: F) -> AppResult<()>
    where
        F: FnOnce(&MindMapNode) -> MindMapNode,
    {
        self.apply_page(page_id, |page| {
            mutations::edit_block(page, block_id, |block| mindmap::edit_block_tree(block, edit))
        })
    }

    pub fn add_mind_map_child(
        &mut self,
        page_id: &str,
        block_id: &str,
        parent_id: &str,
        seed: Option<Point>,
    ) -> AppResult<Option<String>> {
        let mut added = None;
        self.edit_mind_map(page_id, block_id, |root| {
            let (next, node_id) = mindmap::add_child(root, parent_id, seed);
            added = node_id;
            next
        })?;
        Ok(added)
    }

    /// Starts dragging `node_id`. Returns false when the node does not exist.
    pub fn begin_drag(&mut self, page_id: &str, block_id: &str, node_id: &str, pointer: Point) -> AppResult<bool> {
        self.cancel_drag();
        let block = self
            .document
            .page(page_id)
            .and_then(|page| page.block(block_id))
            .ok_or_else(|| AppError::NotFound(format!("block {} on page {}", block_id, page_id)))?;
        let root = mindmap::block_tree(block)
            .ok_or_else(|| AppError::InvalidInput(format!("block {} has no readable mind map", block_id)))?;

        let Some(session) = DragSession::begin(&root, node_id, pointer) else {
            return Ok(false);
        };
        self.drag = Some(ActiveDrag {
            page_id: page_id.to_string(),
            block_id: block_id.to_string(),
            session,
            before: self.document.clone(),
        });
        Ok(true)
    }

    /// Moves the dragged node. Intermediate positions are not recorded for undo.
    pub fn drag_to(&mut self, pointer: Point) -> AppResult<()> {
        let Some(drag) = self.drag.as_ref() else {
            return Ok(());
        };
        let next = self.document.update_page(&drag.page_id, |page| {
            mutations::edit_block(page, &drag.block_id, |block| {
                mindmap::edit_block_tree(block, |root| drag.session.drag_to(root, pointer))
            })
        })?;
        self.document = next;
        self.schedule_save();
        Ok(())
    }

    /// Finishes the drag as one undoable step and returns the dragged node id.
    pub fn end_drag(&mut self) -> Option<String> {
        let drag = self.drag.take()?;
        if drag.before != self.document {
            self.history.record(drag.before);
        }
        Some(drag.session.end())
    }

    /// Asks the assistant for blocks and appends them to the page. Failures become
    /// notices and leave the page untouched.
    pub async fn run_assistant(
        &mut self,
        client: &dyn AssistantClient,
        page_id: &str,
        user_prompt: &str,
        mode: AssistantMode,
    ) -> Vec<String> {
        let Some(page) = self.document.page(page_id) else {
            self.push_notice(Notice::error(format!("Page {} no longer exists.", page_id)));
            return Vec::new();
        };
        let request = AssistantRequest::for_page(page, user_prompt, mode);

        let blocks = match assistant::run_assistant(client, &request, &self.redactor).await {
            Ok(blocks) => blocks,
            Err(error) => {
                tracing::warn!(page_id = %page_id, mode = ?mode, error = %error, "assistant request failed");
                self.push_notice(Notice::error("The assistant could not complete that request."));
                return Vec::new();
            }
        };

        let block_ids: Vec<String> = blocks.iter().map(|block| block.id.clone()).collect();
        if let Err(error) = self.apply_page(page_id, |page| Ok(mutations::append_blocks(page, blocks))) {
            tracing::warn!(page_id = %page_id, error = %error, "could not insert assistant blocks");
            self.push_notice(Notice::error("The assistant's answer could not be inserted."));
            return Vec::new();
        }
        block_ids
    }

    pub fn export_page_markdown(&self, page_id: &str) -> AppResult<String> {
        let page = self
            .document
            .page(page_id)
            .ok_or_else(|| AppError::NotFound(format!("page {}", page_id)))?;
        export::page_to_markdown(&self.document, page)
    }

    /// Snapshot of the stored document after pending edits are written.
    pub async fn export_snapshot(&self) -> AppResult<Vec<u8>> {
        self.saver.flush().await?;
        self.db.export_snapshot()
    }

    /// Replaces the document with a backup. The previous document stays on the undo stack.
    pub async fn import_snapshot(&mut self, bytes: &[u8]) -> AppResult<usize> {
        self.saver.flush().await?;
        let pages = self.db.import_snapshot(bytes)?;
        let count = pages.len();
        self.cancel_drag();
        let previous = std::mem::replace(&mut self.document, Document::from_loaded(pages));
        self.history.record(previous);
        self.repair_active_page();
        if count == 0 {
            self.schedule_save();
        }
        Ok(count)
    }

    pub async fn sync_to_cloud(&mut self, uploader: &dyn SnapshotUploader) -> AppResult<SyncReceipt> {
        let result = match self.export_snapshot().await {
            Ok(snapshot) => sync::sync_snapshot(uploader, &snapshot).await,
            Err(error) => Err(error),
        };
        match &result {
            Ok(receipt) => self.push_notice(Notice::info(format!("Synced {} to the cloud.", receipt.file_name))),
            Err(error) => {
                tracing::warn!(error = %error, "cloud sync failed");
                self.push_notice(Notice::error("Sync failed. Check your connection or storage permissions."));
            }
        }
        result
    }

    pub async fn flush(&self) -> AppResult<()> {
        self.saver.flush().await
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        let mut notices = Vec::new();
        while let Ok(notice) = self.notice_rx.try_recv() {
            notices.push(notice);
        }
        notices
    }

    fn push_notice(&self, notice: Notice) {
        let _ = self.notice_tx.send(notice);
    }

    fn commit(&mut self, next: Document) -> bool {
        if next == self.document {
            return false;
        }
        self.cancel_drag();
        let previous = std::mem::replace(&mut self.document, next);
        self.history.record(previous);
        self.repair_active_page();
        self.schedule_save();
        true
    }

    fn replace_document(&mut self, next: Document) {
        self.document = next;
        self.repair_active_page();
        self.schedule_save();
    }

    fn cancel_drag(&mut self) {
        if let Some(drag) = self.drag.take() {
            if drag.before != self.document {
                self.history.record(drag.before);
            }
        }
    }

    fn repair_active_page(&mut self) {
        let still_present = self
            .active_page_id
            .as_deref()
            .map(|id| self.document.page(id).is_some())
            .unwrap_or(false);
        if !still_present {
            self.active_page_id = self.document.pages.first().map(|page| page.id.clone());
        }
    }

    fn schedule_save(&self) {
        if let Err(error) = self.saver.schedule(self.document.pages.clone()) {
            tracing::error!(error = %error, "failed to queue document save");
            self.push_notice(Notice::error("Your changes could not be saved."));
        }
    }
}
