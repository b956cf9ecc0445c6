use crate::errors::{AppError, AppResult};
use crate::models::{advance_timestamp, now_millis, Block, BlockType, LinkMetadata, LinkType, Page};
use crate::mutations::{self, touch};
use crate::templates;
use serde::{Deserialize, Serialize};

pub const SOURCE_DELETED_PREFIX: &str = "[Source Deleted] ";
pub const GETTING_STARTED_TITLE: &str = "Getting Started";

/// The whole workspace: pages in display order. Every operation returns a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub pages: Vec<Page>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteConfirmation {
    NonEmpty,
    Linked,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmations {
    pub content_confirmed: bool,
    pub links_confirmed: bool,
}

impl Confirmations {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            content_confirmed: true,
            links_confirmed: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundLink {
    pub page_id: String,
    pub block_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageAssessment {
    pub page_id: String,
    pub is_empty: bool,
    pub inbound_links: Vec<InboundLink>,
    pub outbound_links: usize,
}

impl PageAssessment {
    pub fn is_linked(&self) -> bool {
        !self.inbound_links.is_empty() || self.outbound_links > 0
    }

    /// Confirmations still owed before the page may go, in the order they are asked.
    pub fn required_confirmations(&self, given: Confirmations) -> Vec<DeleteConfirmation> {
        let mut pending = Vec::new();
        if !self.is_empty && !given.content_confirmed {
            pending.push(DeleteConfirmation::NonEmpty);
        }
        if self.is_linked() && !given.links_confirmed {
            pending.push(DeleteConfirmation::Linked);
        }
        pending
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeletePageOutcome {
    Deleted {
        document: Document,
        rewritten_blocks: usize,
    },
    NeedsConfirmation {
        assessment: PageAssessment,
        confirmation: DeleteConfirmation,
    },
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkResolution {
    NotLinked,
    Live { page_title: String, content: String },
    Snapshot { content: String },
    SourceDeleted { placeholder: String },
}

impl LinkResolution {
    pub fn display_text(&self) -> Option<&str> {
        match self {
            Self::NotLinked => None,
            Self::Live { content, .. } | Self::Snapshot { content } => Some(content),
            Self::SourceDeleted { placeholder } => Some(placeholder),
        }
    }
}

impl Document {
    pub fn new(pages: Vec<Page>) -> Self {
        Self { pages }
    }

    /// Loaded pages, or the first-run page when nothing was stored.
    pub fn from_loaded(pages: Vec<Page>) -> Self {
        if pages.is_empty() {
            Self::seeded()
        } else {
            Self {
                pages: pages.into_iter().map(Page::ensure_block).collect(),
            }
        }
    }

    pub fn seeded() -> Self {
        Self {
            pages: vec![getting_started_page()],
        }
    }

    pub fn page(&self, page_id: &str) -> Option<&Page> {
        self.pages.iter().find(|page| page.id == page_id)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// New blank page, placed first.
    pub fn add_page(&self, title: &str) -> (Document, String) {
        self.push_front(Page::new(title, None))
    }

    pub fn add_page_from_template(&self, key: &str) -> AppResult<(Document, String)> {
        let page = templates::instantiate_page(key).ok_or_else(|| AppError::NotFound(format!("template {}", key)))?;
        Ok(self.push_front(page))
    }

    pub fn replace_page(&self, page: Page) -> Document {
        let mut next = self.clone();
        if let Some(slot) = next.pages.iter_mut().find(|candidate| candidate.id == page.id) {
            *slot = page;
        }
        next
    }

    /// Applies a page-level mutation to one page.
    pub fn update_page<F>(&self, page_id: &str, mutate: F) -> AppResult<Document>
    where
        F: FnOnce(&Page) -> AppResult<Page>,
    {
        let page = self
            .page(page_id)
            .ok_or_else(|| AppError::NotFound(format!("page {}", page_id)))?;
        let updated = mutate(page)?;
        Ok(self.replace_page(updated))
    }

    pub fn assess_page(&self, page_id: &str) -> Option<PageAssessment> {
        let page = self.page(page_id)?;
        let inbound_links = self
            .pages
            .iter()
            .filter(|other| other.id != page_id)
            .flat_map(|other| {
                other
                    .blocks
                    .iter()
                    .filter(|block| sources_from(block, page_id))
                    .map(|block| InboundLink {
                        page_id: other.id.clone(),
                        block_id: block.id.clone(),
                    })
            })
            .collect();
        let outbound_links = page
            .blocks
            .iter()
            .filter(|block| {
                block
                    .link_metadata
                    .as_ref()
                    .map(|link| link.source_page_id != page_id)
                    .unwrap_or(false)
            })
            .count();

        Some(PageAssessment {
            page_id: page_id.to_string(),
            is_empty: page.is_empty(),
            inbound_links,
            outbound_links,
        })
    }

    /// Staged deletion. Empty unlinked pages go at once; content and links each need
    /// their own confirmation. Inbound links degrade to placeholders, and the document
    /// is re-seeded when its last page goes.
    pub fn delete_page(&self, page_id: &str, confirmations: Confirmations) -> DeletePageOutcome {
        let Some(assessment) = self.assess_page(page_id) else {
            return DeletePageOutcome::NotFound;
        };
        if let Some(confirmation) = assessment.required_confirmations(confirmations).into_iter().next() {
            return DeletePageOutcome::NeedsConfirmation {
                assessment,
                confirmation,
            };
        }

        let Some(deleted) = self.page(page_id) else {
            return DeletePageOutcome::NotFound;
        };
        let mut rewritten_blocks = 0usize;
        let mut pages: Vec<Page> = Vec::with_capacity(self.pages.len());
        for page in self.pages.iter().filter(|page| page.id != page_id) {
            if !page.blocks.iter().any(|block| sources_from(block, page_id)) {
                pages.push(page.clone());
                continue;
            }
            let mut next = page.clone();
            for block in next.blocks.iter_mut().filter(|block| sources_from(block, page_id)) {
                let replacement = source_deleted_text(deleted, block.link_metadata.as_ref());
                block.block_type = BlockType::Text;
                block.content = replacement;
                block.link_metadata = None;
                block.last_edited_at = Some(now_millis());
                rewritten_blocks += 1;
            }
            touch(&mut next);
            pages.push(next);
        }

        if pages.is_empty() {
            pages.push(Page::new("", None));
        }
        tracing::info!(page_id = %page_id, rewritten_blocks, "page deleted");
        DeletePageOutcome::Deleted {
            document: Document { pages },
            rewritten_blocks,
        }
    }

    /// Dereferences a block's link against the current document.
    pub fn resolve_link(&self, block: &Block) -> LinkResolution {
        let Some(link) = block.link_metadata.as_ref() else {
            return LinkResolution::NotLinked;
        };
        let Some((source_page, source_content)) = self.source_of(link) else {
            return LinkResolution::SourceDeleted {
                placeholder: format!("{}{}", SOURCE_DELETED_PREFIX, fallback_content(block)),
            };
        };

        match link.link_type {
            LinkType::Live => LinkResolution::Live {
                page_title: source_page.title.clone(),
                content: if source_content.is_empty() {
                    format!("Ref: {}", source_page.display_title())
                } else {
                    source_content
                },
            },
            LinkType::Snapshot => LinkResolution::Snapshot {
                content: block.content.clone(),
            },
        }
    }

    /// Copies the source's current content into a linked block. A missing source
    /// leaves the block as it is.
    pub fn refresh_link_block(&self, page_id: &str, block_id: &str) -> AppResult<Document> {
        let block = self.block_on(page_id, block_id)?;
        let link = block
            .link_metadata
            .as_ref()
            .ok_or_else(|| AppError::InvalidInput(format!("block {} has no link", block_id)))?;
        let Some((_, content)) = self.source_of(link) else {
            tracing::warn!(page_id = %page_id, block_id = %block_id, "link source missing; refresh skipped");
            return Ok(self.clone());
        };
        if content == block.content {
            return Ok(self.clone());
        }

        self.update_page(page_id, |page| {
            mutations::edit_block(page, block_id, |block| {
                let mut refreshed = block.clone();
                refreshed.content = content;
                if let Some(link) = refreshed.link_metadata.as_mut() {
                    link.updated_at = advance_timestamp(link.updated_at);
                }
                Ok(refreshed)
            })
        })
    }

    /// Switches a link between live and snapshot. Going to snapshot freezes what the
    /// live link currently shows.
    pub fn set_link_type(&self, page_id: &str, block_id: &str, link_type: LinkType) -> AppResult<Document> {
        let block = self.block_on(page_id, block_id)?;
        let link = block
            .link_metadata
            .as_ref()
            .ok_or_else(|| AppError::InvalidInput(format!("block {} has no link", block_id)))?;
        if link.link_type == link_type {
            return Ok(self.clone());
        }
        let frozen = match (link_type, self.resolve_link(block)) {
            (LinkType::Snapshot, LinkResolution::Live { content, .. }) => Some(content),
            _ => None,
        };

        self.update_page(page_id, |page| {
            mutations::edit_block(page, block_id, |block| {
                let mut switched = block.clone();
                if let Some(content) = frozen {
                    switched.content = content;
                }
                if let Some(link) = switched.link_metadata.as_mut() {
                    link.link_type = link_type;
                    link.updated_at = advance_timestamp(link.updated_at);
                }
                Ok(switched)
            })
        })
    }

    /// Builds an embed block referencing `source_page_id` (and optionally one block),
    /// seeded with a copy of the source content.
    pub fn create_link_block(
        &self,
        source_page_id: &str,
        source_block_id: Option<&str>,
        link_type: LinkType,
    ) -> AppResult<Block> {
        let source_page = self
            .page(source_page_id)
            .ok_or_else(|| AppError::NotFound(format!("page {}", source_page_id)))?;
        let content = match source_block_id {
            Some(block_id) => source_page
                .block(block_id)
                .map(|block| block.content.clone())
                .ok_or_else(|| AppError::NotFound(format!("block {} on page {}", block_id, source_page_id)))?,
            None => source_page.title.clone(),
        };

        let now = now_millis();
        let mut block = Block::new(BlockType::Embed, content);
        block.link_metadata = Some(LinkMetadata {
            source_page_id: source_page_id.to_string(),
            source_block_id: source_block_id.map(ToString::to_string),
            link_type,
            created_at: now,
            updated_at: now,
        });
        Ok(block)
    }

    /// Inserts a new embed block referencing the source after `after_id` on `page_id`.
    pub fn insert_link_block(
        &self,
        page_id: &str,
        after_id: Option<&str>,
        source_page_id: &str,
        source_block_id: Option<&str>,
        link_type: LinkType,
    ) -> AppResult<(Document, String)> {
        ensure_not_self_embed(page_id, source_page_id, source_block_id)?;
        let block = self.create_link_block(source_page_id, source_block_id, link_type)?;
        let block_id = block.id.clone();
        let document =
            self.update_page(page_id, |page| Ok(mutations::insert_blocks_after(page, after_id, vec![block])))?;
        Ok((document, block_id))
    }

    /// Turns an existing block into an embed of the source.
    pub fn link_block(
        &self,
        page_id: &str,
        block_id: &str,
        source_page_id: &str,
        source_block_id: Option<&str>,
        link_type: LinkType,
    ) -> AppResult<Document> {
        ensure_not_self_embed(page_id, source_page_id, source_block_id)?;
        if Some(block_id) == source_block_id {
            return Err(AppError::InvalidInput(format!("block {} cannot embed itself", block_id)));
        }
        let linked = self.create_link_block(source_page_id, source_block_id, link_type)?;
        self.update_page(page_id, |page| {
            mutations::edit_block(page, block_id, |block| {
                Ok(Block {
                    block_type: BlockType::Embed,
                    content: linked.content,
                    metadata: None,
                    link_metadata: linked.link_metadata,
                    ..block.clone()
                })
            })
        })
    }

    /// Freezes the currently resolved content into a plain text block.
    pub fn unlink_block(&self, page_id: &str, block_id: &str) -> AppResult<Document> {
        let block = self.block_on(page_id, block_id)?;
        let content = match self.resolve_link(block) {
            LinkResolution::NotLinked => return Ok(self.clone()),
            resolved => resolved.display_text().unwrap_or_default().to_string(),
        };

        let patch = mutations::BlockPatch {
            content: Some(content),
            block_type: Some(BlockType::Text),
            link_metadata: Some(None),
            ..mutations::BlockPatch::default()
        };
        self.update_page(page_id, |page| Ok(mutations::update_block_field(page, block_id, &patch)))
    }

    fn block_on(&self, page_id: &str, block_id: &str) -> AppResult<&Block> {
        self.page(page_id)
            .ok_or_else(|| AppError::NotFound(format!("page {}", page_id)))?
            .block(block_id)
            .ok_or_else(|| AppError::NotFound(format!("block {} on page {}", block_id, page_id)))
    }

    /// Source page and its current content (block content, or the page title for
    /// whole-page links). `None` once either is gone.
    fn source_of(&self, link: &LinkMetadata) -> Option<(&Page, String)> {
        let source_page = self.page(&link.source_page_id)?;
        let content = match &link.source_block_id {
            Some(block_id) => source_page.block(block_id)?.content.clone(),
            None => source_page.title.clone(),
        };
        Some((source_page, content))
    }

    fn push_front(&self, page: Page) -> (Document, String) {
        let page_id = page.id.clone();
        let mut pages = Vec::with_capacity(self.pages.len() + 1);
        pages.push(page);
        pages.extend(self.pages.iter().cloned());
        (Document { pages }, page_id)
    }
}

fn ensure_not_self_embed(page_id: &str, source_page_id: &str, source_block_id: Option<&str>) -> AppResult<()> {
    if page_id == source_page_id && source_block_id.is_none() {
        return Err(AppError::InvalidInput("a page cannot embed itself".to_string()));
    }
    Ok(())
}

fn sources_from(block: &Block, page_id: &str) -> bool {
    block
        .link_metadata
        .as_ref()
        .map(|link| link.source_page_id == page_id)
        .unwrap_or(false)
}

fn source_deleted_text(deleted: &Page, link: Option<&LinkMetadata>) -> String {
    let original = link
        .and_then(|link| link.source_block_id.as_deref())
        .and_then(|block_id| deleted.block(block_id))
        .map(|block| block.content.clone());
    match original {
        Some(content) => format!("{}{}", SOURCE_DELETED_PREFIX, content),
        None => format!("{}Ref: {}", SOURCE_DELETED_PREFIX, deleted.display_title()),
    }
}

fn fallback_content(block: &Block) -> String {
    if block.content.is_empty() {
        "Ref: missing page".to_string()
    } else {
        block.content.clone()
    }
}

fn getting_started_page() -> Page {
    Page::new(
        GETTING_STARTED_TITLE,
        Some(vec![
            Block::new(BlockType::Heading, "Welcome to GID"),
            Block::new(
                BlockType::Text,
                "This is your local-first context engine. Use / for commands or the assistant for help.",
            ),
        ]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_with(title: &str, contents: &[&str]) -> Page {
        let blocks = contents.iter().map(|content| Block::new(BlockType::Text, *content)).collect();
        Page::new(title, Some(blocks))
    }

    fn linked_pair(link_type: LinkType) -> (Document, String, String, String) {
        let a = page_with("Alpha", &["alpha body"]);
        let b = page_with("Beta", &["beta body"]);
        let a_id = a.id.clone();
        let source_block_id = a.blocks[0].id.clone();
        let b_id = b.id.clone();
        let document = Document::new(vec![a, b]);
        let (document, link_id) = document
            .insert_link_block(&b_id, None, &a_id, Some(&source_block_id), link_type)
            .expect("link");
        (document, a_id, b_id, link_id)
    }

    #[test]
    fn empty_unlinked_page_is_deleted_without_confirmation() {
        let document = Document::new(vec![Page::new("Blank", None), page_with("Kept", &["x"])]);
        let blank_id = document.pages[0].id.clone();
        match document.delete_page(&blank_id, Confirmations::none()) {
            DeletePageOutcome::Deleted { document, .. } => {
                assert_eq!(document.page_count(), 1);
                assert_eq!(document.pages[0].title, "Kept");
            }
            other => panic!("expected deletion, got {:?}", other),
        }
    }

    #[test]
    fn non_empty_page_requires_confirmation() {
        let document = Document::new(vec![page_with("Full", &["content"])]);
        let id = document.pages[0].id.clone();
        match document.delete_page(&id, Confirmations::none()) {
            DeletePageOutcome::NeedsConfirmation { confirmation, .. } => {
                assert_eq!(confirmation, DeleteConfirmation::NonEmpty)
            }
            other => panic!("expected confirmation gate, got {:?}", other),
        }
    }

    #[test]
    fn linked_page_requires_second_confirmation() {
        let (document, a_id, _, _) = linked_pair(LinkType::Live);
        let content_only = Confirmations {
            content_confirmed: true,
            links_confirmed: false,
        };
        match document.delete_page(&a_id, content_only) {
            DeletePageOutcome::NeedsConfirmation {
                confirmation,
                assessment,
            } => {
                assert_eq!(confirmation, DeleteConfirmation::Linked);
                assert_eq!(assessment.inbound_links.len(), 1);
            }
            other => panic!("expected link gate, got {:?}", other),
        }
    }

    #[test]
    fn confirmed_deletion_cascades_links_into_placeholders() {
        let (document, a_id, b_id, link_id) = linked_pair(LinkType::Live);
        let DeletePageOutcome::Deleted {
            document,
            rewritten_blocks,
        } = document.delete_page(&a_id, Confirmations::all())
        else {
            panic!("expected deletion");
        };

        assert_eq!(rewritten_blocks, 1);
        let b = document.page(&b_id).expect("page b");
        let block = b.block(&link_id).expect("link block");
        assert_eq!(block.block_type, BlockType::Text);
        assert_eq!(block.content, "[Source Deleted] alpha body");
        assert!(block.link_metadata.is_none());
    }

    #[test]
    fn whole_page_link_falls_back_to_deleted_title() {
        let a = page_with("Alpha", &["alpha body"]);
        let b = page_with("Beta", &["beta body"]);
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        let (document, link_id) = Document::new(vec![a, b])
            .insert_link_block(&b_id, None, &a_id, None, LinkType::Snapshot)
            .expect("link");
        let DeletePageOutcome::Deleted { document, .. } = document.delete_page(&a_id, Confirmations::all()) else {
            panic!("expected deletion");
        };
        let block = document.page(&b_id).and_then(|page| page.block(&link_id)).expect("block");
        assert_eq!(block.content, "[Source Deleted] Ref: Alpha");
    }

    #[test]
    fn outbound_link_marks_page_as_linked() {
        let (document, _, b_id, _) = linked_pair(LinkType::Snapshot);
        let assessment = document.assess_page(&b_id).expect("assessment");
        assert!(assessment.is_linked());
        assert_eq!(assessment.outbound_links, 1);
    }

    #[test]
    fn deleting_last_page_reseeds_document() {
        let document = Document::new(vec![Page::new("Only", None)]);
        let id = document.pages[0].id.clone();
        let DeletePageOutcome::Deleted { document, .. } = document.delete_page(&id, Confirmations::none()) else {
            panic!("expected deletion");
        };
        assert_eq!(document.page_count(), 1);
        assert_ne!(document.pages[0].id, id);
        assert_eq!(document.pages[0].blocks.len(), 1);
    }

    #[test]
    fn live_link_mirrors_current_source_and_snapshot_keeps_copy() {
        let (document, a_id, b_id, link_id) = linked_pair(LinkType::Live);
        let source_block_id = document.page(&a_id).expect("a").blocks[0].id.clone();
        let document = document
            .update_page(&a_id, |page| {
                Ok(mutations::update_block_field(
                    page,
                    &source_block_id,
                    &mutations::BlockPatch::content("edited"),
                ))
            })
            .expect("edit source");
        let link = document.page(&b_id).and_then(|page| page.block(&link_id)).expect("link");
        assert_eq!(document.resolve_link(link).display_text(), Some("edited"));

        let mut snapshot = link.clone();
        if let Some(meta) = snapshot.link_metadata.as_mut() {
            meta.link_type = LinkType::Snapshot;
        }
        assert_eq!(document.resolve_link(&snapshot).display_text(), Some("alpha body"));
    }

    #[test]
    fn dangling_link_resolves_to_placeholder() {
        let (document, a_id, b_id, link_id) = linked_pair(LinkType::Live);
        let mut pages = document.pages.clone();
        pages.retain(|page| page.id != a_id);
        let orphaned = Document::new(pages);
        let link = orphaned.page(&b_id).and_then(|page| page.block(&link_id)).expect("link");
        match orphaned.resolve_link(link) {
            LinkResolution::SourceDeleted { placeholder } => assert!(placeholder.starts_with(SOURCE_DELETED_PREFIX)),
            other => panic!("expected placeholder, got {:?}", other),
        }
    }

    #[test]
    fn unlink_freezes_resolved_content() {
        let (document, _, b_id, link_id) = linked_pair(LinkType::Live);
        let document = document.unlink_block(&b_id, &link_id).expect("unlink");
        let block = document.page(&b_id).and_then(|page| page.block(&link_id)).expect("block");
        assert_eq!(block.block_type, BlockType::Text);
        assert_eq!(block.content, "alpha body");
        assert!(block.link_metadata.is_none());
    }

    #[test]
    fn link_block_converts_existing_block_to_embed() {
        let a = page_with("Alpha", &["alpha body"]);
        let b = page_with("Beta", &["old text"]);
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        let target = b.blocks[0].id.clone();
        let document = Document::new(vec![a, b])
            .link_block(&b_id, &target, &a_id, None, LinkType::Live)
            .expect("link");
        let block = document.page(&b_id).and_then(|page| page.block(&target)).expect("block");
        assert_eq!(block.block_type, BlockType::Embed);
        assert_eq!(block.content, "Alpha");
        assert_eq!(
            block.link_metadata.as_ref().map(|link| link.source_page_id.as_str()),
            Some(a_id.as_str())
        );
        assert!(document.assess_page(&a_id).expect("assessment").is_linked());
    }

    #[test]
    fn page_cannot_embed_itself() {
        let document = Document::new(vec![page_with("Alpha", &["x"])]);
        let id = document.pages[0].id.clone();
        assert!(document.insert_link_block(&id, None, &id, None, LinkType::Live).is_err());
    }

    #[test]
    fn template_pages_are_added_first() {
        let document = Document::seeded();
        let (document, page_id) = document.add_page_from_template("tpl:meeting").expect("template");
        assert_eq!(document.pages[0].id, page_id);
        assert_eq!(document.pages[0].title, "Meeting Notes");
        assert_eq!(document.page_count(), 2);
    }

    fn edit_source(document: &Document, a_id: &str, content: &str) -> Document {
        let source_block_id = document.page(a_id).expect("source page").blocks[0].id.clone();
        document
            .update_page(a_id, |page| {
                Ok(mutations::update_block_field(page, &source_block_id, &mutations::BlockPatch::content(content)))
            })
            .expect("edit source")
    }

    #[test]
    fn refresh_copies_current_source_content() {
        let (document, a_id, b_id, link_id) = linked_pair(LinkType::Snapshot);
        let before = document
            .page(&b_id)
            .and_then(|page| page.block(&link_id))
            .and_then(|block| block.link_metadata.clone())
            .expect("link");
        let document = edit_source(&document, &a_id, "revised body");

        let refreshed = document.refresh_link_block(&b_id, &link_id).expect("refresh");
        let block = refreshed.page(&b_id).and_then(|page| page.block(&link_id)).expect("block");
        assert_eq!(block.content, "revised body");
        let link = block.link_metadata.as_ref().expect("link kept");
        assert_eq!(link.link_type, LinkType::Snapshot);
        assert!(link.updated_at > before.updated_at);
    }

    #[test]
    fn refresh_with_missing_source_leaves_block_alone() {
        let (document, a_id, b_id, link_id) = linked_pair(LinkType::Snapshot);
        let source_block_id = document.page(&a_id).expect("a").blocks[0].id.clone();
        let orphaned = document
            .update_page(&a_id, |page| Ok(mutations::delete_block(page, &source_block_id)))
            .expect("delete source block");

        let refreshed = orphaned.refresh_link_block(&b_id, &link_id).expect("refresh");
        assert_eq!(refreshed, orphaned);

        let plain_id = orphaned.page(&a_id).expect("a").blocks[0].id.clone();
        assert!(orphaned.refresh_link_block(&a_id, &plain_id).is_err());
    }

    #[test]
    fn switching_to_snapshot_freezes_live_content() {
        let (document, a_id, b_id, link_id) = linked_pair(LinkType::Live);
        let document = edit_source(&document, &a_id, "latest");

        let document = document.set_link_type(&b_id, &link_id, LinkType::Snapshot).expect("switch");
        let block = document.page(&b_id).and_then(|page| page.block(&link_id)).expect("block");
        assert_eq!(block.block_type, BlockType::Embed);
        assert_eq!(block.content, "latest");
        assert_eq!(block.link_metadata.as_ref().map(|link| link.link_type), Some(LinkType::Snapshot));

        let document = edit_source(&document, &a_id, "even later");
        let block = document.page(&b_id).and_then(|page| page.block(&link_id)).expect("block");
        assert_eq!(document.resolve_link(block).display_text(), Some("latest"));

        let live = document.set_link_type(&b_id, &link_id, LinkType::Live).expect("switch back");
        let block = live.page(&b_id).and_then(|page| page.block(&link_id)).expect("block");
        assert_eq!(live.resolve_link(block).display_text(), Some("even later"));
        assert_eq!(live.set_link_type(&b_id, &link_id, LinkType::Live).expect("same type"), live);
    }

    #[test]
    fn live_link_to_empty_block_shows_page_reference() {
        let (document, a_id, b_id, link_id) = linked_pair(LinkType::Live);
        let document = edit_source(&document, &a_id, "");
        let block = document.page(&b_id).and_then(|page| page.block(&link_id)).expect("block");
        assert_eq!(document.resolve_link(block).display_text(), Some("Ref: Alpha"));
    }

    #[test]
    fn loaded_pages_without_blocks_regain_one() {
        let mut bare = Page::new("Bare", None);
        bare.blocks.clear();
        let document = Document::from_loaded(vec![bare]);
        assert_eq!(document.pages[0].blocks.len(), 1);
        assert!(document.pages[0].blocks[0].is_empty_text());
    }
}
