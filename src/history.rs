use crate::document::Document;
use std::collections::VecDeque;

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Whole-document snapshot stacks for undo and redo.
#[derive(Debug, Clone)]
pub struct History {
    past: VecDeque<Document>,
    future: Vec<Document>,
    limit: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            past: VecDeque::new(),
            future: Vec::new(),
            limit: limit.max(1),
        }
    }

    /// Remembers the state before a mutation. Drops the oldest entry past the limit
    /// and invalidates redo.
    pub fn record(&mut self, before: Document) {
        self.future.clear();
        self.past.push_back(before);
        while self.past.len() > self.limit {
            self.past.pop_front();
        }
    }

    pub fn undo(&mut self, current: Document) -> Option<Document> {
        let previous = self.past.pop_back()?;
        self.future.push(current);
        Some(previous)
    }

    pub fn redo(&mut self, current: Document) -> Option<Document> {
        let next = self.future.pop()?;
        self.past.push_back(current);
        while self.past.len() > self.limit {
            self.past.pop_front();
        }
        Some(next)
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.past.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit.max(1);
        while self.past.len() > self.limit {
            self.past.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }
}
