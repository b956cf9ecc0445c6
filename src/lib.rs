pub mod assistant;
pub mod db;
pub mod document;
pub mod editor;
pub mod errors;
pub mod export;
pub mod history;
pub mod mindmap;
pub mod models;
pub mod mutations;
pub mod payload;
pub mod persistence;
pub mod redaction;
pub mod sync;
pub mod table;
pub mod templates;

pub use crate::document::{Confirmations, DeleteConfirmation, DeletePageOutcome, Document};
pub use crate::editor::EditorCore;
pub use crate::errors::{AppError, AppResult};
pub use crate::models::{Block, BlockType, LinkType, Notice, NoticeLevel, Page};

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Sets up logging under `app_data_dir` and opens the workspace stored there. Call once
/// per process; the global subscriber cannot be installed twice.
pub fn start(app_data_dir: &Path) -> AppResult<EditorCore> {
    init_tracing(app_data_dir)?;
    EditorCore::open(app_data_dir)
}

/// Daily-rolling JSON logs in `<app_data_dir>/logs`. `RUST_LOG` overrides the default
/// `info` filter.
pub fn init_tracing(app_data_dir: &Path) -> AppResult<()> {
    let log_dir = app_data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "notes.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}
