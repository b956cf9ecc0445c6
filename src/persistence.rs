use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{Notice, Page};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};

enum SaveCommand {
    Write(Vec<Page>),
    Flush(oneshot::Sender<AppResult<()>>),
    Debounce(Duration),
}

/// Fire-and-forget writer for whole-document snapshots. Writes arriving within the
/// debounce window collapse into the latest one.
#[derive(Clone)]
pub struct SaveQueue {
    sender: mpsc::UnboundedSender<SaveCommand>,
}

impl SaveQueue {
    /// Spawns the worker on the current tokio runtime.
    pub fn start(db: Arc<Database>, debounce: Duration, notices: mpsc::UnboundedSender<Notice>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_loop(db, debounce, receiver, notices));
        Self { sender }
    }

    pub fn schedule(&self, pages: Vec<Page>) -> AppResult<()> {
        self.sender
            .send(SaveCommand::Write(pages))
            .map_err(|_| AppError::Internal("save worker stopped".to_string()))
    }

    pub fn set_debounce(&self, debounce: Duration) -> AppResult<()> {
        self.sender
            .send(SaveCommand::Debounce(debounce))
            .map_err(|_| AppError::Internal("save worker stopped".to_string()))
    }

    /// Writes any pending snapshot now and reports how that write went.
    pub async fn flush(&self) -> AppResult<()> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(SaveCommand::Flush(reply))
            .map_err(|_| AppError::Internal("save worker stopped".to_string()))?;
        response
            .await
            .map_err(|_| AppError::Internal("save worker dropped flush".to_string()))?
    }
}

async fn run_loop(
    db: Arc<Database>,
    mut debounce: Duration,
    mut receiver: mpsc::UnboundedReceiver<SaveCommand>,
    notices: mpsc::UnboundedSender<Notice>,
) {
    let mut pending: Option<(Vec<Page>, Instant)> = None;
    loop {
        let command = match pending.as_ref() {
            Some((_, deadline)) => match tokio::time::timeout_at(*deadline, receiver.recv()).await {
                Ok(Some(command)) => command,
                Ok(None) => {
                    if let Some((pages, _)) = pending.take() {
                        let _ = write_snapshot(&db, pages, &notices).await;
                    }
                    break;
                }
                Err(_) => {
                    if let Some((pages, _)) = pending.take() {
                        let _ = write_snapshot(&db, pages, &notices).await;
                    }
                    continue;
                }
            },
            None => match receiver.recv().await {
                Some(command) => command,
                None => break,
            },
        };

        match command {
            SaveCommand::Write(pages) => {
                let deadline = pending
                    .take()
                    .map(|(_, deadline)| deadline)
                    .unwrap_or_else(|| Instant::now() + debounce);
                pending = Some((pages, deadline));
            }
            SaveCommand::Flush(reply) => {
                let result = match pending.take() {
                    Some((pages, _)) => write_snapshot(&db, pages, &notices).await,
                    None => Ok(()),
                };
                let _ = reply.send(result);
            }
            SaveCommand::Debounce(next) => {
                tracing::debug!(debounce_ms = next.as_millis() as u64, "save debounce updated");
                debounce = next;
            }
        }
    }
    tracing::debug!("save worker stopped");
}

async fn write_snapshot(db: &Arc<Database>, pages: Vec<Page>, notices: &mpsc::UnboundedSender<Notice>) -> AppResult<()> {
    let page_count = pages.len();
    let db = db.clone();
    let result = tokio::task::spawn_blocking(move || db.save_all(&pages))
        .await
        .map_err(|error| AppError::Internal(format!("save task failed: {}", error)))
        .and_then(|result| result);

    if let Err(error) = &result {
        tracing::error!(pages = page_count, error = %error, "failed to save document");
        let _ = notices.send(Notice::error(format!("Your changes could not be saved: {}", error)));
    }
    result
}
