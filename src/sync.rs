use crate::errors::{AppError, AppResult};
use crate::models::now_millis;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

const BACKUP_FILE_PREFIX: &str = "notes-backup";

/// Upload payload wrapping an exported snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEnvelope {
    pub file_name: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub exported_at: DateTime<Utc>,
    pub content_base64: String,
}

impl SyncEnvelope {
    pub fn from_snapshot(snapshot: &[u8]) -> Self {
        let exported_at = now_millis();
        Self {
            file_name: format!("{}-{}.json", BACKUP_FILE_PREFIX, exported_at.format("%Y%m%dT%H%M%SZ")),
            exported_at,
            content_base64: base64::engine::general_purpose::STANDARD.encode(snapshot),
        }
    }

    pub fn decode(&self) -> AppResult<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(self.content_base64.as_bytes())
            .map_err(|error| AppError::Sync(format!("invalid envelope payload: {}", error)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReceipt {
    pub remote_id: String,
    pub file_name: String,
    pub bytes: usize,
}

pub type UploadFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;

/// Cloud transport seam. Returns the remote identifier of the stored file.
pub trait SnapshotUploader: Send + Sync {
    fn upload<'a>(&'a self, envelope: &'a SyncEnvelope) -> UploadFuture<'a>;
}

pub async fn sync_snapshot(uploader: &dyn SnapshotUploader, snapshot: &[u8]) -> AppResult<SyncReceipt> {
    if snapshot.is_empty() {
        return Err(AppError::Sync("refusing to upload an empty snapshot".to_string()));
    }
    let envelope = SyncEnvelope::from_snapshot(snapshot);
    let remote_id = uploader
        .upload(&envelope)
        .await
        .map_err(|error| AppError::Sync(format!("{:#}", error)))?;

    tracing::info!(file_name = %envelope.file_name, bytes = snapshot.len(), remote_id = %remote_id, "snapshot synced");
    Ok(SyncReceipt {
        remote_id,
        file_name: envelope.file_name,
        bytes: snapshot.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingUploader {
        received: Mutex<Vec<SyncEnvelope>>,
        fail: bool,
    }

    impl SnapshotUploader for RecordingUploader {
        fn upload<'a>(&'a self, envelope: &'a SyncEnvelope) -> UploadFuture<'a> {
            Box::pin(async move {
                if self.fail {
                    anyhow::bail!("drive permissions revoked");
                }
                let mut received = self.received.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
                received.push(envelope.clone());
                Ok(format!("remote-{}", received.len()))
            })
        }
    }

    #[tokio::test]
    async fn uploads_base64_envelope() {
        let uploader = RecordingUploader::default();
        let receipt = sync_snapshot(&uploader, b"{\"pages\":[]}").await.expect("sync");

        assert_eq!(receipt.remote_id, "remote-1");
        assert_eq!(receipt.bytes, 12);
        let received = uploader.received.lock().expect("lock");
        assert_eq!(received[0].decode().expect("decode"), b"{\"pages\":[]}".to_vec());
        assert!(received[0].file_name.starts_with("notes-backup-"));
        assert!(received[0].file_name.ends_with(".json"));
    }

    #[tokio::test]
    async fn upload_failure_maps_to_sync_error() {
        let uploader = RecordingUploader {
            fail: true,
            ..RecordingUploader::default()
        };
        let error = sync_snapshot(&uploader, b"data").await.expect_err("failure");
        assert!(matches!(error, AppError::Sync(ref message) if message.contains("permissions")));
        assert!(sync_snapshot(&uploader, b"").await.is_err());
    }

    #[test]
    fn corrupt_envelope_is_rejected() {
        let mut envelope = SyncEnvelope::from_snapshot(b"abc");
        envelope.content_base64 = "***".to_string();
        assert!(envelope.decode().is_err());
    }
}
