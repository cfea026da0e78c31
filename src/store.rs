//! Persistence for the merged result.
//!
//! [`RecordStore`] is the async trait the service persists through.
//! [`JsonFileStore`] implements it as a single pretty-printed JSON document.

use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::pipeline::types::{Record, RecordSet};

#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Replaces the stored result with `records`. Readers see either the old
    /// document or the new one, never a partial write.
    async fn persist(&self, records: &[Record]) -> Result<()>;

    /// Returns the last persisted result, or [`StoreError::NotFound`] if
    /// nothing has been persisted yet.
    async fn load(&self) -> Result<RecordSet>;

    /// Human-readable identity of the storage location.
    fn location(&self) -> &Path;
}

/// Stores the result as a JSON array at a fixed path.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Sibling temp file in the same directory, so the final rename stays on
    /// one filesystem.
    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "records.json".to_string());
        self.path.with_file_name(format!(".{name}.tmp"))
    }
}

/// Encodes records as the persisted document: pretty-printed JSON with a
/// trailing newline.
pub fn encode_document(records: &[Record]) -> Result<Vec<u8>> {
    let mut body = serde_json::to_vec_pretty(records)?;
    body.push(b'\n');
    Ok(body)
}

#[async_trait::async_trait]
impl RecordStore for JsonFileStore {
    #[tracing::instrument(skip_all, fields(path = %self.path.display(), records = records.len()))]
    async fn persist(&self, records: &[Record]) -> Result<()> {
        let body = encode_document(records)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }

        let tmp = self.temp_path();
        if let Err(e) = write_synced(&tmp, &body).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::io(&tmp, e));
        }

        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            warn!(error = %e, "Failed to move temp file into place");
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::io(&self.path, e));
        }

        debug!(bytes = body.len(), "Result persisted");
        Ok(())
    }

    async fn load(&self) -> Result<RecordSet> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(self.path.clone()));
            }
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        serde_json::from_slice(&bytes).map_err(|e| StoreError::Parse {
            file: self.path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn location(&self) -> &Path {
        &self.path
    }
}

async fn write_synced(path: &Path, body: &[u8]) -> io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(body).await?;
    file.sync_all().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::pipeline::types::Value;
    use std::fs;

    fn sample() -> RecordSet {
        vec![
            [
                ("date", Value::Text("2020-01-01".into())),
                ("station", Value::Text("A".into())),
                ("value", Value::Number(15.0)),
            ]
            .into_iter()
            .collect(),
            [
                ("date", Value::Text("2020-01-02".into())),
                ("station", Value::Null),
                ("value", Value::Number(2.5)),
            ]
            .into_iter()
            .collect(),
        ]
    }

    #[tokio::test]
    async fn test_load_before_persist_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("processed_data.json"));

        let err = store.load().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_persist_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("database/processed_data.json"));

        store.persist(&sample()).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded, sample());
    }

    #[tokio::test]
    async fn test_persisted_document_is_pretty_printed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let store = JsonFileStore::new(&path);

        store.persist(&sample()).await.unwrap();
        let content = fs::read_to_string(&path).unwrap();

        assert!(content.starts_with("[\n  {\n    \"date\": \"2020-01-01\""));
        assert!(content.contains("\"value\": 15\n"));
        assert!(content.contains("\"station\": null,"));
        assert!(content.ends_with("]\n"));
    }

    #[tokio::test]
    async fn test_persist_replaces_previous_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let store = JsonFileStore::new(&path);

        store.persist(&sample()).await.unwrap();
        store.persist(&sample()[..1]).await.unwrap();

        assert_eq!(store.load().await.unwrap().len(), 1);
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec!["out.json"]);
    }

    #[tokio::test]
    async fn test_corrupt_document_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        fs::write(&path, "[{\"date\": ").unwrap();

        let err = JsonFileStore::new(&path).load().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }
}
