use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::storage_traits::*;

const STATE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StateDocument {
    version: u32,
    records: Vec<DefinitionRecord>,
}

/// Definition store persisted as a single JSON document.
///
/// The whole map is held in memory and rewritten on every mutation. Writes
/// go to a temp file in the same directory which is then renamed over the
/// target, so a crash never leaves a torn document behind.
pub struct FileDefinitionStore {
    path: PathBuf,
    records: Mutex<BTreeMap<String, DefinitionRecord>>,
}

impl FileDefinitionStore {
    /// Open the store at `path`, loading existing records if the file exists.
    /// Parent directories are created as needed.
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => Self::decode(&path, &bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StorageError::Io(e)),
        };
        tracing::debug!(path = %path.display(), records = records.len(), "definition store opened");

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Location of the backing JSON document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn decode(path: &Path, bytes: &[u8]) -> StorageResult<BTreeMap<String, DefinitionRecord>> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(BTreeMap::new());
        }
        let doc: StateDocument = serde_json::from_slice(bytes)?;
        if doc.version != STATE_VERSION {
            return Err(StorageError::Corrupt {
                path: path.display().to_string(),
                reason: format!("unsupported version {}", doc.version),
            });
        }
        Ok(doc
            .records
            .into_iter()
            .map(|r| (r.key.clone(), r))
            .collect())
    }

    async fn persist(&self, records: &BTreeMap<String, DefinitionRecord>) -> StorageResult<()> {
        let doc = StateDocument {
            version: STATE_VERSION,
            records: records.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&doc)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl DefinitionStore for FileDefinitionStore {
    async fn get(&self, key: &str) -> StorageResult<Option<DefinitionRecord>> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn put(&self, record: DefinitionRecord) -> StorageResult<()> {
        let mut records = self.records.lock().await;
        let record = match records.get(&record.key) {
            Some(existing) => record.preserving_creation(existing),
            None => record,
        };
        // Stage on a copy: memory only changes once the document is on disk.
        let mut staged = records.clone();
        staged.insert(record.key.clone(), record);
        self.persist(&staged).await?;
        *records = staged;
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let mut records = self.records.lock().await;
        if !records.contains_key(key) {
            return Ok(());
        }
        let mut staged = records.clone();
        staged.remove(key);
        self.persist(&staged).await?;
        *records = staged;
        Ok(())
    }

    async fn list(&self) -> StorageResult<Vec<DefinitionRecord>> {
        Ok(self.records.lock().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(key: &str) -> DefinitionRecord {
        let now = Utc::now();
        DefinitionRecord {
            key: key.to_string(),
            id: key.to_string(),
            kind: "job".to_string(),
            location: "/demo/a.job".to_string(),
            name: "a".to_string(),
            checksum: ContentDigest::from_bytes(key.as_bytes()),
            dependencies: Vec::new(),
            lifecycle: Lifecycle::Created,
            message: None,
            created_by: "system".to_string(),
            created_at: now,
            updated_by: "system".to_string(),
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn empty_file_opens_as_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"  \n").unwrap();
        let store = FileDefinitionStore::open(&path).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsupported_version_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, br#"{"version":9,"records":[]}"#).unwrap();
        let err = FileDefinitionStore::open(&path).await.err().unwrap();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn put_writes_document_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let store = FileDefinitionStore::open(&path).await.unwrap();
        store.put(record("job:a")).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"job:a\""));
        assert!(raw.contains("\"version\": 1"));
    }

    /// Replace the document with a non-empty directory so the rename fails.
    fn block_target(path: &Path) {
        let _ = std::fs::remove_file(path);
        std::fs::create_dir_all(path.join("occupied")).unwrap();
    }

    #[tokio::test]
    async fn failed_persist_leaves_memory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileDefinitionStore::open(&path).await.unwrap();
        store.put(record("job:kept")).await.unwrap();

        block_target(&path);
        assert!(store.put(record("job:new")).await.is_err());
        assert_eq!(store.get("job:new").await.unwrap(), None);

        assert!(store.remove("job:kept").await.is_err());
        assert!(store.get("job:kept").await.unwrap().is_some());
    }
}
