//! Content stores the reconciler discovers artifacts from.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{Result, SyncError};
use crate::model::ArtifactKind;

/// Raw bytes found at one content store location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// `/`-separated path, always starting with `/`.
    pub location: String,
    pub kind: ArtifactKind,
    pub content: Vec<u8>,
}

impl Resource {
    /// Build a resource, deriving its kind from the location's extension.
    pub fn new(location: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let location = location.into();
        Self {
            kind: ArtifactKind::from_location(&location),
            location,
            content: content.into(),
        }
    }
}

/// Lists the current content of a versioned store.
///
/// Implement this trait to plug in a repository, a registry service, or a
/// test stub. The watch/poll mechanism that decides when to list is not part
/// of the contract.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Every resource currently present, ordered by location.
    async fn list(&self) -> Result<Vec<Resource>>;
}

/// Filesystem registry: every regular file under `root` is a resource.
///
/// Entries whose name starts with `.` are skipped, as are their subtrees.
#[derive(Debug, Clone)]
pub struct FsContentSource {
    root: PathBuf,
}

impl FsContentSource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn walk(root: &Path) -> std::io::Result<Vec<Resource>> {
        let mut out = Vec::new();
        let mut pending = vec![(root.to_path_buf(), String::new())];

        while let Some((dir, prefix)) = pending.pop() {
            let mut entries: Vec<_> = std::fs::read_dir(&dir)?.collect::<std::io::Result<_>>()?;
            entries.sort_by_key(|e| e.file_name());
            for entry in entries {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') {
                    continue;
                }
                let location = format!("{prefix}/{name}");
                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    pending.push((entry.path(), location));
                } else if file_type.is_file() {
                    let content = std::fs::read(entry.path())?;
                    out.push(Resource::new(location, content));
                }
            }
        }

        out.sort_by(|a, b| a.location.cmp(&b.location));
        Ok(out)
    }
}

#[async_trait]
impl ContentSource for FsContentSource {
    async fn list(&self) -> Result<Vec<Resource>> {
        let root = self.root.clone();
        if !tokio::fs::try_exists(&root).await? {
            return Err(SyncError::Source(format!(
                "registry root {} does not exist",
                root.display()
            )));
        }
        tokio::task::spawn_blocking(move || Self::walk(&root))
            .await
            .map_err(|e| SyncError::Source(format!("registry walk task failed: {e}")))?
            .map_err(|e| SyncError::Source(format!("registry walk failed: {e}")))
    }
}

/// In-memory content store, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryContentSource {
    resources: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn resources(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.resources.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add or replace the content at `location`.
    pub fn insert(&self, location: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.resources().insert(location.into(), content.into());
    }

    pub fn remove(&self, location: &str) -> Option<Vec<u8>> {
        self.resources().remove(location)
    }
}

#[async_trait]
impl ContentSource for MemoryContentSource {
    async fn list(&self) -> Result<Vec<Resource>> {
        Ok(self
            .resources()
            .iter()
            .map(|(location, content)| Resource::new(location.clone(), content.clone()))
            .collect())
    }
}
