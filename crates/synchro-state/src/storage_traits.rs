//! Storage trait definitions for Synchro
//!
//! The reconciler persists exactly one thing between passes: the last applied
//! state of every definition it has seen, keyed by `"{kind}:{id}"`. That
//! record carries the checksum used to choose the create/update/drop verb,
//! the lifecycle the applier left the definition in, and audit fields.
//!
//! All traits are async and backend-agnostic. An in-memory fake is provided
//! in the `fakes` module, a JSON file backend in `file_store`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string) of raw definition bytes.
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(digest: ContentDigest) -> Self {
        digest.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// DefinitionRecord
// ---------------------------------------------------------------------------

/// Where a definition stands after the most recent attempt to apply it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Applied with a create verb.
    Created,
    /// Applied with an update verb.
    Updated,
    /// Applier accepted the definition but completion is asynchronous.
    Pending,
    /// Last apply attempt failed; `message` carries the reason.
    Failed,
    /// Drop started asynchronously; the record is removed once the applier
    /// reports completion.
    Deleted,
}

impl Lifecycle {
    /// True for lifecycles that represent a definition in effect.
    pub fn is_settled(self) -> bool {
        matches!(self, Lifecycle::Created | Lifecycle::Updated)
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Lifecycle::Created => "created",
            Lifecycle::Updated => "updated",
            Lifecycle::Pending => "pending",
            Lifecycle::Failed => "failed",
            Lifecycle::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Persisted state of one definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionRecord {
    /// Globally unique key, `"{kind}:{id}"`.
    pub key: String,
    /// Identifier unique within `kind`.
    pub id: String,
    pub kind: String,
    /// Content store path the definition was loaded from.
    pub location: String,
    pub name: String,
    /// Checksum of the bytes that were last applied successfully.
    pub checksum: ContentDigest,
    /// Declared dependency references, kept so drops can be ordered.
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub lifecycle: Lifecycle,
    /// Last error reported for this definition, if any.
    #[serde(default)]
    pub message: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

impl DefinitionRecord {
    /// Carry the creation audit fields of `existing` over to `self`.
    ///
    /// Creation fields are immutable once set; every store calls this on
    /// upsert so callers can build records without reading first.
    pub fn preserving_creation(mut self, existing: &DefinitionRecord) -> Self {
        self.created_by = existing.created_by.clone();
        self.created_at = existing.created_at;
        self
    }
}

// ---------------------------------------------------------------------------
// DefinitionStore
// ---------------------------------------------------------------------------

/// Durable map from definition key to [`DefinitionRecord`].
///
/// Guarantees:
/// - `put` is an upsert that never changes `created_by` / `created_at` of an
///   existing record.
/// - `list` returns records ordered by key.
/// - `remove` of an absent key is a no-op.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Fetch the record stored under `key`.
    async fn get(&self, key: &str) -> StorageResult<Option<DefinitionRecord>>;

    /// Insert or replace the record under `record.key`.
    async fn put(&self, record: DefinitionRecord) -> StorageResult<()>;

    /// Delete the record under `key`.
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// All stored records, ordered by key.
    async fn list(&self) -> StorageResult<Vec<DefinitionRecord>>;

    /// Records of a single kind, ordered by key.
    async fn list_kind(&self, kind: &str) -> StorageResult<Vec<DefinitionRecord>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|r| r.kind == kind)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        let a = ContentDigest::from_bytes(b"{\"name\":\"nightly\"}");
        let b = ContentDigest::from_bytes(b"{\"name\":\"nightly\"}");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn digest_rejects_non_hex() {
        let err = ContentDigest::try_from("xyz".to_string()).unwrap_err();
        assert!(matches!(err, StorageError::InvalidDigest { .. }));
    }

    #[test]
    fn digest_serde_validates() {
        let digest = ContentDigest::from_bytes(b"abc");
        let json = serde_json::to_string(&digest).unwrap();
        let back: ContentDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);
        assert!(serde_json::from_str::<ContentDigest>("\"not-a-digest\"").is_err());
    }

    #[test]
    fn lifecycle_serializes_snake_case() {
        let json = serde_json::to_string(&Lifecycle::Pending).unwrap();
        assert_eq!(json, "\"pending\"");
        assert!(Lifecycle::Updated.is_settled());
        assert!(!Lifecycle::Failed.is_settled());
    }
}
