//! Error taxonomy for the reconciliation engine.
//!
//! Only [`SyncError::Source`] ever escapes a pass. Every other variant is
//! confined to the definition or location it originated from and ends up in
//! the pass report.

use synchro_state::StorageError;
use thiserror::Error;

/// Errors produced by the reconciliation engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Artifact content at `location` could not be decoded.
    #[error("failed to parse {location}: {reason}")]
    Parse { location: String, reason: String },

    /// The applier for a definition reported an error.
    #[error("apply of {key} failed: {reason}")]
    Apply { key: String, reason: String },

    /// A dependency reference did not match any definition in the pass.
    #[error("{dependent} depends on unresolved reference '{reference}'")]
    DependencyUnresolved { dependent: String, reference: String },

    /// The dependency graph contains a cycle through these definition keys.
    #[error("dependency cycle detected involving: {members:?}")]
    CycleDetected { members: Vec<String> },

    /// Two definitions in one pass share the same kind and id.
    #[error("duplicate definition {key} at {location} (first declared at {first_location})")]
    DuplicateDefinition {
        key: String,
        location: String,
        first_location: String,
    },

    /// The content store could not be listed.
    #[error("content source error: {0}")]
    Source(String),

    /// Configuration could not be loaded or is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Shorthand for an [`SyncError::Apply`] raised by an applier.
    pub fn apply(key: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        SyncError::Apply {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for an [`SyncError::Parse`] raised by a parser.
    pub fn parse(location: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        SyncError::Parse {
            location: location.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_displays_members() {
        let err = SyncError::CycleDetected {
            members: vec!["job:a".to_string(), "job:b".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("job:a"));
        assert!(msg.contains("job:b"));
    }

    #[test]
    fn apply_shorthand() {
        let err = SyncError::apply("table:/demo/orders.table:orders", "relation exists");
        assert!(matches!(err, SyncError::Apply { .. }));
        assert!(err.to_string().contains("relation exists"));
    }

    #[test]
    fn storage_error_converts() {
        let err: SyncError = StorageError::InvalidDigest {
            digest: "job:x".to_string(),
        }
        .into();
        assert!(err.to_string().starts_with("storage error"));
    }
}
