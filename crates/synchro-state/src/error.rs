//! Error types for synchro-state

use thiserror::Error;

/// Errors that can occur in the state persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// A digest string was not 64 hex characters
    #[error("invalid content digest: {digest}")]
    InvalidDigest { digest: String },

    /// The on-disk state document could not be interpreted
    #[error("state file {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },

    /// Filesystem error
    #[error("state io failed: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_digest_displays_value() {
        let err = StorageError::InvalidDigest {
            digest: "xyz".to_string(),
        };
        assert!(err.to_string().contains("xyz"));
    }

    #[test]
    fn corrupt_displays_path_and_reason() {
        let err = StorageError::Corrupt {
            path: "/var/lib/synchro/state.json".to_string(),
            reason: "unsupported version 7".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("state.json"));
        assert!(msg.contains("version 7"));
    }
}
