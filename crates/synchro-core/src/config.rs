//! Reconciler configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! overrides:
//!
//! ```json
//! { "registryRoot": "/srv/registry", "graceSecs": 120, "kinds": ["job", "table"] }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::model::kinds;
use crate::sync::DEFAULT_JOB_PREFIX;

pub const DEFAULT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_GRACE_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ReconcilerConfig {
    /// Directory walked for artifact content.
    pub registry_root: PathBuf,
    /// JSON document holding per-definition state.
    pub state_file: PathBuf,
    /// Seconds between passes in daemon mode.
    pub interval_secs: u64,
    /// Seconds after startup at which readiness is forced to ready.
    pub grace_secs: u64,
    pub job_prefix: String,
    /// Kinds to register a synchronizer for, in routing order.
    pub kinds: Vec<String>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            registry_root: PathBuf::from("registry"),
            state_file: PathBuf::from(".synchro/state.json"),
            interval_secs: DEFAULT_INTERVAL_SECS,
            grace_secs: DEFAULT_GRACE_SECS,
            job_prefix: DEFAULT_JOB_PREFIX.to_string(),
            kinds: [
                kinds::DATASOURCE,
                kinds::TABLE,
                kinds::VIEW,
                kinds::ROLES,
                kinds::EXTENSION_POINT,
                kinds::EXTENSION,
                kinds::LISTENER,
                kinds::WEBSOCKET,
                kinds::JOB,
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl ReconcilerConfig {
    /// Load and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path)?;
        let config: Self = serde_json::from_slice(&raw)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(SyncError::Config("intervalSecs must be positive".into()));
        }
        if self.job_prefix.trim().is_empty() {
            return Err(SyncError::Config("jobPrefix must not be empty".into()));
        }
        if self.kinds.is_empty() {
            return Err(SyncError::Config("at least one kind is required".into()));
        }
        let mut seen = HashSet::new();
        for kind in &self.kinds {
            if kind.is_empty() || kind.contains(':') {
                return Err(SyncError::Config(format!("invalid kind '{kind}'")));
            }
            if !seen.insert(kind.as_str()) {
                return Err(SyncError::Config(format!("kind '{kind}' listed twice")));
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = ReconcilerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.interval(), Duration::from_secs(30));
        assert_eq!(config.grace(), Duration::from_secs(300));
        assert_eq!(config.job_prefix, "synchronizer");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"graceSecs": 5, "kinds": ["job"]}}"#).unwrap();

        let config = ReconcilerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.grace_secs, 5);
        assert_eq!(config.kinds, vec!["job"]);
        assert_eq!(config.interval_secs, DEFAULT_INTERVAL_SECS);
    }

    #[test]
    fn unknown_field_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"gracePeriod": 5}}"#).unwrap();
        let err = ReconcilerConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)), "{err}");
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReconcilerConfig::from_file(dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, SyncError::Io(_)));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = ReconcilerConfig {
            interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.interval_secs = 1;
        config.kinds = vec!["job".into(), "job".into()];
        assert!(config.validate().is_err());

        config.kinds = vec!["a:b".into()];
        assert!(config.validate().is_err());
    }
}
