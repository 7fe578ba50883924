//! Contract between the engine and the per-kind appliers.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{ArtifactKind, Definition};

/// What the applier is asked to do with a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    Create,
    Update,
    Drop,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::Drop => "drop",
        };
        f.write_str(s)
    }
}

/// Result of a successful `apply` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// The definition is in effect.
    Done,
    /// An asynchronous side effect was started; completion is observed
    /// through [`Applier::is_complete`].
    Pending,
}

/// Brings definitions of one kind into effect.
///
/// The engine only inspects a definition's key, checksum and dependencies;
/// everything else about the artifact is the applier's business.
#[async_trait]
pub trait Applier: Send + Sync {
    /// Kind this applier is responsible for.
    fn kind(&self) -> &ArtifactKind;

    /// Whether content at `location` tagged `kind` belongs to this applier.
    /// Also used to filter parsed definitions when kinds share a namespace.
    fn accepts(&self, location: &str, kind: &ArtifactKind) -> bool {
        let _ = location;
        kind == self.kind()
    }

    /// Decode raw bytes into zero or more definitions.
    fn parse(&self, location: &str, content: &[u8]) -> Result<Vec<Definition>>;

    /// Called once per pass before the first `apply`.
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Create, update or drop `definition`.
    async fn apply(&self, definition: &Definition, verb: Verb) -> Result<ApplyOutcome>;

    /// Non-blocking check whether a pending apply has finished.
    fn is_complete(&self, definition: &Definition) -> bool {
        let _ = definition;
        true
    }
}
