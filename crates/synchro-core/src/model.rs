//! Artifact definitions and kinds.

use std::fmt;

use serde::{Deserialize, Serialize};
use synchro_state::{ContentDigest, DefinitionRecord};

/// Author recorded when a definition does not name one.
pub const SYSTEM_USER: &str = "system";

/// Kind tags of the artifact families the platform ships appliers for.
pub mod kinds {
    pub const JOB: &str = "job";
    pub const TABLE: &str = "table";
    pub const VIEW: &str = "view";
    pub const LISTENER: &str = "listener";
    pub const EXTENSION_POINT: &str = "extensionpoint";
    pub const EXTENSION: &str = "extension";
    pub const ROLES: &str = "roles";
    pub const DATASOURCE: &str = "datasource";
    pub const WEBSOCKET: &str = "websocket";
    /// Fallback for content without a file extension.
    pub const DEFINITION: &str = "definition";
}

/// Artifact type tag; selects the applier responsible for a definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactKind(String);

impl ArtifactKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    /// Derive the kind from the extension of the last path segment.
    ///
    /// `/demo/nightly.job` → `job`; `/demo/README` → `definition`.
    pub fn from_location(location: &str) -> Self {
        let file = location.rsplit('/').next().unwrap_or(location);
        match file.rfind('.') {
            Some(idx) if idx > 0 && idx + 1 < file.len() => Self::new(&file[idx + 1..]),
            _ => Self::new(kinds::DEFINITION),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactKind {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

/// One declared artifact instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    /// Unique within `kind`; `"{location}:{name}"`.
    pub id: String,
    pub name: String,
    /// Content store path the definition was loaded from.
    pub location: String,
    pub kind: ArtifactKind,
    /// Checksum of the raw bytes this definition was decoded from.
    pub checksum: ContentDigest,
    /// Ordered, duplicate-free dependency references. Each is either a bare
    /// id or a `"{kind}:{id}"` key.
    pub dependencies: Vec<String>,
    pub created_by: String,
}

impl Definition {
    /// Build a definition, checksumming `content`.
    pub fn new(
        kind: impl Into<ArtifactKind>,
        location: impl Into<String>,
        name: impl Into<String>,
        content: &[u8],
    ) -> Self {
        let location = location.into();
        let name = name.into();
        Self {
            id: Self::make_id(&location, &name),
            name,
            location,
            kind: kind.into(),
            checksum: ContentDigest::from_bytes(content),
            dependencies: Vec::new(),
            created_by: SYSTEM_USER.to_string(),
        }
    }

    /// Replace the dependency list, dropping repeated references while
    /// keeping first-occurrence order.
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut deps: Vec<String> = Vec::new();
        for dep in dependencies {
            let dep = dep.into();
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        self.dependencies = deps;
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.created_by = author.into();
        self
    }

    pub fn make_id(location: &str, name: &str) -> String {
        format!("{location}:{name}")
    }

    pub fn make_key(kind: &str, id: &str) -> String {
        format!("{kind}:{id}")
    }

    /// Globally unique key, `"{kind}:{id}"`.
    pub fn key(&self) -> String {
        Self::make_key(self.kind.as_str(), &self.id)
    }

    /// Rebuild a definition from its persisted record, e.g. to drop an
    /// artifact whose source has vanished.
    pub fn from_record(record: &DefinitionRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            location: record.location.clone(),
            kind: ArtifactKind::new(record.kind.clone()),
            checksum: record.checksum.clone(),
            dependencies: record.dependencies.clone(),
            created_by: record.created_by.clone(),
        }
    }
}
