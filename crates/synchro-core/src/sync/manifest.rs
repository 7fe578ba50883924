//! Generic JSON manifest decoding.
//!
//! A manifest is either one object or an array of objects:
//!
//! ```json
//! [
//!   { "name": "orders" },
//!   { "name": "open_orders", "dependencies": ["table:/demo/orders.table:orders"], "createdBy": "alice" }
//! ]
//! ```
//!
//! Each entry is checksummed over its own canonical JSON, so editing one
//! entry of a multi-entry file only updates that definition.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::model::{ArtifactKind, Definition};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestEntry {
    name: String,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    created_by: Option<String>,
}

/// Decoder for the JSON manifest format.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestCodec;

impl ManifestCodec {
    /// Parse `content` found at `location` into definitions of `kind`.
    pub fn parse(kind: &ArtifactKind, location: &str, content: &[u8]) -> Result<Vec<Definition>> {
        let value: Value =
            serde_json::from_slice(content).map_err(|e| SyncError::parse(location, e))?;

        let entries = match value {
            Value::Array(items) => items,
            obj @ Value::Object(_) => vec![obj],
            other => {
                return Err(SyncError::parse(
                    location,
                    format!("expected an object or array, found {}", json_type(&other)),
                ))
            }
        };

        entries
            .into_iter()
            .enumerate()
            .map(|(idx, raw)| Self::entry(kind, location, idx, raw))
            .collect()
    }

    fn entry(kind: &ArtifactKind, location: &str, idx: usize, raw: Value) -> Result<Definition> {
        let canonical = serde_json::to_vec(&raw)?;
        let entry: ManifestEntry = serde_json::from_value(raw)
            .map_err(|e| SyncError::parse(location, format!("entry {idx}: {e}")))?;
        if entry.name.trim().is_empty() {
            return Err(SyncError::parse(
                location,
                format!("entry {idx}: name must not be empty"),
            ));
        }

        let mut definition = Definition::new(kind.clone(), location, entry.name, &canonical)
            .with_dependencies(entry.dependencies);
        if let Some(author) = entry.created_by {
            definition = definition.with_author(author);
        }
        Ok(definition)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> ArtifactKind {
        ArtifactKind::new("job")
    }

    #[test]
    fn single_object() {
        let defs = ManifestCodec::parse(&job(), "/demo/n.job", br#"{"name":"nightly"}"#).unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].id, "/demo/n.job:nightly");
        assert!(defs[0].dependencies.is_empty());
    }

    #[test]
    fn array_with_dependencies_and_author() {
        let content = br#"[
            {"name":"a"},
            {"name":"b","dependencies":["a","a","ghost"],"createdBy":"alice"}
        ]"#;
        let defs = ManifestCodec::parse(&job(), "/x.job", content).unwrap();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[1].dependencies, vec!["a", "ghost"]);
        assert_eq!(defs[1].created_by, "alice");
    }

    #[test]
    fn empty_array_yields_nothing() {
        let defs = ManifestCodec::parse(&job(), "/x.job", b"[]").unwrap();
        assert!(defs.is_empty());
    }

    #[test]
    fn checksum_is_per_entry_and_whitespace_insensitive() {
        let one = ManifestCodec::parse(&job(), "/x.job", br#"[{"name":"a"},{"name":"b"}]"#).unwrap();
        let two = ManifestCodec::parse(
            &job(),
            "/x.job",
            br#"[ {"name": "a"}, {"name": "b", "dependencies": ["a"]} ]"#,
        )
        .unwrap();
        assert_eq!(one[0].checksum, two[0].checksum);
        assert_ne!(one[1].checksum, two[1].checksum);
    }

    #[test]
    fn malformed_content_is_parse_error() {
        let cases: [&[u8]; 4] = [
            b"{not json",
            b"42",
            br#"{"dependencies":[]}"#,
            br#"{"name":" "}"#,
        ];
        for bad in cases {
            let err = ManifestCodec::parse(&job(), "/bad.job", bad).unwrap_err();
            assert!(matches!(err, SyncError::Parse { .. }), "{err}");
        }
    }
}
