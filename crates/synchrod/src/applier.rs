//! Applier that records definitions in the log instead of touching a
//! running system. Lets the daemon dry-run a registry end to end.

use async_trait::async_trait;
use synchro_core::{Applier, ApplyOutcome, ArtifactKind, Definition, ManifestCodec, Result, Verb};
use tracing::info;

pub struct LoggingApplier {
    kind: ArtifactKind,
}

impl LoggingApplier {
    pub fn new(kind: impl Into<ArtifactKind>) -> Self {
        Self { kind: kind.into() }
    }
}

#[async_trait]
impl Applier for LoggingApplier {
    fn kind(&self) -> &ArtifactKind {
        &self.kind
    }

    fn parse(&self, location: &str, content: &[u8]) -> Result<Vec<Definition>> {
        ManifestCodec::parse(&self.kind, location, content)
    }

    async fn apply(&self, definition: &Definition, verb: Verb) -> Result<ApplyOutcome> {
        info!(
            event = "applier.logged",
            verb = %verb,
            key = %definition.key(),
            checksum = %definition.checksum.short(),
            dependencies = ?definition.dependencies,
        );
        Ok(ApplyOutcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_manifests_and_applies_everything() {
        let applier = LoggingApplier::new("table");
        assert!(applier.accepts("/db/orders.table", &ArtifactKind::new("table")));
        assert!(!applier.accepts("/db/orders.view", &ArtifactKind::new("view")));

        let defs = applier
            .parse("/db/orders.table", br#"{"name":"orders"}"#)
            .unwrap();
        assert_eq!(defs[0].key(), "table:/db/orders.table:orders");
        assert_eq!(
            applier.apply(&defs[0], Verb::Create).await.unwrap(),
            ApplyOutcome::Done
        );
    }
}
