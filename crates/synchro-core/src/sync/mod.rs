//! Applier contract, per-kind synchronizers and the pass driver.

pub mod applier;
pub mod manifest;
pub mod reconciler;
pub mod synchronizer;

pub use applier::{Applier, ApplyOutcome, Verb};
pub use manifest::ManifestCodec;
pub use reconciler::{PassReport, Reconciler, DEFAULT_JOB_PREFIX};
pub use synchronizer::{CompletionProbe, DefinitionOutcome, KindSynchronizer, Plan, SyncState};
