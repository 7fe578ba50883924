//! Synchro core: declarative artifact reconciliation.
//!
//! Artifact definitions are discovered from a [`source::ContentSource`],
//! ordered across kinds by their declared dependencies and handed to
//! per-kind [`sync::Applier`]s. A [`readiness::ReadinessAggregator`] turns
//! per-synchronizer job statuses into one health signal.

pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod obs;
pub mod readiness;
pub mod source;
pub mod sync;
pub mod telemetry;
pub mod topology;

pub use config::ReconcilerConfig;
pub use error::{Result, SyncError};
pub use metrics::PassMetrics;
pub use model::{kinds, ArtifactKind, Definition, SYSTEM_USER};
pub use readiness::{HealthReport, JobStatus, ReadinessAggregator, ReadinessState};
pub use source::{ContentSource, FsContentSource, MemoryContentSource, Resource};
pub use sync::{
    Applier, ApplyOutcome, DefinitionOutcome, KindSynchronizer, ManifestCodec, PassReport,
    Reconciler, SyncState, Verb,
};
pub use topology::{
    deplete, sort, Cycle, Depletable, DependencyGraph, TopologicalSorter, UnresolvedDependency,
};

/// Crate version, reported by the daemon.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
