//! Structured observability hooks for reconciliation pass events.
//!
//! This module provides:
//! - A pass-scoped tracing span, attached with `Instrument` so it
//!   follows the pass across awaits and into spawned group tasks
//! - Emission functions for the pass lifecycle events
//!
//! Filter with `RUST_LOG` (e.g. `RUST_LOG=synchro_core=debug`).

use tracing::{info, warn};

use crate::error::SyncError;

/// Span every event of one pass is recorded under.
///
/// # Example
///
/// ```ignore
/// run_pass().instrument(pass_span("8f5c0c1e-...")).await
/// ```
pub fn pass_span(pass_id: &str) -> tracing::Span {
    tracing::info_span!("synchro.pass", pass_id = %pass_id)
}

/// Emit event: pass started with the number of resources discovered.
pub fn emit_pass_started(pass_id: &str, resources: usize) {
    info!(event = "pass.started", pass_id = %pass_id, resources = resources);
}

/// Emit event: one definition applied with the given verb.
pub fn emit_definition_applied(key: &str, verb: &str) {
    info!(event = "definition.applied", key = %key, verb = %verb);
}

/// Emit event: applier accepted the definition but completion is pending.
pub fn emit_definition_pending(key: &str) {
    info!(event = "definition.pending", key = %key);
}

/// Emit event: a definition or location failed (warning level).
pub fn emit_definition_failed(subject: &str, error: &dyn std::fmt::Display) {
    warn!(event = "definition.failed", subject = %subject, error = %error);
}

/// Emit event: a dependency reference could not be resolved (warning level).
///
/// `candidates` is 0 for a missing reference and above 1 for an ambiguous one.
pub fn emit_dependency_unresolved(error: &SyncError, candidates: usize) {
    warn!(event = "dependency.unresolved", error = %error, candidates = candidates);
}

/// Emit event: the pass contains a dependency cycle (warning level).
pub fn emit_cycle_detected(error: &SyncError) {
    warn!(event = "dependency.cycle_detected", error = %error);
}

/// Emit event: pass finished.
pub fn emit_pass_finished(
    pass_id: &str,
    duration_ms: u64,
    applied: usize,
    failed: usize,
    pending: usize,
) {
    info!(
        event = "pass.finished",
        pass_id = %pass_id,
        duration_ms = duration_ms,
        applied = applied,
        failed = failed,
        pending = pending,
    );
}
