//! Atomic counters for reconciliation passes.
//!
//! Counters are incremented silently at the call site. Call
//! [`PassMetrics::flush`] to emit current values as a single
//! `tracing::info!` event (the reconciler does this at the end of a pass).
//! Each reconciler owns its own instance; share it through an `Arc` when a
//! status endpoint needs to read it.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::sync::Verb;

/// Lock-free pass counters.
#[derive(Debug, Default)]
pub struct PassMetrics {
    passes: AtomicU64,
    created: AtomicU64,
    updated: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
    pending: AtomicU64,
}

impl PassMetrics {
    pub const fn new() -> Self {
        Self {
            passes: AtomicU64::new(0),
            created: AtomicU64::new(0),
            updated: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            pending: AtomicU64::new(0),
        }
    }

    pub fn inc_passes(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one successful apply with `verb`.
    pub fn inc_applied(&self, verb: Verb) {
        let counter = match verb {
            Verb::Create => &self.created,
            Verb::Update => &self.updated,
            Verb::Drop => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "applied", verb = %verb, "counter incremented");
    }

    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_pending(&self) {
        self.pending.fetch_add(1, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            passes = self.passes(),
            created = self.created(),
            updated = self.updated(),
            dropped = self.dropped(),
            failed = self.failed(),
            pending = self.pending(),
        );
    }

    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn updated(&self) -> u64 {
        self.updated.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        for counter in [
            &self.passes,
            &self.created,
            &self.updated,
            &self.dropped,
            &self.failed,
            &self.pending,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_per_verb() {
        let m = PassMetrics::new();
        m.inc_applied(Verb::Create);
        m.inc_applied(Verb::Create);
        m.inc_applied(Verb::Update);
        m.inc_applied(Verb::Drop);
        m.inc_failed();
        m.inc_passes();

        assert_eq!(m.created(), 2);
        assert_eq!(m.updated(), 1);
        assert_eq!(m.dropped(), 1);
        assert_eq!(m.failed(), 1);
        assert_eq!(m.passes(), 1);
        assert_eq!(m.pending(), 0);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = PassMetrics::new();
        m.inc_applied(Verb::Update);
        m.inc_pending();
        m.inc_passes();
        m.reset();
        assert_eq!(m.updated(), 0);
        assert_eq!(m.pending(), 0);
        assert_eq!(m.passes(), 0);
    }
}
