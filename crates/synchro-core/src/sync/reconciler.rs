//! One reconciliation pass across every registered kind.
//!
//! A pass lists the content source, loads definitions through the
//! synchronizer that claims each resource, orders everything with one
//! dependency graph, then applies. Kinds linked by a cross-kind dependency
//! share a group and are applied sequentially in sorted order; independent
//! groups run concurrently. Drops run last within their group, dependents
//! first; dependencies between vanished definitions link their kinds into
//! one group as well.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use synchro_state::{DefinitionRecord, DefinitionStore};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn, Instrument, Span};
use uuid::Uuid;

use crate::config::DEFAULT_GRACE_SECS;
use crate::error::{Result, SyncError};
use crate::metrics::PassMetrics;
use crate::model::{ArtifactKind, Definition};
use crate::obs;
use crate::readiness::{JobStatus, ReadinessAggregator};
use crate::source::{ContentSource, Resource};
use crate::sync::applier::Applier;
use crate::sync::synchronizer::{CompletionProbe, DefinitionOutcome, KindSynchronizer, SyncState};
use crate::topology::{deplete, Cycle, DependencyGraph, TopologicalSorter, UnresolvedDependency};

/// Job name prefix used when none is configured.
pub const DEFAULT_JOB_PREFIX: &str = "synchronizer";

/// Everything that happened in one pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassReport {
    pub pass_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub resources: usize,
    pub outcomes: Vec<DefinitionOutcome>,
    pub cycles: Vec<Cycle>,
    pub unresolved: Vec<UnresolvedDependency>,
    pub errors: Vec<String>,
}

impl PassReport {
    fn new(pass_id: String, started_at: DateTime<Utc>, resources: usize) -> Self {
        Self {
            pass_id,
            started_at,
            duration_ms: 0,
            resources,
            outcomes: Vec::new(),
            cycles: Vec::new(),
            unresolved: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn count(&self, state: SyncState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }

    /// Definitions created, updated or dropped.
    pub fn applied(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.state, SyncState::Applied(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.count(SyncState::Failed)
    }

    pub fn pending(&self) -> usize {
        self.count(SyncState::Pending)
    }

    /// Latest outcome recorded for `key`.
    pub fn outcome(&self, key: &str) -> Option<&DefinitionOutcome> {
        self.outcomes
            .iter()
            .rev()
            .find(|o| o.key.as_deref() == Some(key))
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Drives passes over a content source into a definition store.
pub struct Reconciler {
    source: Arc<dyn ContentSource>,
    store: Arc<dyn DefinitionStore>,
    synchronizers: Vec<Arc<KindSynchronizer>>,
    readiness: Arc<ReadinessAggregator>,
    metrics: Arc<PassMetrics>,
    job_prefix: String,
    pass_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(source: Arc<dyn ContentSource>, store: Arc<dyn DefinitionStore>) -> Self {
        Self {
            source,
            store,
            synchronizers: Vec::new(),
            readiness: Arc::new(ReadinessAggregator::new(Duration::from_secs(
                DEFAULT_GRACE_SECS,
            ))),
            metrics: Arc::new(PassMetrics::new()),
            job_prefix: DEFAULT_JOB_PREFIX.to_string(),
            pass_lock: Mutex::new(()),
        }
    }

    /// Report job statuses into a shared aggregator. Jobs registered so far
    /// carry over as Running.
    pub fn with_readiness(mut self, readiness: Arc<ReadinessAggregator>) -> Self {
        for sync in &self.synchronizers {
            readiness.set_status(sync.job_name(), JobStatus::Running);
        }
        self.readiness = readiness;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PassMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Rename readiness jobs to `"{prefix}:{kind}"`. Jobs registered so far
    /// are renamed in the aggregator and keep their status.
    pub fn with_job_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.job_prefix = prefix.into();
        let renamed: Vec<Arc<KindSynchronizer>> = self
            .synchronizers
            .iter()
            .map(|old| {
                let new = KindSynchronizer::new(Arc::clone(old.applier()), &self.job_prefix);
                let status = self
                    .readiness
                    .remove_job(old.job_name())
                    .unwrap_or(JobStatus::Running);
                self.readiness.set_status(new.job_name(), status);
                Arc::new(new)
            })
            .collect();
        self.synchronizers = renamed;
        self
    }

    /// Add a synchronizer. Resources are offered to synchronizers in
    /// registration order; the first that accepts wins.
    pub fn register(mut self, applier: Arc<dyn Applier>) -> Self {
        if self.synchronizers.iter().any(|s| s.kind() == applier.kind()) {
            warn!(
                event = "reconciler.duplicate_kind",
                kind = %applier.kind(),
                "kind already registered; earlier synchronizer takes precedence",
            );
        }
        let synchronizer = KindSynchronizer::new(applier, &self.job_prefix);
        self.readiness
            .set_status(synchronizer.job_name(), JobStatus::Running);
        self.synchronizers.push(Arc::new(synchronizer));
        self
    }

    pub fn readiness(&self) -> &Arc<ReadinessAggregator> {
        &self.readiness
    }

    pub fn metrics(&self) -> &Arc<PassMetrics> {
        &self.metrics
    }

    pub fn synchronizers(&self) -> &[Arc<KindSynchronizer>] {
        &self.synchronizers
    }

    /// Run one pass. Only a failure to list the content source is returned
    /// as an error; everything else is in the report. Concurrent callers are
    /// serialized.
    pub async fn reconcile(&self) -> Result<PassReport> {
        let _guard = self.pass_lock.lock().await;
        let pass_id = Uuid::new_v4().to_string();
        let span = obs::pass_span(&pass_id);
        self.run_pass(pass_id).instrument(span).await
    }

    async fn run_pass(&self, pass_id: String) -> Result<PassReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        for sync in &self.synchronizers {
            self.readiness.set_status(sync.job_name(), JobStatus::Running);
        }

        let resources = match self.source.list().await {
            Ok(resources) => resources,
            Err(e) => {
                obs::emit_definition_failed("content source", &e);
                for sync in &self.synchronizers {
                    self.readiness.set_status(sync.job_name(), JobStatus::Failed);
                }
                return Err(e);
            }
        };
        obs::emit_pass_started(&pass_id, resources.len());

        let mut report = PassReport::new(pass_id, started_at, resources.len());
        let mut failed_jobs: HashSet<usize> = HashSet::new();
        let collected = self.collect(&resources, &mut report, &mut failed_jobs);

        let graph = DependencyGraph::build(&collected.definitions);
        let sorted = TopologicalSorter::new().sort_with_report(&graph);
        for u in &sorted.unresolved {
            let e = SyncError::DependencyUnresolved {
                dependent: u.dependent.clone(),
                reference: u.reference.clone(),
            };
            obs::emit_dependency_unresolved(&e, u.candidates);
        }
        for cycle in &sorted.cycles {
            obs::emit_cycle_detected(&SyncError::CycleDetected {
                members: cycle.members.clone(),
            });
        }

        let drops = match self.store.list().await {
            Ok(records) => plan_drops(self.drop_candidates(records, &collected)),
            Err(e) => {
                let e = SyncError::from(e);
                obs::emit_definition_failed("definition store", &e);
                report.errors.push(e.to_string());
                failed_jobs.extend(0..self.synchronizers.len());
                DropPlan::default()
            }
        };

        let mut groups = KindGroups::new(self.synchronizers.len());
        for (dependent, dependency) in graph.edges() {
            let owners = (
                collected.owners.get(&dependent.key()),
                collected.owners.get(&dependency.key()),
            );
            if let (Some(&a), Some(&b)) = owners {
                groups.union(a, b);
            }
        }
        for &(a, b) in &drops.links {
            groups.union(a, b);
        }

        let mut works: Vec<GroupWork> = Vec::new();
        let mut slot_of_root: HashMap<usize, usize> = HashMap::new();
        for idx in 0..self.synchronizers.len() {
            let root = groups.find(idx);
            let slot = *slot_of_root.entry(root).or_insert_with(|| {
                works.push(GroupWork::default());
                works.len() - 1
            });
            works[slot].members.push(idx);
        }
        let slot_for = |groups: &mut KindGroups, idx: usize| slot_of_root.get(&groups.find(idx)).copied();

        for definition in &sorted.ordered {
            let Some(&idx) = collected.owners.get(&definition.key()) else {
                continue;
            };
            if let Some(slot) = slot_for(&mut groups, idx) {
                works[slot].ordered.push((idx, (*definition).clone()));
            }
        }
        for (idx, record) in drops.ordered {
            if let Some(slot) = slot_for(&mut groups, idx) {
                works[slot].drops.push((idx, record));
            }
        }

        report.cycles = sorted.cycles;
        report.unresolved = sorted.unresolved;

        let group_members: Vec<Vec<usize>> = works.iter().map(|w| w.members.clone()).collect();
        let mut join_set = JoinSet::new();
        for (slot, work) in works.into_iter().enumerate() {
            let store = Arc::clone(&self.store);
            let synchronizers: HashMap<usize, Arc<KindSynchronizer>> = work
                .members
                .iter()
                .map(|&i| (i, Arc::clone(&self.synchronizers[i])))
                .collect();
            join_set.spawn(
                async move { (slot, apply_group(store, synchronizers, work).await) }
                    .instrument(Span::current()),
            );
        }

        let mut results: Vec<Option<GroupResult>> = group_members.iter().map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((slot, result)) => results[slot] = Some(result),
                Err(e) => {
                    warn!(event = "reconciler.group_panicked", error = %e);
                    report.errors.push(format!("synchronizer group task failed: {e}"));
                }
            }
        }

        let mut pending_jobs: HashSet<usize> = HashSet::new();
        for (slot, result) in results.into_iter().enumerate() {
            let Some(result) = result else {
                failed_jobs.extend(group_members[slot].iter().copied());
                continue;
            };
            for outcome in &result.outcomes {
                if outcome.state == SyncState::Failed {
                    if let Some(message) = &outcome.message {
                        report.errors.push(message.clone());
                    }
                }
            }
            report.outcomes.extend(result.outcomes);
            failed_jobs.extend(result.failed);
            pending_jobs.extend(result.pending);
        }

        for (idx, sync) in self.synchronizers.iter().enumerate() {
            let status = if failed_jobs.contains(&idx) {
                JobStatus::Failed
            } else if pending_jobs.contains(&idx) {
                JobStatus::Running
            } else {
                JobStatus::Succeeded
            };
            self.readiness.set_status(sync.job_name(), status);
        }

        self.record_metrics(&report);
        report.duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        obs::emit_pass_finished(
            &report.pass_id,
            report.duration_ms,
            report.applied(),
            report.failed(),
            report.pending(),
        );
        Ok(report)
    }

    /// Route each resource to the first accepting synchronizer and load it.
    fn collect(
        &self,
        resources: &[Resource],
        report: &mut PassReport,
        failed_jobs: &mut HashSet<usize>,
    ) -> Collected {
        let mut collected = Collected::default();
        let mut first_seen: HashMap<String, String> = HashMap::new();

        for resource in resources {
            let Some(idx) = self.synchronizers.iter().position(|s| s.accepts(resource)) else {
                debug!(event = "reconciler.unclaimed", location = %resource.location);
                continue;
            };
            let definitions = match self.synchronizers[idx].load(resource) {
                Ok(definitions) => definitions,
                Err(e) => {
                    report.outcomes.push(DefinitionOutcome::location_failed(resource, &e));
                    report.errors.push(e.to_string());
                    collected.failed_locations.insert(resource.location.clone());
                    failed_jobs.insert(idx);
                    continue;
                }
            };

            for definition in definitions {
                let key = definition.key();
                if let Some(first_location) = first_seen.get(&key) {
                    let e = SyncError::DuplicateDefinition {
                        key,
                        location: definition.location.clone(),
                        first_location: first_location.clone(),
                    };
                    report.outcomes.push(DefinitionOutcome::definition_failed(&definition, &e));
                    report.errors.push(e.to_string());
                    failed_jobs.insert(idx);
                    continue;
                }
                first_seen.insert(key.clone(), definition.location.clone());
                collected.owners.insert(key, idx);
                collected.definitions.push(definition);
            }
        }
        collected
    }

    /// Records whose definition is gone from the content store, paired with
    /// the first synchronizer that accepts them, as resources are routed.
    /// Locations that failed to parse keep their records.
    fn drop_candidates(
        &self,
        records: Vec<DefinitionRecord>,
        collected: &Collected,
    ) -> Vec<(usize, DefinitionRecord)> {
        records
            .into_iter()
            .filter(|r| !collected.owners.contains_key(&r.key))
            .filter(|r| !collected.failed_locations.contains(&r.location))
            .filter_map(|r| {
                let kind = ArtifactKind::new(r.kind.clone());
                let idx = self
                    .synchronizers
                    .iter()
                    .position(|s| s.applier().accepts(&r.location, &kind));
                if idx.is_none() {
                    debug!(event = "reconciler.orphan_record", key = %r.key);
                }
                idx.map(|idx| (idx, r))
            })
            .collect()
    }

    fn record_metrics(&self, report: &PassReport) {
        self.metrics.inc_passes();
        for outcome in &report.outcomes {
            match outcome.state {
                SyncState::Applied(verb) => self.metrics.inc_applied(verb),
                SyncState::Failed => self.metrics.inc_failed(),
                SyncState::Pending => self.metrics.inc_pending(),
                _ => {}
            }
        }
        self.metrics.flush();
    }
}

#[derive(Default)]
struct Collected {
    definitions: Vec<Definition>,
    /// Definition key → synchronizer index.
    owners: HashMap<String, usize>,
    failed_locations: HashSet<String>,
}

#[derive(Default)]
struct GroupWork {
    members: Vec<usize>,
    ordered: Vec<(usize, Definition)>,
    drops: Vec<(usize, DefinitionRecord)>,
}

#[derive(Default)]
struct GroupResult {
    outcomes: Vec<DefinitionOutcome>,
    failed: HashSet<usize>,
    pending: HashSet<usize>,
}

/// Apply one group sequentially: prepare, create/update in sorted order,
/// deplete pending applies, then drop and deplete pending drops.
async fn apply_group(
    store: Arc<dyn DefinitionStore>,
    synchronizers: HashMap<usize, Arc<KindSynchronizer>>,
    work: GroupWork,
) -> GroupResult {
    let mut result = GroupResult::default();
    let mut unprepared: HashSet<usize> = HashSet::new();

    for idx in &work.members {
        let sync = &synchronizers[idx];
        if let Err(e) = sync.prepare().await {
            obs::emit_definition_failed(sync.job_name(), &e);
            result.failed.insert(*idx);
            unprepared.insert(*idx);
        }
    }

    let mut pending: Vec<(usize, &Definition, usize)> = Vec::new();
    for (idx, definition) in &work.ordered {
        if unprepared.contains(idx) {
            let e = SyncError::apply(definition.key(), "synchronizer failed to prepare");
            result.outcomes.push(DefinitionOutcome::definition_failed(definition, &e));
            continue;
        }
        let outcome = synchronizers[idx].reconcile(store.as_ref(), definition).await;
        match outcome.state {
            SyncState::Failed => {
                result.failed.insert(*idx);
            }
            SyncState::Pending => pending.push((*idx, definition, result.outcomes.len())),
            _ => {}
        }
        result.outcomes.push(outcome);
    }

    let done = settle_pending(&synchronizers, &pending);
    for ((idx, definition, slot), done) in pending.into_iter().zip(done) {
        if done {
            let outcome = synchronizers[&idx].settle(store.as_ref(), definition).await;
            if outcome.state == SyncState::Failed {
                result.failed.insert(idx);
            }
            result.outcomes[slot] = outcome;
        } else {
            result.pending.insert(idx);
        }
    }

    let mut dropping: Vec<(usize, &DefinitionRecord, usize)> = Vec::new();
    for (idx, record) in &work.drops {
        if unprepared.contains(idx) {
            continue;
        }
        let outcome = synchronizers[idx].drop_record(store.as_ref(), record).await;
        match outcome.state {
            SyncState::Failed => {
                result.failed.insert(*idx);
            }
            SyncState::Pending => dropping.push((*idx, record, result.outcomes.len())),
            _ => {}
        }
        result.outcomes.push(outcome);
    }

    let dropped: Vec<Definition> = dropping
        .iter()
        .map(|&(_, record, _)| Definition::from_record(record))
        .collect();
    let waiting: Vec<(usize, &Definition, usize)> = dropping
        .iter()
        .zip(&dropped)
        .map(|(&(idx, _, slot), definition)| (idx, definition, slot))
        .collect();
    let done = settle_pending(&synchronizers, &waiting);
    for ((idx, record, slot), done) in dropping.into_iter().zip(done) {
        if done {
            let outcome = synchronizers[&idx].forget(store.as_ref(), record).await;
            if outcome.state == SyncState::Failed {
                result.failed.insert(idx);
            }
            result.outcomes[slot] = outcome;
        } else {
            result.pending.insert(idx);
        }
    }

    info!(
        event = "reconciler.group_done",
        kinds = work.members.len(),
        outcomes = result.outcomes.len(),
    );
    result
}

/// Deplete pending items of one group; `true` where the applier reports
/// completion.
fn settle_pending(
    synchronizers: &HashMap<usize, Arc<KindSynchronizer>>,
    pending: &[(usize, &Definition, usize)],
) -> Vec<bool> {
    if pending.is_empty() {
        return Vec::new();
    }
    let mut probes: Vec<CompletionProbe<'_>> = pending
        .iter()
        .map(|&(idx, definition, _)| synchronizers[&idx].probe(definition))
        .collect();
    let remaining = deplete(probes.iter_mut().collect()).len();
    debug!(event = "reconciler.depleted", pending = probes.len(), remaining);
    probes.iter().map(CompletionProbe::is_done).collect()
}

/// Drop candidates in execution order, with the synchronizer pairs their
/// dependencies link.
#[derive(Default)]
struct DropPlan {
    ordered: Vec<(usize, DefinitionRecord)>,
    links: Vec<(usize, usize)>,
}

/// Reverse dependency order: dependents are dropped before what they use.
fn plan_drops(candidates: Vec<(usize, DefinitionRecord)>) -> DropPlan {
    let definitions: Vec<Definition> = candidates
        .iter()
        .map(|(_, record)| Definition::from_record(record))
        .collect();
    let owners: HashMap<&str, usize> = candidates
        .iter()
        .map(|(idx, record)| (record.key.as_str(), *idx))
        .collect();

    let graph = DependencyGraph::build(&definitions);
    let links: Vec<(usize, usize)> = graph
        .edges()
        .filter_map(|(dependent, dependency)| {
            let a = owners.get(dependent.key().as_str())?;
            let b = owners.get(dependency.key().as_str())?;
            Some((*a, *b))
        })
        .collect();
    let order: Vec<String> = TopologicalSorter::new()
        .sort(&graph)
        .into_iter()
        .rev()
        .map(Definition::key)
        .collect();

    let mut by_key: HashMap<String, (usize, DefinitionRecord)> = candidates
        .into_iter()
        .map(|candidate| (candidate.1.key.clone(), candidate))
        .collect();
    let ordered = order
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .collect();
    DropPlan { ordered, links }
}

/// Union-find over synchronizer indices.
struct KindGroups {
    parent: Vec<usize>,
}

impl KindGroups {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}
