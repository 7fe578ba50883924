//! Per-kind synchronizer: accept → load → diff → apply.
//!
//! A [`KindSynchronizer`] wraps one [`Applier`] and owns one readiness job.
//! It never lets an error escape a single definition: every method that
//! touches a definition returns a [`DefinitionOutcome`] instead of a
//! `Result`.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use synchro_state::{DefinitionRecord, DefinitionStore, Lifecycle};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::model::{ArtifactKind, Definition};
use crate::obs;
use crate::source::Resource;
use crate::sync::applier::{Applier, ApplyOutcome, Verb};
use crate::topology::Depletable;

/// Where a definition (or a whole location) ended up in this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Discovered,
    Parsed,
    Accepted,
    Applied(Verb),
    /// Checksum unchanged and already in effect.
    Unchanged,
    /// Applier started an asynchronous side effect that has not finished.
    Pending,
    Failed,
}

/// What to do with a definition given its persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Apply(Verb),
    /// Same checksum, still pending: ask the applier again, don't re-apply.
    Probe,
    Unchanged,
}

/// Per-definition (or per-location, when parsing failed) pass result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionOutcome {
    /// `None` when the location failed before yielding definitions.
    pub key: Option<String>,
    pub kind: ArtifactKind,
    pub location: String,
    pub state: SyncState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DefinitionOutcome {
    pub fn for_definition(definition: &Definition, state: SyncState) -> Self {
        Self {
            key: Some(definition.key()),
            kind: definition.kind.clone(),
            location: definition.location.clone(),
            state,
            message: None,
        }
    }

    pub fn definition_failed(definition: &Definition, error: &SyncError) -> Self {
        obs::emit_definition_failed(&definition.key(), error);
        Self {
            message: Some(error.to_string()),
            ..Self::for_definition(definition, SyncState::Failed)
        }
    }

    pub fn location_failed(resource: &Resource, error: &SyncError) -> Self {
        obs::emit_definition_failed(&resource.location, error);
        Self {
            key: None,
            kind: resource.kind.clone(),
            location: resource.location.clone(),
            state: SyncState::Failed,
            message: Some(error.to_string()),
        }
    }

    /// Key if known, otherwise location.
    pub fn subject(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.location)
    }
}

/// Depletable adapter asking an applier whether a pending apply finished.
pub struct CompletionProbe<'a> {
    applier: &'a dyn Applier,
    definition: &'a Definition,
    done: bool,
}

impl CompletionProbe<'_> {
    pub fn is_done(&self) -> bool {
        self.done
    }
}

impl Depletable for CompletionProbe<'_> {
    fn complete(&mut self) -> bool {
        if !self.done {
            self.done = self.applier.is_complete(self.definition);
        }
        self.done
    }
}

/// Drives one applier through the per-definition state machine.
pub struct KindSynchronizer {
    applier: Arc<dyn Applier>,
    job_name: String,
}

impl KindSynchronizer {
    /// The readiness job is named `"{job_prefix}:{kind}"`.
    pub fn new(applier: Arc<dyn Applier>, job_prefix: &str) -> Self {
        let job_name = format!("{job_prefix}:{}", applier.kind());
        Self { applier, job_name }
    }

    pub fn kind(&self) -> &ArtifactKind {
        self.applier.kind()
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn applier(&self) -> &Arc<dyn Applier> {
        &self.applier
    }

    /// Discovered → routed here?
    pub fn accepts(&self, resource: &Resource) -> bool {
        self.applier.accepts(&resource.location, &resource.kind)
    }

    /// Parsed → Accepted. Parse errors are returned for the caller to record
    /// against the location; definitions the applier does not accept are
    /// dropped here.
    pub fn load(&self, resource: &Resource) -> Result<Vec<Definition>> {
        let parsed = self.applier.parse(&resource.location, &resource.content)?;
        debug!(
            event = "synchronizer.parsed",
            location = %resource.location,
            definitions = parsed.len(),
        );
        Ok(parsed
            .into_iter()
            .filter(|d| {
                let accepted = self.applier.accepts(&d.location, &d.kind);
                if !accepted {
                    debug!(event = "synchronizer.rejected", key = %d.key(), job = %self.job_name);
                }
                accepted
            })
            .collect())
    }

    /// Choose the verb by diffing against the last persisted record.
    pub fn plan(definition: &Definition, record: Option<&DefinitionRecord>) -> Plan {
        match record {
            None => Plan::Apply(Verb::Create),
            Some(r) if r.checksum != definition.checksum => Plan::Apply(Verb::Update),
            Some(r) if r.lifecycle.is_settled() => Plan::Unchanged,
            Some(r) if r.lifecycle == Lifecycle::Pending => Plan::Probe,
            // A drop was started; the artifact has to be brought back.
            Some(r) if r.lifecycle == Lifecycle::Deleted => Plan::Apply(Verb::Create),
            // Failed: never confirmed in effect.
            Some(_) => Plan::Apply(Verb::Update),
        }
    }

    pub async fn prepare(&self) -> Result<()> {
        self.applier.prepare().await
    }

    /// Diff and, if needed, apply one definition. A `Pending` outcome means
    /// the caller should deplete it through [`probe`](Self::probe).
    pub async fn reconcile(
        &self,
        store: &dyn DefinitionStore,
        definition: &Definition,
    ) -> DefinitionOutcome {
        let key = definition.key();
        let record = match store.get(&key).await {
            Ok(record) => record,
            Err(e) => return DefinitionOutcome::definition_failed(definition, &e.into()),
        };

        match Self::plan(definition, record.as_ref()) {
            Plan::Unchanged => {
                debug!(event = "synchronizer.unchanged", key = %key);
                DefinitionOutcome::for_definition(definition, SyncState::Unchanged)
            }
            Plan::Probe => DefinitionOutcome::for_definition(definition, SyncState::Pending),
            Plan::Apply(Verb::Create) if record.is_some() => {
                // Left behind by a drop in flight; the definition starts over.
                if let Err(e) = store.remove(&key).await {
                    return DefinitionOutcome::definition_failed(definition, &e.into());
                }
                self.apply(store, definition, Verb::Create, None).await
            }
            Plan::Apply(verb) => self.apply(store, definition, verb, record).await,
        }
    }

    async fn apply(
        &self,
        store: &dyn DefinitionStore,
        definition: &Definition,
        verb: Verb,
        previous: Option<DefinitionRecord>,
    ) -> DefinitionOutcome {
        let key = definition.key();
        match self.applier.apply(definition, verb).await {
            Ok(ApplyOutcome::Done) => {
                let lifecycle = match verb {
                    Verb::Create => Lifecycle::Created,
                    _ => Lifecycle::Updated,
                };
                if let Err(e) = store.put(record_for(definition, lifecycle)).await {
                    return DefinitionOutcome::definition_failed(definition, &e.into());
                }
                obs::emit_definition_applied(&key, &verb.to_string());
                DefinitionOutcome::for_definition(definition, SyncState::Applied(verb))
            }
            Ok(ApplyOutcome::Pending) => {
                if let Err(e) = store.put(record_for(definition, Lifecycle::Pending)).await {
                    return DefinitionOutcome::definition_failed(definition, &e.into());
                }
                obs::emit_definition_pending(&key);
                DefinitionOutcome::for_definition(definition, SyncState::Pending)
            }
            Err(e) => {
                // Keep the last applied checksum so the next pass retries.
                if let Some(mut record) = previous {
                    record.lifecycle = Lifecycle::Failed;
                    record.message = Some(e.to_string());
                    if let Err(store_err) = store.put(record).await {
                        debug!(event = "synchronizer.record_failure_lost", key = %key, error = %store_err);
                    }
                }
                DefinitionOutcome::definition_failed(definition, &e)
            }
        }
    }

    pub fn probe<'a>(&'a self, definition: &'a Definition) -> CompletionProbe<'a> {
        CompletionProbe {
            applier: self.applier.as_ref(),
            definition,
            done: false,
        }
    }

    /// Record that a pending definition has completed.
    pub async fn settle(
        &self,
        store: &dyn DefinitionStore,
        definition: &Definition,
    ) -> DefinitionOutcome {
        let key = definition.key();
        let record = match store.get(&key).await {
            Ok(Some(record)) => record,
            Ok(None) => record_for(definition, Lifecycle::Pending),
            Err(e) => return DefinitionOutcome::definition_failed(definition, &e.into()),
        };
        // A pending create leaves both timestamps equal; an update moves
        // updated_at past created_at.
        let (lifecycle, verb) = if record.created_at == record.updated_at {
            (Lifecycle::Created, Verb::Create)
        } else {
            (Lifecycle::Updated, Verb::Update)
        };
        let settled = DefinitionRecord {
            lifecycle,
            message: None,
            ..record
        };
        if let Err(e) = store.put(settled).await {
            return DefinitionOutcome::definition_failed(definition, &e.into());
        }
        obs::emit_definition_applied(&key, &verb.to_string());
        DefinitionOutcome::for_definition(definition, SyncState::Applied(verb))
    }

    /// Ask the applier to drop a definition whose source vanished. The
    /// record is removed only once the applier confirms. An asynchronous
    /// drop leaves the record `Deleted` until [`is_complete`] reports it
    /// finished, either later in this pass (see [`forget`](Self::forget))
    /// or on a later pass.
    ///
    /// [`is_complete`]: Applier::is_complete
    pub async fn drop_record(
        &self,
        store: &dyn DefinitionStore,
        record: &DefinitionRecord,
    ) -> DefinitionOutcome {
        let definition = Definition::from_record(record);
        if record.lifecycle == Lifecycle::Deleted {
            if self.applier.is_complete(&definition) {
                return self.forget(store, record).await;
            }
            debug!(event = "synchronizer.drop_pending", key = %record.key);
            return DefinitionOutcome::for_definition(&definition, SyncState::Pending);
        }

        match self.applier.apply(&definition, Verb::Drop).await {
            Ok(ApplyOutcome::Done) => self.forget(store, record).await,
            Ok(ApplyOutcome::Pending) => {
                let deleted = DefinitionRecord {
                    lifecycle: Lifecycle::Deleted,
                    message: None,
                    ..record.clone()
                };
                if let Err(e) = store.put(deleted).await {
                    return DefinitionOutcome::definition_failed(&definition, &e.into());
                }
                obs::emit_definition_pending(&record.key);
                DefinitionOutcome::for_definition(&definition, SyncState::Pending)
            }
            Err(e) => {
                let failed = DefinitionRecord {
                    lifecycle: Lifecycle::Failed,
                    message: Some(e.to_string()),
                    ..record.clone()
                };
                if let Err(store_err) = store.put(failed).await {
                    debug!(event = "synchronizer.record_failure_lost", key = %record.key, error = %store_err);
                }
                DefinitionOutcome::definition_failed(&definition, &e)
            }
        }
    }

    /// Remove the record of a dropped definition.
    pub async fn forget(
        &self,
        store: &dyn DefinitionStore,
        record: &DefinitionRecord,
    ) -> DefinitionOutcome {
        let definition = Definition::from_record(record);
        if let Err(e) = store.remove(&record.key).await {
            return DefinitionOutcome::definition_failed(&definition, &e.into());
        }
        obs::emit_definition_applied(&record.key, &Verb::Drop.to_string());
        DefinitionOutcome::for_definition(&definition, SyncState::Applied(Verb::Drop))
    }
}

/// Fresh record reflecting `definition` as just applied.
fn record_for(definition: &Definition, lifecycle: Lifecycle) -> DefinitionRecord {
    let now = Utc::now();
    DefinitionRecord {
        key: definition.key(),
        id: definition.id.clone(),
        kind: definition.kind.to_string(),
        location: definition.location.clone(),
        name: definition.name.clone(),
        checksum: definition.checksum.clone(),
        dependencies: definition.dependencies.clone(),
        lifecycle,
        message: None,
        created_by: definition.created_by.clone(),
        created_at: now,
        updated_by: definition.created_by.clone(),
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use synchro_state::MemoryDefinitionStore;

    use crate::sync::manifest::ManifestCodec;

    struct Recorder {
        kind: ArtifactKind,
        calls: Mutex<Vec<(String, Verb)>>,
        fail: bool,
    }

    impl Recorder {
        fn new(fail: bool) -> Self {
            Self {
                kind: ArtifactKind::new("job"),
                calls: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl Applier for Recorder {
        fn kind(&self) -> &ArtifactKind {
            &self.kind
        }

        fn parse(&self, location: &str, content: &[u8]) -> Result<Vec<Definition>> {
            ManifestCodec::parse(&self.kind, location, content)
        }

        async fn apply(&self, definition: &Definition, verb: Verb) -> Result<ApplyOutcome> {
            self.calls.lock().unwrap().push((definition.name.clone(), verb));
            if self.fail {
                return Err(SyncError::apply(definition.key(), "boom"));
            }
            Ok(ApplyOutcome::Done)
        }
    }

    fn job(content: &str) -> Definition {
        ManifestCodec::parse(&ArtifactKind::new("job"), "/n.job", content.as_bytes())
            .unwrap()
            .remove(0)
    }

    #[test]
    fn plan_covers_every_lifecycle() {
        let def = job(r#"{"name":"n"}"#);
        assert_eq!(KindSynchronizer::plan(&def, None), Plan::Apply(Verb::Create));

        let mut rec = record_for(&def, Lifecycle::Created);
        assert_eq!(KindSynchronizer::plan(&def, Some(&rec)), Plan::Unchanged);
        rec.lifecycle = Lifecycle::Pending;
        assert_eq!(KindSynchronizer::plan(&def, Some(&rec)), Plan::Probe);
        rec.lifecycle = Lifecycle::Failed;
        assert_eq!(KindSynchronizer::plan(&def, Some(&rec)), Plan::Apply(Verb::Update));
        rec.lifecycle = Lifecycle::Deleted;
        assert_eq!(KindSynchronizer::plan(&def, Some(&rec)), Plan::Apply(Verb::Create));

        let changed = job(r#"{"name":"n","dependencies":["x"]}"#);
        rec.lifecycle = Lifecycle::Created;
        assert_eq!(KindSynchronizer::plan(&changed, Some(&rec)), Plan::Apply(Verb::Update));
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let applier = Arc::new(Recorder::new(false));
        let sync = KindSynchronizer::new(applier.clone(), "synchronizer");
        let store = MemoryDefinitionStore::new();
        let def = job(r#"{"name":"n"}"#);

        let first = sync.reconcile(&store, &def).await;
        let second = sync.reconcile(&store, &def).await;

        assert_eq!(first.state, SyncState::Applied(Verb::Create));
        assert_eq!(second.state, SyncState::Unchanged);
        assert_eq!(applier.calls.lock().unwrap().len(), 1);
        assert_eq!(sync.job_name(), "synchronizer:job");
    }

    #[tokio::test]
    async fn failed_update_keeps_old_checksum() {
        let store = MemoryDefinitionStore::new();
        let v1 = job(r#"{"name":"n"}"#);
        let ok = KindSynchronizer::new(Arc::new(Recorder::new(false)), "s");
        ok.reconcile(&store, &v1).await;

        let v2 = job(r#"{"name":"n","dependencies":["x"]}"#);
        let failing = KindSynchronizer::new(Arc::new(Recorder::new(true)), "s");
        let outcome = failing.reconcile(&store, &v2).await;
        assert_eq!(outcome.state, SyncState::Failed);
        assert!(outcome.message.unwrap().contains("boom"));

        let rec = store.get(&v2.key()).await.unwrap().unwrap();
        assert_eq!(rec.checksum, v1.checksum);
        assert_eq!(rec.lifecycle, Lifecycle::Failed);
    }

    #[tokio::test]
    async fn failed_create_leaves_no_record() {
        let store = MemoryDefinitionStore::new();
        let def = job(r#"{"name":"n"}"#);
        let sync = KindSynchronizer::new(Arc::new(Recorder::new(true)), "s");
        assert_eq!(sync.reconcile(&store, &def).await.state, SyncState::Failed);
        assert!(store.get(&def.key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn drop_removes_record_after_confirmation() {
        let store = MemoryDefinitionStore::new();
        let def = job(r#"{"name":"n"}"#);
        let applier = Arc::new(Recorder::new(false));
        let sync = KindSynchronizer::new(applier.clone(), "s");
        sync.reconcile(&store, &def).await;

        let rec = store.get(&def.key()).await.unwrap().unwrap();
        let outcome = sync.drop_record(&store, &rec).await;
        assert_eq!(outcome.state, SyncState::Applied(Verb::Drop));
        assert!(store.get(&def.key()).await.unwrap().is_none());
        assert_eq!(applier.calls.lock().unwrap()[1], ("n".to_string(), Verb::Drop));
    }

    #[tokio::test]
    async fn async_drop_keeps_deleted_record_until_complete() {
        struct SlowDrop {
            kind: ArtifactKind,
            finished: std::sync::atomic::AtomicBool,
        }

        #[async_trait]
        impl Applier for SlowDrop {
            fn kind(&self) -> &ArtifactKind {
                &self.kind
            }
            fn parse(&self, location: &str, content: &[u8]) -> Result<Vec<Definition>> {
                ManifestCodec::parse(&self.kind, location, content)
            }
            async fn apply(&self, _d: &Definition, verb: Verb) -> Result<ApplyOutcome> {
                Ok(match verb {
                    Verb::Drop => ApplyOutcome::Pending,
                    _ => ApplyOutcome::Done,
                })
            }
            fn is_complete(&self, _d: &Definition) -> bool {
                self.finished.load(std::sync::atomic::Ordering::SeqCst)
            }
        }

        let store = MemoryDefinitionStore::new();
        let def = job(r#"{"name":"n"}"#);
        let applier = Arc::new(SlowDrop {
            kind: ArtifactKind::new("job"),
            finished: std::sync::atomic::AtomicBool::new(false),
        });
        let sync = KindSynchronizer::new(applier.clone(), "s");
        sync.reconcile(&store, &def).await;

        let rec = store.get(&def.key()).await.unwrap().unwrap();
        assert_eq!(sync.drop_record(&store, &rec).await.state, SyncState::Pending);
        let deleted = store.get(&def.key()).await.unwrap().unwrap();
        assert_eq!(deleted.lifecycle, Lifecycle::Deleted);

        assert_eq!(sync.drop_record(&store, &deleted).await.state, SyncState::Pending);
        assert!(store.get(&def.key()).await.unwrap().is_some());

        applier
            .finished
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let outcome = sync.drop_record(&store, &deleted).await;
        assert_eq!(outcome.state, SyncState::Applied(Verb::Drop));
        assert!(store.get(&def.key()).await.unwrap().is_none());
    }

    #[test]
    fn load_filters_unaccepted_kinds() {
        struct TablesOnly(ArtifactKind);

        #[async_trait]
        impl Applier for TablesOnly {
            fn kind(&self) -> &ArtifactKind {
                &self.0
            }
            fn parse(&self, location: &str, _content: &[u8]) -> Result<Vec<Definition>> {
                Ok(vec![
                    Definition::new("table", location, "t", b"t"),
                    Definition::new("view", location, "v", b"v"),
                ])
            }
            async fn apply(&self, _d: &Definition, _v: Verb) -> Result<ApplyOutcome> {
                Ok(ApplyOutcome::Done)
            }
        }

        let sync = KindSynchronizer::new(Arc::new(TablesOnly(ArtifactKind::new("table"))), "s");
        let resource = Resource::new("/db/schema.table", "{}");
        assert!(sync.accepts(&resource));
        let loaded = sync.load(&resource).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "t");
    }
}
