//! In-memory fakes for storage traits
//!
//! Provides `MemoryDefinitionStore`, which satisfies the `DefinitionStore`
//! contract without touching the filesystem. Used by tests and by daemons
//! that are happy to re-apply everything after a restart.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryDefinitionStore
// ---------------------------------------------------------------------------

/// In-memory definition store backed by a `BTreeMap<key, record>`.
#[derive(Debug, Default)]
pub struct MemoryDefinitionStore {
    records: Mutex<BTreeMap<String, DefinitionRecord>>,
}

impl MemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, BTreeMap<String, DefinitionRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DefinitionStore for MemoryDefinitionStore {
    async fn get(&self, key: &str) -> StorageResult<Option<DefinitionRecord>> {
        Ok(self.records().get(key).cloned())
    }

    async fn put(&self, record: DefinitionRecord) -> StorageResult<()> {
        let mut records = self.records();
        let record = match records.get(&record.key) {
            Some(existing) => record.preserving_creation(existing),
            None => record,
        };
        records.insert(record.key.clone(), record);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.records().remove(key);
        Ok(())
    }

    async fn list(&self) -> StorageResult<Vec<DefinitionRecord>> {
        Ok(self.records().values().cloned().collect())
    }
}
