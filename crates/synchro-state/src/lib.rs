//! Synchro-State: persisted reconciliation state
//!
//! This crate holds the only state the reconciler needs to survive a
//! restart: the last applied checksum and lifecycle of every definition.
//! Everything else is re-derived from the content store on the next pass.
//!
//! ## Layer 0 - Data/Persistence
//!
//! ## Key Components
//!
//! - `ContentDigest`: SHA-256 checksum of raw definition bytes
//! - `DefinitionRecord` / `Lifecycle`: persisted per-definition state
//! - `DefinitionStore`: async storage trait
//! - `MemoryDefinitionStore`, `FileDefinitionStore`: implementations

mod error;
pub mod fakes;
mod file_store;
pub mod storage_traits;

pub use error::StorageError;
pub use fakes::MemoryDefinitionStore;
pub use file_store::FileDefinitionStore;
pub use storage_traits::{
    ContentDigest, DefinitionRecord, DefinitionStore, Lifecycle, StorageResult,
};
