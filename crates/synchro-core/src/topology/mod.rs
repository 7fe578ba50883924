//! Dependency modelling, ordering and depletion.
//!
//! Provides:
//! - [`graph::DependencyGraph`]: per-pass node table with resolved references
//! - [`sorter::TopologicalSorter`]: dependency-first, cycle-tolerant ordering
//! - [`depleter::deplete`]: fixpoint loop over [`depleter::Depletable`] items

pub mod depleter;
pub mod graph;
pub mod sorter;

pub use depleter::{deplete, Depletable};
pub use graph::{DependencyGraph, DependencyNode, DuplicateDefinition, UnresolvedDependency};
pub use sorter::{sort, Cycle, SortOutcome, TopologicalSorter};
