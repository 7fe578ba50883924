//! Dependency graph over the definitions of one reconciliation pass.
//!
//! An edge `A → B` means "A depends on B": B must be applied before A.
//! References are resolved once, when the graph is built:
//!
//! 1. an exact `"{kind}:{id}"` key match, otherwise
//! 2. a bare id that names exactly one definition across all kinds.
//!
//! Anything else is recorded as an [`UnresolvedDependency`] and the edge is
//! skipped. The dependent stays in the graph.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::Definition;

/// A dependency reference that matched no definition (or several).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedDependency {
    /// Key of the definition declaring the reference.
    pub dependent: String,
    pub reference: String,
    /// Number of definitions the bare id matched; 0 when missing, >1 when
    /// ambiguous across kinds.
    pub candidates: usize,
}

/// A definition rejected because its key was already taken in this pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateDefinition {
    pub key: String,
    pub location: String,
    pub first_location: String,
}

/// Sort-time wrapper around one definition.
#[derive(Debug, Clone)]
pub struct DependencyNode<'a> {
    definition: &'a Definition,
    key: String,
    dependencies: Vec<usize>,
}

impl<'a> DependencyNode<'a> {
    pub fn definition(&self) -> &'a Definition {
        self.definition
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Indices of resolved dependency nodes, in declaration order.
    pub fn dependencies(&self) -> &[usize] {
        &self.dependencies
    }
}

/// Node table for one pass, with dependency lists resolved by lookup.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph<'a> {
    nodes: Vec<DependencyNode<'a>>,
    index: HashMap<String, usize>,
    unresolved: Vec<UnresolvedDependency>,
    duplicates: Vec<DuplicateDefinition>,
}

impl<'a> DependencyGraph<'a> {
    /// Build the graph. Node order follows input order; a definition whose
    /// key was already seen is left out and reported as a duplicate.
    pub fn build<I>(definitions: I) -> Self
    where
        I: IntoIterator<Item = &'a Definition>,
    {
        let mut graph = DependencyGraph::default();
        let mut by_id: HashMap<&'a str, Vec<usize>> = HashMap::new();

        for definition in definitions {
            let key = definition.key();
            if let Some(&first) = graph.index.get(&key) {
                let first_location = graph.nodes[first].definition.location.clone();
                warn!(
                    event = "graph.duplicate_definition",
                    key = %key,
                    location = %definition.location,
                    first_location = %first_location,
                );
                graph.duplicates.push(DuplicateDefinition {
                    key,
                    location: definition.location.clone(),
                    first_location,
                });
                continue;
            }
            let idx = graph.nodes.len();
            graph.index.insert(key.clone(), idx);
            by_id.entry(definition.id.as_str()).or_default().push(idx);
            graph.nodes.push(DependencyNode {
                definition,
                key,
                dependencies: Vec::new(),
            });
        }

        for idx in 0..graph.nodes.len() {
            let definition = graph.nodes[idx].definition;
            let mut resolved = Vec::with_capacity(definition.dependencies.len());
            for reference in &definition.dependencies {
                let target = match graph.index.get(reference) {
                    Some(&target) => Some(target),
                    None => match by_id.get(reference.as_str()).map(Vec::as_slice) {
                        Some([only]) => Some(*only),
                        other => {
                            let candidates = other.map_or(0, <[usize]>::len);
                            graph.unresolved.push(UnresolvedDependency {
                                dependent: graph.nodes[idx].key.clone(),
                                reference: reference.clone(),
                                candidates,
                            });
                            None
                        }
                    },
                };
                if let Some(target) = target {
                    if !resolved.contains(&target) {
                        resolved.push(target);
                    }
                }
            }
            graph.nodes[idx].dependencies = resolved;
        }

        graph
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, idx: usize) -> &DependencyNode<'a> {
        &self.nodes[idx]
    }

    pub fn nodes(&self) -> &[DependencyNode<'a>] {
        &self.nodes
    }

    /// Look a node up by `"{kind}:{id}"` key.
    pub fn get(&self, key: &str) -> Option<&DependencyNode<'a>> {
        self.index.get(key).map(|&idx| &self.nodes[idx])
    }

    pub fn unresolved(&self) -> &[UnresolvedDependency] {
        &self.unresolved
    }

    pub fn duplicates(&self) -> &[DuplicateDefinition] {
        &self.duplicates
    }

    /// Resolved edges as `(dependent, dependency)` definition pairs.
    pub fn edges(&self) -> impl Iterator<Item = (&'a Definition, &'a Definition)> + '_ {
        self.nodes.iter().flat_map(move |node| {
            node.dependencies
                .iter()
                .map(move |&dep| (node.definition, self.nodes[dep].definition))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(kind: &str, name: &str, deps: &[&str]) -> Definition {
        Definition::new(kind, format!("/demo/{name}.{kind}"), name, name.as_bytes())
            .with_dependencies(deps.iter().copied())
    }

    #[test]
    fn resolves_by_key_and_bare_id() {
        let table = def("table", "orders", &[]);
        let view = def("view", "open_orders", &["table:/demo/orders.table:orders"]);
        let job = def("job", "purge", &["/demo/open_orders.view:open_orders"]);
        let defs = vec![table, view, job];
        let graph = DependencyGraph::build(&defs);

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.node(1).dependencies(), &[0]);
        assert_eq!(graph.node(2).dependencies(), &[1]);
        assert!(graph.unresolved().is_empty());
    }

    #[test]
    fn missing_reference_is_recorded_not_fatal() {
        let defs = vec![def("job", "x", &["ghost"])];
        let graph = DependencyGraph::build(&defs);

        assert_eq!(graph.len(), 1);
        assert!(graph.node(0).dependencies().is_empty());
        assert_eq!(graph.unresolved().len(), 1);
        assert_eq!(graph.unresolved()[0].reference, "ghost");
        assert_eq!(graph.unresolved()[0].candidates, 0);
    }

    #[test]
    fn ambiguous_bare_id_is_unresolved() {
        let a = Definition::new("table", "/demo/shared", "x", b"1");
        let b = Definition::new("view", "/demo/shared", "x", b"2");
        let c = def("job", "reader", &["/demo/shared:x"]);
        let defs = vec![a, b, c];
        let graph = DependencyGraph::build(&defs);

        assert!(graph.node(2).dependencies().is_empty());
        assert_eq!(graph.unresolved()[0].candidates, 2);
    }

    #[test]
    fn duplicate_keys_keep_first() {
        let first = Definition::new("job", "/a.job", "a", b"first");
        let second = Definition::new("job", "/a.job", "a", b"second");
        let defs = vec![first.clone(), second];
        let graph = DependencyGraph::build(&defs);

        assert_eq!(graph.len(), 1);
        assert_eq!(graph.node(0).definition().checksum, first.checksum);
        assert_eq!(graph.duplicates().len(), 1);
    }

    #[test]
    fn edges_lists_resolved_pairs() {
        let defs = vec![def("table", "t", &[]), def("view", "v", &["table:/demo/t.table:t"])];
        let graph = DependencyGraph::build(&defs);
        let edges: Vec<(String, String)> = graph
            .edges()
            .map(|(a, b)| (a.name.clone(), b.name.clone()))
            .collect();
        assert_eq!(edges, vec![("v".to_string(), "t".to_string())]);
    }
}
