//! Dependency-first ordering of a [`DependencyGraph`].
//!
//! Depth-first post-order traversal driven by an explicit work stack, so
//! graph depth is bounded by heap rather than by the call stack. Roots are
//! taken in graph (input) order and dependencies in declaration order, which
//! makes the result deterministic for a fixed input.
//!
//! A dependency that is still on the current path is a back edge. It is not
//! re-entered; the cycle is reported and the traversal carries on, so every
//! node is still emitted exactly once.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::Definition;
use crate::topology::graph::{DependencyGraph, UnresolvedDependency};

/// Keys of the definitions forming one detected cycle, in path order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle {
    pub members: Vec<String>,
}

/// Result of sorting one graph.
#[derive(Debug, Clone)]
pub struct SortOutcome<'a> {
    /// Dependencies before dependents.
    pub ordered: Vec<&'a Definition>,
    pub cycles: Vec<Cycle>,
    pub unresolved: Vec<UnresolvedDependency>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnPath,
    Finished,
}

/// Stateless sorter; every call owns its own visit marks.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopologicalSorter;

impl TopologicalSorter {
    pub fn new() -> Self {
        Self
    }

    /// Order the graph's definitions so that every resolved dependency
    /// precedes its dependent.
    pub fn sort<'a>(&self, graph: &DependencyGraph<'a>) -> Vec<&'a Definition> {
        self.sort_with_report(graph).ordered
    }

    /// Like [`sort`](Self::sort), also returning detected cycles and the
    /// graph's unresolved references.
    pub fn sort_with_report<'a>(&self, graph: &DependencyGraph<'a>) -> SortOutcome<'a> {
        let n = graph.len();
        let mut marks = vec![Mark::Unvisited; n];
        let mut emitted = vec![false; n];
        let mut ordered = Vec::with_capacity(n);
        let mut cycles = Vec::new();
        // (node, index of the next dependency to visit)
        let mut stack: Vec<(usize, usize)> = Vec::new();

        for root in 0..n {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            marks[root] = Mark::OnPath;
            stack.push((root, 0));

            while let Some(frame) = stack.last_mut() {
                let (node, cursor) = *frame;
                let deps = graph.node(node).dependencies();

                if cursor < deps.len() {
                    frame.1 += 1;
                    let dep = deps[cursor];
                    match marks[dep] {
                        Mark::Unvisited => {
                            marks[dep] = Mark::OnPath;
                            stack.push((dep, 0));
                        }
                        Mark::OnPath => {
                            // OnPath marks exactly the nodes on the stack.
                            let start = stack.iter().position(|&(n, _)| n == dep);
                            debug_assert!(start.is_some(), "on-path node missing from stack");
                            if let Some(start) = start {
                                let members: Vec<String> = stack[start..]
                                    .iter()
                                    .map(|&(n, _)| graph.node(n).key().to_string())
                                    .collect();
                                debug!(event = "sort.cycle_detected", members = ?members);
                                cycles.push(Cycle { members });
                            }
                        }
                        Mark::Finished => {}
                    }
                    continue;
                }

                stack.pop();
                marks[node] = Mark::Finished;
                // Emit once even when reached through several paths.
                if !emitted[node] {
                    emitted[node] = true;
                    ordered.push(graph.node(node).definition());
                }
            }
        }

        SortOutcome {
            ordered,
            cycles,
            unresolved: graph.unresolved().to_vec(),
        }
    }
}

/// Sort owned definitions, returning clones in dependency order.
pub fn sort(definitions: &[Definition]) -> Vec<Definition> {
    let graph = DependencyGraph::build(definitions);
    TopologicalSorter::new()
        .sort(&graph)
        .into_iter()
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, deps: &[&str]) -> Definition {
        Definition::new("job", format!("/{name}.job"), name, name.as_bytes())
            .with_dependencies(deps.iter().map(|d| format!("job:/{d}.job:{d}")))
    }

    fn names(defs: &[&Definition]) -> Vec<String> {
        defs.iter().map(|d| d.name.clone()).collect()
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn chain_is_dependency_first() {
        let defs = vec![def("a", &["b"]), def("b", &["c"]), def("c", &[])];
        let graph = DependencyGraph::build(&defs);
        let order = names(&TopologicalSorter::new().sort(&graph));
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[test]
    fn diamond_emits_each_node_once() {
        // d depends on b and c, both depend on a
        let defs = vec![
            def("d", &["b", "c"]),
            def("b", &["a"]),
            def("c", &["a"]),
            def("a", &[]),
        ];
        let graph = DependencyGraph::build(&defs);
        let order = names(&TopologicalSorter::new().sort(&graph));
        assert_eq!(order.len(), 4);
        assert!(position(&order, "a") < position(&order, "b"));
        assert!(position(&order, "a") < position(&order, "c"));
        assert!(position(&order, "b") < position(&order, "d"));
        assert!(position(&order, "c") < position(&order, "d"));
    }

    #[test]
    fn independent_nodes_keep_input_order() {
        let defs = vec![def("z", &[]), def("m", &[]), def("a", &[])];
        let graph = DependencyGraph::build(&defs);
        assert_eq!(names(&TopologicalSorter::new().sort(&graph)), vec!["z", "m", "a"]);
    }

    #[test]
    fn two_cycle_terminates_and_is_reported() {
        let defs = vec![def("a", &["b"]), def("b", &["a"])];
        let graph = DependencyGraph::build(&defs);
        let outcome = TopologicalSorter::new().sort_with_report(&graph);

        let order = names(&outcome.ordered);
        assert_eq!(order.len(), 2);
        assert_eq!(order.iter().filter(|n| *n == "a").count(), 1);
        assert_eq!(order.iter().filter(|n| *n == "b").count(), 1);
        assert_eq!(outcome.cycles.len(), 1);
        assert_eq!(
            outcome.cycles[0].members,
            vec!["job:/a.job:a".to_string(), "job:/b.job:b".to_string()]
        );
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let defs = vec![def("a", &["a"])];
        let graph = DependencyGraph::build(&defs);
        let outcome = TopologicalSorter::new().sort_with_report(&graph);
        assert_eq!(names(&outcome.ordered), vec!["a"]);
        assert_eq!(outcome.cycles[0].members, vec!["job:/a.job:a".to_string()]);
    }

    #[test]
    fn cycle_below_root_excludes_the_path_above_it() {
        let defs = vec![
            def("x", &["a"]),
            def("a", &["b"]),
            def("b", &["c"]),
            def("c", &["a"]),
        ];
        let graph = DependencyGraph::build(&defs);
        let outcome = TopologicalSorter::new().sort_with_report(&graph);

        assert_eq!(outcome.cycles.len(), 1);
        assert_eq!(
            outcome.cycles[0].members,
            vec![
                "job:/a.job:a".to_string(),
                "job:/b.job:b".to_string(),
                "job:/c.job:c".to_string(),
            ]
        );
        let order = names(&outcome.ordered);
        assert_eq!(order.last().map(String::as_str), Some("x"));
    }

    #[test]
    fn missing_dependency_still_emitted() {
        let x = Definition::new("job", "/x.job", "x", b"x").with_dependencies(["ghost"]);
        let sorted = sort(std::slice::from_ref(&x));
        assert_eq!(sorted, vec![x]);
    }

    #[test]
    fn deep_chain_does_not_overflow() {
        let depth = 50_000;
        let defs: Vec<Definition> = (0..depth)
            .map(|i| {
                let d = Definition::new("job", format!("/n{i}"), "n", b"n");
                if i + 1 < depth {
                    d.with_dependencies([format!("job:/n{}:n", i + 1)])
                } else {
                    d
                }
            })
            .collect();
        let graph = DependencyGraph::build(&defs);
        let order = TopologicalSorter::new().sort(&graph);
        assert_eq!(order.len(), depth);
        assert_eq!(order[0].location, format!("/n{}", depth - 1));
        assert_eq!(order[depth - 1].location, "/n0");
    }
}
