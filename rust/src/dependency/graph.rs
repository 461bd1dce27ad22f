//! Constraint dependency graph and its core traversals.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::interner::{ConstraintIndex, NodeId};
use crate::models::UnifiedConstraint;

use super::DependencyError;

/// A declared dependency that does not resolve to a known constraint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingDependency {
    /// Constraint declaring the dependency.
    pub constraint_id: String,
    /// The id that could not be resolved.
    pub missing_id: String,
}

/// Upper bound on cycles returned by [`DependencyGraph::detect_cycles`].
pub const MAX_REPORTED_CYCLES: usize = 10_000;

/// Working state of one start node's circuit search.
struct CircuitSearch<'a> {
    start: NodeId,
    blocked: &'a mut [bool],
    /// node -> nodes to unblock once it is unblocked
    block_map: &'a mut [Vec<NodeId>],
    stack: &'a mut Vec<NodeId>,
    cycles: &'a mut Vec<Vec<NodeId>>,
}

impl CircuitSearch<'_> {
    fn unblock(&mut self, node: NodeId) {
        let mut pending = vec![node];
        while let Some(u) = pending.pop() {
            self.blocked[u as usize] = false;
            for w in std::mem::take(&mut self.block_map[u as usize]) {
                if self.blocked[w as usize] {
                    pending.push(w);
                }
            }
        }
    }
}

/// Directed graph over constraints. Edges point from dependent to dependency.
#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    pub(crate) index: ConstraintIndex,
    /// node -> nodes it depends on
    deps: Vec<Vec<NodeId>>,
    /// node -> nodes that depend on it
    dependents: Vec<Vec<NodeId>>,
    missing: Vec<MissingDependency>,
    edge_count: usize,
}

/// Build the dependency graph of a constraint set in O(V+E).
///
/// Unknown dependency ids are recorded as missing rather than added as nodes.
pub fn build_dependency_graph(constraints: &[UnifiedConstraint]) -> DependencyGraph {
    DependencyGraph::from_edges(
        constraints
            .iter()
            .map(|c| (c.id.as_str(), c.dependencies.iter().map(String::as_str))),
    )
}

impl DependencyGraph {
    /// Build a graph from `(id, dependency ids)` pairs.
    pub fn from_edges<'a, I, D>(nodes: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, D)>,
        D: IntoIterator<Item = &'a str>,
    {
        let declared: Vec<(&str, Vec<&str>)> = nodes
            .into_iter()
            .map(|(id, deps)| (id, deps.into_iter().collect()))
            .collect();

        // First pass: every declared constraint becomes a node
        let mut index = ConstraintIndex::with_capacity(declared.len());
        for (id, _) in &declared {
            index.intern(id);
        }

        let n = index.len();
        let mut deps: Vec<Vec<NodeId>> = vec![Vec::new(); n];
        let mut dependents: Vec<Vec<NodeId>> = vec![Vec::new(); n];
        let mut missing = Vec::new();
        let mut seen_edges: FxHashSet<(NodeId, NodeId)> = FxHashSet::default();

        // Second pass: edges
        for (id, dep_ids) in &declared {
            let Some(from) = index.get(id) else { continue };
            for dep_id in dep_ids {
                match index.get(dep_id) {
                    Some(to) => {
                        if seen_edges.insert((from, to)) {
                            deps[from as usize].push(to);
                            dependents[to as usize].push(from);
                        }
                    }
                    None => missing.push(MissingDependency {
                        constraint_id: id.to_string(),
                        missing_id: dep_id.to_string(),
                    }),
                }
            }
        }

        Self {
            index,
            deps,
            dependents,
            missing,
            edge_count: seen_edges.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Constraint ids in input order.
    pub fn ids(&self) -> &[String] {
        self.index.ids()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.get(id).is_some()
    }

    /// Known direct dependencies of a constraint.
    pub fn dependencies_of(&self, id: &str) -> Vec<String> {
        self.index
            .get(id)
            .map(|node| self.names(&self.deps[node as usize]))
            .unwrap_or_default()
    }

    pub fn missing_dependencies(&self) -> &[MissingDependency] {
        &self.missing
    }

    pub(crate) fn node_deps(&self, node: NodeId) -> &[NodeId] {
        &self.deps[node as usize]
    }

    pub(crate) fn node_dependents(&self, node: NodeId) -> &[NodeId] {
        &self.dependents[node as usize]
    }

    pub(crate) fn names(&self, nodes: &[NodeId]) -> Vec<String> {
        nodes.iter().map(|&n| self.index.name(n).to_string()).collect()
    }

    /// Every elementary cycle, each listed once (Johnson's circuit search).
    ///
    /// Each cycle is listed in edge order starting at its smallest node, so
    /// `[a, b]` means a depends on b and b depends on a. A self-dependency is
    /// a cycle of length one. Cycles are ordered by their first node, then by
    /// search order. At most [`MAX_REPORTED_CYCLES`] are returned.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        let n = self.len();
        let mut blocked = vec![false; n];
        let mut block_map: Vec<Vec<NodeId>> = vec![Vec::new(); n];
        let mut stack: Vec<NodeId> = Vec::new();
        let mut cycles: Vec<Vec<NodeId>> = Vec::new();

        for start in 0..n as NodeId {
            if cycles.len() >= MAX_REPORTED_CYCLES {
                break;
            }
            for node in start as usize..n {
                blocked[node] = false;
                block_map[node].clear();
            }
            let mut search = CircuitSearch {
                start,
                blocked: &mut blocked,
                block_map: &mut block_map,
                stack: &mut stack,
                cycles: &mut cycles,
            };
            self.circuit(start, &mut search);
        }
        cycles.iter().map(|cycle| self.names(cycle)).collect()
    }

    /// Extend the current path from `node`; true if it closed a cycle.
    fn circuit(&self, node: NodeId, search: &mut CircuitSearch<'_>) -> bool {
        let mut closed = false;
        search.stack.push(node);
        search.blocked[node as usize] = true;

        for &next in &self.deps[node as usize] {
            if search.cycles.len() >= MAX_REPORTED_CYCLES {
                break;
            }
            // Cycles through smaller nodes were found from their own start
            if next < search.start {
                continue;
            }
            if next == search.start {
                search.cycles.push(search.stack.clone());
                closed = true;
            } else if !search.blocked[next as usize] && self.circuit(next, search) {
                closed = true;
            }
        }

        if closed {
            search.unblock(node);
        } else {
            for &next in &self.deps[node as usize] {
                if next >= search.start {
                    let waiting = &mut search.block_map[next as usize];
                    if !waiting.contains(&node) {
                        waiting.push(node);
                    }
                }
            }
        }
        search.stack.pop();
        closed
    }

    /// Kahn's algorithm over node ids; dependencies come first.
    ///
    /// On failure returns the nodes that could not be ordered.
    pub(crate) fn topo_nodes(&self) -> Result<Vec<NodeId>, Vec<NodeId>> {
        let n = self.len();
        let mut remaining: Vec<usize> = self.deps.iter().map(|d| d.len()).collect();
        let mut queue: VecDeque<NodeId> = (0..n as NodeId)
            .filter(|&node| remaining[node as usize] == 0)
            .collect();
        let mut order = Vec::with_capacity(n);

        while let Some(node) = queue.pop_front() {
            order.push(node);
            for &dependent in &self.dependents[node as usize] {
                let degree = &mut remaining[dependent as usize];
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if order.len() != n {
            let stuck = (0..n as NodeId)
                .filter(|&node| remaining[node as usize] > 0)
                .collect();
            return Err(stuck);
        }
        Ok(order)
    }

    /// Order constraints so every dependency precedes its dependents.
    ///
    /// Fails with `CircularDependency` if any cycle exists; run
    /// `detect_cycles` first to get the cycles themselves.
    pub fn topological_sort(&self) -> Result<Vec<String>, DependencyError> {
        self.topo_nodes()
            .map(|order| self.names(&order))
            .map_err(|stuck| DependencyError::CircularDependency {
                involved: self.names(&stuck),
            })
    }

    /// Longest path from an independent constraint, per node.
    pub(crate) fn node_depths(&self) -> Result<Vec<usize>, DependencyError> {
        let order = self.topo_nodes().map_err(|stuck| DependencyError::CircularDependency {
            involved: self.names(&stuck),
        })?;
        let mut depths = vec![0usize; self.len()];
        for node in order {
            depths[node as usize] = self.deps[node as usize]
                .iter()
                .map(|&dep| depths[dep as usize] + 1)
                .max()
                .unwrap_or(0);
        }
        Ok(depths)
    }

    pub fn calculate_dependency_depths(&self) -> Result<FxHashMap<String, usize>, DependencyError> {
        let depths = self.node_depths()?;
        Ok(depths
            .iter()
            .enumerate()
            .map(|(node, &depth)| (self.index.name(node as NodeId).to_string(), depth))
            .collect())
    }

    /// Partition constraints into waves. Wave N holds every constraint whose
    /// dependencies all sit in waves < N; members of a wave are independent.
    pub fn get_parallel_execution_groups(&self) -> Result<Vec<Vec<String>>, DependencyError> {
        let depths = self.node_depths()?;
        let wave_count = depths.iter().max().map(|d| d + 1).unwrap_or(0);
        let mut groups: Vec<Vec<String>> = vec![Vec::new(); wave_count];
        for (node, &depth) in depths.iter().enumerate() {
            groups[depth].push(self.index.name(node as NodeId).to_string());
        }
        Ok(groups)
    }

    /// One-hop consumers of a constraint.
    pub fn get_direct_dependents(&self, id: &str) -> Vec<String> {
        self.index
            .get(id)
            .map(|node| self.names(&self.dependents[node as usize]))
            .unwrap_or_default()
    }

    /// All transitive consumers of a constraint, nearest first.
    pub fn get_dependents(&self, id: &str) -> Vec<String> {
        let Some(start) = self.index.get(id) else {
            return Vec::new();
        };
        let mut visited = vec![false; self.len()];
        visited[start as usize] = true;
        let mut queue: VecDeque<NodeId> = VecDeque::from([start]);
        let mut found = Vec::new();

        while let Some(node) = queue.pop_front() {
            for &dependent in &self.dependents[node as usize] {
                if !visited[dependent as usize] {
                    visited[dependent as usize] = true;
                    found.push(dependent);
                    queue.push_back(dependent);
                }
            }
        }
        self.names(&found)
    }

    /// Shortest dependency path from `from` to `to` following dependency edges.
    pub(crate) fn dependency_path(&self, from: NodeId, to: NodeId) -> Option<Vec<NodeId>> {
        let mut parent: Vec<Option<NodeId>> = vec![None; self.len()];
        let mut visited = vec![false; self.len()];
        visited[from as usize] = true;
        let mut queue: VecDeque<NodeId> = VecDeque::from([from]);

        while let Some(node) = queue.pop_front() {
            if node == to {
                let mut path = vec![to];
                let mut cursor = to;
                while let Some(prev) = parent[cursor as usize] {
                    path.push(prev);
                    cursor = prev;
                }
                path.reverse();
                return Some(path);
            }
            for &dep in &self.deps[node as usize] {
                if !visited[dep as usize] {
                    visited[dep as usize] = true;
                    parent[dep as usize] = Some(node);
                    queue.push_back(dep);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: Vec<(&'static str, Vec<&'static str>)>) -> DependencyGraph {
        DependencyGraph::from_edges(nodes.into_iter())
    }

    fn position(order: &[String], id: &str) -> usize {
        order.iter().position(|x| x == id).unwrap()
    }

    #[test]
    fn test_empty_graph() {
        let g = graph(vec![]);
        assert!(g.is_empty());
        assert!(g.detect_cycles().is_empty());
        assert_eq!(g.topological_sort().unwrap(), Vec::<String>::new());
        assert!(g.get_parallel_execution_groups().unwrap().is_empty());
    }

    #[test]
    fn test_topological_order_respects_edges() {
        let g = graph(vec![
            ("d", vec!["b", "c"]),
            ("b", vec!["a"]),
            ("c", vec!["a"]),
            ("a", vec![]),
        ]);
        let order = g.topological_sort().unwrap();
        assert_eq!(order.len(), 4);
        for (dependent, dependency) in [("d", "b"), ("d", "c"), ("b", "a"), ("c", "a")] {
            assert!(position(&order, dependency) < position(&order, dependent));
        }
    }

    #[test]
    fn test_cycle_fails_sort_and_is_detected() {
        let g = graph(vec![("a", vec!["b"]), ("b", vec!["c"]), ("c", vec!["a"]), ("d", vec![])]);

        let err = g.topological_sort().unwrap_err();
        let DependencyError::CircularDependency { involved } = err;
        assert_eq!(involved, vec!["a", "b", "c"]);

        let cycles = g.detect_cycles();
        assert_eq!(cycles, vec![vec!["a".to_string(), "b".to_string(), "c".to_string()]]);
    }

    #[test]
    fn test_self_dependency_is_cycle_of_length_one() {
        let g = graph(vec![("a", vec!["a"]), ("b", vec![])]);
        assert_eq!(g.detect_cycles(), vec![vec!["a".to_string()]]);
        assert!(g.topological_sort().is_err());
    }

    #[test]
    fn test_distinct_cycles_reported_once() {
        // Two cycles sharing node b
        let g = graph(vec![("a", vec!["b"]), ("b", vec!["a", "c"]), ("c", vec!["b"])]);
        let cycles = g.detect_cycles();
        assert_eq!(cycles.len(), 2);
        assert!(cycles.contains(&vec!["a".to_string(), "b".to_string()]));
        assert!(cycles.contains(&vec!["b".to_string(), "c".to_string()]));
    }

    #[test]
    fn test_every_elementary_cycle_is_found() {
        // a -> b -> c -> a and the chord a -> c -> a
        let g = graph(vec![("a", vec!["b", "c"]), ("b", vec!["c"]), ("c", vec!["a"])]);
        let s = |ids: &[&str]| ids.iter().map(|x| x.to_string()).collect::<Vec<_>>();
        assert_eq!(g.detect_cycles(), vec![s(&["a", "b", "c"]), s(&["a", "c"])]);
    }

    #[test]
    fn test_cycles_in_dense_component() {
        // Complete digraph on three nodes: three 2-cycles and two 3-cycles
        let g = graph(vec![("a", vec!["b", "c"]), ("b", vec!["a", "c"]), ("c", vec!["a", "b"])]);
        let cycles = g.detect_cycles();
        assert_eq!(cycles.len(), 5);
        let unique: FxHashSet<Vec<String>> = cycles.iter().cloned().collect();
        assert_eq!(unique.len(), 5);
        assert!(cycles.iter().all(|c| c[0] == "a" || (c[0] == "b" && c == &["b", "c"])));
    }

    #[test]
    fn test_depths_and_groups() {
        let g = graph(vec![
            ("a", vec![]),
            ("b", vec!["a"]),
            ("c", vec!["b", "a"]),
            ("x", vec![]),
        ]);
        let depths = g.calculate_dependency_depths().unwrap();
        assert_eq!(depths["a"], 0);
        assert_eq!(depths["b"], 1);
        assert_eq!(depths["c"], 2);
        assert_eq!(depths["x"], 0);

        let groups = g.get_parallel_execution_groups().unwrap();
        assert_eq!(
            groups,
            vec![
                vec!["a".to_string(), "x".to_string()],
                vec!["b".to_string()],
                vec!["c".to_string()],
            ]
        );
    }

    #[test]
    fn test_isolated_constraint_is_its_own_group() {
        let g = graph(vec![("solo", vec![])]);
        assert_eq!(
            g.get_parallel_execution_groups().unwrap(),
            vec![vec!["solo".to_string()]]
        );
    }

    #[test]
    fn test_dependents() {
        let g = graph(vec![("a", vec![]), ("b", vec!["a"]), ("c", vec!["b"]), ("d", vec!["a"])]);
        assert_eq!(g.get_direct_dependents("a"), vec!["b", "d"]);
        assert_eq!(g.get_dependents("a"), vec!["b", "d", "c"]);
        assert!(g.get_dependents("c").is_empty());
        assert!(g.get_dependents("unknown").is_empty());
    }

    #[test]
    fn test_missing_dependencies_reported_not_fatal() {
        let g = graph(vec![("a", vec!["ghost"]), ("b", vec!["a"])]);
        assert_eq!(
            g.missing_dependencies(),
            &[MissingDependency {
                constraint_id: "a".to_string(),
                missing_id: "ghost".to_string(),
            }]
        );
        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.topological_sort().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let g = graph(vec![("a", vec![]), ("b", vec!["a", "a"])]);
        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.dependencies_of("b"), vec!["a"]);
    }
}
