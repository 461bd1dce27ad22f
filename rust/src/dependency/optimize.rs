//! Dependency optimization hints and textual exports.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::interner::NodeId;

use super::graph::{DependencyGraph, MissingDependency};

/// An edge already implied by a longer dependency chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedundantDependency {
    pub constraint_id: String,
    pub dependency_id: String,
    /// The transitive chain that already implies the edge, dependent first.
    pub via: Vec<String>,
    pub reason: String,
}

/// Longest dependency chain by cumulative evaluation time, root dependency first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CriticalPath {
    pub constraint_ids: Vec<String>,
    pub total_time_ms: f64,
}

/// Everything `suggest_optimizations` found.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub redundant_dependencies: Vec<RedundantDependency>,
    /// Present once timing data exists and the graph is acyclic.
    pub critical_path: Option<CriticalPath>,
    /// Empty when the graph has cycles.
    pub parallel_groups: Vec<Vec<String>>,
    pub missing_dependencies: Vec<MissingDependency>,
    pub cycles: Vec<Vec<String>>,
    pub recommendations: Vec<String>,
}

fn quote(id: &str) -> String {
    format!("\"{}\"", id.replace('\\', "\\\\").replace('"', "\\\""))
}

impl DependencyGraph {
    /// Edges A -> C that are implied by some other direct dependency A -> B ->* C.
    pub fn find_redundant_dependencies(&self) -> Vec<RedundantDependency> {
        let mut redundant = Vec::new();
        for node in 0..self.len() as NodeId {
            let direct = self.node_deps(node);
            for &target in direct {
                let chain = direct
                    .iter()
                    .filter(|&&other| other != target && other != node)
                    .find_map(|&other| self.dependency_path(other, target));
                if let Some(chain) = chain {
                    let mut via = vec![node];
                    via.extend(chain);
                    let via = self.names(&via);
                    let constraint_id = self.index.name(node).to_string();
                    let dependency_id = self.index.name(target).to_string();
                    let reason = format!(
                        "'{}' already depends on '{}' transitively via {}",
                        constraint_id,
                        dependency_id,
                        via.join(" -> ")
                    );
                    redundant.push(RedundantDependency {
                        constraint_id,
                        dependency_id,
                        via,
                        reason,
                    });
                }
            }
        }
        redundant
    }

    /// Chain with the largest cumulative time, given average times per constraint.
    ///
    /// Returns `None` without timing data or when the graph has cycles.
    /// Constraints without a timing entry count as zero.
    pub fn critical_path(&self, timings_ms: &FxHashMap<String, f64>) -> Option<CriticalPath> {
        if timings_ms.is_empty() || self.is_empty() {
            return None;
        }
        let order = self.topo_nodes().ok()?;
        let weight =
            |node: NodeId| timings_ms.get(self.index.name(node)).copied().unwrap_or(0.0);

        let mut best = vec![0.0f64; self.len()];
        let mut pred: Vec<Option<NodeId>> = vec![None; self.len()];
        for node in order {
            let mut heaviest: Option<(NodeId, f64)> = None;
            for &dep in self.node_deps(node) {
                let cost = best[dep as usize];
                if heaviest.map_or(true, |(_, c)| cost > c) {
                    heaviest = Some((dep, cost));
                }
            }
            best[node as usize] = weight(node) + heaviest.map_or(0.0, |(_, c)| c);
            pred[node as usize] = heaviest.map(|(dep, _)| dep);
        }

        let mut end: NodeId = 0;
        for node in 1..self.len() as NodeId {
            if best[node as usize] > best[end as usize] {
                end = node;
            }
        }

        let mut path = vec![end];
        let mut cursor = end;
        while let Some(prev) = pred[cursor as usize] {
            path.push(prev);
            cursor = prev;
        }
        path.reverse();

        Some(CriticalPath {
            constraint_ids: self.names(&path),
            total_time_ms: best[end as usize],
        })
    }

    /// Human-readable level-by-level description of the graph.
    pub fn visualize(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Constraint dependency graph: {} constraints, {} edges",
            self.len(),
            self.edge_count()
        );

        match self.node_depths() {
            Ok(depths) => {
                let levels = depths.iter().max().map(|d| d + 1).unwrap_or(0);
                for level in 0..levels {
                    let _ = writeln!(out, "Level {}:", level);
                    for (node, _) in depths.iter().enumerate().filter(|(_, &d)| d == level) {
                        self.write_node_line(&mut out, node as NodeId);
                    }
                }
            }
            Err(_) => {
                let _ = writeln!(out, "Cycles detected:");
                for cycle in self.detect_cycles() {
                    let mut closed = cycle.clone();
                    if let Some(first) = cycle.first() {
                        closed.push(first.clone());
                    }
                    let _ = writeln!(out, "  {}", closed.join(" -> "));
                }
                let _ = writeln!(out, "Constraints:");
                for node in 0..self.len() as NodeId {
                    self.write_node_line(&mut out, node);
                }
            }
        }

        if !self.missing_dependencies().is_empty() {
            let _ = writeln!(out, "Missing dependencies:");
            for m in self.missing_dependencies() {
                let _ = writeln!(out, "  {} (required by {})", m.missing_id, m.constraint_id);
            }
        }
        out
    }

    fn write_node_line(&self, out: &mut String, node: NodeId) {
        let deps = self.names(self.node_deps(node));
        if deps.is_empty() {
            let _ = writeln!(out, "  {}", self.index.name(node));
        } else {
            let _ = writeln!(out, "  {} <- {}", self.index.name(node), deps.join(", "));
        }
    }

    /// Graphviz DOT export. Edges point from dependent to dependency.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph constraints {\n  rankdir=LR;\n");
        for node in 0..self.len() as NodeId {
            let _ = writeln!(out, "  {};", quote(self.index.name(node)));
        }
        for node in 0..self.len() as NodeId {
            for &dep in self.node_deps(node) {
                let _ = writeln!(
                    out,
                    "  {} -> {};",
                    quote(self.index.name(node)),
                    quote(self.index.name(dep))
                );
            }
        }
        for m in self.missing_dependencies() {
            let _ = writeln!(
                out,
                "  {} -> {} [style=dashed, color=red];",
                quote(&m.constraint_id),
                quote(&m.missing_id)
            );
        }
        out.push_str("}\n");
        out
    }
}
