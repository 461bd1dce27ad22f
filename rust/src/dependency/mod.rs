//! Constraint dependency analysis.
//!
//! Builds a directed graph over constraints from their declared dependency
//! lists and derives evaluation order, parallel waves, cycles and
//! optimization hints from it.

mod graph;
mod optimize;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::UnifiedConstraint;

pub use graph::{
    build_dependency_graph, DependencyGraph, MissingDependency, MAX_REPORTED_CYCLES,
};
pub use optimize::{CriticalPath, OptimizationReport, RedundantDependency};

/// Structural errors in the dependency graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DependencyError {
    /// The graph has a cycle; `involved` lists every constraint that could not be ordered.
    #[error("Circular dependency detected among constraints: {}", .involved.join(", "))]
    CircularDependency { involved: Vec<String> },
}

/// Summary numbers for dashboards.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyStats {
    pub constraint_count: usize,
    pub edge_count: usize,
    /// `None` when the graph has cycles.
    pub max_depth: Option<usize>,
    /// Constraints without dependencies.
    pub independent_count: usize,
    /// Constraints with neither dependencies nor dependents.
    pub isolated_count: usize,
}

/// Dependency analysis over one constraint set.
#[derive(Clone, Debug, Default)]
pub struct DependencyAnalyzer {
    graph: DependencyGraph,
}

impl DependencyAnalyzer {
    pub fn new(constraints: &[UnifiedConstraint]) -> Self {
        Self {
            graph: build_dependency_graph(constraints),
        }
    }

    pub fn from_graph(graph: DependencyGraph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Every elementary cycle; see [`DependencyGraph::detect_cycles`].
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        self.graph.detect_cycles()
    }

    pub fn has_cycles(&self) -> bool {
        self.graph.topo_nodes().is_err()
    }

    pub fn topological_sort(&self) -> Result<Vec<String>, DependencyError> {
        self.graph.topological_sort()
    }

    pub fn get_dependents(&self, constraint_id: &str) -> Vec<String> {
        self.graph.get_dependents(constraint_id)
    }

    pub fn get_direct_dependents(&self, constraint_id: &str) -> Vec<String> {
        self.graph.get_direct_dependents(constraint_id)
    }

    pub fn calculate_dependency_depths(&self) -> Result<FxHashMap<String, usize>, DependencyError> {
        self.graph.calculate_dependency_depths()
    }

    pub fn get_parallel_execution_groups(&self) -> Result<Vec<Vec<String>>, DependencyError> {
        self.graph.get_parallel_execution_groups()
    }

    pub fn find_missing_dependencies(&self) -> Vec<MissingDependency> {
        self.graph.missing_dependencies().to_vec()
    }

    pub fn visualize_dependencies(&self) -> String {
        self.graph.visualize()
    }

    pub fn to_dot(&self) -> String {
        self.graph.to_dot()
    }

    pub fn stats(&self) -> DependencyStats {
        let g = &self.graph;
        let ids = 0..g.len() as crate::interner::NodeId;
        DependencyStats {
            constraint_count: g.len(),
            edge_count: g.edge_count(),
            max_depth: g
                .node_depths()
                .ok()
                .map(|depths| depths.into_iter().max().unwrap_or(0)),
            independent_count: ids.clone().filter(|&n| g.node_deps(n).is_empty()).count(),
            isolated_count: ids
                .filter(|&n| g.node_deps(n).is_empty() && g.node_dependents(n).is_empty())
                .count(),
        }
    }

    /// Redundant edges, critical path (given average times in ms), waves and
    /// structural problems, plus plain-language recommendations.
    pub fn suggest_optimizations(
        &self,
        timings_ms: Option<&FxHashMap<String, f64>>,
    ) -> OptimizationReport {
        let redundant_dependencies = self.graph.find_redundant_dependencies();
        let cycles = self.graph.detect_cycles();
        let missing_dependencies = self.find_missing_dependencies();
        let parallel_groups = self.get_parallel_execution_groups().unwrap_or_default();
        let critical_path = timings_ms.and_then(|t| self.graph.critical_path(t));

        let mut recommendations = Vec::new();
        for r in &redundant_dependencies {
            recommendations.push(format!(
                "Remove redundant dependency {} -> {} ({})",
                r.constraint_id, r.dependency_id, r.reason
            ));
        }
        for cycle in &cycles {
            recommendations.push(format!(
                "Break circular dependency {} -> {}",
                cycle.join(" -> "),
                cycle.first().map(String::as_str).unwrap_or_default()
            ));
        }
        for m in &missing_dependencies {
            recommendations.push(format!(
                "Define constraint '{}' or drop it from the dependencies of '{}'",
                m.missing_id, m.constraint_id
            ));
        }
        for (wave, group) in parallel_groups.iter().enumerate() {
            if group.len() > 1 {
                recommendations.push(format!(
                    "Wave {}: {} constraints can be evaluated in parallel",
                    wave,
                    group.len()
                ));
            }
        }
        if let Some(path) = &critical_path {
            if path.constraint_ids.len() > 1 {
                recommendations.push(format!(
                    "Critical path {} takes {:.1}ms; speeding up these constraints shortens every run",
                    path.constraint_ids.join(" -> "),
                    path.total_time_ms
                ));
            }
        }

        OptimizationReport {
            redundant_dependencies,
            critical_path,
            parallel_groups,
            missing_dependencies,
            cycles,
            recommendations,
        }
    }
}
