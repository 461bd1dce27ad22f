//! Partition a working set of constraints into ordered evaluation waves.

use crate::config::GroupingStrategy;
use crate::dependency::DependencyGraph;
use crate::interner::NodeId;
use crate::models::UnifiedConstraint;

/// Ordered waves of indices into the working set.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ExecutionPlan {
    /// The strategy actually used (`Smart` is resolved to a concrete one).
    pub strategy: GroupingStrategy,
    pub waves: Vec<Vec<usize>>,
    /// Dependency cycles inside the working set. Ordering by dependency is
    /// dropped when non-empty.
    pub cycles: Vec<Vec<String>>,
}

fn base_rank(strategy: GroupingStrategy, constraint: &UnifiedConstraint) -> usize {
    match strategy {
        GroupingStrategy::Type => constraint.constraint_type.rank(),
        GroupingStrategy::Hardness => constraint.hardness.rank(),
        GroupingStrategy::Dependency | GroupingStrategy::Smart => 0,
    }
}

/// Build the wave plan for `constraints`.
///
/// Each constraint starts at the base rank of the strategy; a constraint is
/// then pushed past every in-set dependency so that dependencies always run
/// in an earlier wave. Dependencies outside the working set are ignored.
pub(crate) fn plan_waves(
    constraints: &[&UnifiedConstraint],
    strategy: GroupingStrategy,
    parallel_enabled: bool,
    min_parallel_constraints: usize,
) -> ExecutionPlan {
    let graph = DependencyGraph::from_edges(
        constraints
            .iter()
            .map(|c| (c.id.as_str(), c.dependencies.iter().map(String::as_str))),
    );
    let order = graph.topo_nodes();
    let cycles = if order.is_err() {
        graph.detect_cycles()
    } else {
        Vec::new()
    };

    let strategy = match strategy {
        GroupingStrategy::Smart => {
            let independent = (0..graph.len() as NodeId)
                .filter(|&n| graph.node_deps(n).is_empty())
                .count();
            if order.is_ok() && parallel_enabled && independent >= min_parallel_constraints {
                GroupingStrategy::Dependency
            } else {
                GroupingStrategy::Hardness
            }
        }
        other => other,
    };

    // Duplicate ids share a node; the node takes the largest base rank.
    let node_of: Vec<NodeId> = constraints
        .iter()
        .map(|c| graph.index.get(&c.id).unwrap_or_default())
        .collect();
    let mut wave = vec![0usize; graph.len()];
    for (i, c) in constraints.iter().enumerate() {
        let node = node_of[i] as usize;
        wave[node] = wave[node].max(base_rank(strategy, c));
    }
    if let Ok(order) = &order {
        for &node in order {
            let after_deps = graph
                .node_deps(node)
                .iter()
                .map(|&dep| wave[dep as usize] + 1)
                .max()
                .unwrap_or(0);
            wave[node as usize] = wave[node as usize].max(after_deps);
        }
    }

    let mut levels: Vec<usize> = wave.clone();
    levels.sort_unstable();
    levels.dedup();
    let waves = levels
        .iter()
        .map(|&level| {
            (0..constraints.len())
                .filter(|&i| wave[node_of[i] as usize] == level)
                .collect()
        })
        .collect();

    ExecutionPlan {
        strategy,
        waves,
        cycles,
    }
}
