//! Python bindings for the dependency graph utilities.
//!
//! Constraints are passed as `(id, [dependency ids])` pairs so operator
//! tooling can inspect a constraint set without building Rust evaluators.

// Allow clippy warning triggered by PyO3 macro expansion
#![allow(clippy::useless_conversion)]

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::dependency::{DependencyAnalyzer, DependencyGraph};

fn analyzer(constraints: &[(String, Vec<String>)]) -> DependencyAnalyzer {
    DependencyAnalyzer::from_graph(DependencyGraph::from_edges(
        constraints
            .iter()
            .map(|(id, deps)| (id.as_str(), deps.iter().map(String::as_str))),
    ))
}

/// Constraint ids with every dependency before its dependents.
///
/// # Raises
/// * ValueError if the constraints have a circular dependency
#[pyfunction]
fn topological_sort(constraints: Vec<(String, Vec<String>)>) -> PyResult<Vec<String>> {
    analyzer(&constraints)
        .topological_sort()
        .map_err(|e| PyValueError::new_err(e.to_string()))
}

/// Every elementary cycle, each listed once.
#[pyfunction]
fn detect_cycles(constraints: Vec<(String, Vec<String>)>) -> Vec<Vec<String>> {
    analyzer(&constraints).detect_cycles()
}

/// Waves of constraints that can be evaluated concurrently.
///
/// # Raises
/// * ValueError if the constraints have a circular dependency
#[pyfunction]
fn parallel_execution_groups(constraints: Vec<(String, Vec<String>)>) -> PyResult<Vec<Vec<String>>> {
    analyzer(&constraints)
        .get_parallel_execution_groups()
        .map_err(|e| PyValueError::new_err(e.to_string()))
}

#[pyfunction]
fn visualize_dependencies(constraints: Vec<(String, Vec<String>)>) -> String {
    analyzer(&constraints).visualize_dependencies()
}

/// Graphviz DOT rendering of the dependency graph.
#[pyfunction]
fn to_dot(constraints: Vec<(String, Vec<String>)>) -> String {
    analyzer(&constraints).to_dot()
}

/// The league_constraints Python module.
#[pymodule]
#[pyo3(name = "league_constraints")]
fn py_module(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(topological_sort, m)?)?;
    m.add_function(wrap_pyfunction!(detect_cycles, m)?)?;
    m.add_function(wrap_pyfunction!(parallel_execution_groups, m)?)?;
    m.add_function(wrap_pyfunction!(visualize_dependencies, m)?)?;
    m.add_function(wrap_pyfunction!(to_dot, m)?)?;
    Ok(())
}
