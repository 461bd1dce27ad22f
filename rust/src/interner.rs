//! Constraint id interning for graph algorithms.
//!
//! Maps constraint id strings to dense integer node ids so adjacency can be
//! stored in vectors.

use rustc_hash::FxHashMap;

/// Dense node id (u32 for compact adjacency lists).
pub type NodeId = u32;

/// Bidirectional mapping between constraint ids and node ids.
///
/// Node ids are assigned in first-seen order, which keeps graph algorithms
/// deterministic with respect to the input order of constraints.
#[derive(Debug, Clone)]
pub struct ConstraintIndex {
    to_node: FxHashMap<String, NodeId>,
    from_node: Vec<String>,
}

impl ConstraintIndex {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            to_node: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            from_node: Vec::with_capacity(capacity),
        }
    }

    /// Intern an id, returning its node id. Existing ids keep their node id.
    pub fn intern(&mut self, id: &str) -> NodeId {
        if let Some(&node) = self.to_node.get(id) {
            return node;
        }
        let node = self.from_node.len() as NodeId;
        self.from_node.push(id.to_string());
        self.to_node.insert(id.to_string(), node);
        node
    }

    #[inline]
    pub fn get(&self, id: &str) -> Option<NodeId> {
        self.to_node.get(id).copied()
    }

    /// Resolve a node id that is known to exist.
    #[inline]
    pub(crate) fn name(&self, node: NodeId) -> &str {
        &self.from_node[node as usize]
    }

    pub fn len(&self) -> usize {
        self.from_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.from_node.is_empty()
    }

    /// All ids in node order.
    pub fn ids(&self) -> &[String] {
        &self.from_node
    }
}

impl Default for ConstraintIndex {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_assigns_dense_ids() {
        let mut index = ConstraintIndex::with_capacity(4);

        let a = index.intern("venue_availability");
        let b = index.intern("rest_days");
        let again = index.intern("venue_availability");

        assert_eq!(a, again);
        assert_ne!(a, b);
        assert_eq!(a, 0);
        assert_eq!(b, 1);

        assert_eq!(index.name(b), "rest_days");
        assert_eq!(index.get("missing"), None);
        assert_eq!(index.ids(), &["venue_availability".to_string(), "rest_days".to_string()]);
    }
}
