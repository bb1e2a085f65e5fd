//! Dependency Edges
//!
//! The dependency graph stores, for every node, the cells it read during its
//! last successful evaluation, and for every cell, the nodes that read it.
//! Both directions are kept so that a write can find its dependents in O(1)
//! and a re-evaluation can prune exactly the edges it no longer needs.
//!
//! Edges are only ever replaced wholesale through [`DependencyGraph::replace_edges`],
//! which is what makes tracking precise: a node that stops reading a cell is
//! removed from that cell's dependent set in the same step that records its
//! new reads.

use std::collections::HashMap;

use indexmap::IndexSet;
use smallvec::SmallVec;

use super::node::{CellId, NodeId};

/// Result of replacing a node's edges.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EdgeDelta {
    /// Cells the node started reading.
    pub added: Vec<CellId>,
    /// Cells the node no longer reads.
    pub removed: Vec<CellId>,
}

impl EdgeDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Bidirectional cell/node edge store.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Cells each node read during its last evaluation.
    reads: HashMap<NodeId, IndexSet<CellId>>,

    /// Nodes reading each cell, in subscription order.
    dependents: HashMap<CellId, IndexSet<NodeId>>,
}

impl DependencyGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all of `node`'s edges with `reads`.
    ///
    /// Additions and removals are applied together; the returned delta lists
    /// both.
    pub fn replace_edges(&mut self, node: NodeId, reads: IndexSet<CellId>) -> EdgeDelta {
        let previous = self.reads.remove(&node).unwrap_or_default();
        let mut delta = EdgeDelta::default();

        for cell in previous.iter() {
            if !reads.contains(cell) {
                self.unlink(*cell, node);
                delta.removed.push(*cell);
            }
        }

        for cell in reads.iter() {
            if !previous.contains(cell) {
                self.dependents.entry(*cell).or_default().insert(node);
                delta.added.push(*cell);
            }
        }

        if !reads.is_empty() {
            self.reads.insert(node, reads);
        }

        delta
    }

    /// Nodes currently depending on `cell`, in subscription order.
    pub fn notify(&self, cell: CellId) -> SmallVec<[NodeId; 8]> {
        self.dependents
            .get(&cell)
            .map(|nodes| nodes.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Remove a node and every edge involving it.
    ///
    /// Returns the number of edges dropped.
    pub fn remove_node(&mut self, node: NodeId) -> usize {
        let Some(reads) = self.reads.remove(&node) else {
            return 0;
        };
        for cell in reads.iter() {
            self.unlink(*cell, node);
        }
        reads.len()
    }

    /// Remove a cell and every edge involving it.
    ///
    /// Returns the nodes that were reading it.
    pub fn remove_cell(&mut self, cell: CellId) -> Vec<NodeId> {
        let Some(nodes) = self.dependents.remove(&cell) else {
            return Vec::new();
        };
        for node in nodes.iter() {
            if let Some(reads) = self.reads.get_mut(node) {
                reads.shift_remove(&cell);
                if reads.is_empty() {
                    self.reads.remove(node);
                }
            }
        }
        nodes.into_iter().collect()
    }

    /// Cells `node` read during its last evaluation.
    pub fn dependencies(&self, node: NodeId) -> Vec<CellId> {
        self.reads
            .get(&node)
            .map(|reads| reads.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Nodes reading `cell`.
    pub fn dependents(&self, cell: CellId) -> Vec<NodeId> {
        self.notify(cell).into_vec()
    }

    /// Whether `node` currently depends on `cell`.
    pub fn depends_on(&self, node: NodeId, cell: CellId) -> bool {
        self.reads
            .get(&node)
            .is_some_and(|reads| reads.contains(&cell))
    }

    /// Total number of cell -> node edges.
    pub fn edge_count(&self) -> usize {
        self.reads.values().map(IndexSet::len).sum()
    }

    fn unlink(&mut self, cell: CellId, node: NodeId) {
        if let Some(nodes) = self.dependents.get_mut(&cell) {
            // shift_remove keeps the remaining dependents in subscription order
            nodes.shift_remove(&node);
            if nodes.is_empty() {
                self.dependents.remove(&cell);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(cells: &[CellId]) -> IndexSet<CellId> {
        cells.iter().copied().collect()
    }

    #[test]
    fn replace_edges_adds_and_removes() {
        let mut graph = DependencyGraph::new();
        let node = NodeId::new();
        let a = CellId::new();
        let b = CellId::new();
        let c = CellId::new();

        let delta = graph.replace_edges(node, set(&[a, b]));
        assert_eq!(delta.added, vec![a, b]);
        assert!(delta.removed.is_empty());
        assert_eq!(graph.edge_count(), 2);

        let delta = graph.replace_edges(node, set(&[b, c]));
        assert_eq!(delta.added, vec![c]);
        assert_eq!(delta.removed, vec![a]);

        assert!(graph.notify(a).is_empty());
        assert_eq!(graph.notify(b).as_slice(), &[node]);
        assert_eq!(graph.notify(c).as_slice(), &[node]);
    }

    #[test]
    fn notify_preserves_subscription_order() {
        let mut graph = DependencyGraph::new();
        let cell = CellId::new();
        let first = NodeId::new();
        let second = NodeId::new();
        let third = NodeId::new();

        graph.replace_edges(first, set(&[cell]));
        graph.replace_edges(second, set(&[cell]));
        graph.replace_edges(third, set(&[cell]));
        graph.remove_node(second);

        assert_eq!(graph.notify(cell).as_slice(), &[first, third]);
    }

    #[test]
    fn remove_node_drops_all_edges() {
        let mut graph = DependencyGraph::new();
        let node = NodeId::new();
        let a = CellId::new();
        let b = CellId::new();

        graph.replace_edges(node, set(&[a, b]));
        assert_eq!(graph.remove_node(node), 2);

        assert_eq!(graph.edge_count(), 0);
        assert!(graph.notify(a).is_empty());
        assert!(graph.dependencies(node).is_empty());
    }

    #[test]
    fn remove_cell_prunes_readers() {
        let mut graph = DependencyGraph::new();
        let n1 = NodeId::new();
        let n2 = NodeId::new();
        let shared = CellId::new();
        let own = CellId::new();

        graph.replace_edges(n1, set(&[shared, own]));
        graph.replace_edges(n2, set(&[shared]));

        let readers = graph.remove_cell(shared);
        assert_eq!(readers, vec![n1, n2]);
        assert_eq!(graph.dependencies(n1), vec![own]);
        assert!(graph.dependencies(n2).is_empty());
        assert!(!graph.depends_on(n1, shared));
    }

    #[test]
    fn empty_read_set_clears_node() {
        let mut graph = DependencyGraph::new();
        let node = NodeId::new();
        let cell = CellId::new();

        graph.replace_edges(node, set(&[cell]));
        let delta = graph.replace_edges(node, IndexSet::new());

        assert_eq!(delta.removed, vec![cell]);
        assert_eq!(graph.edge_count(), 0);
    }
}
