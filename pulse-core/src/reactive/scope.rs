//! Ownership Scopes
//!
//! Scopes form a tree that owns cells and nodes. Disposing a scope disposes
//! every descendant scope first, then everything the scope owns. A cell that
//! several nodes share lives in the nearest common ancestor of their scopes,
//! so it outlives each of them individually.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::PulseError;
use crate::graph::{CellId, NodeId};

/// Unique identifier for a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Scope {
    parent: Option<ScopeId>,
    children: Vec<ScopeId>,
    cells: Vec<CellId>,
    nodes: Vec<NodeId>,
}

/// What a teardown released, children first.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Teardown {
    pub(crate) cells: Vec<CellId>,
    pub(crate) nodes: Vec<NodeId>,
}

/// The scope tree of one runtime.
#[derive(Debug)]
pub(crate) struct ScopeTree {
    root: ScopeId,
    scopes: HashMap<ScopeId, Scope>,
    cell_owner: HashMap<CellId, ScopeId>,
    node_owner: HashMap<NodeId, ScopeId>,
}

impl ScopeTree {
    pub(crate) fn new() -> Self {
        let root = ScopeId::new();
        let mut scopes = HashMap::new();
        scopes.insert(root, Scope::default());
        Self {
            root,
            scopes,
            cell_owner: HashMap::new(),
            node_owner: HashMap::new(),
        }
    }

    pub(crate) fn root(&self) -> ScopeId {
        self.root
    }

    pub(crate) fn contains(&self, scope: ScopeId) -> bool {
        self.scopes.contains_key(&scope)
    }

    pub(crate) fn create_child(&mut self, parent: ScopeId) -> Result<ScopeId, PulseError> {
        let id = ScopeId::new();
        self.scopes
            .get_mut(&parent)
            .ok_or(PulseError::UnknownScope(parent))?
            .children
            .push(id);
        self.scopes.insert(
            id,
            Scope {
                parent: Some(parent),
                ..Scope::default()
            },
        );
        Ok(id)
    }

    pub(crate) fn adopt_cell(&mut self, scope: ScopeId, cell: CellId) -> Result<(), PulseError> {
        self.scopes
            .get_mut(&scope)
            .ok_or(PulseError::UnknownScope(scope))?
            .cells
            .push(cell);
        self.cell_owner.insert(cell, scope);
        Ok(())
    }

    pub(crate) fn adopt_node(&mut self, scope: ScopeId, node: NodeId) -> Result<(), PulseError> {
        self.scopes
            .get_mut(&scope)
            .ok_or(PulseError::UnknownScope(scope))?
            .nodes
            .push(node);
        self.node_owner.insert(node, scope);
        Ok(())
    }

    /// Give a cell to the root scope.
    pub(crate) fn adopt_cell_root(&mut self, cell: CellId) {
        self.scopes.entry(self.root).or_default().cells.push(cell);
        self.cell_owner.insert(cell, self.root);
    }

    /// Give a node to the root scope.
    pub(crate) fn adopt_node_root(&mut self, node: NodeId) {
        self.scopes.entry(self.root).or_default().nodes.push(node);
        self.node_owner.insert(node, self.root);
    }

    /// Drop ownership of a cell disposed on its own.
    pub(crate) fn forget_cell(&mut self, cell: CellId) {
        if let Some(owner) = self.cell_owner.remove(&cell) {
            if let Some(scope) = self.scopes.get_mut(&owner) {
                scope.cells.retain(|c| *c != cell);
            }
        }
    }

    /// Drop ownership of a node disposed on its own.
    pub(crate) fn forget_node(&mut self, node: NodeId) {
        if let Some(owner) = self.node_owner.remove(&node) {
            if let Some(scope) = self.scopes.get_mut(&owner) {
                scope.nodes.retain(|n| *n != node);
            }
        }
    }

    pub(crate) fn owner_of_cell(&self, cell: CellId) -> Option<ScopeId> {
        self.cell_owner.get(&cell).copied()
    }

    pub(crate) fn owner_of_node(&self, node: NodeId) -> Option<ScopeId> {
        self.node_owner.get(&node).copied()
    }

    /// The deepest scope that is an ancestor of (or equal to) both.
    pub(crate) fn nearest_common(&self, a: ScopeId, b: ScopeId) -> Option<ScopeId> {
        if !self.contains(a) || !self.contains(b) {
            return None;
        }
        let ancestors: HashSet<ScopeId> = self.ancestors(a).collect();
        self.ancestors(b).find(|scope| ancestors.contains(scope))
    }

    /// Remove a scope and its whole subtree.
    ///
    /// The root scope itself survives; only its contents are released.
    pub(crate) fn teardown(&mut self, scope: ScopeId) -> Result<Teardown, PulseError> {
        if !self.contains(scope) {
            return Err(PulseError::UnknownScope(scope));
        }
        let mut released = Teardown::default();
        self.release(scope, &mut released);

        if scope != self.root {
            if let Some(parent) = self.parent(scope) {
                if let Some(parent) = self.scopes.get_mut(&parent) {
                    parent.children.retain(|child| *child != scope);
                }
            }
            self.scopes.remove(&scope);
        }
        Ok(released)
    }

    fn release(&mut self, scope: ScopeId, released: &mut Teardown) {
        let Some(entry) = self.scopes.get_mut(&scope) else {
            return;
        };
        let children = std::mem::take(&mut entry.children);
        let cells = std::mem::take(&mut entry.cells);
        let nodes = std::mem::take(&mut entry.nodes);

        for child in children {
            self.release(child, released);
            self.scopes.remove(&child);
        }
        for node in nodes {
            self.node_owner.remove(&node);
            released.nodes.push(node);
        }
        for cell in cells {
            self.cell_owner.remove(&cell);
            released.cells.push(cell);
        }
    }

    fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.scopes.get(&scope).and_then(|s| s.parent)
    }

    fn ancestors(&self, scope: ScopeId) -> impl Iterator<Item = ScopeId> + '_ {
        std::iter::successors(Some(scope), move |current| self.parent(*current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_common_ancestor() {
        let mut tree = ScopeTree::new();
        let root = tree.root();
        let page = tree.create_child(root).unwrap();
        let left = tree.create_child(page).unwrap();
        let right = tree.create_child(page).unwrap();
        let leaf = tree.create_child(left).unwrap();

        assert_eq!(tree.nearest_common(leaf, right), Some(page));
        assert_eq!(tree.nearest_common(leaf, left), Some(left));
        assert_eq!(tree.nearest_common(leaf, leaf), Some(leaf));
        assert_eq!(tree.nearest_common(right, root), Some(root));
    }

    #[test]
    fn teardown_releases_subtree_children_first() {
        let mut tree = ScopeTree::new();
        let parent = tree.create_child(tree.root()).unwrap();
        let child = tree.create_child(parent).unwrap();

        let (a, b) = (CellId::from(1), CellId::from(2));
        let n = NodeId::from(3);
        tree.adopt_cell(parent, a).unwrap();
        tree.adopt_cell(child, b).unwrap();
        tree.adopt_node(child, n).unwrap();

        let released = tree.teardown(parent).unwrap();
        assert_eq!(released.cells, vec![b, a]);
        assert_eq!(released.nodes, vec![n]);
        assert!(!tree.contains(parent));
        assert!(!tree.contains(child));
        assert_eq!(tree.owner_of_cell(a), None);
        assert_eq!(
            tree.create_child(child),
            Err(PulseError::UnknownScope(child))
        );
    }

    #[test]
    fn root_survives_teardown() {
        let mut tree = ScopeTree::new();
        let root = tree.root();
        let cell = CellId::from(8);
        let node = NodeId::from(9);
        tree.adopt_cell_root(cell);
        tree.adopt_node_root(node);
        assert_eq!(tree.owner_of_cell(cell), Some(root));

        let released = tree.teardown(root).unwrap();
        assert_eq!(released.cells, vec![cell]);
        assert_eq!(released.nodes, vec![node]);
        assert!(tree.contains(root));

        tree.adopt_cell_root(CellId::from(10));
        assert_eq!(tree.owner_of_cell(CellId::from(10)), Some(root));
    }

    #[test]
    fn forgotten_entries_are_not_released() {
        let mut tree = ScopeTree::new();
        let scope = tree.create_child(tree.root()).unwrap();
        let node = NodeId::from(5);
        tree.adopt_node(scope, node).unwrap();
        assert_eq!(tree.owner_of_node(node), Some(scope));

        tree.forget_node(node);
        assert_eq!(tree.teardown(scope).unwrap(), Teardown::default());
    }
}
