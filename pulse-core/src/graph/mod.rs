//! Dependency Graph
//!
//! This module implements the graph that tracks which state cells are read by
//! which nodes (computations and render closures).
//!
//! # Overview
//!
//! The graph is bipartite:
//!
//! - Cells are observable units of state
//! - Nodes are closures that read cells
//! - An edge from a cell to a node means the node read the cell during its
//!   most recent successful evaluation
//!
//! When a cell changes, [`DependencyGraph::notify`] yields the nodes to mark
//! dirty. When a node re-evaluates, its edges are replaced wholesale so that
//! no stale edge can cause a phantom invalidation.
//!
//! # Design Decisions
//!
//! 1. The graph is centralized and indexed by id for O(1) lookups.
//!
//! 2. Both directions (node -> cells read, cell -> dependent nodes) are kept
//!    so pruning and notification are both cheap.
//!
//! 3. Dependent sets are insertion-ordered, which keeps notification order
//!    deterministic.

mod dependency;
mod node;

pub use dependency::{DependencyGraph, EdgeDelta};
pub use node::{CellId, DirtyState, NodeId, NodeRecord, Tier};
