//! Reactive Primitives
//!
//! This module implements the state side of Pulse: cells, the change
//! tracker, the tracking context and the [`Runtime`] that ties them to the
//! dependency graph and the scheduler.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A [`Cell`] is a handle to a unit of mutable state. When a cell is read
//! while a node is evaluating, the node becomes a dependent of the cell.
//! When the cell's value changes, all dependents are marked dirty.
//!
//! ## Nodes
//!
//! A node is a closure registered with [`Runtime::create_node`]: a render
//! closure or a derived computation. Nodes never run on write; they run when
//! the scheduler flushes their batch.
//!
//! ## Scopes
//!
//! Scopes own cells and nodes and release them together. Shared state lives
//! in the nearest common scope of the components that use it.
//!
//! # Implementation Notes
//!
//! Dependency detection is automatic: each runtime keeps a stack of
//! tracking frames and every read lands in the innermost one. The recorded
//! set replaces the node's edges wholesale after each successful evaluation.

mod cell;
mod context;
mod equality;
mod runtime;
mod scope;
mod tracker;

pub use cell::{Cell, WriteOutcome};
pub use context::{TrackingGuard, TrackingStack};
pub use equality::Equality;
pub use runtime::Runtime;
pub use scope::ScopeId;
pub use tracker::{ChangeTracker, WatchDecision, WatchId};
