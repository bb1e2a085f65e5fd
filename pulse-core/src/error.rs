//! Error types for the Pulse runtime.
//!
//! Errors raised while evaluating a node are isolated to that node: the
//! scheduler collects them into the [`TickReport`](crate::scheduler::TickReport)
//! and keeps flushing the rest of the batch.

use thiserror::Error;

use crate::graph::{CellId, NodeId};
use crate::reactive::ScopeId;

/// Errors produced by the reactive core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PulseError {
    /// `track` was re-entered for a node that is already evaluating.
    ///
    /// The evaluation is aborted and the node keeps its previous edges.
    #[error("cyclic evaluation: {node} re-entered track while already evaluating")]
    CyclicEvaluation { node: NodeId },

    /// A node kept re-dirtying itself across consecutive batches.
    ///
    /// The node is suspended until [`Runtime::reset_node`](crate::Runtime::reset_node).
    #[error("render loop: {node} re-marked in {batches} consecutive batches, node suspended")]
    RenderLoop { node: NodeId, batches: u32 },

    /// The cell does not exist (never created, or its scope was disposed).
    #[error("unknown cell {0}")]
    UnknownCell(CellId),

    /// The node does not exist.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// The scope does not exist or was disposed.
    #[error("unknown scope {0}")]
    UnknownScope(ScopeId),

    /// The cell holds a value of a different type than the handle expects.
    #[error("cell {cell} holds a value of a different type")]
    TypeMismatch { cell: CellId },

    /// A node's evaluation function reported a failure.
    #[error("evaluation of {node} failed: {message}")]
    Evaluation { node: NodeId, message: String },

    /// A list index past the end of the sequence.
    #[error("index {index} out of range for sequence of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// The offload pool could not start a worker thread.
    #[error("failed to spawn offload worker: {0}")]
    WorkerSpawn(String),
}

impl PulseError {
    /// Build an evaluation failure for the node currently being tracked.
    ///
    /// Node closures use this to report domain errors; the scheduler fills in
    /// the node id when the error surfaces outside a tracked evaluation.
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation {
            node: NodeId::DETACHED,
            message: message.into(),
        }
    }

    /// Fill in the node of a detached evaluation failure.
    pub(crate) fn attributed_to(self, node: NodeId) -> Self {
        match self {
            Self::Evaluation { node: current, message } if current == NodeId::DETACHED => {
                Self::Evaluation { node, message }
            }
            other => other,
        }
    }

    /// The node this error is attributed to, if any.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::CyclicEvaluation { node }
            | Self::RenderLoop { node, .. }
            | Self::Evaluation { node, .. } => Some(*node),
            Self::UnknownNode(node) => Some(*node),
            _ => None,
        }
    }
}

/// Errors produced while loading or validating a [`RuntimeConfig`](crate::RuntimeConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config json: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {field} {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluation_errors_start_detached() {
        let err = PulseError::evaluation("boom");
        assert_eq!(err.node(), Some(NodeId::DETACHED));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn attribution_only_replaces_detached_nodes() {
        let node = NodeId::from(3);
        let err = PulseError::evaluation("boom").attributed_to(node);
        assert_eq!(err.node(), Some(node));

        let other = NodeId::from(4);
        let err = err.attributed_to(other);
        assert_eq!(err.node(), Some(node));
    }

    #[test]
    fn cell_errors_have_no_node() {
        let err = PulseError::UnknownCell(CellId::from(7));
        assert_eq!(err.node(), None);
        assert_eq!(err.to_string(), "unknown cell cell#7");
    }
}
