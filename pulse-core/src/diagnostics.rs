//! Non-fatal diagnostics.
//!
//! Diagnostics never change runtime behavior. They are logged through
//! `tracing` when raised and kept in a bounded buffer that tools can drain
//! with [`Runtime::take_diagnostics`](crate::Runtime::take_diagnostics).

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use crate::graph::{CellId, NodeId};

/// A node's dependency set shrank during re-evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleEdgeWarning {
    pub node: NodeId,
    /// Cells the node stopped reading.
    pub dropped: Vec<CellId>,
    /// Edges the node kept after pruning.
    pub remaining: usize,
}

impl fmt::Display for StaleEdgeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} dropped {} dependency edge(s), {} remaining",
            self.node,
            self.dropped.len(),
            self.remaining
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    StaleEdge(StaleEdgeWarning),

    /// A lifecycle callback ran longer than its synchronous budget.
    SlowLifecycle {
        label: String,
        elapsed: Duration,
        budget: Duration,
    },
}

/// Bounded FIFO of diagnostics.
#[derive(Debug)]
pub struct Diagnostics {
    entries: VecDeque<Diagnostic>,
    capacity: usize,
    /// Diagnostics evicted because the buffer was full.
    dropped: u64,
}

impl Diagnostics {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(diagnostic);
    }

    /// Remove and return everything buffered, oldest first.
    pub fn drain(&mut self) -> Vec<Diagnostic> {
        self.entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
