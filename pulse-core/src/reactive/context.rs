//! Tracking Context
//!
//! The tracking context records which node is currently evaluating so that
//! cell reads can be attributed to it.
//!
//! # Implementation
//!
//! Each runtime owns a stack of frames. Entering a node's evaluation pushes a
//! frame; every tracked read lands in the top frame's read-set; finishing the
//! evaluation pops the frame and hands the read-set back to the caller.
//!
//! Nested frames are allowed for *different* nodes (a render closure that
//! tracks a child node). Entering a node that is already on the stack is a
//! cycle and is refused.

use std::cell::RefCell;

use indexmap::IndexSet;

use crate::error::PulseError;
use crate::graph::{CellId, NodeId};

/// An entry in the tracking stack.
#[derive(Debug, Clone)]
struct Frame {
    node: NodeId,
    /// Cells read so far, in first-read order.
    reads: IndexSet<CellId>,
}

/// Stack of in-progress evaluations.
#[derive(Debug, Default)]
pub struct TrackingStack {
    frames: RefCell<Vec<Frame>>,
}

impl TrackingStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a new frame for `node`.
    ///
    /// Fails with [`PulseError::CyclicEvaluation`] if `node` is already being
    /// evaluated further down the stack.
    pub fn enter(&self, node: NodeId) -> Result<TrackingGuard<'_>, PulseError> {
        let mut frames = self.frames.borrow_mut();
        if frames.iter().any(|frame| frame.node == node) {
            return Err(PulseError::CyclicEvaluation { node });
        }
        frames.push(Frame {
            node,
            reads: IndexSet::new(),
        });
        Ok(TrackingGuard {
            stack: self,
            node,
            finished: false,
        })
    }

    /// Check if there is an active frame.
    pub fn is_active(&self) -> bool {
        !self.frames.borrow().is_empty()
    }

    /// The node whose frame is on top of the stack.
    pub fn current(&self) -> Option<NodeId> {
        self.frames.borrow().last().map(|frame| frame.node)
    }

    /// Depth of the stack.
    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    /// Record a read of `cell` in the innermost frame.
    ///
    /// Reads outside any frame are ignored.
    pub fn record_read(&self, cell: CellId) {
        if let Some(frame) = self.frames.borrow_mut().last_mut() {
            frame.reads.insert(cell);
        }
    }

    fn pop(&self, node: NodeId) -> IndexSet<CellId> {
        let popped = self.frames.borrow_mut().pop();
        match popped {
            Some(frame) => {
                debug_assert_eq!(
                    frame.node, node,
                    "TrackingStack mismatch: expected {:?}, got {:?}",
                    node, frame.node
                );
                frame.reads
            }
            None => IndexSet::new(),
        }
    }
}

/// Guard that pops its frame when dropped.
///
/// Call [`TrackingGuard::finish`] to pop the frame and keep the read-set; a
/// guard dropped without finishing (for example on an early return) discards
/// it.
pub struct TrackingGuard<'a> {
    stack: &'a TrackingStack,
    node: NodeId,
    finished: bool,
}

impl TrackingGuard<'_> {
    /// Pop the frame and return the cells read while it was active.
    pub fn finish(mut self) -> IndexSet<CellId> {
        self.finished = true;
        self.stack.pop(self.node)
    }
}

impl Drop for TrackingGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.stack.pop(self.node);
        }
    }
}
