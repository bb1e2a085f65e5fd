//! Render Scheduler
//!
//! The scheduler determines when and in which order dirty nodes evaluate.
//!
//! # State Machine
//!
//! ```text
//!            first mark               tick()
//!   Idle ─────────────────▶ Batching ─────────▶ Flushing
//!    ▲                          ▲                  │
//!    │      batch drained       │  marks deferred  │
//!    └──────────────────────────┴──────────────────┘
//! ```
//!
//! # Algorithm
//!
//! 1. Marks raised outside a flush go to the pending batch and open a new
//!    wave, numbered after the frame that will flush them.
//! 2. A flush takes the pending batch as the in-flight batch and evaluates it
//!    visible tier first, FIFO within a tier.
//! 3. Marks raised during the flush are deferred to the new pending batch
//!    and inherit the wave of the evaluating node. A mark for a node that
//!    is still queued in the in-flight batch is absorbed: that evaluation
//!    has not happened yet and will observe the write.
//! 4. A node marked again by a wave it already took part in extends its
//!    streak. A chain of distinct nodes never does. A streak longer than
//!    the loop threshold suspends the node and records a render loop error
//!    for the driver.
//! 5. When the budget runs out, unfinished nodes roll into the pending batch
//!    ahead of the deferred marks.

use std::collections::HashMap;

use tracing::{trace, warn};

use crate::config::SchedulerConfig;
use crate::error::PulseError;
use crate::graph::{DirtyState, NodeId, NodeRecord, Tier};

use super::batch::FrameBatch;

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    /// Nothing is pending.
    #[default]
    Idle,

    /// Dirty nodes are waiting for the next tick.
    Batching,

    /// A tick is evaluating the in-flight batch.
    Flushing,
}

/// What happened to a dirty mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// The node was added to the pending batch.
    Queued,

    /// The node was already pending (or still queued in the in-flight batch).
    Coalesced,

    /// The node is unknown or suspended.
    Ignored,

    /// The mark exceeded the loop threshold; the node is now suspended.
    Suspended,
}

impl MarkOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, MarkOutcome::Queued | MarkOutcome::Coalesced)
    }
}

/// Batches dirty nodes and hands them out in priority order.
#[derive(Debug)]
pub struct RenderScheduler {
    state: SchedulerState,
    nodes: HashMap<NodeId, NodeRecord>,
    pending: FrameBatch,
    in_flight: FrameBatch,
    /// The node being evaluated and the wave of the mark that queued it.
    evaluating: Option<(NodeId, u64)>,
    loop_threshold: u32,
    frame: u64,
    /// Monotonic stamp handed to each successful evaluation.
    version: u64,
    loop_errors: Vec<PulseError>,
}

impl RenderScheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            state: SchedulerState::Idle,
            nodes: HashMap::new(),
            pending: FrameBatch::new(),
            in_flight: FrameBatch::new(),
            evaluating: None,
            loop_threshold: config.loop_threshold.max(1),
            frame: 0,
            version: 0,
            loop_errors: Vec::new(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Number of flushes started so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Register a node and queue its first evaluation.
    pub fn register(&mut self, node: NodeId, tier: Tier) {
        self.nodes.insert(node, NodeRecord::new(node, tier));
        self.mark(node);
    }

    /// Forget a node, dropping it from every batch.
    pub fn unregister(&mut self, node: NodeId) -> bool {
        self.pending.remove(node);
        self.in_flight.remove(node);
        if self.evaluating.is_some_and(|(current, _)| current == node) {
            self.evaluating = None;
        }
        let removed = self.nodes.remove(&node).is_some();
        self.settle_state();
        removed
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    pub fn record(&self, node: NodeId) -> Option<&NodeRecord> {
        self.nodes.get(&node)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes waiting for the next tick, in evaluation order.
    pub fn pending(&self) -> Vec<NodeId> {
        self.pending.nodes()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, node: NodeId) -> bool {
        self.pending.contains(node)
    }

    /// Mark a node dirty.
    pub fn mark(&mut self, node: NodeId) -> MarkOutcome {
        let Some(record) = self.nodes.get_mut(&node) else {
            return MarkOutcome::Ignored;
        };
        if record.is_suspended() {
            trace!(%node, "mark ignored for suspended node");
            return MarkOutcome::Ignored;
        }
        let tier = record.tier();

        if self.state != SchedulerState::Flushing {
            let queued = self.pending.insert(node, tier, self.frame + 1);
            if record.state() != DirtyState::Evaluating {
                record.set_state(DirtyState::Queued);
            }
            self.state = SchedulerState::Batching;
            return if queued {
                MarkOutcome::Queued
            } else {
                MarkOutcome::Coalesced
            };
        }

        if self.in_flight.contains(node) || self.pending.contains(node) {
            return MarkOutcome::Coalesced;
        }

        // marks raised outside any evaluation (scope teardown, offload
        // applies) start a wave of their own
        let wave = self.evaluating.map_or(self.frame + 1, |(_, wave)| wave);
        let batches = record.remark(wave);
        if batches > self.loop_threshold {
            record.set_state(DirtyState::Suspended);
            warn!(%node, batches, "render loop detected, suspending node");
            self.loop_errors.push(PulseError::RenderLoop { node, batches });
            return MarkOutcome::Suspended;
        }

        self.pending.insert(node, tier, wave);
        if record.state() != DirtyState::Evaluating {
            record.set_state(DirtyState::Queued);
        }
        MarkOutcome::Queued
    }

    /// Change a node's tier, re-filing it if it is queued.
    pub fn set_tier(&mut self, node: NodeId, tier: Tier) -> Result<(), PulseError> {
        let record = self
            .nodes
            .get_mut(&node)
            .ok_or(PulseError::UnknownNode(node))?;
        record.set_tier(tier);
        self.pending.retier(node, tier);
        self.in_flight.retier(node, tier);
        Ok(())
    }

    /// Lift a suspension and queue the node again.
    pub fn reset(&mut self, node: NodeId) -> Result<(), PulseError> {
        let record = self
            .nodes
            .get_mut(&node)
            .ok_or(PulseError::UnknownNode(node))?;
        let tier = record.tier();
        record.set_state(DirtyState::Queued);
        record.clear_streak();
        self.pending.insert(node, tier, self.frame + 1);
        if self.state == SchedulerState::Idle {
            self.state = SchedulerState::Batching;
        }
        Ok(())
    }

    pub fn is_suspended(&self, node: NodeId) -> bool {
        self.nodes.get(&node).is_some_and(NodeRecord::is_suspended)
    }

    /// Start a flush. Returns the frame number, or `None` if there is nothing
    /// to do or a flush is already running.
    pub fn begin_flush(&mut self) -> Option<u64> {
        if self.state == SchedulerState::Flushing || self.pending.is_empty() {
            return None;
        }
        self.in_flight = std::mem::take(&mut self.pending);
        self.state = SchedulerState::Flushing;
        self.frame += 1;
        Some(self.frame)
    }

    /// Hand out the next node of the in-flight batch.
    pub fn next_node(&mut self) -> Option<NodeId> {
        loop {
            let (node, wave) = self.in_flight.pop()?;
            let Some(record) = self.nodes.get_mut(&node) else {
                continue;
            };
            if record.is_suspended() {
                continue;
            }
            record.enter_wave(wave);
            record.set_state(DirtyState::Evaluating);
            self.evaluating = Some((node, wave));
            return Some(node);
        }
    }

    /// Close out the evaluation handed out by [`next_node`](Self::next_node).
    ///
    /// Returns the version stamp on success.
    pub fn finish_node(&mut self, node: NodeId, succeeded: bool) -> Option<u64> {
        if self.evaluating.is_some_and(|(current, _)| current == node) {
            self.evaluating = None;
        }
        let requeued = self.pending.contains(node);
        let record = self.nodes.get_mut(&node)?;
        if record.is_suspended() {
            return None;
        }

        let stamp = if succeeded {
            self.version += 1;
            record.mark_evaluated(self.version);
            Some(self.version)
        } else {
            record.set_state(DirtyState::Clean);
            None
        };
        if requeued {
            record.set_state(DirtyState::Queued);
        }
        stamp
    }

    /// End the flush, rolling unfinished nodes into the pending batch.
    ///
    /// Returns how many nodes rolled over.
    pub fn end_flush(&mut self) -> usize {
        let unfinished = std::mem::take(&mut self.in_flight);
        let rolled = unfinished.len();
        if rolled > 0 {
            let deferred = std::mem::take(&mut self.pending);
            self.pending = unfinished;
            self.pending.absorb(deferred);
        }
        self.evaluating = None;
        self.state = SchedulerState::Batching;
        self.settle_state();
        rolled
    }

    /// Render loop errors raised since the last call.
    pub fn take_loop_errors(&mut self) -> Vec<PulseError> {
        std::mem::take(&mut self.loop_errors)
    }

    fn settle_state(&mut self) {
        if self.state == SchedulerState::Batching && self.pending.is_empty() {
            self.state = SchedulerState::Idle;
        }
    }
}
