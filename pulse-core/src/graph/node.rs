//! Graph Nodes
//!
//! This module defines the identifiers and per-node bookkeeping that live in
//! the dependency graph.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a node (a computation or render closure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Placeholder for errors raised before the owning node is known.
    pub const DETACHED: NodeId = NodeId(u64::MAX);

    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Unique identifier for an observable state cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(u64);

impl CellId {
    /// Generate a new unique cell ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for CellId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for CellId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell#{}", self.0)
    }
}

/// Priority class governing evaluation order.
///
/// Tiers are ordered: `Visible < OffScreen < Background`, and lower tiers
/// run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    /// Content currently on screen.
    Visible,

    /// Content materialized ahead of scrolling (overscan, hidden tabs).
    OffScreen,

    /// Work with no visual output this frame.
    Background,
}

impl Tier {
    /// All tiers in evaluation order.
    pub const ALL: [Tier; 3] = [Tier::Visible, Tier::OffScreen, Tier::Background];

    /// Position of this tier in [`Tier::ALL`].
    pub fn index(self) -> usize {
        match self {
            Tier::Visible => 0,
            Tier::OffScreen => 1,
            Tier::Background => 2,
        }
    }
}

/// Dirty state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    /// The node's output is up-to-date.
    Clean,

    /// The node is waiting in a frame batch.
    Queued,

    /// The node is being evaluated right now.
    Evaluating,

    /// The node was re-dirtied too often and is skipped by the scheduler.
    Suspended,
}

/// Scheduler-side bookkeeping for a node.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    id: NodeId,
    tier: Tier,
    state: DirtyState,
    /// Stamp of the last successful evaluation (0 = never evaluated).
    version: u64,
    evaluations: u64,
    /// Propagation wave the node last took part in.
    wave: u64,
    /// Consecutive batches the node was re-marked within `wave`.
    streak: u32,
}

impl NodeRecord {
    /// Create a record for a node that has never been evaluated.
    pub fn new(id: NodeId, tier: Tier) -> Self {
        Self {
            id,
            tier,
            state: DirtyState::Clean,
            version: 0,
            evaluations: 0,
            wave: 0,
            streak: 0,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn set_tier(&mut self, tier: Tier) {
        self.tier = tier;
    }

    pub fn state(&self) -> DirtyState {
        self.state
    }

    pub fn set_state(&mut self, state: DirtyState) {
        self.state = state;
    }

    pub fn is_suspended(&self) -> bool {
        self.state == DirtyState::Suspended
    }

    /// Last-evaluated version stamp.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of successful evaluations.
    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    /// Consecutive batches the node has been re-marked by its own wave.
    pub fn streak(&self) -> u32 {
        self.streak
    }

    /// Join `wave` ahead of an evaluation. A new wave clears the streak.
    pub fn enter_wave(&mut self, wave: u64) {
        if self.wave != wave {
            self.wave = wave;
            self.streak = 0;
        }
    }

    /// Count a mark raised within `wave` and return the resulting streak.
    ///
    /// Only a wave the node already took part in counts as a re-mark.
    pub fn remark(&mut self, wave: u64) -> u32 {
        if self.wave == wave {
            self.streak += 1;
        } else {
            self.wave = wave;
            self.streak = 0;
        }
        self.streak
    }

    pub fn clear_streak(&mut self) {
        self.streak = 0;
    }

    /// Record a successful evaluation stamped with `version`.
    pub fn mark_evaluated(&mut self, version: u64) {
        self.version = version;
        self.evaluations += 1;
        self.state = DirtyState::Clean;
    }
}
