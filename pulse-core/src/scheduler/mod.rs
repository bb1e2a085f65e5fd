//! Render Scheduling
//!
//! Dirty nodes are coalesced into a [`FrameBatch`] and flushed once per
//! externally driven tick, visible work first. See [`RenderScheduler`] for
//! the state machine and the loop guard.

mod batch;
mod render;

pub use batch::FrameBatch;
pub use render::{MarkOutcome, RenderScheduler, SchedulerState};

use crate::error::PulseError;

/// Summary of one [`Runtime::tick`](crate::Runtime::tick).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Frame number of the flush, or `None` if nothing was pending.
    pub frame: Option<u64>,

    /// Offloaded results and remote writes applied before the flush.
    pub completions: usize,

    /// Nodes evaluated successfully.
    pub evaluated: usize,

    /// Nodes whose evaluation returned an error.
    pub failed: usize,

    /// Nodes left unevaluated because the budget ran out.
    pub rolled_over: usize,

    /// Whether the flush stopped on the time budget.
    pub budget_exhausted: bool,

    /// Per-node failures and render loop reports, in the order they occurred.
    pub errors: Vec<PulseError>,

    /// Scheduler state after the tick.
    pub state: SchedulerState,
}

impl TickReport {
    /// Whether the tick finished without any error.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}
