//! Work handles and shared per-item state.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::graph::Tier;

/// Unique identifier for an offloaded work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkId(u64);

impl WorkId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "work#{}", self.0)
    }
}

/// Lifecycle of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkStatus {
    /// Waiting for a worker.
    Queued = 0,

    /// A worker is running it.
    Running = 1,

    /// The result is on its way back to the runtime thread.
    Completed = 2,

    /// The result was written into its cell.
    Delivered = 3,

    /// Cancelled; no write will happen.
    Cancelled = 4,

    /// The work panicked on its worker.
    Failed = 5,
}

impl WorkStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => WorkStatus::Queued,
            1 => WorkStatus::Running,
            2 => WorkStatus::Completed,
            3 => WorkStatus::Delivered,
            4 => WorkStatus::Cancelled,
            _ => WorkStatus::Failed,
        }
    }

    /// Whether the worker side is done with the item.
    pub fn is_finished(&self) -> bool {
        !matches!(self, WorkStatus::Queued | WorkStatus::Running)
    }
}

/// State shared between a handle, its queued item and the completion.
#[derive(Debug)]
pub(crate) struct WorkState {
    cancelled: AtomicBool,
    status: AtomicU8,
}

impl WorkState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            status: AtomicU8::new(WorkStatus::Queued as u8),
        })
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn status(&self) -> WorkStatus {
        WorkStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: WorkStatus) {
        self.status.store(status as u8, Ordering::Release);
    }
}

/// Cancellable handle returned by [`Runtime::submit`](crate::Runtime::submit).
///
/// Dropping the handle does not cancel the work.
#[derive(Debug, Clone)]
pub struct WorkHandle {
    id: WorkId,
    tier: Tier,
    state: Arc<WorkState>,
}

impl WorkHandle {
    pub(crate) fn new(id: WorkId, tier: Tier, state: Arc<WorkState>) -> Self {
        Self { id, tier, state }
    }

    pub fn id(&self) -> WorkId {
        self.id
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn status(&self) -> WorkStatus {
        self.state.status()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// Request cancellation.
    ///
    /// Queued work is skipped; running work finishes but its result is never
    /// written. Returns false if the result was already delivered.
    pub fn cancel(&self) -> bool {
        if self.state.status() == WorkStatus::Delivered {
            return false;
        }
        self.state.cancel();
        true
    }
}
