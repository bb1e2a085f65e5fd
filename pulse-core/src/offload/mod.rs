//! Task Offload Queue
//!
//! Heavy work runs on a fixed pool of worker threads so the runtime thread
//! never blocks on it. The reactive graph itself stays single-threaded: the
//! only thing a worker hands back is a [`Completion`], a boxed write that the
//! runtime applies on its own thread when it drains the completion channel.
//!
//! # Flow
//!
//! ```text
//!  submit() ──▶ tier queues ──▶ worker runs work(payload)
//!                                       │
//!                         Completion (cell write) over mpsc
//!                                       │
//!  tick() / next_completion() ◀─────────┘  ──▶ Runtime::write ──▶ dirty marks
//! ```
//!
//! Resource loaders use the same channel through [`RemoteWriter`].

mod handle;
mod pool;

pub use handle::{WorkHandle, WorkId, WorkStatus};

use std::cell::RefCell;
use std::future::poll_fn;
use std::sync::Arc;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::trace;

use crate::error::PulseError;
use crate::graph::Tier;
use crate::reactive::{Cell, Runtime, WriteOutcome};

use handle::WorkState;
use pool::{WorkItem, WorkerPool};

/// A write to perform on the runtime thread.
pub(crate) type ApplyFn = Box<dyn FnOnce(&Runtime) -> Result<WriteOutcome, PulseError> + Send>;

/// A result travelling from a worker (or loader) back to the runtime.
pub(crate) struct Completion {
    /// Present for offloaded work; remote writes carry no work state.
    pub(crate) work: Option<(WorkId, Arc<WorkState>)>,
    pub(crate) apply: ApplyFn,
}

impl Completion {
    /// Apply the write unless the work was cancelled in the meantime.
    ///
    /// Returns `None` for cancelled work.
    pub(crate) fn apply(self, rt: &Runtime) -> Option<Result<WriteOutcome, PulseError>> {
        match self.work {
            Some((id, state)) => {
                if state.is_cancelled() {
                    trace!(%id, "suppressing write of cancelled work");
                    state.set_status(WorkStatus::Cancelled);
                    return None;
                }
                let result = (self.apply)(rt);
                state.set_status(WorkStatus::Delivered);
                Some(result)
            }
            None => Some((self.apply)(rt)),
        }
    }
}

/// Offload state owned by a runtime: the lazily started pool and the
/// completion channel.
pub(crate) struct OffloadQueue {
    workers: usize,
    sender: UnboundedSender<Completion>,
    // Borrowed only for the duration of a single poll
    receiver: RefCell<UnboundedReceiver<Completion>>,
    pool: RefCell<Option<WorkerPool>>,
}

impl OffloadQueue {
    pub(crate) fn new(workers: usize) -> Self {
        let (sender, receiver) = unbounded_channel();
        Self {
            workers,
            sender,
            receiver: RefCell::new(receiver),
            pool: RefCell::new(None),
        }
    }

    /// Queue a task, starting the pool on first use.
    pub(crate) fn submit(
        &self,
        tier: Tier,
        task: impl FnOnce() -> ApplyFn + Send + 'static,
    ) -> Result<WorkHandle, PulseError> {
        let mut pool = self.pool.borrow_mut();
        if pool.is_none() {
            *pool = Some(WorkerPool::start(self.workers, &self.sender)?);
        }

        let id = WorkId::new();
        let state = WorkState::new();
        let handle = WorkHandle::new(id, tier, Arc::clone(&state));
        if let Some(pool) = pool.as_ref() {
            pool.push(WorkItem {
                id,
                tier,
                state,
                task: Box::new(task),
            });
        }
        trace!(%id, ?tier, "work submitted");
        Ok(handle)
    }

    /// Take the next completion without waiting.
    pub(crate) fn try_next(&self) -> Option<Completion> {
        self.receiver.borrow_mut().try_recv().ok()
    }

    /// Wait for the next completion.
    ///
    /// The receiver stays in place while waiting, so dropping the future
    /// (a timeout, a losing `select!` branch) loses nothing.
    pub(crate) async fn next(&self) -> Option<Completion> {
        poll_fn(|cx| self.receiver.borrow_mut().poll_recv(cx)).await
    }

    pub(crate) fn sender(&self) -> UnboundedSender<Completion> {
        self.sender.clone()
    }

    /// Items still waiting for a worker.
    pub(crate) fn queued(&self) -> usize {
        self.pool.borrow().as_ref().map_or(0, WorkerPool::queued)
    }

    /// Running worker threads; zero until the first submit.
    pub(crate) fn worker_count(&self) -> usize {
        self.pool.borrow().as_ref().map_or(0, WorkerPool::size)
    }
}

/// A `Send` handle that writes into a cell from any thread.
///
/// Writes are queued on the completion channel and applied on the runtime
/// thread at the start of the next tick, exactly like offloaded results.
pub struct RemoteWriter<T> {
    cell: Cell<T>,
    sender: UnboundedSender<Completion>,
}

impl<T: Clone + Send + 'static> RemoteWriter<T> {
    pub(crate) fn new(cell: Cell<T>, sender: UnboundedSender<Completion>) -> Self {
        Self { cell, sender }
    }

    pub fn cell(&self) -> Cell<T> {
        self.cell
    }

    /// Queue a write. Returns false if the runtime has been dropped.
    pub fn write(&self, value: T) -> bool {
        let cell = self.cell;
        self.sender
            .send(Completion {
                work: None,
                apply: Box::new(move |rt: &Runtime| rt.write(cell, value)),
            })
            .is_ok()
    }
}

impl<T> Clone for RemoteWriter<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell,
            sender: self.sender.clone(),
        }
    }
}

impl<T> std::fmt::Debug for RemoteWriter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteWriter")
            .field("cell", &self.cell)
            .finish()
    }
}
