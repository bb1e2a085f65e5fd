//! Worker Pool
//!
//! A fixed set of named threads pulls work items from one FIFO queue per
//! tier, visible work first. Workers share nothing with the reactive graph:
//! each result travels back as a [`Completion`] over the worker's own sender.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace, warn};

use crate::error::PulseError;
use crate::graph::Tier;

use super::handle::{WorkId, WorkState, WorkStatus};
use super::{ApplyFn, Completion};

/// The work closure: runs on a worker and yields the write to apply.
pub(crate) type Task = Box<dyn FnOnce() -> ApplyFn + Send>;

/// A unit submitted to the pool.
pub(crate) struct WorkItem {
    pub(crate) id: WorkId,
    pub(crate) tier: Tier,
    pub(crate) state: Arc<WorkState>,
    pub(crate) task: Task,
}

impl WorkItem {
    /// Run on the current worker and post the result unless cancelled.
    fn run(self, sender: &UnboundedSender<Completion>) {
        let WorkItem { id, tier, state, task } = self;
        if state.is_cancelled() {
            trace!(%id, "skipping cancelled work");
            state.set_status(WorkStatus::Cancelled);
            return;
        }

        state.set_status(WorkStatus::Running);
        let apply = match catch_unwind(AssertUnwindSafe(task)) {
            Ok(apply) => apply,
            Err(_) => {
                warn!(%id, ?tier, "offloaded work panicked");
                state.set_status(WorkStatus::Failed);
                return;
            }
        };

        if state.is_cancelled() {
            trace!(%id, "dropping result of cancelled work");
            state.set_status(WorkStatus::Cancelled);
            return;
        }

        state.set_status(WorkStatus::Completed);
        let completion = Completion {
            work: Some((id, Arc::clone(&state))),
            apply,
        };
        if sender.send(completion).is_err() {
            debug!(%id, "runtime gone, result discarded");
        }
    }
}

#[derive(Default)]
struct TierQueues {
    queues: [VecDeque<WorkItem>; 3],
}

impl TierQueues {
    fn push(&mut self, item: WorkItem) {
        self.queues[item.tier.index()].push_back(item);
    }

    fn pop(&mut self) -> Option<WorkItem> {
        self.queues.iter_mut().find_map(VecDeque::pop_front)
    }

    fn len(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    fn drain(&mut self) -> Vec<WorkItem> {
        self.queues.iter_mut().flat_map(|q| q.drain(..)).collect()
    }
}

struct PoolShared {
    queues: Mutex<TierQueues>,
    available: Condvar,
    shutdown: AtomicBool,
}

/// Fixed-size pool of worker threads.
pub(crate) struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers, each with its own completion sender.
    pub(crate) fn start(
        size: usize,
        sender: &UnboundedSender<Completion>,
    ) -> Result<Self, PulseError> {
        let shared = Arc::new(PoolShared {
            queues: Mutex::new(TierQueues::default()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(size),
        };
        for index in 0..size.max(1) {
            let shared = Arc::clone(&pool.shared);
            let sender = sender.clone();
            let worker = std::thread::Builder::new()
                .name(format!("pulse-worker-{index}"))
                .spawn(move || worker_loop(&shared, &sender))
                .map_err(|err| PulseError::WorkerSpawn(err.to_string()))?;
            pool.workers.push(worker);
        }
        debug!(workers = pool.workers.len(), "offload pool started");
        Ok(pool)
    }

    pub(crate) fn push(&self, item: WorkItem) {
        self.shared.queues.lock().push(item);
        self.shared.available.notify_one();
    }

    /// Items waiting for a worker.
    pub(crate) fn queued(&self) -> usize {
        self.shared.queues.lock().len()
    }

    pub(crate) fn size(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let mut queues = self.shared.queues.lock();
            self.shared.shutdown.store(true, Ordering::Release);
            for item in queues.drain() {
                item.state.set_status(WorkStatus::Cancelled);
            }
        }
        self.shared.available.notify_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("offload worker exited with a panic");
            }
        }
    }
}

fn worker_loop(shared: &PoolShared, sender: &UnboundedSender<Completion>) {
    loop {
        let item = {
            let mut queues = shared.queues.lock();
            loop {
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                if let Some(item) = queues.pop() {
                    break item;
                }
                shared.available.wait(&mut queues);
            }
        };
        item.run(sender);
    }
}
