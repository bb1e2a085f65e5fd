//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects cells, nodes and the
//! scheduler. It owns the change tracker, the dependency graph, the render
//! scheduler and the offload queue, and exposes them through one handle.
//!
//! # How It Works
//!
//! 1. When a node evaluates, the runtime pushes a tracking frame and records
//!    every cell the node reads.
//!
//! 2. When the evaluation succeeds, the node's edges are replaced with the
//!    recorded read-set. Cells it stopped reading no longer notify it.
//!
//! 3. When a cell's value changes, the runtime:
//!    a. Runs the cell's watchers with the old and new value
//!    b. Finds all dependent nodes
//!    c. Marks them dirty in the pending frame batch
//!
//! 4. `tick` applies finished offload results, then flushes the batch in
//!    priority order within the given budget.
//!
//! # Threading
//!
//! A runtime lives on one thread (`Rc` + `RefCell`). No borrow of its
//! internals is held while user code runs, so node closures, watchers and
//! lifecycle callbacks may freely call back into the runtime. Only the
//! offload workers run elsewhere, and they reach the runtime exclusively
//! through the completion channel.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use indexmap::IndexSet;
use tracing::{debug, debug_span, trace, warn};

use crate::config::RuntimeConfig;
use crate::diagnostics::{Diagnostic, Diagnostics, StaleEdgeWarning};
use crate::error::{ConfigError, PulseError};
use crate::graph::{CellId, DependencyGraph, NodeId, Tier};
use crate::offload::{ApplyFn, OffloadQueue, RemoteWriter, WorkHandle};
use crate::scheduler::{RenderScheduler, SchedulerState, TickReport};

use super::cell::{Cell, WriteOutcome};
use super::context::TrackingStack;
use super::equality::Equality;
use super::scope::{ScopeId, ScopeTree};
use super::tracker::{ChangeTracker, WatchDecision, WatchId};

type NodeFn = Rc<RefCell<dyn FnMut(&Runtime) -> Result<(), PulseError>>>;

struct RuntimeInner {
    config: RuntimeConfig,
    tracker: RefCell<ChangeTracker>,
    graph: RefCell<DependencyGraph>,
    scheduler: RefCell<RenderScheduler>,
    tracking: TrackingStack,
    nodes: RefCell<HashMap<NodeId, NodeFn>>,
    scopes: RefCell<ScopeTree>,
    offload: OffloadQueue,
    diagnostics: RefCell<Diagnostics>,
}

/// Handle to a reactive runtime.
///
/// Cloning the handle is cheap; all clones share the same state.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::build(RuntimeConfig::default())
    }

    /// Create a runtime after validating `config`.
    pub fn with_config(config: RuntimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: RuntimeConfig) -> Self {
        let inner = RuntimeInner {
            tracker: RefCell::new(ChangeTracker::new()),
            graph: RefCell::new(DependencyGraph::new()),
            scheduler: RefCell::new(RenderScheduler::new(&config.scheduler)),
            tracking: TrackingStack::new(),
            nodes: RefCell::new(HashMap::new()),
            scopes: RefCell::new(ScopeTree::new()),
            offload: OffloadQueue::new(config.offload.workers),
            diagnostics: RefCell::new(Diagnostics::new(config.diagnostics_capacity)),
            config,
        };
        Self {
            inner: Rc::new(inner),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    // ---------------------------------------------------------------------
    // Cells
    // ---------------------------------------------------------------------

    /// Create a cell in the root scope with structural equality.
    pub fn create_cell<T: Clone + PartialEq + 'static>(&self, value: T) -> Cell<T> {
        self.create_cell_with(value, Equality::structural())
    }

    /// Create a cell in the root scope with a custom equality policy.
    pub fn create_cell_with<T: Clone + 'static>(&self, value: T, equality: Equality<T>) -> Cell<T> {
        let id = self.inner.tracker.borrow_mut().insert(value, equality);
        self.inner.scopes.borrow_mut().adopt_cell_root(id);
        trace!(cell = %id, "cell created");
        Cell::from_id(id)
    }

    /// Create a cell owned by `scope`.
    pub fn create_cell_in<T: Clone + PartialEq + 'static>(
        &self,
        scope: ScopeId,
        value: T,
    ) -> Result<Cell<T>, PulseError> {
        self.create_cell_in_with(scope, value, Equality::structural())
    }

    pub fn create_cell_in_with<T: Clone + 'static>(
        &self,
        scope: ScopeId,
        value: T,
        equality: Equality<T>,
    ) -> Result<Cell<T>, PulseError> {
        if !self.inner.scopes.borrow().contains(scope) {
            return Err(PulseError::UnknownScope(scope));
        }
        let id = self.inner.tracker.borrow_mut().insert(value, equality);
        self.inner.scopes.borrow_mut().adopt_cell(scope, id)?;
        trace!(cell = %id, %scope, "cell created");
        Ok(Cell::from_id(id))
    }

    /// Create a cell shared by two scopes.
    ///
    /// The cell is owned by their nearest common ancestor, so it stays alive
    /// as long as either side can still reach it.
    pub fn create_shared_cell<T: Clone + PartialEq + 'static>(
        &self,
        a: ScopeId,
        b: ScopeId,
        value: T,
    ) -> Result<Cell<T>, PulseError> {
        let owner = self.nearest_common_scope(a, b).ok_or_else(|| {
            let missing = if self.inner.scopes.borrow().contains(a) { b } else { a };
            PulseError::UnknownScope(missing)
        })?;
        self.create_cell_in(owner, value)
    }

    /// Destroy a cell and every edge pointing at it.
    ///
    /// Returns false if the cell was already gone.
    pub fn dispose_cell<T>(&self, cell: Cell<T>) -> bool {
        self.release_cell(cell.id())
    }

    fn release_cell(&self, id: CellId) -> bool {
        if !self.inner.tracker.borrow_mut().remove(id) {
            return false;
        }
        let readers = self.inner.graph.borrow_mut().remove_cell(id);
        self.inner.scopes.borrow_mut().forget_cell(id);
        trace!(cell = %id, readers = readers.len(), "cell disposed");
        true
    }

    /// Read a cell, recording the read if a node is evaluating.
    pub fn read<T: Clone + 'static>(&self, cell: Cell<T>) -> Result<T, PulseError> {
        let value = self.peek(cell)?;
        self.inner.tracking.record_read(cell.id());
        Ok(value)
    }

    /// Read a cell without recording a dependency.
    pub fn peek<T: Clone + 'static>(&self, cell: Cell<T>) -> Result<T, PulseError> {
        self.inner.tracker.borrow().with_value(cell.id(), T::clone)
    }

    /// Borrow a cell's value without cloning it. The read is tracked.
    ///
    /// `f` sees the value as of the call, even if it writes the cell.
    pub fn with<T: 'static, R>(&self, cell: Cell<T>, f: impl FnOnce(&T) -> R) -> Result<R, PulseError> {
        let value = self.inner.tracker.borrow().share_value::<T>(cell.id())?;
        self.inner.tracking.record_read(cell.id());
        Ok(f(&value))
    }

    /// Write a cell.
    ///
    /// The write is dropped when the value is equal to the current one under
    /// the cell's equality policy. Otherwise watchers run, then every
    /// dependent node is marked dirty.
    pub fn write<T: Clone + 'static>(&self, cell: Cell<T>, value: T) -> Result<WriteOutcome, PulseError> {
        let id = cell.id();
        let accepted = self.inner.tracker.borrow_mut().apply(id, value)?;
        let Some(accepted) = accepted else {
            trace!(cell = %id, "write unchanged");
            return Ok(WriteOutcome::Unchanged);
        };

        let mut decision = WatchDecision::Propagate;
        if !accepted.watchers.is_empty() {
            let current = self.peek(cell)?;
            for watcher in &accepted.watchers {
                let Ok(mut watcher) = watcher.try_borrow_mut() else {
                    // A watcher writing its own cell re-enters here
                    trace!(cell = %id, "skipping re-entrant watcher");
                    continue;
                };
                if (*watcher)(&*accepted.old, &current) == WatchDecision::Suppress {
                    decision = WatchDecision::Suppress;
                }
            }
        }
        if decision == WatchDecision::Suppress {
            trace!(cell = %id, "propagation suppressed by watcher");
            return Ok(WriteOutcome::Suppressed);
        }

        let dependents = self.inner.graph.borrow().notify(id);
        let mut scheduler = self.inner.scheduler.borrow_mut();
        let marked = dependents
            .iter()
            .filter(|node| scheduler.mark(**node).is_queued())
            .count();
        trace!(cell = %id, marked, "write accepted");
        Ok(WriteOutcome::Changed { marked })
    }

    /// Read-modify-write. The read is not tracked.
    pub fn update<T: Clone + 'static>(
        &self,
        cell: Cell<T>,
        f: impl FnOnce(&T) -> T,
    ) -> Result<WriteOutcome, PulseError> {
        let current = self.peek(cell)?;
        let next = f(&current);
        self.write(cell, next)
    }

    /// Attach a watcher that sees `(old, new)` on every accepted write.
    pub fn watch<T, F>(&self, cell: Cell<T>, watcher: F) -> Result<WatchId, PulseError>
    where
        T: 'static,
        F: FnMut(&T, &T) -> WatchDecision + 'static,
    {
        self.inner.tracker.borrow_mut().add_watcher(cell.id(), watcher)
    }

    pub fn unwatch(&self, watch: WatchId) -> bool {
        self.inner.tracker.borrow_mut().remove_watcher(watch)
    }

    /// Whether the cell was written since the last flush began.
    pub fn is_cell_dirty<T>(&self, cell: Cell<T>) -> bool {
        self.inner.tracker.borrow().is_dirty(cell.id())
    }

    /// Number of accepted writes to the cell.
    pub fn cell_version<T>(&self, cell: Cell<T>) -> Option<u64> {
        self.inner.tracker.borrow().version(cell.id())
    }

    pub fn cell_count(&self) -> usize {
        self.inner.tracker.borrow().len()
    }

    // ---------------------------------------------------------------------
    // Nodes
    // ---------------------------------------------------------------------

    /// Register a node in the root scope. Its first evaluation is queued
    /// immediately.
    pub fn create_node<F>(&self, tier: Tier, f: F) -> NodeId
    where
        F: FnMut(&Runtime) -> Result<(), PulseError> + 'static,
    {
        let node = self.insert_node(tier, f);
        self.inner.scopes.borrow_mut().adopt_node_root(node);
        node
    }

    /// Register a node owned by `scope`.
    pub fn create_node_in<F>(&self, scope: ScopeId, tier: Tier, f: F) -> Result<NodeId, PulseError>
    where
        F: FnMut(&Runtime) -> Result<(), PulseError> + 'static,
    {
        if !self.inner.scopes.borrow().contains(scope) {
            return Err(PulseError::UnknownScope(scope));
        }
        let node = self.insert_node(tier, f);
        self.inner.scopes.borrow_mut().adopt_node(scope, node)?;
        Ok(node)
    }

    fn insert_node<F>(&self, tier: Tier, f: F) -> NodeId
    where
        F: FnMut(&Runtime) -> Result<(), PulseError> + 'static,
    {
        let node = NodeId::new();
        let func: NodeFn = Rc::new(RefCell::new(f));
        self.inner.nodes.borrow_mut().insert(node, func);
        self.inner.scheduler.borrow_mut().register(node, tier);
        trace!(%node, ?tier, "node created");
        node
    }

    /// Unregister a node and prune all of its edges.
    ///
    /// Returns false if the node was already gone.
    pub fn dispose_node(&self, node: NodeId) -> bool {
        let func = self.inner.nodes.borrow_mut().remove(&node);
        if func.is_none() {
            return false;
        }
        let edges = self.inner.graph.borrow_mut().remove_node(node);
        self.inner.scheduler.borrow_mut().unregister(node);
        self.inner.scopes.borrow_mut().forget_node(node);
        trace!(%node, edges, "node disposed");
        // Drop the closure last: its captures may own runtime handles
        drop(func);
        true
    }

    /// Change a node's priority tier.
    pub fn set_tier(&self, node: NodeId, tier: Tier) -> Result<(), PulseError> {
        self.inner.scheduler.borrow_mut().set_tier(node, tier)
    }

    pub fn tier(&self, node: NodeId) -> Option<Tier> {
        self.inner.scheduler.borrow().record(node).map(|record| record.tier())
    }

    /// Lift a render-loop suspension and queue the node again.
    pub fn reset_node(&self, node: NodeId) -> Result<(), PulseError> {
        self.inner.scheduler.borrow_mut().reset(node)
    }

    pub fn is_suspended(&self, node: NodeId) -> bool {
        self.inner.scheduler.borrow().is_suspended(node)
    }

    /// Version stamp of the node's last successful evaluation (0 if never).
    pub fn node_version(&self, node: NodeId) -> Option<u64> {
        self.inner.scheduler.borrow().record(node).map(|record| record.version())
    }

    /// Number of successful evaluations of the node.
    pub fn node_evaluations(&self, node: NodeId) -> Option<u64> {
        self.inner
            .scheduler
            .borrow()
            .record(node)
            .map(|record| record.evaluations())
    }

    pub fn node_count(&self) -> usize {
        self.inner.nodes.borrow().len()
    }

    /// Run `f` as an evaluation of `node`, recording the cells it reads.
    ///
    /// On success the node's edges are replaced by the recorded read-set.
    /// On failure, including a re-entrant call for the same node, the
    /// previous edges are kept.
    pub fn track<R>(
        &self,
        node: NodeId,
        f: impl FnOnce(&Runtime) -> Result<R, PulseError>,
    ) -> Result<R, PulseError> {
        if !self.inner.scheduler.borrow().contains(node) {
            return Err(PulseError::UnknownNode(node));
        }
        let guard = self.inner.tracking.enter(node)?;
        let result = f(self);
        let reads = guard.finish();

        match result {
            Ok(value) => {
                self.commit_edges(node, reads);
                Ok(value)
            }
            Err(err) => Err(err.attributed_to(node)),
        }
    }

    fn commit_edges(&self, node: NodeId, reads: IndexSet<CellId>) {
        // Disposed during its own evaluation
        if !self.inner.scheduler.borrow().contains(node) {
            return;
        }
        let reads: IndexSet<CellId> = {
            let tracker = self.inner.tracker.borrow();
            reads.into_iter().filter(|cell| tracker.contains(*cell)).collect()
        };
        let remaining = reads.len();
        let delta = self.inner.graph.borrow_mut().replace_edges(node, reads);
        if delta.removed.is_empty() {
            return;
        }

        let warning = StaleEdgeWarning {
            node,
            dropped: delta.removed,
            remaining,
        };
        debug!(%warning, "pruned stale dependency edges");
        self.inner
            .diagnostics
            .borrow_mut()
            .push(Diagnostic::StaleEdge(warning));
    }

    /// The node whose evaluation is in progress, if any.
    pub fn current_node(&self) -> Option<NodeId> {
        self.inner.tracking.current()
    }

    pub fn is_tracking(&self) -> bool {
        self.inner.tracking.is_active()
    }

    /// Cells the node read in its last successful evaluation.
    pub fn dependencies(&self, node: NodeId) -> Vec<CellId> {
        self.inner.graph.borrow().dependencies(node)
    }

    /// Nodes that read the cell in their last successful evaluation.
    pub fn dependents(&self, cell: CellId) -> Vec<NodeId> {
        self.inner.graph.borrow().dependents(cell)
    }

    pub fn edge_count(&self) -> usize {
        self.inner.graph.borrow().edge_count()
    }

    // ---------------------------------------------------------------------
    // Scheduling
    // ---------------------------------------------------------------------

    /// Run one frame: apply finished offload results, then flush the pending
    /// batch in priority order.
    ///
    /// At least one node is evaluated per tick. After that the flush stops
    /// as soon as `budget` is spent; the remaining nodes roll over to the
    /// next tick ahead of any marks raised during this one.
    pub fn tick(&self, budget: Duration) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::default();
        report.completions = self.apply_completions(&mut report.errors);

        let frame = self.inner.scheduler.borrow_mut().begin_flush();
        let Some(frame) = frame else {
            report.state = self.scheduler_state();
            return report;
        };
        report.frame = Some(frame);
        self.inner.tracker.borrow_mut().clear_dirty();

        let span = debug_span!("tick", frame);
        let _enter = span.enter();

        let mut out_of_time = false;
        loop {
            if report.evaluated + report.failed > 0 && started.elapsed() >= budget {
                out_of_time = true;
                break;
            }
            let next = self.inner.scheduler.borrow_mut().next_node();
            let Some(node) = next else {
                break;
            };

            match self.evaluate(node) {
                Ok(()) => report.evaluated += 1,
                Err(err) => {
                    warn!(%node, error = %err, "node evaluation failed");
                    report.failed += 1;
                    report.errors.push(err);
                }
            }
            let loops = self.inner.scheduler.borrow_mut().take_loop_errors();
            report.errors.extend(loops);
        }

        report.rolled_over = self.inner.scheduler.borrow_mut().end_flush();
        report.budget_exhausted = out_of_time && report.rolled_over > 0;
        report.state = self.scheduler_state();
        debug!(
            evaluated = report.evaluated,
            failed = report.failed,
            rolled_over = report.rolled_over,
            "frame flushed"
        );
        report
    }

    /// [`tick`](Self::tick) with the configured default budget.
    pub fn tick_default(&self) -> TickReport {
        self.tick(self.inner.config.scheduler.default_budget())
    }

    fn evaluate(&self, node: NodeId) -> Result<(), PulseError> {
        let func = self.inner.nodes.borrow().get(&node).cloned();
        let result = match func {
            Some(func) => self.call_node(node, &func),
            None => Err(PulseError::UnknownNode(node)),
        };
        self.inner
            .scheduler
            .borrow_mut()
            .finish_node(node, result.is_ok());
        result
    }

    fn call_node(&self, node: NodeId, func: &NodeFn) -> Result<(), PulseError> {
        let Ok(mut func) = func.try_borrow_mut() else {
            return Err(PulseError::CyclicEvaluation { node });
        };
        trace!(%node, "evaluating");
        self.track(node, |rt| (*func)(rt))
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.inner.scheduler.borrow().state()
    }

    /// Nodes waiting for the next tick, in evaluation order.
    pub fn pending_nodes(&self) -> Vec<NodeId> {
        self.inner.scheduler.borrow().pending()
    }

    /// Number of flushes run so far.
    pub fn frame(&self) -> u64 {
        self.inner.scheduler.borrow().frame()
    }

    // ---------------------------------------------------------------------
    // Scopes
    // ---------------------------------------------------------------------

    pub fn root_scope(&self) -> ScopeId {
        self.inner.scopes.borrow().root()
    }

    /// Create a scope directly under the root.
    pub fn create_scope(&self) -> ScopeId {
        let root = self.root_scope();
        let mut scopes = self.inner.scopes.borrow_mut();
        // The root scope always exists
        scopes.create_child(root).unwrap_or(root)
    }

    pub fn create_child_scope(&self, parent: ScopeId) -> Result<ScopeId, PulseError> {
        self.inner.scopes.borrow_mut().create_child(parent)
    }

    pub fn nearest_common_scope(&self, a: ScopeId, b: ScopeId) -> Option<ScopeId> {
        self.inner.scopes.borrow().nearest_common(a, b)
    }

    /// The scope that owns the cell.
    pub fn cell_scope<T>(&self, cell: Cell<T>) -> Option<ScopeId> {
        self.inner.scopes.borrow().owner_of_cell(cell.id())
    }

    /// The scope that owns the node.
    pub fn node_scope(&self, node: NodeId) -> Option<ScopeId> {
        self.inner.scopes.borrow().owner_of_node(node)
    }

    /// Dispose a scope, its descendants and everything they own.
    ///
    /// Nodes go first so no evaluation can observe a half-destroyed scope.
    pub fn dispose_scope(&self, scope: ScopeId) -> Result<(), PulseError> {
        let released = self.inner.scopes.borrow_mut().teardown(scope)?;
        debug!(
            %scope,
            nodes = released.nodes.len(),
            cells = released.cells.len(),
            "scope disposed"
        );
        for node in released.nodes {
            self.dispose_node(node);
        }
        for cell in released.cells {
            self.release_cell(cell);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Offload
    // ---------------------------------------------------------------------

    /// Run `work(payload)` on a worker thread and write the result into
    /// `target` on this thread once it completes.
    ///
    /// Returns immediately. The write lands on the next [`tick`](Self::tick)
    /// or [`next_completion`](Self::next_completion), unless the handle is
    /// cancelled first.
    pub fn submit<P, R, W>(
        &self,
        tier: Tier,
        payload: P,
        work: W,
        target: Cell<R>,
    ) -> Result<WorkHandle, PulseError>
    where
        P: Send + 'static,
        R: Clone + Send + 'static,
        W: FnOnce(P) -> R + Send + 'static,
    {
        if !self.inner.tracker.borrow().contains(target.id()) {
            return Err(PulseError::UnknownCell(target.id()));
        }
        self.inner.offload.submit(tier, move || {
            let value = work(payload);
            Box::new(move |rt: &Runtime| rt.write(target, value)) as ApplyFn
        })
    }

    /// A `Send` writer for loaders running outside the runtime thread.
    pub fn remote_writer<T: Clone + Send + 'static>(&self, cell: Cell<T>) -> RemoteWriter<T> {
        RemoteWriter::new(cell, self.inner.offload.sender())
    }

    /// Work items still waiting for a worker.
    pub fn queued_work(&self) -> usize {
        self.inner.offload.queued()
    }

    /// Apply every completion that has already arrived.
    ///
    /// [`tick`](Self::tick) does this itself; call it directly to apply
    /// results without flushing. Returns how many writes were applied.
    pub fn drain_completions(&self) -> usize {
        let mut errors = Vec::new();
        self.apply_completions(&mut errors)
    }

    fn apply_completions(&self, errors: &mut Vec<PulseError>) -> usize {
        let mut applied = 0;
        while let Some(completion) = self.inner.offload.try_next() {
            match completion.apply(self) {
                Some(Ok(_)) => applied += 1,
                Some(Err(err)) => {
                    warn!(error = %err, "failed to apply completion");
                    errors.push(err);
                }
                None => {}
            }
        }
        applied
    }

    /// Wait for the next completion and apply it.
    ///
    /// Cancelled results are skipped. Returns `None` if another task is
    /// already waiting on this runtime. The future never resolves when no
    /// work is outstanding.
    pub async fn next_completion(&self) -> Option<Result<WriteOutcome, PulseError>> {
        loop {
            let completion = self.inner.offload.next().await?;
            if let Some(result) = completion.apply(self) {
                return Some(result);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Lifecycle and diagnostics
    // ---------------------------------------------------------------------

    /// Run a synchronous lifecycle callback under the lifecycle budget.
    ///
    /// Overruns are reported as [`Diagnostic::SlowLifecycle`]; the callback
    /// is never interrupted.
    pub fn lifecycle<R>(&self, label: &str, f: impl FnOnce() -> R) -> R {
        let started = Instant::now();
        let result = f();
        let elapsed = started.elapsed();
        let budget = self.inner.config.lifecycle_budget();
        if elapsed > budget {
            warn!(label, ?elapsed, ?budget, "lifecycle callback over budget");
            self.inner
                .diagnostics
                .borrow_mut()
                .push(Diagnostic::SlowLifecycle {
                    label: label.to_owned(),
                    elapsed,
                    budget,
                });
        }
        result
    }

    /// Remove and return all buffered diagnostics, oldest first.
    pub fn take_diagnostics(&self) -> Vec<Diagnostic> {
        self.inner.diagnostics.borrow_mut().drain()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("cells", &self.cell_count())
            .field("nodes", &self.node_count())
            .field("state", &self.scheduler_state())
            .field("workers", &self.inner.offload.worker_count())
            .finish()
    }
}
