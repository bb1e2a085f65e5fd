//! Windowed List
//!
//! Keeps graph nodes only for the slice of a long sequence that is on
//! screen, plus an overscan margin on each side.
//!
//! # Algorithm
//!
//! ```text
//!   items:   0 ............ lo ====== hi ............ len
//!   window:          lo - overscan ...... hi + overscan    (clamped)
//! ```
//!
//! 1. Rows leaving the window are torn down first: node disposed (which
//!    prunes its edges), item cell destroyed, render resource released to
//!    the template pool.
//! 2. Rows entering the window get a fresh cell and node. Their resource is
//!    re-bound from the pool when one with the same template is free,
//!    otherwise materialized.
//! 3. Rows inside `[lo, hi)` run at [`Tier::Visible`], overscan rows at
//!    [`Tier::OffScreen`]. Retained rows are re-tiered as the window moves.

use std::cell::{Ref, RefCell};
use std::cmp;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::rc::Rc;

use tracing::debug;

use crate::error::PulseError;
use crate::graph::{NodeId, Tier};
use crate::reactive::{Cell, Runtime, ScopeId, WriteOutcome};

use super::backend::{RenderBackend, TemplateId};
use super::pool::ResourcePool;

/// What a window change did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowDelta {
    /// Rows that entered the window.
    pub mounted: usize,

    /// Rows that left the window.
    pub torn_down: usize,

    /// Mounted rows that needed a new resource.
    pub materialized: usize,

    /// Mounted rows that reused a pooled resource.
    pub rebound: usize,

    /// Released resources destroyed because the pool was full.
    pub disposed: usize,

    /// Retained rows whose tier changed.
    pub retiered: usize,

    /// Retained rows whose item value changed.
    pub refreshed: usize,
}

impl WindowDelta {
    fn merge(&mut self, other: WindowDelta) {
        self.mounted += other.mounted;
        self.torn_down += other.torn_down;
        self.materialized += other.materialized;
        self.rebound += other.rebound;
        self.disposed += other.disposed;
        self.retiered += other.retiered;
        self.refreshed += other.refreshed;
    }
}

struct Row<T, H> {
    node: NodeId,
    cell: Cell<T>,
    template: TemplateId,
    slot: Rc<RefCell<Option<H>>>,
}

type TemplateFn<T> = Box<dyn Fn(usize, &T) -> TemplateId>;

/// Renders a long ordered sequence by materializing only its visible slice.
pub struct WindowedList<T, B>
where
    T: Clone + PartialEq + 'static,
    B: RenderBackend<T> + 'static,
    B::Handle: 'static,
{
    rt: Runtime,
    scope: ScopeId,
    backend: Rc<RefCell<B>>,
    items: Vec<T>,
    template_of: TemplateFn<T>,
    overscan: usize,
    visible: Range<usize>,
    rows: BTreeMap<usize, Row<T, B::Handle>>,
    pool: ResourcePool<B::Handle>,
    disposed: bool,
}

impl<T, B> WindowedList<T, B>
where
    T: Clone + PartialEq + 'static,
    B: RenderBackend<T> + 'static,
    B::Handle: 'static,
{
    /// Create a list with nothing mounted. Overscan and pool capacity come
    /// from the runtime's list configuration.
    pub fn new(rt: &Runtime, backend: B, items: Vec<T>) -> Self {
        let config = rt.config().list.clone();
        Self {
            rt: rt.clone(),
            scope: rt.create_scope(),
            backend: Rc::new(RefCell::new(backend)),
            items,
            template_of: Box::new(|_, _| TemplateId::default()),
            overscan: config.overscan,
            visible: 0..0,
            rows: BTreeMap::new(),
            pool: ResourcePool::new(config.pool_capacity),
            disposed: false,
        }
    }

    pub fn with_overscan(mut self, overscan: usize) -> Self {
        self.overscan = overscan;
        self
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool = ResourcePool::new(capacity);
        self
    }

    /// Choose a template per item. Items sharing a template share pooled
    /// resources.
    pub fn with_templates(mut self, template_of: impl Fn(usize, &T) -> TemplateId + 'static) -> Self {
        self.template_of = Box::new(template_of);
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn overscan(&self) -> usize {
        self.overscan
    }

    /// The visible range, clamped to the sequence.
    pub fn visible_range(&self) -> Range<usize> {
        self.visible.clone()
    }

    /// The range of indices that currently have rows.
    pub fn mounted_range(&self) -> Range<usize> {
        match (self.rows.keys().next(), self.rows.keys().next_back()) {
            (Some(first), Some(last)) => *first..last + 1,
            _ => 0..0,
        }
    }

    pub fn mounted_count(&self) -> usize {
        self.rows.len()
    }

    /// The node rendering `index`, if mounted.
    pub fn row_node(&self, index: usize) -> Option<NodeId> {
        self.rows.get(&index).map(|row| row.node)
    }

    /// The cell holding the item at `index`, if mounted.
    pub fn row_cell(&self, index: usize) -> Option<Cell<T>> {
        self.rows.get(&index).map(|row| row.cell)
    }

    /// Resources waiting in the pool.
    pub fn pooled(&self) -> usize {
        self.pool.len()
    }

    pub fn backend(&self) -> Ref<'_, B> {
        self.backend.borrow()
    }

    /// Move the visible range to `range` (clamped to the sequence).
    pub fn set_visible(&mut self, range: Range<usize>) -> Result<WindowDelta, PulseError> {
        let end = range.end.min(self.items.len());
        let start = range.start.min(end);
        self.visible = start..end;
        self.reconcile()
    }

    /// Replace the whole sequence.
    ///
    /// Retained rows receive their new item through a cell write, so rows
    /// whose item is unchanged do not re-render. A row whose template
    /// changed is remounted.
    pub fn set_items(&mut self, items: Vec<T>) -> Result<WindowDelta, PulseError> {
        self.items = items;
        let len = self.items.len();
        let end = self.visible.end.min(len);
        self.visible = self.visible.start.min(end)..end;

        let mut delta = WindowDelta::default();
        let retained: Vec<usize> = self
            .rows
            .keys()
            .copied()
            .take_while(|index| *index < len)
            .collect();
        for index in retained {
            self.refresh_row(index, &mut delta)?;
        }
        delta.merge(self.reconcile()?);
        Ok(delta)
    }

    /// Replace one item. Only that row's node is re-queued.
    pub fn set_item(&mut self, index: usize, item: T) -> Result<WriteOutcome, PulseError> {
        let len = self.items.len();
        let current = self
            .items
            .get_mut(index)
            .ok_or(PulseError::IndexOutOfRange { index, len })?;
        if *current == item {
            return Ok(WriteOutcome::Unchanged);
        }
        *current = item;

        if !self.rows.contains_key(&index) {
            return Ok(WriteOutcome::Changed { marked: 0 });
        }
        let mut delta = WindowDelta::default();
        self.refresh_row(index, &mut delta)?;
        Ok(WriteOutcome::Changed {
            marked: delta.refreshed + delta.mounted,
        })
    }

    /// Tear down every row and destroy every pooled resource.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        let mut delta = WindowDelta::default();
        let rows = std::mem::take(&mut self.rows);
        for row in rows.into_values() {
            self.teardown(row, &mut delta);
        }
        for handle in self.pool.drain() {
            let backend = &self.backend;
            self.rt
                .lifecycle("dispose", || backend.borrow_mut().dispose(handle));
        }
        if let Err(err) = self.rt.dispose_scope(self.scope) {
            debug!(%err, "list scope already gone");
        }
        debug!(torn_down = delta.torn_down, "list disposed");
    }

    fn window(&self) -> Range<usize> {
        let end = cmp::min(self.items.len(), self.visible.end.saturating_add(self.overscan));
        let start = self.visible.start.saturating_sub(self.overscan).min(end);
        start..end
    }

    fn tier_for(&self, index: usize) -> Tier {
        if self.visible.contains(&index) {
            Tier::Visible
        } else {
            Tier::OffScreen
        }
    }

    fn reconcile(&mut self) -> Result<WindowDelta, PulseError> {
        let mut delta = WindowDelta::default();
        let window = self.window();

        let leaving: Vec<usize> = self
            .rows
            .keys()
            .copied()
            .filter(|index| !window.contains(index))
            .collect();
        for index in leaving {
            if let Some(row) = self.rows.remove(&index) {
                self.teardown(row, &mut delta);
            }
        }

        for index in window.clone() {
            let tier = self.tier_for(index);
            match self.rows.get(&index) {
                Some(row) => {
                    if self.rt.tier(row.node) != Some(tier) {
                        self.rt.set_tier(row.node, tier)?;
                        delta.retiered += 1;
                    }
                }
                None => self.mount(index, &mut delta)?,
            }
        }

        debug!(
            ?window,
            mounted = delta.mounted,
            torn_down = delta.torn_down,
            rebound = delta.rebound,
            "list window updated"
        );
        Ok(delta)
    }

    fn mount(&mut self, index: usize, delta: &mut WindowDelta) -> Result<(), PulseError> {
        let item = self
            .items
            .get(index)
            .cloned()
            .ok_or(PulseError::IndexOutOfRange {
                index,
                len: self.items.len(),
            })?;
        let template = (self.template_of)(index, &item);
        let cell = self.rt.create_cell_in(self.scope, item)?;
        let slot = Rc::new(RefCell::new(None));
        let node = self.rt.create_node_in(
            self.scope,
            self.tier_for(index),
            row_renderer(index, cell, Rc::clone(&self.backend), Rc::clone(&slot)),
        )?;

        let backend = &self.backend;
        let handle = match self.pool.acquire(template) {
            Some(mut handle) => {
                self.rt
                    .lifecycle("rebind", || backend.borrow_mut().rebind(&mut handle, node));
                delta.rebound += 1;
                handle
            }
            None => {
                delta.materialized += 1;
                self.rt
                    .lifecycle("materialize", || backend.borrow_mut().materialize(node, template))
            }
        };
        *slot.borrow_mut() = Some(handle);

        self.rows.insert(
            index,
            Row {
                node,
                cell,
                template,
                slot,
            },
        );
        delta.mounted += 1;
        Ok(())
    }

    fn teardown(&mut self, row: Row<T, B::Handle>, delta: &mut WindowDelta) {
        self.rt.dispose_node(row.node);
        self.rt.dispose_cell(row.cell);

        let handle = row.slot.borrow_mut().take();
        if let Some(handle) = handle {
            if let Some(overflow) = self.pool.release(row.template, handle) {
                let backend = &self.backend;
                self.rt
                    .lifecycle("dispose", || backend.borrow_mut().dispose(overflow));
                delta.disposed += 1;
            }
        }
        delta.torn_down += 1;
    }

    fn refresh_row(&mut self, index: usize, delta: &mut WindowDelta) -> Result<(), PulseError> {
        let Some(item) = self.items.get(index).cloned() else {
            return Ok(());
        };
        let template = (self.template_of)(index, &item);
        let Some(row) = self.rows.get(&index) else {
            return Ok(());
        };

        if row.template == template {
            if self.rt.write(row.cell, item)?.is_changed() {
                delta.refreshed += 1;
            }
            return Ok(());
        }

        if let Some(row) = self.rows.remove(&index) {
            self.teardown(row, delta);
        }
        self.mount(index, delta)
    }
}

impl<T, B> Drop for WindowedList<T, B>
where
    T: Clone + PartialEq + 'static,
    B: RenderBackend<T> + 'static,
    B::Handle: 'static,
{
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<T, B> fmt::Debug for WindowedList<T, B>
where
    T: Clone + PartialEq + 'static,
    B: RenderBackend<T> + 'static,
    B::Handle: 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowedList")
            .field("len", &self.items.len())
            .field("visible", &self.visible)
            .field("mounted", &self.mounted_range())
            .field("pooled", &self.pool.len())
            .finish()
    }
}

/// The node closure of one row: read the item cell, draw it.
fn row_renderer<T, B>(
    index: usize,
    cell: Cell<T>,
    backend: Rc<RefCell<B>>,
    slot: Rc<RefCell<Option<B::Handle>>>,
) -> impl FnMut(&Runtime) -> Result<(), PulseError> + 'static
where
    T: Clone + 'static,
    B: RenderBackend<T> + 'static,
    B::Handle: 'static,
{
    move |rt: &Runtime| {
        let item = cell.get(rt)?;
        let (Ok(mut backend), Ok(mut slot)) = (backend.try_borrow_mut(), slot.try_borrow_mut())
        else {
            return Err(PulseError::evaluation("render backend is busy"));
        };
        if let Some(handle) = slot.as_mut() {
            backend.render(handle, index, &item);
        }
        Ok(())
    }
}
