//! Change Tracker
//!
//! The change tracker owns the values of every cell and decides whether a
//! write is a real change. It never touches the scheduler directly: an
//! accepted write is handed back to the [`Runtime`](super::Runtime), which
//! runs the watchers and then forwards the dependents to the scheduler.
//!
//! Values are stored type-erased (`Rc<dyn Any>`) together with the cell's
//! equality policy, so a single store can hold cells of every type.

use std::any::{type_name, Any};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;

use crate::error::PulseError;
use crate::graph::CellId;

use super::equality::{Equality, ErasedEquality};

/// Decision returned by a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchDecision {
    /// Let the write mark dependents dirty.
    Propagate,

    /// Store the value but do not schedule any dependent.
    Suppress,
}

/// Identifier of an attached watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

impl WatchId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) type ErasedWatcher = Rc<RefCell<dyn FnMut(&dyn Any, &dyn Any) -> WatchDecision>>;

/// Storage for one cell.
struct CellSlot {
    value: Rc<dyn Any>,
    equality: ErasedEquality,
    dirty: bool,
    /// Number of accepted writes.
    version: u64,
    watchers: Vec<(WatchId, ErasedWatcher)>,
    type_name: &'static str,
}

impl fmt::Debug for CellSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellSlot")
            .field("type", &self.type_name)
            .field("equality", &self.equality)
            .field("dirty", &self.dirty)
            .field("version", &self.version)
            .field("watchers", &self.watchers.len())
            .finish()
    }
}

/// A write that passed the equality check.
pub(crate) struct AcceptedWrite {
    /// The value that was replaced.
    pub(crate) old: Rc<dyn Any>,
    /// Watchers to invoke, cloned out so the store can be released first.
    pub(crate) watchers: Vec<ErasedWatcher>,
}

/// Owns cell values, equality policies, watchers and dirty flags.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    slots: HashMap<CellId, CellSlot>,
    /// Cells written since the last flush began, in write order.
    dirty: IndexSet<CellId>,
    watch_owners: HashMap<WatchId, CellId>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cell holding `value`.
    pub fn insert<T: 'static>(&mut self, value: T, equality: Equality<T>) -> CellId {
        let id = CellId::new();
        self.slots.insert(
            id,
            CellSlot {
                value: Rc::new(value),
                equality: equality.erase(),
                dirty: false,
                version: 0,
                watchers: Vec::new(),
                type_name: type_name::<T>(),
            },
        );
        id
    }

    /// Destroy a cell and its watchers.
    pub fn remove(&mut self, id: CellId) -> bool {
        let Some(slot) = self.slots.remove(&id) else {
            return false;
        };
        for (watch, _) in slot.watchers {
            self.watch_owners.remove(&watch);
        }
        self.dirty.shift_remove(&id);
        true
    }

    pub fn contains(&self, id: CellId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Number of live cells.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Borrow a cell's value.
    pub fn with_value<T: 'static, R>(
        &self,
        id: CellId,
        f: impl FnOnce(&T) -> R,
    ) -> Result<R, PulseError> {
        let slot = self.slots.get(&id).ok_or(PulseError::UnknownCell(id))?;
        let value = slot
            .value
            .downcast_ref::<T>()
            .ok_or(PulseError::TypeMismatch { cell: id })?;
        Ok(f(value))
    }

    /// Share a cell's value so it can be read after the store is released.
    pub(crate) fn share_value<T: 'static>(&self, id: CellId) -> Result<Rc<T>, PulseError> {
        let slot = self.slots.get(&id).ok_or(PulseError::UnknownCell(id))?;
        Rc::clone(&slot.value)
            .downcast::<T>()
            .map_err(|_| PulseError::TypeMismatch { cell: id })
    }

    /// Store `value` if it differs from the current one.
    ///
    /// Returns `None` when the equality policy reports no change.
    pub(crate) fn apply<T: 'static>(
        &mut self,
        id: CellId,
        value: T,
    ) -> Result<Option<AcceptedWrite>, PulseError> {
        let slot = self.slots.get_mut(&id).ok_or(PulseError::UnknownCell(id))?;
        if !slot.value.is::<T>() {
            return Err(PulseError::TypeMismatch { cell: id });
        }
        if slot.equality.eq(&*slot.value, &value) {
            return Ok(None);
        }

        let old = std::mem::replace(&mut slot.value, Rc::new(value));
        slot.version += 1;
        slot.dirty = true;
        let watchers = slot
            .watchers
            .iter()
            .map(|(_, watcher)| Rc::clone(watcher))
            .collect();
        self.dirty.insert(id);

        Ok(Some(AcceptedWrite { old, watchers }))
    }

    /// Attach a watcher to a cell.
    pub fn add_watcher<T, F>(&mut self, id: CellId, mut watcher: F) -> Result<WatchId, PulseError>
    where
        T: 'static,
        F: FnMut(&T, &T) -> WatchDecision + 'static,
    {
        let slot = self.slots.get_mut(&id).ok_or(PulseError::UnknownCell(id))?;
        if !slot.value.is::<T>() {
            return Err(PulseError::TypeMismatch { cell: id });
        }

        let erased: ErasedWatcher = Rc::new(RefCell::new(move |old: &dyn Any, new: &dyn Any| {
            match (old.downcast_ref::<T>(), new.downcast_ref::<T>()) {
                (Some(old), Some(new)) => watcher(old, new),
                _ => WatchDecision::Propagate,
            }
        }));

        let watch = WatchId::new();
        slot.watchers.push((watch, erased));
        self.watch_owners.insert(watch, id);
        Ok(watch)
    }

    /// Detach a watcher. Returns false if it was already gone.
    pub fn remove_watcher(&mut self, watch: WatchId) -> bool {
        let Some(cell) = self.watch_owners.remove(&watch) else {
            return false;
        };
        if let Some(slot) = self.slots.get_mut(&cell) {
            slot.watchers.retain(|(id, _)| *id != watch);
        }
        true
    }

    /// Whether the cell was written since the last flush began.
    pub fn is_dirty(&self, id: CellId) -> bool {
        self.slots.get(&id).is_some_and(|slot| slot.dirty)
    }

    /// Number of accepted writes to the cell.
    pub fn version(&self, id: CellId) -> Option<u64> {
        self.slots.get(&id).map(|slot| slot.version)
    }

    /// Clear every dirty flag. Returns how many cells were dirty.
    pub fn clear_dirty(&mut self) -> usize {
        let count = self.dirty.len();
        for id in self.dirty.drain(..) {
            if let Some(slot) = self.slots.get_mut(&id) {
                slot.dirty = false;
            }
        }
        count
    }
}
