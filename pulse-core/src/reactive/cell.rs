//! Cell Handles
//!
//! A [`Cell`] is a typed, copyable handle to an observable unit of state
//! owned by a [`Runtime`]. The value itself lives in the runtime's change
//! tracker; the handle only carries the id, so the same cell can be shared
//! between any number of nodes without duplicating the value.
//!
//! # How Cells Work
//!
//! 1. Reading a cell inside a tracked evaluation registers the evaluating
//!    node as a dependent.
//!
//! 2. Writing a cell compares the new value with the current one under the
//!    cell's [`Equality`](super::Equality). Unchanged writes stop there.
//!
//! 3. Accepted writes run the cell's watchers, then mark every dependent
//!    node dirty in the pending frame batch.

use std::fmt;
use std::marker::PhantomData;

use crate::error::PulseError;
use crate::graph::CellId;

use super::runtime::Runtime;

/// Result of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The value was equal to the current one; nothing was marked.
    Unchanged,

    /// A watcher suppressed propagation; the value was still stored.
    Suppressed,

    /// The value changed and `marked` dependents were queued.
    Changed { marked: usize },
}

impl WriteOutcome {
    /// Whether the stored value changed.
    pub fn is_changed(&self) -> bool {
        !matches!(self, WriteOutcome::Unchanged)
    }
}

/// A typed handle to a state cell.
///
/// # Example
///
/// ```rust,ignore
/// let rt = Runtime::new();
/// let count = rt.create_cell(0);
///
/// rt.create_node(Tier::Visible, move |rt| {
///     println!("count = {}", count.get(rt)?);
///     Ok(())
/// });
///
/// count.set(&rt, 5)?;
/// rt.tick(Duration::from_millis(16));
/// ```
pub struct Cell<T> {
    id: CellId,
    // fn() -> T keeps the handle Send + Sync + Copy regardless of T
    _marker: PhantomData<fn() -> T>,
}

impl<T> Cell<T> {
    pub(crate) fn from_id(id: CellId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Get the cell's unique ID.
    pub fn id(&self) -> CellId {
        self.id
    }
}

impl<T: Clone + 'static> Cell<T> {
    /// Get the current value, tracking the read if a node is evaluating.
    pub fn get(&self, rt: &Runtime) -> Result<T, PulseError> {
        rt.read(*self)
    }

    /// Get the current value without tracking dependencies.
    pub fn peek(&self, rt: &Runtime) -> Result<T, PulseError> {
        rt.peek(*self)
    }

    /// Borrow the current value (tracked) and map it.
    pub fn with<R>(&self, rt: &Runtime, f: impl FnOnce(&T) -> R) -> Result<R, PulseError> {
        rt.with(*self, f)
    }

    /// Set a new value and propagate if it changed.
    pub fn set(&self, rt: &Runtime, value: T) -> Result<WriteOutcome, PulseError> {
        rt.write(*self, value)
    }

    /// Update the value using a function of the current value.
    pub fn update(
        &self,
        rt: &Runtime,
        f: impl FnOnce(&T) -> T,
    ) -> Result<WriteOutcome, PulseError> {
        rt.update(*self, f)
    }
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Cell<T> {}

impl<T> PartialEq for Cell<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Cell<T> {}

impl<T> std::hash::Hash for Cell<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.id)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}
