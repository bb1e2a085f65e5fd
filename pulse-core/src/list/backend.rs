//! The boundary between the list renderer and whatever draws rows.

use std::fmt;

use crate::graph::NodeId;

/// Structural template of a row.
///
/// Two items with the same template can share a render resource: a pooled
/// handle is re-bound instead of being rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TemplateId(pub u32);

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "template#{}", self.0)
    }
}

/// Creates, updates and destroys the visual resources of rows.
///
/// The core never looks inside a handle. Every call is made on the runtime
/// thread and timed against the lifecycle budget.
pub trait RenderBackend<T> {
    /// Opaque render resource (a widget, a DOM subtree, a GPU buffer).
    type Handle;

    /// Build a fresh resource for `node` using `template`.
    fn materialize(&mut self, node: NodeId, template: TemplateId) -> Self::Handle;

    /// Hand a pooled resource to a new node.
    fn rebind(&mut self, handle: &mut Self::Handle, node: NodeId) {
        let _ = (handle, node);
    }

    /// Draw `item` into the resource. Called from the row's node, so it runs
    /// again whenever the row's item changes.
    fn render(&mut self, handle: &mut Self::Handle, index: usize, item: &T);

    /// Destroy a resource that will not be reused.
    fn dispose(&mut self, handle: Self::Handle);
}
