//! Windowed List Rendering
//!
//! Long sequences are rendered through a [`WindowedList`]: only the visible
//! rows and a small overscan margin have graph nodes, and render resources
//! are recycled through a template-keyed [`ResourcePool`]. The actual drawing
//! is delegated to a [`RenderBackend`].

mod backend;
mod pool;
mod window;

pub use backend::{RenderBackend, TemplateId};
pub use pool::ResourcePool;
pub use window::{WindowDelta, WindowedList};
