//! Pulse Core
//!
//! This crate provides the core runtime for the Pulse UI framework.
//! It implements:
//!
//! - Observable state cells with automatic dependency tracking
//! - A priority render scheduler with per-frame batching and a loop guard
//! - A worker pool for heavy computations whose results re-enter as writes
//! - Windowed rendering of long lists with template-keyed resource reuse
//!
//! Drawing, layout and networking are left to the embedding application: the
//! runtime only decides *what* needs to refresh and *when*.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: ids, priority tiers and the cell -> node dependency graph
//! - `reactive`: cells, the change tracker, scopes and the [`Runtime`]
//! - `scheduler`: frame batches and the render scheduler
//! - `offload`: the task offload queue
//! - `list`: the windowed list renderer
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use pulse_core::{Runtime, Tier};
//!
//! let rt = Runtime::new();
//! let count = rt.create_cell(0);
//! let doubled = rt.create_cell(0);
//!
//! // A node re-runs whenever a cell it read changes
//! rt.create_node(Tier::Visible, move |rt| {
//!     doubled.set(rt, count.get(rt)? * 2)?;
//!     Ok(())
//! });
//!
//! count.set(&rt, 5)?;
//! rt.tick(Duration::from_millis(16));
//! assert_eq!(doubled.peek(&rt)?, 10);
//! ```

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod graph;
pub mod list;
pub mod offload;
pub mod reactive;
pub mod scheduler;

pub use config::RuntimeConfig;
pub use diagnostics::{Diagnostic, StaleEdgeWarning};
pub use error::{ConfigError, PulseError};
pub use graph::{CellId, NodeId, Tier};
pub use list::{RenderBackend, TemplateId, WindowDelta, WindowedList};
pub use offload::{RemoteWriter, WorkHandle, WorkId, WorkStatus};
pub use reactive::{Cell, Equality, Runtime, ScopeId, WatchDecision, WatchId, WriteOutcome};
pub use scheduler::{SchedulerState, TickReport};
