//! # Statewire Engine
//!
//! Server-held reactive UI state for statewire.
//!
//! This crate provides:
//! - `StateCell`, a reactive value with dirty tracking and subscribers
//! - `ComponentRegistry`, the renderable units re-rendered after a change
//! - `SessionContext`, which owns the cells and components of one session
//! - `ContextRegistry`, the process-wide directory of sessions with TTL eviction
//!
//! ## Binding
//!
//! A session's state is only reachable through a [`ContextGuard`]. Binding a
//! context ([`ContextRegistry::bind`], [`SessionContext::bind`]) yields the
//! guard; dropping it unbinds. Every exit path releases the binding, handler
//! panics included.
//!
//! ```rust
//! use statewire_engine::{CellStore, ContextRegistry, RegistryConfig};
//!
//! let registry = ContextRegistry::new(RegistryConfig::default());
//! let mut ctx = registry.create();
//! let count = ctx.create_named_cell("count", 0).unwrap();
//! ctx.register_component("counter", |cells: &CellStore| {
//!     format!("<span>{}</span>", cells.get("count").cloned().unwrap_or_default())
//! });
//!
//! ctx.set(&count, 1).unwrap();
//! let flush = ctx.flush().unwrap();
//! assert_eq!(flush.cells.len(), 1);
//! assert_eq!(flush.patches[0].html, "<span>1</span>");
//! ```
//!
//! ## Key Invariants
//!
//! - A cell belongs to exactly one session
//! - Writing a cell's current value is a no-op
//! - A flush reads, derives from, and clears the dirty set under one binding
//! - Component ids never change across re-renders
//! - A session older than its TTL is unreachable by id

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod cell;
mod clock;
mod component;
mod config;
mod context;
mod error;
mod registry;
mod sweeper;

pub use cell::{CellStore, StateCell, SubscriptionId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use component::{Component, ComponentRegistry};
pub use config::RegistryConfig;
pub use context::{ContextGuard, Flush, SessionContext};
pub use error::{EngineError, EngineResult};
pub use registry::{ContextRegistry, RegistryStats};
pub use sweeper::SweeperHandle;

pub use statewire_protocol::{CellId, CellValue, ComponentId, DomPatch, SessionId};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
