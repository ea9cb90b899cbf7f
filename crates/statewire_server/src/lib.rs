//! # Statewire Server
//!
//! Transport gateway and reference WebSocket server for statewire.
//!
//! This crate provides:
//! - The [`Gateway`], the per-message protocol state machine
//! - Handler resolution ([`HandlerResolver`], [`HandlerRegistry`]) and the
//!   [`Event`] object handlers receive
//! - Per-connection bookkeeping ([`Connection`])
//! - An axum WebSocket transport ([`LiveServer`])
//!
//! # Protocol
//!
//! Each inbound event runs to completion before the next message on the same
//! connection is read:
//! 1. Decode the envelope; a bad envelope is answered with `error`
//! 2. Bind the session context named by `contextId`
//! 3. Invoke the handler; failures are answered with `error`
//! 4. Flush the dirty cells as one `stateUpdate` and one `domUpdate`
//! 5. Answer `eventHandled`
//! 6. Unbind the context, on every path
//!
//! ```
//! use statewire_engine::{CellStore, ContextRegistry, RegistryConfig};
//! use statewire_server::{Gateway, HandlerRegistry};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(ContextRegistry::new(RegistryConfig::default()));
//! let handlers = Arc::new(HandlerRegistry::new());
//! handlers.register("increment", |_event, scope| {
//!     scope.require_context()?.update("count", |v| v.as_i64().unwrap_or(0) + 1)?;
//!     Ok(())
//! });
//!
//! {
//!     let mut ctx = registry.create_with_id("ctx_1").unwrap();
//!     ctx.create_named_cell("count", 0).unwrap();
//!     ctx.register_component("counter", |cells: &CellStore| {
//!         format!("<b>{}</b>", cells.get("count").cloned().unwrap_or_default())
//!     });
//! }
//!
//! let gateway = Gateway::new(registry, handlers);
//! let (mut conn, _connected) = gateway.open();
//! let replies = gateway.handle_text(
//!     &mut conn,
//!     r#"{"type":"event","handlerId":"increment","contextId":"ctx_1"}"#,
//! );
//! let tags: Vec<_> = replies.iter().map(|m| m.type_name()).collect();
//! assert_eq!(tags, ["stateUpdate", "domUpdate", "eventHandled"]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod connection;
mod error;
mod event;
mod gateway;
mod handler;
mod transport;

pub use config::ServerConfig;
pub use connection::{Connection, ConnectionId, ConnectionState};
pub use error::{GatewayError, ServerError, ServerResult};
pub use event::Event;
pub use gateway::{Gateway, GatewayStats, MessagePhase};
pub use handler::{HandlerError, HandlerRegistry, HandlerResolver, HandlerResult, HandlerScope};
pub use transport::{LiveServer, PageRenderer};
