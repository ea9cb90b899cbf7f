//! # Statewire Protocol
//!
//! Wire envelopes for the statewire live-state protocol.
//!
//! This crate provides:
//! - `ClientMessage` for browser → server envelopes (event, init, ping)
//! - `ServerMessage` for server → browser envelopes (state diffs, DOM patches, ...)
//! - Identifier newtypes shared by every layer (`SessionId`, `CellId`, `ComponentId`)
//! - JSON decoding with tag validation and JSON encoding
//!
//! Every message is a single JSON object carrying a string `type`
//! discriminator. Unknown fields are ignored; unknown `type` values are
//! rejected with [`ProtocolError::UnknownType`].
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod ids;
mod messages;

pub use error::{ProtocolError, ProtocolResult};
pub use ids::{CellId, ComponentId, SessionId};
pub use messages::{
    CellValue, ClientMessage, DomPatch, ErrorCode, EventMessage, InitMessage, ModifierKeys,
    ServerMessage, CLIENT_MESSAGE_TYPES,
};
