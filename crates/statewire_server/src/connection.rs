//! Per-connection bookkeeping.

use statewire_protocol::SessionId;
use std::fmt;

/// Identifier of one transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Open, no `init` received yet.
    Connected,
    /// Associated with a session by `init`.
    Active,
    /// Closed; further messages are refused.
    Closed,
}

/// One client connection, owned by its transport task.
///
/// Remembers the session named by the last `init` so that events without a
/// `contextId` can fall back to it.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    state: ConnectionState,
    context_id: Option<SessionId>,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: ConnectionState::Connected,
            context_id: None,
        }
    }

    /// Returns the connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns true until the connection is closed.
    pub fn is_open(&self) -> bool {
        self.state != ConnectionState::Closed
    }

    /// Returns the session associated by `init`.
    pub fn context_id(&self) -> Option<&SessionId> {
        self.context_id.as_ref()
    }

    /// Associates a session. Returns the previously associated one if it
    /// differs.
    pub(crate) fn activate(&mut self, context_id: SessionId) -> Option<SessionId> {
        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::Active;
        }
        match self.context_id.replace(context_id) {
            Some(previous) if Some(&previous) != self.context_id.as_ref() => Some(previous),
            _ => None,
        }
    }

    pub(crate) fn close(&mut self) -> Option<SessionId> {
        self.state = ConnectionState::Closed;
        self.context_id.take()
    }
}
