//! The protocol state machine.

use crate::connection::{Connection, ConnectionId};
use crate::error::GatewayError;
use crate::event::Event;
use crate::handler::{HandlerResolver, HandlerScope};
use dashmap::DashMap;
use statewire_engine::{ContextGuard, ContextRegistry};
use statewire_protocol::{ClientMessage, EventMessage, InitMessage, ServerMessage, SessionId};
use std::any::Any;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Steps of handling one `event` message.
///
/// Every message starts and ends in `Idle`. An event with no bound session
/// goes straight from `Idle` to `HandlerInvoked`; a failed handler goes from
/// `HandlerInvoked` back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagePhase {
    /// No message in progress.
    Idle,
    /// The event's session is bound.
    ContextBound,
    /// The handler has run.
    HandlerInvoked,
    /// The dirty set has been read.
    DirtyCollected,
    /// Updates have been emitted and the dirty set cleared.
    Flushed,
}

impl MessagePhase {
    /// Returns true if `next` may follow `self`.
    pub fn can_transition_to(self, next: MessagePhase) -> bool {
        use MessagePhase::*;
        matches!(
            (self, next),
            (Idle, ContextBound)
                | (Idle, HandlerInvoked)
                | (ContextBound, HandlerInvoked)
                | (HandlerInvoked, DirtyCollected)
                | (DirtyCollected, Flushed)
                | (_, Idle)
        )
    }

    fn advance(&mut self, next: MessagePhase) {
        debug_assert!(
            self.can_transition_to(next),
            "invalid phase transition {:?} -> {:?}",
            self,
            next
        );
        trace!(from = ?self, to = ?next, "message phase");
        *self = next;
    }
}

/// Counters describing gateway activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayStats {
    /// Connections opened.
    pub connections_opened: u64,
    /// Connections closed.
    pub connections_closed: u64,
    /// Inbound messages received, valid or not.
    pub messages_received: u64,
    /// Handlers that ran to completion.
    pub events_handled: u64,
    /// `error` messages sent.
    pub errors_sent: u64,
    /// `stateUpdate` messages sent.
    pub state_updates: u64,
    /// `domUpdate` messages sent.
    pub dom_updates: u64,
}

#[derive(Debug, Default)]
struct Counters {
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    messages_received: AtomicU64,
    events_handled: AtomicU64,
    errors_sent: AtomicU64,
    state_updates: AtomicU64,
    dom_updates: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Turns inbound client messages into outbound replies.
///
/// The gateway is transport-agnostic and synchronous: the transport feeds it
/// one message at a time per connection and sends whatever it returns, in
/// order. Different connections may be served from different threads at once.
pub struct Gateway {
    registry: Arc<ContextRegistry>,
    handlers: Arc<dyn HandlerResolver>,
    associations: DashMap<SessionId, HashSet<ConnectionId>>,
    next_connection: AtomicU64,
    counters: Counters,
}

impl Gateway {
    /// Creates a gateway over a session registry and a handler resolver.
    pub fn new(registry: Arc<ContextRegistry>, handlers: Arc<dyn HandlerResolver>) -> Self {
        Self {
            registry,
            handlers,
            associations: DashMap::new(),
            next_connection: AtomicU64::new(1),
            counters: Counters::default(),
        }
    }

    /// Returns the session registry.
    pub fn registry(&self) -> &Arc<ContextRegistry> {
        &self.registry
    }

    /// Opens a connection and returns it with its `connected` message.
    pub fn open(&self) -> (Connection, ServerMessage) {
        let id = ConnectionId::new(self.next_connection.fetch_add(1, Ordering::Relaxed));
        bump(&self.counters.connections_opened);
        debug!(connection = %id, "connection opened");
        let connected = ServerMessage::Connected {
            session_id: id.to_string(),
        };
        (Connection::new(id), connected)
    }

    /// Decodes and handles one text frame.
    pub fn handle_text(&self, conn: &mut Connection, text: &str) -> Vec<ServerMessage> {
        bump(&self.counters.messages_received);
        match ClientMessage::decode(text) {
            Ok(message) => self.dispatch(conn, message),
            Err(err) => {
                debug!(connection = %conn.id(), error = %err, "rejected message");
                let mut out = Vec::with_capacity(1);
                self.report(GatewayError::Protocol(err), &mut out);
                out
            }
        }
    }

    /// Handles one decoded message.
    pub fn handle_message(
        &self,
        conn: &mut Connection,
        message: ClientMessage,
    ) -> Vec<ServerMessage> {
        bump(&self.counters.messages_received);
        self.dispatch(conn, message)
    }

    fn dispatch(&self, conn: &mut Connection, message: ClientMessage) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        if !conn.is_open() {
            self.report(GatewayError::Transport("connection closed".into()), &mut out);
            return out;
        }
        match message {
            ClientMessage::Event(event) => self.handle_event(conn, event, &mut out),
            ClientMessage::Init(init) => self.handle_init(conn, init, &mut out),
            ClientMessage::Ping => out.push(ServerMessage::Pong),
        }
        out
    }

    fn handle_event(&self, conn: &Connection, message: EventMessage, out: &mut Vec<ServerMessage>) {
        let mut phase = MessagePhase::Idle;
        let context_id = message
            .context_id
            .as_ref()
            .or_else(|| conn.context_id())
            .cloned();

        let guard = context_id.and_then(|id| self.bind(&id));
        if guard.is_some() {
            phase.advance(MessagePhase::ContextBound);
        }
        let mut scope = HandlerScope::new(guard);
        let mut event = Event::from_message(&message);
        let handler_id = message.handler_id;

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.handlers.execute(&handler_id, &mut event, &mut scope)
        }));
        phase.advance(MessagePhase::HandlerInvoked);

        let result = match outcome {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(GatewayError::HandlerNotFound(handler_id.clone())),
            Ok(Err(err)) => Err(GatewayError::HandlerExecution(err.to_string())),
            Err(payload) => Err(GatewayError::HandlerExecution(panic_message(&*payload))),
        };

        match result {
            Ok(()) => {
                bump(&self.counters.events_handled);
                if let Some(context) = scope.context() {
                    self.flush(context, &mut phase, out);
                }
                out.push(ServerMessage::EventHandled {
                    handler_id,
                    default_prevented: event.is_default_prevented(),
                });
            }
            Err(err) => {
                warn!(
                    connection = %conn.id(),
                    handler_id = %handler_id,
                    error = %err,
                    "event failed"
                );
                self.report(err, out);
            }
        }

        drop(scope);
        phase.advance(MessagePhase::Idle);
    }

    fn bind(&self, id: &SessionId) -> Option<ContextGuard> {
        match self.registry.bind(id.as_str()) {
            Ok(guard) => Some(guard),
            Err(_) => {
                let err = GatewayError::ContextExpired(id.clone());
                debug!(error = %err, "handling event without a context");
                None
            }
        }
    }

    fn flush(
        &self,
        context: &mut ContextGuard,
        phase: &mut MessagePhase,
        out: &mut Vec<ServerMessage>,
    ) {
        phase.advance(MessagePhase::DirtyCollected);
        if let Some(flush) = context.flush() {
            debug!(
                session_id = %context.session_id(),
                cells = flush.cells.len(),
                patches = flush.patches.len(),
                "flushed"
            );
            out.push(ServerMessage::StateUpdate { cells: flush.cells });
            bump(&self.counters.state_updates);
            if !flush.patches.is_empty() {
                out.push(ServerMessage::DomUpdate {
                    patches: flush.patches,
                });
                bump(&self.counters.dom_updates);
            }
        }
        phase.advance(MessagePhase::Flushed);
    }

    fn handle_init(&self, conn: &mut Connection, init: InitMessage, out: &mut Vec<ServerMessage>) {
        let cells = match init.context_id {
            Some(id) => {
                self.associate(conn, id.clone());
                match self.registry.bind(id.as_str()) {
                    Ok(context) => context.to_json(),
                    Err(_) => {
                        debug!(
                            connection = %conn.id(),
                            session_id = %id,
                            "init for unknown context"
                        );
                        Vec::new()
                    }
                }
            }
            None => Vec::new(),
        };
        out.push(ServerMessage::InitState { cells });
    }

    fn associate(&self, conn: &mut Connection, id: SessionId) {
        if let Some(previous) = conn.activate(id.clone()) {
            self.disassociate(&previous, conn.id());
        }
        self.associations.entry(id).or_default().insert(conn.id());
    }

    fn disassociate(&self, id: &SessionId, conn: ConnectionId) {
        if let Some(mut connections) = self.associations.get_mut(id) {
            connections.remove(&conn);
        }
        self.associations.remove_if(id, |_, connections| connections.is_empty());
    }

    /// Closes a connection.
    ///
    /// Only connection bookkeeping is removed; the session survives until
    /// its TTL so that a reconnect can resume it.
    pub fn close(&self, conn: &mut Connection) {
        if !conn.is_open() {
            return;
        }
        if let Some(id) = conn.close() {
            self.disassociate(&id, conn.id());
        }
        bump(&self.counters.connections_closed);
        debug!(connection = %conn.id(), "connection closed");
    }

    /// Removes a connection whose [`Connection`] value was lost.
    pub fn close_orphan(&self, conn: ConnectionId) {
        self.associations.retain(|_, connections| {
            connections.remove(&conn);
            !connections.is_empty()
        });
        bump(&self.counters.connections_closed);
        debug!(connection = %conn, "orphaned connection closed");
    }

    /// Returns the open connections associated with a session by `init`.
    pub fn connections_for(&self, session_id: &str) -> Vec<ConnectionId> {
        let mut connections: Vec<_> = self
            .associations
            .get(session_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        connections.sort();
        connections
    }

    /// Returns activity counters.
    pub fn stats(&self) -> GatewayStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        GatewayStats {
            connections_opened: load(&self.counters.connections_opened),
            connections_closed: load(&self.counters.connections_closed),
            messages_received: load(&self.counters.messages_received),
            events_handled: load(&self.counters.events_handled),
            errors_sent: load(&self.counters.errors_sent),
            state_updates: load(&self.counters.state_updates),
            dom_updates: load(&self.counters.dom_updates),
        }
    }

    fn report(&self, err: GatewayError, out: &mut Vec<ServerMessage>) {
        if let Some(message) = err.to_message() {
            bump(&self.counters.errors_sent);
            out.push(message);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
