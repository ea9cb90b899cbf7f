//! Handler resolution.

use crate::event::Event;
use parking_lot::RwLock;
use statewire_engine::{ContextGuard, EngineError, SessionId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type for handlers.
pub type HandlerResult<T = ()> = Result<T, HandlerError>;

/// A failure reported by a handler.
///
/// The message is sent to the client verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Creates a handler error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<EngineError> for HandlerError {
    fn from(err: EngineError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// The session a handler runs against.
///
/// Owns the binding for the duration of one event. When the event named no
/// session, or a session that has expired, the scope is empty.
pub struct HandlerScope {
    context: Option<ContextGuard>,
}

impl HandlerScope {
    /// Wraps an optional binding.
    pub fn new(context: Option<ContextGuard>) -> Self {
        Self { context }
    }

    /// A scope with no bound session.
    pub fn unbound() -> Self {
        Self { context: None }
    }

    /// Returns the bound session, if any.
    pub fn context(&mut self) -> Option<&mut ContextGuard> {
        self.context.as_mut()
    }

    /// Returns the bound session, or an error naming the missing binding.
    pub fn require_context(&mut self) -> HandlerResult<&mut ContextGuard> {
        self.context
            .as_mut()
            .ok_or_else(|| HandlerError::new("no session context bound"))
    }

    /// Returns true if a session is bound.
    pub fn is_bound(&self) -> bool {
        self.context.is_some()
    }

    /// Returns the bound session's id.
    pub fn session_id(&self) -> Option<&SessionId> {
        self.context.as_ref().map(ContextGuard::session_id)
    }

    /// Unbinds the session, returning the guard to the caller.
    pub fn into_inner(self) -> Option<ContextGuard> {
        self.context
    }
}

impl fmt::Debug for HandlerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerScope")
            .field("session_id", &self.session_id())
            .finish()
    }
}

/// Looks up and runs the handler named by an event.
pub trait HandlerResolver: Send + Sync {
    /// Runs the handler registered under `handler_id`.
    ///
    /// Returns `Ok(false)` if no such handler exists.
    fn execute(
        &self,
        handler_id: &str,
        event: &mut Event,
        scope: &mut HandlerScope,
    ) -> HandlerResult<bool>;
}

type HandlerFn = dyn Fn(&mut Event, &mut HandlerScope) -> HandlerResult + Send + Sync;

/// The default resolver: a table of named closures.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<HandlerFn>>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler. Returns true if an existing one was replaced.
    pub fn register<F>(&self, id: impl Into<String>, handler: F) -> bool
    where
        F: Fn(&mut Event, &mut HandlerScope) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .insert(id.into(), Arc::new(handler))
            .is_some()
    }

    /// Removes a handler. Returns false if it was not registered.
    pub fn unregister(&self, id: &str) -> bool {
        self.handlers.write().remove(id).is_some()
    }

    /// Returns true if a handler is registered under `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.handlers.read().contains_key(id)
    }

    /// Returns the number of handlers.
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Returns true if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl HandlerResolver for HandlerRegistry {
    fn execute(
        &self,
        handler_id: &str,
        event: &mut Event,
        scope: &mut HandlerScope,
    ) -> HandlerResult<bool> {
        // Clone out of the table so handlers may register others.
        let Some(handler) = self.handlers.read().get(handler_id).cloned() else {
            return Ok(false);
        };
        handler(event, scope)?;
        Ok(true)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read();
        let mut ids: Vec<_> = handlers.keys().collect();
        ids.sort();
        f.debug_struct("HandlerRegistry").field("handlers", &ids).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statewire_engine::ContextRegistry;
    use statewire_protocol::EventMessage;

    fn click(handler_id: &str) -> Event {
        Event::from_message(&EventMessage::new(handler_id, "click"))
    }

    #[test]
    fn missing_handler_reports_not_found() {
        let registry = HandlerRegistry::new();
        let mut event = click("nope");
        let found = registry
            .execute("nope", &mut event, &mut HandlerScope::unbound())
            .unwrap();
        assert!(!found);
    }

    #[test]
    fn handler_mutates_bound_context() {
        let contexts = ContextRegistry::default();
        let mut guard = contexts.create_with_id("ctx_1").unwrap();
        guard.create_named_cell("count", 0).unwrap();

        let handlers = HandlerRegistry::new();
        handlers.register("increment", |_, scope| {
            scope
                .require_context()?
                .update("count", |v| v.as_i64().unwrap_or(0) + 1)?;
            Ok(())
        });

        let mut scope = HandlerScope::new(Some(guard));
        let mut event = click("increment");
        assert!(handlers.execute("increment", &mut event, &mut scope).unwrap());

        let guard = scope.into_inner().unwrap();
        assert_eq!(guard.get("count"), Some(&serde_json::json!(1)));
        assert!(guard.has_dirty());
    }

    #[test]
    fn require_context_fails_when_unbound() {
        let handlers = HandlerRegistry::new();
        handlers.register("needs_ctx", |_, scope| {
            scope.require_context()?;
            Ok(())
        });

        let err = handlers
            .execute("needs_ctx", &mut click("needs_ctx"), &mut HandlerScope::unbound())
            .unwrap_err();
        assert_eq!(err.message(), "no session context bound");
    }

    #[test]
    fn register_replace_and_unregister() {
        let handlers = HandlerRegistry::new();
        assert!(!handlers.register("a", |_, _| Ok(())));
        assert!(handlers.register("a", |_, _| Err("second".into())));
        assert_eq!(handlers.len(), 1);

        let err = handlers
            .execute("a", &mut click("a"), &mut HandlerScope::unbound())
            .unwrap_err();
        assert_eq!(err, HandlerError::new("second"));

        assert!(handlers.unregister("a"));
        assert!(!handlers.contains("a"));
        assert!(handlers.is_empty());
    }

    #[test]
    fn engine_errors_convert() {
        let err: HandlerError = EngineError::UnknownCell("missing".into()).into();
        assert_eq!(err.message(), "unknown cell: missing");
    }
}
