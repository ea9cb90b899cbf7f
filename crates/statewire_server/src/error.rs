//! Error types for the gateway and the server.

use statewire_engine::EngineError;
use statewire_protocol::{ErrorCode, ProtocolError, ServerMessage, SessionId};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Failures while processing one inbound message.
///
/// Every variant except [`ContextExpired`](GatewayError::ContextExpired) is
/// reported to the client as an `error` message; none of them close the
/// connection on their own.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The envelope could not be decoded.
    #[error("{0}")]
    Protocol(#[from] ProtocolError),

    /// No handler registered under the requested id.
    #[error("Handler not found: {0}")]
    HandlerNotFound(String),

    /// The handler returned an error or panicked.
    #[error("{0}")]
    HandlerExecution(String),

    /// The event named a session that is gone. The handler still runs, with
    /// no context bound.
    #[error("context expired or unknown: {0}")]
    ContextExpired(SessionId),

    /// The connection failed.
    #[error("transport error: {0}")]
    Transport(String),
}

impl GatewayError {
    /// Returns the wire error code, or `None` if the error is not reported.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            GatewayError::Protocol(_) => Some(ErrorCode::Protocol),
            GatewayError::HandlerNotFound(_) => Some(ErrorCode::HandlerNotFound),
            GatewayError::HandlerExecution(_) => Some(ErrorCode::Handler),
            GatewayError::ContextExpired(_) => None,
            GatewayError::Transport(_) => Some(ErrorCode::Transport),
        }
    }

    /// Returns true if the connection cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayError::Transport(_))
    }

    /// Converts to the `error` message sent to the client.
    pub fn to_message(&self) -> Option<ServerMessage> {
        self.code()
            .map(|code| ServerMessage::error(code, self.to_string()))
    }
}

/// Errors that stop the server itself.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Binding or serving the listener failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine could not start its background work.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_not_found_message() {
        let err = GatewayError::HandlerNotFound("nope".into());
        assert_eq!(err.to_string(), "Handler not found: nope");
        assert_eq!(
            err.to_message(),
            Some(ServerMessage::error(
                ErrorCode::HandlerNotFound,
                "Handler not found: nope"
            ))
        );
    }

    #[test]
    fn handler_failure_keeps_message() {
        let err = GatewayError::HandlerExecution("boom".into());
        assert_eq!(err.code(), Some(ErrorCode::Handler));
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn expired_context_is_not_reported() {
        let err = GatewayError::ContextExpired("ctx_gone".into());
        assert!(err.to_message().is_none());
        assert!(!err.is_fatal());
    }

    #[test]
    fn only_transport_is_fatal() {
        assert!(GatewayError::Transport("reset".into()).is_fatal());
        assert!(!GatewayError::Protocol(ProtocolError::MissingType).is_fatal());
        assert!(!GatewayError::HandlerNotFound("x".into()).is_fatal());
    }
}
