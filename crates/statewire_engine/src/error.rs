//! Error types for the engine.

use statewire_protocol::{CellId, SessionId};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while working with session state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The session never existed or was evicted by the TTL sweep.
    #[error("context expired or unknown: {0}")]
    ContextExpired(SessionId),

    /// No cell with this id in the bound session.
    #[error("unknown cell: {0}")]
    UnknownCell(CellId),

    /// A cell with this id already exists in the bound session.
    #[error("duplicate cell: {0}")]
    DuplicateCell(CellId),

    /// A session with this id is already registered.
    #[error("duplicate session: {0}")]
    DuplicateSession(SessionId),

    /// Background work needs a runtime that is not available.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl EngineError {
    /// Returns true if the caller should re-initialise the session.
    pub fn requires_reinit(&self) -> bool {
        matches!(self, EngineError::ContextExpired(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reinit_classification() {
        assert!(EngineError::ContextExpired("ctx_1".into()).requires_reinit());
        assert!(!EngineError::UnknownCell("count".into()).requires_reinit());
    }

    #[test]
    fn error_display() {
        let err = EngineError::DuplicateCell("count".into());
        assert_eq!(err.to_string(), "duplicate cell: count");
    }
}
