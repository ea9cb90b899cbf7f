//! Protocol envelopes.

use crate::error::{ProtocolError, ProtocolResult};
use crate::ids::{CellId, ComponentId, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Wire tags accepted from clients.
pub const CLIENT_MESSAGE_TYPES: &[&str] = &["event", "init", "ping"];

/// An envelope sent from the browser to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// A DOM event routed to a server-side handler.
    Event(EventMessage),
    /// Connection initialisation / reconnect catch-up.
    Init(InitMessage),
    /// Keep-alive check.
    Ping,
}

impl ClientMessage {
    /// Returns the wire tag of this message.
    pub fn type_name(&self) -> &'static str {
        match self {
            ClientMessage::Event(_) => "event",
            ClientMessage::Init(_) => "init",
            ClientMessage::Ping => "ping",
        }
    }

    /// Decodes a client envelope from JSON text.
    ///
    /// The `type` tag is validated before the body is decoded so that a
    /// missing tag and an unknown tag are distinguishable from a bad body.
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        let object = value
            .as_object()
            .ok_or_else(|| ProtocolError::Malformed("expected a JSON object".into()))?;

        match object.get("type").and_then(Value::as_str) {
            None => return Err(ProtocolError::MissingType),
            Some(tag) if !CLIENT_MESSAGE_TYPES.contains(&tag) => {
                return Err(ProtocolError::UnknownType(tag.to_string()))
            }
            Some(_) => {}
        }

        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Encodes to JSON text.
    pub fn encode(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Modifier keys held while the event fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModifierKeys {
    /// Control key.
    pub ctrl: bool,
    /// Shift key.
    pub shift: bool,
    /// Alt / Option key.
    pub alt: bool,
    /// Meta / Command key.
    pub meta: bool,
}

/// A DOM event forwarded by the client.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    /// Id of the server-side handler to invoke.
    pub handler_id: String,
    /// DOM event type (`click`, `input`, ...).
    #[serde(default)]
    pub event_type: String,
    /// Id of the element the event fired on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    /// Current value of the target element, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Modifier key state.
    #[serde(default)]
    pub modifier_keys: ModifierKeys,
    /// Serialized form fields, for submit events.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub form_data: BTreeMap<String, String>,
    /// Session the event belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<SessionId>,
}

impl EventMessage {
    /// Creates an event message for a handler.
    pub fn new(handler_id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            handler_id: handler_id.into(),
            event_type: event_type.into(),
            ..Self::default()
        }
    }

    /// Sets the session id.
    pub fn with_context(mut self, context_id: impl Into<SessionId>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    /// Sets the target element id.
    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    /// Sets the element value.
    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Sets the modifier keys.
    pub fn with_modifiers(mut self, modifier_keys: ModifierKeys) -> Self {
        self.modifier_keys = modifier_keys;
        self
    }

    /// Adds a form field.
    pub fn with_form_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form_data.insert(name.into(), value.into());
        self
    }
}

/// Sent once after the transport opens, and again after every reconnect.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitMessage {
    /// Session the page was rendered for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<SessionId>,
}

impl InitMessage {
    /// Creates an init message for a session.
    pub fn new(context_id: impl Into<SessionId>) -> Self {
        Self {
            context_id: Some(context_id.into()),
        }
    }
}

/// A cell's current value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellValue {
    /// Cell id.
    pub id: CellId,
    /// Cell value.
    pub value: Value,
}

impl CellValue {
    /// Creates a cell value pair.
    pub fn new(id: impl Into<CellId>, value: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
        }
    }
}

/// A component's freshly rendered HTML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomPatch {
    /// Component the HTML replaces.
    pub component_id: ComponentId,
    /// Rendered HTML, forwarded verbatim.
    pub html: String,
}

impl DomPatch {
    /// Creates a patch.
    pub fn new(component_id: impl Into<ComponentId>, html: impl Into<String>) -> Self {
        Self {
            component_id: component_id.into(),
            html: html.into(),
        }
    }
}

/// Machine-readable error category carried by [`ServerMessage::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed envelope or unknown `type`.
    #[serde(rename = "protocol_error")]
    Protocol,
    /// No handler registered under the requested id.
    #[serde(rename = "handler_not_found")]
    HandlerNotFound,
    /// The handler failed.
    #[serde(rename = "handler_error")]
    Handler,
    /// Connection-level failure.
    #[serde(rename = "transport_error")]
    Transport,
}

impl ErrorCode {
    /// Returns the wire string for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Protocol => "protocol_error",
            ErrorCode::HandlerNotFound => "handler_not_found",
            ErrorCode::Handler => "handler_error",
            ErrorCode::Transport => "transport_error",
        }
    }
}

/// An envelope sent from the server to the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// The transport is open.
    Connected {
        /// Id assigned to this connection.
        session_id: String,
    },
    /// Cells changed by the last handler, in one batch.
    StateUpdate {
        /// Changed cells.
        cells: Vec<CellValue>,
    },
    /// Re-rendered components, in one batch.
    DomUpdate {
        /// One patch per registered component.
        patches: Vec<DomPatch>,
    },
    /// The handler ran to completion.
    EventHandled {
        /// Handler that ran.
        handler_id: String,
        /// Whether the handler called `prevent_default`.
        default_prevented: bool,
    },
    /// A non-fatal error.
    Error {
        /// Human-readable message.
        message: String,
        /// Error category.
        code: ErrorCode,
    },
    /// Reply to a ping.
    Pong,
    /// Every cell of a session, for (re)initialisation.
    InitState {
        /// All cells owned by the session.
        cells: Vec<CellValue>,
    },
}

impl ServerMessage {
    /// Creates an error message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            code,
        }
    }

    /// Returns the wire tag of this message.
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => "connected",
            ServerMessage::StateUpdate { .. } => "stateUpdate",
            ServerMessage::DomUpdate { .. } => "domUpdate",
            ServerMessage::EventHandled { .. } => "eventHandled",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Pong => "pong",
            ServerMessage::InitState { .. } => "initState",
        }
    }

    /// Returns true for [`ServerMessage::Error`].
    pub fn is_error(&self) -> bool {
        matches!(self, ServerMessage::Error { .. })
    }

    /// Encodes to JSON text.
    pub fn encode(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a server envelope from JSON text.
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        if value.get("type").and_then(Value::as_str).is_none() {
            return Err(ProtocolError::MissingType);
        }
        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn arbitrary_unknown_tags_never_decode(tag in "[a-zA-Z]{1,12}") {
            prop_assume!(!CLIENT_MESSAGE_TYPES.contains(&tag.as_str()));
            let text = serde_json::json!({"type": tag}).to_string();
            let decoded = ClientMessage::decode(&text);
            let is_unknown = matches!(decoded, Err(ProtocolError::UnknownType(_)));
            prop_assert!(is_unknown);
        }

        #[test]
        fn event_fields_survive_encoding(
            handler in "[a-z_]{1,16}",
            target in proptest::option::of("[a-z0-9-]{1,8}"),
            ctrl in any::<bool>(),
        ) {
            let mut event = EventMessage::new(handler.clone(), "click")
                .with_modifiers(ModifierKeys { ctrl, ..ModifierKeys::default() });
            event.target_id = target.clone();
            let text = ClientMessage::Event(event).encode().unwrap();
            match ClientMessage::decode(&text).unwrap() {
                ClientMessage::Event(back) => {
                    prop_assert_eq!(back.handler_id, handler);
                    prop_assert_eq!(back.target_id, target);
                    prop_assert_eq!(back.modifier_keys.ctrl, ctrl);
                }
                other => prop_assert!(false, "expected event, got {:?}", other),
            }
        }
    }
}
