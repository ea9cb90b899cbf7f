//! The event object passed to handlers.

use serde_json::Value;
use statewire_protocol::{EventMessage, ModifierKeys};
use std::collections::BTreeMap;

/// A DOM event as seen by a server-side handler.
///
/// Built from the inbound `event` envelope. The only thing a handler can
/// change is [`prevent_default`](Self::prevent_default), which is echoed back
/// in `eventHandled`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    handler_id: String,
    event_type: String,
    target_id: Option<String>,
    value: Option<Value>,
    modifiers: ModifierKeys,
    form_data: BTreeMap<String, String>,
    default_prevented: bool,
}

impl Event {
    /// Builds an event from its envelope.
    pub fn from_message(message: &EventMessage) -> Self {
        Self {
            handler_id: message.handler_id.clone(),
            event_type: message.event_type.clone(),
            target_id: message.target_id.clone(),
            value: message.value.clone(),
            modifiers: message.modifier_keys,
            form_data: message.form_data.clone(),
            default_prevented: false,
        }
    }

    /// Returns the id of the handler being invoked.
    pub fn handler_id(&self) -> &str {
        &self.handler_id
    }

    /// Returns the DOM event type (`click`, `input`, ...).
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Returns the id of the element the event fired on.
    pub fn target_id(&self) -> Option<&str> {
        self.target_id.as_deref()
    }

    /// Returns the target element's value.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Returns the target element's value if it is a string.
    pub fn value_str(&self) -> Option<&str> {
        self.value.as_ref().and_then(Value::as_str)
    }

    /// Returns the modifier key state.
    pub fn modifiers(&self) -> ModifierKeys {
        self.modifiers
    }

    /// Control key held.
    pub fn ctrl_key(&self) -> bool {
        self.modifiers.ctrl
    }

    /// Shift key held.
    pub fn shift_key(&self) -> bool {
        self.modifiers.shift
    }

    /// Alt key held.
    pub fn alt_key(&self) -> bool {
        self.modifiers.alt
    }

    /// Meta key held.
    pub fn meta_key(&self) -> bool {
        self.modifiers.meta
    }

    /// Returns all submitted form fields.
    pub fn form_data(&self) -> &BTreeMap<String, String> {
        &self.form_data
    }

    /// Returns one submitted form field.
    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form_data.get(name).map(String::as_str)
    }

    /// Asks the client to suppress the browser's default action.
    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    /// Returns true if [`prevent_default`](Self::prevent_default) was called.
    pub fn is_default_prevented(&self) -> bool {
        self.default_prevented
    }
}
