use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generic payload value carried by a [`MessageEvent`].
///
/// Supports all JSON-compatible types plus binary data. Connectors decode
/// their wire format into this shape before handing the event to a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// JSON null.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON integer (signed 64-bit).
    Int(i64),
    /// JSON floating-point (64-bit IEEE 754).
    Float(f64),
    /// JSON string (UTF-8).
    String(String),
    /// Binary data (not directly representable in JSON).
    Bytes(Vec<u8>),
    /// JSON array (ordered sequence of values).
    Array(Vec<Value>),
    /// JSON object. Uses `BTreeMap` for deterministic ordering.
    Map(BTreeMap<String, Value>),
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

/// One message travelling through a flow.
///
/// Events are values: processors return a new or modified event instead of
/// mutating a shared one. The `id` stays stable across copies so failures and
/// notifications can be correlated with the event that caused them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    /// Correlation identifier, stable across copies of the event.
    pub id: Uuid,
    /// Name of the flow that received the event.
    pub flow: String,
    /// Message payload.
    pub payload: Value,
    /// Inbound and invocation-scoped message properties.
    pub properties: BTreeMap<String, Value>,
}

impl MessageEvent {
    /// Creates an event with a fresh id and no properties.
    #[must_use]
    pub fn new(flow: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            flow: flow.into(),
            payload: payload.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Returns a copy of this event (same id) carrying `payload`.
    #[must_use]
    pub fn with_payload(&self, payload: impl Into<Value>) -> Self {
        Self {
            payload: payload.into(),
            ..self.clone()
        }
    }

    /// Sets a property, returning the updated event.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Looks up a property by key.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_payload_keeps_id_and_properties() {
        let event = MessageEvent::new("orders", "a").with_property("priority", 3_i64);
        let next = event.with_payload("b");

        assert_eq!(next.id, event.id);
        assert_eq!(next.payload, Value::from("b"));
        assert_eq!(next.property("priority"), Some(&Value::Int(3)));
    }

    #[test]
    fn new_events_get_distinct_ids() {
        let a = MessageEvent::new("orders", Value::Null);
        let b = MessageEvent::new("orders", Value::Null);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn event_serde_roundtrip() {
        let payload = Value::Array(vec![Value::Int(1), Value::Bool(true)]);
        let event = MessageEvent::new("orders", payload).with_property("source", "jms");
        let json = serde_json::to_string(&event).unwrap();
        let decoded: MessageEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, event);
    }
}
