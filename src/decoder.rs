//! Best-effort decoding of queue message bodies.
//!
//! Messages fanned out from a topic arrive double-encoded: the queue body
//! is the topic notification envelope, and its `Message` field is the
//! published payload serialized as a JSON string. Decoding never fails; a
//! body that does not fit this shape degrades to an empty object so the
//! handler still runs.

use serde_json::{Map, Value};

const MESSAGE_FIELD: &str = "Message";

/// Result of decoding a message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// The payload was recovered from the envelope.
    Payload(Value),
    /// The body could not be decoded.
    Fallback,
}

impl Decoded {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Decoded::Fallback)
    }

    /// The payload handed to handlers; `{}` for a fallback.
    pub fn into_payload(self) -> Value {
        match self {
            Decoded::Payload(value) => value,
            Decoded::Fallback => Value::Object(Map::new()),
        }
    }
}

/// Decodes a raw queue message body.
pub fn decode(body: &str) -> Decoded {
    let Ok(envelope) = serde_json::from_str::<Value>(body) else {
        return Decoded::Fallback;
    };

    match envelope.get(MESSAGE_FIELD) {
        Some(Value::String(inner)) => match serde_json::from_str(inner) {
            Ok(payload) => Decoded::Payload(payload),
            Err(_) => Decoded::Fallback,
        },
        Some(Value::Null) | None => Decoded::Fallback,
        // already structured, nothing left to unwrap
        Some(structured) => Decoded::Payload(structured.clone()),
    }
}
