//! Outer envelope decoding for inbound frames.

use serde_json::{Map, Value};

/// Loosely-typed decoded form of one frame.
pub type RawEvent = Map<String, Value>;

/// Frame could not be decoded into an event envelope.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON, but not an object.
    #[error("expected JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Event type routed by the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// `"type": "ticker"`.
    Ticker,
    /// `"type": "l2update"`.
    L2Update,
    /// Any other discriminator, or none at all.
    Other,
}

impl EventKind {
    /// Classify an event by its `type` field.
    #[must_use]
    pub fn of(event: &RawEvent) -> Self {
        match event.get("type").and_then(Value::as_str) {
            Some("ticker") => Self::Ticker,
            Some("l2update") => Self::L2Update,
            _ => Self::Other,
        }
    }
}

/// Decode one text frame into a [`RawEvent`].
///
/// # Errors
///
/// Returns [`DecodeError`] if the frame is not a JSON object.
pub fn decode_frame(text: &str) -> Result<RawEvent, DecodeError> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map),
        Value::Array(_) => Err(DecodeError::NotAnObject("array")),
        Value::String(_) => Err(DecodeError::NotAnObject("string")),
        Value::Number(_) => Err(DecodeError::NotAnObject("number")),
        Value::Bool(_) => Err(DecodeError::NotAnObject("bool")),
        Value::Null => Err(DecodeError::NotAnObject("null")),
    }
}
