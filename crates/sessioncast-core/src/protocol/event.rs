//! Broadcast event and its wire envelope.
//!
//! The payload is stored as an already-serialized JSON fragment (`RawValue`),
//! so the event stays opaque to the broadcast layer and is encoded into a
//! frame once per publish regardless of how many connections receive it.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::{Result, SessionCastError};

/// Wire envelope (one text frame).
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope<'a> {
    /// Event kind, e.g. `session-update`.
    pub topic: &'a str,
    /// Caller-supplied payload, passed through untouched.
    #[serde(borrow)]
    pub payload: &'a RawValue,
}

/// One outbound broadcast payload. Immutable once built.
#[derive(Debug, Clone)]
pub struct Event {
    topic: String,
    payload: Box<RawValue>,
}

impl Event {
    /// Build an event by serializing `payload`.
    pub fn new<T>(topic: impl Into<String>, payload: &T) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        let raw = serde_json::value::to_raw_value(payload)
            .map_err(|e| SessionCastError::Encode(format!("payload: {e}")))?;
        Self::from_raw(topic, raw)
    }

    /// Build an event from a JSON fragment the caller already holds.
    pub fn from_raw(topic: impl Into<String>, payload: Box<RawValue>) -> Result<Self> {
        let topic = topic.into();
        if topic.is_empty() {
            return Err(SessionCastError::BadRequest("event topic must not be empty".into()));
        }
        Ok(Self { topic, payload })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Raw JSON text of the payload.
    pub fn payload(&self) -> &RawValue {
        &self.payload
    }

    /// Serialize the outbound envelope.
    pub fn to_frame(&self) -> Result<String> {
        let env = Envelope {
            topic: &self.topic,
            payload: &self.payload,
        };
        serde_json::to_string(&env).map_err(|e| SessionCastError::Encode(format!("envelope: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_wraps_payload_under_topic() {
        let ev = Event::new("session-update", &json!({"id": "S1", "room": "R2"})).unwrap();
        let frame: serde_json::Value = serde_json::from_str(&ev.to_frame().unwrap()).unwrap();
        assert_eq!(
            frame,
            json!({"topic": "session-update", "payload": {"id": "S1", "room": "R2"}})
        );
    }

    #[test]
    fn raw_payload_is_passed_through_verbatim() {
        let raw = RawValue::from_string(r#"{"b":1,"a":[true,null]}"#.to_string()).unwrap();
        let ev = Event::from_raw("t", raw).unwrap();
        assert_eq!(
            ev.to_frame().unwrap(),
            r#"{"topic":"t","payload":{"b":1,"a":[true,null]}}"#
        );
    }

    #[test]
    fn empty_topic_rejected() {
        let err = Event::new("", &1).unwrap_err();
        assert_eq!(err.kind().as_str(), "BAD_REQUEST");

        let raw = RawValue::from_string("1".to_string()).unwrap();
        let err = Event::from_raw("", raw).unwrap_err();
        assert_eq!(err.kind().as_str(), "BAD_REQUEST");
    }

    #[test]
    fn unserializable_payload_is_encode_error() {
        use std::collections::HashMap;
        // JSON object keys must be strings.
        let mut m = HashMap::new();
        m.insert(vec![1u8], 1);
        let err = Event::new("t", &m).unwrap_err();
        assert_eq!(err.kind().as_str(), "ENCODE");
    }
}
