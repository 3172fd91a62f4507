//! Provider event envelopes.
//!
//! Only the fields the ingestor routes on are typed; the full body is kept
//! as raw JSON for storage and replay.

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Event type that triggers payment allocation.
pub const PAYMENT_INTENT_SUCCEEDED: &str = "payment_intent.succeeded";

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("body is not a valid event: {0}")]
    Json(#[from] serde_json::Error),

    #[error("required field {0} is empty")]
    EmptyField(&'static str),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProviderEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventData {
    pub object: EventObject,
}

/// The object an event is about (a payment intent for the events we handle).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventObject {
    pub id: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub amount_received: Option<i64>,
}

impl EventObject {
    /// A string metadata value.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Cents actually received, falling back to the requested amount.
    pub fn received_cents(&self) -> Option<i64> {
        self.amount_received.or(self.amount)
    }
}

/// A parsed event together with the JSON it was parsed from.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEvent {
    pub event: ProviderEvent,
    pub raw: Value,
}

/// Parse a raw request body.
pub fn parse(body: &[u8]) -> Result<ParsedEvent, EnvelopeError> {
    let raw: Value = serde_json::from_slice(body)?;
    parse_value(raw)
}

/// Parse an already-decoded body, such as a stored dead-letter payload.
pub fn parse_value(raw: Value) -> Result<ParsedEvent, EnvelopeError> {
    let event = ProviderEvent::deserialize(&raw)?;
    if event.id.trim().is_empty() {
        return Err(EnvelopeError::EmptyField("id"));
    }
    if event.event_type.trim().is_empty() {
        return Err(EnvelopeError::EmptyField("type"));
    }
    if event.data.object.id.trim().is_empty() {
        return Err(EnvelopeError::EmptyField("data.object.id"));
    }
    Ok(ParsedEvent { event, raw })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_payment_intent() {
        let body = json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": {"object": {
                "id": "pi_1",
                "amount": 8000,
                "amount_received": 7500,
                "metadata": {"tenantId": "t-1"},
                "currency": "usd"
            }}
        });
        let parsed = parse(body.to_string().as_bytes()).unwrap();
        assert_eq!(parsed.event.id, "evt_1");
        assert_eq!(parsed.event.event_type, PAYMENT_INTENT_SUCCEEDED);
        assert_eq!(parsed.event.data.object.received_cents(), Some(7500));
        assert_eq!(parsed.event.data.object.metadata_str("tenantId"), Some("t-1"));
        assert_eq!(parsed.raw, body);
    }

    #[test]
    fn amount_is_fallback_for_amount_received() {
        let obj = parse_value(json!({"id": "e", "type": "t", "data": {"object": {"id": "o", "amount": 10}}}))
            .unwrap()
            .event
            .data
            .object;
        assert_eq!(obj.received_cents(), Some(10));
    }

    #[test]
    fn rejects_missing_or_empty_identifiers() {
        assert!(parse(b"not json").is_err());
        assert!(parse_value(json!({"type": "t", "data": {"object": {"id": "o"}}})).is_err());
        assert!(parse_value(json!({"id": "e", "data": {"object": {"id": "o"}}})).is_err());
        assert!(parse_value(json!({"id": "e", "type": "t", "data": {}})).is_err());
        assert!(matches!(
            parse_value(json!({"id": " ", "type": "t", "data": {"object": {"id": "o"}}})),
            Err(EnvelopeError::EmptyField("id"))
        ));
    }

    #[test]
    fn fractional_amount_is_rejected() {
        let body = json!({"id": "e", "type": "t", "data": {"object": {"id": "o", "amount": 10.5}}});
        assert!(parse_value(body).is_err());
    }
}
