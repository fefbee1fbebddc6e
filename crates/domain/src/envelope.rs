use serde_json::{Map, Value};

use crate::GatewayResult;
use crate::error::GatewayError;

/// Domain payload extracted from the upstream response envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum UnwrappedPayload {
    Object(Map<String, Value>),
    Array(Vec<Value>),
    Text(String),
}

impl UnwrappedPayload {
    pub fn shape(&self) -> &'static str {
        match self {
            UnwrappedPayload::Object(_) => "object",
            UnwrappedPayload::Array(_) => "array",
            UnwrappedPayload::Text(_) => "text",
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            UnwrappedPayload::Object(map) => Value::Object(map),
            UnwrappedPayload::Array(items) => Value::Array(items),
            UnwrappedPayload::Text(text) => Value::String(text),
        }
    }

    pub fn into_object(self, context: &str) -> GatewayResult<Map<String, Value>> {
        match self {
            UnwrappedPayload::Object(map) => Ok(map),
            other => Err(GatewayError::bad_response(format!(
                "expected {context} object payload, got {}",
                other.shape()
            ))),
        }
    }
}

/// Pulls the domain payload out of the upstream's generic envelope.
///
/// Accepted shapes, in order: `{ error, response: [{ response }] }`, then a
/// top-level `data` member, then the envelope itself. A string payload that
/// looks like JSON is decoded; if decoding fails the raw string is returned so
/// XML documents and plain-text sentinels survive.
pub fn unwrap_envelope(raw: &Value) -> GatewayResult<UnwrappedPayload> {
    let Value::Object(envelope) = raw else {
        return Err(GatewayError::bad_response("envelope is not a JSON object"));
    };

    if envelope.get("error").is_some_and(is_error_flag) {
        let message = envelope
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("upstream reported an error");
        return Err(GatewayError::unavailable(None, message));
    }

    if let Some(Value::Array(items)) = envelope.get("response")
        && let Some(first) = items.first()
    {
        return classify(first.get("response"));
    }

    if let Some(data) = envelope.get("data")
        && is_populated(data)
    {
        return classify(Some(data));
    }

    Ok(UnwrappedPayload::Object(envelope.clone()))
}

fn classify(inner: Option<&Value>) -> GatewayResult<UnwrappedPayload> {
    match inner {
        None | Some(Value::Null) => Err(GatewayError::bad_response(
            "envelope carries no payload",
        )),
        Some(Value::Object(map)) => Ok(UnwrappedPayload::Object(map.clone())),
        Some(Value::Array(items)) => Ok(UnwrappedPayload::Array(items.clone())),
        Some(Value::String(text)) => Ok(decode_text(text)),
        Some(scalar) => Ok(UnwrappedPayload::Text(scalar.to_string())),
    }
}

fn decode_text(text: &str) -> UnwrappedPayload {
    let trimmed = text.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(map)) => return UnwrappedPayload::Object(map),
            Ok(Value::Array(items)) => return UnwrappedPayload::Array(items),
            Ok(_) | Err(_) => {}
        }
    }
    UnwrappedPayload::Text(text.to_string())
}

fn is_error_flag(flag: &Value) -> bool {
    match flag {
        Value::Bool(flag) => *flag,
        Value::String(flag) => flag.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn is_populated(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(text) => !text.is_empty(),
        _ => true,
    }
}
