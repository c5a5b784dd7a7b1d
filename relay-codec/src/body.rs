//! Record value → UTF-8 request body.
//!
//! Whatever shape the value arrived in, the emitted body is well-formed
//! JSON: objects and arrays pass through, primitives and unparseable
//! strings are wrapped in a `{"value": ...}` envelope.

use relay_common::{RecordValue, RelayError, Result};
use serde_json::{json, Value};

/// Content type attached to every request body unless a forwarded or
/// static header overrides it.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Render a record value into request body bytes.
///
/// Null values are the caller's problem (`behaviour.on_null_value`), so
/// they surface as an error rather than an empty body.
///
/// ```
/// use relay_codec::encode_body;
/// use relay_common::RecordValue;
///
/// let body = encode_body(&RecordValue::Text("{\"a\":1}".into())).unwrap();
/// assert_eq!(body, b"{\"a\":1}");
///
/// let body = encode_body(&RecordValue::Text("42".into())).unwrap();
/// assert_eq!(body, b"{\"value\":42}");
/// ```
pub fn encode_body(value: &RecordValue) -> Result<Vec<u8>> {
    match value {
        RecordValue::Null | RecordValue::Structured(Value::Null) => Err(RelayError::NullValue),
        RecordValue::Text(s) => encode_text(s),
        RecordValue::Bytes(b) => {
            let s = std::str::from_utf8(b)
                .map_err(|e| RelayError::Conversion(format!("value bytes are not UTF-8: {e}")))?;
            encode_text(s)
        }
        RecordValue::Structured(v) => match v {
            Value::Object(_) | Value::Array(_) => serde_json::to_vec(v)
                .map_err(|e| RelayError::Conversion(format!("value failed to serialize: {e}"))),
            primitive => wrap(primitive.clone()),
        },
    }
}

/// Character-string rule: verbatim for JSON objects/arrays, wrapped for
/// JSON primitives, wrapped as a JSON string for anything unparseable.
fn encode_text(s: &str) -> Result<Vec<u8>> {
    match serde_json::from_str::<Value>(s) {
        Ok(Value::Object(_)) | Ok(Value::Array(_)) => Ok(s.as_bytes().to_vec()),
        Ok(primitive) => wrap(primitive),
        Err(_) => wrap(Value::String(s.to_string())),
    }
}

fn wrap(v: Value) -> Result<Vec<u8>> {
    serde_json::to_vec(&json!({ "value": v }))
        .map_err(|e| RelayError::Conversion(format!("value failed to serialize: {e}")))
}
