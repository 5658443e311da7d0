//! Decoding of status events read from the unified status topic.

use serde_json::{Map, Value};
use std::fmt;

use crate::status::{OrderStatus, StatusCodes};

/// Why a message key or payload could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    MissingKey,
    InvalidKey(String),
    MissingPayload,
    Malformed(String),
    InvalidStatusCode(String),
    UnmappedStatusCode(i64),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::MissingKey => write!(f, "message has no key"),
            DecodeError::InvalidKey(msg) => write!(f, "invalid message key: {msg}"),
            DecodeError::MissingPayload => write!(f, "message has no payload"),
            DecodeError::Malformed(msg) => write!(f, "malformed payload: {msg}"),
            DecodeError::InvalidStatusCode(raw) => write!(f, "status field is not an integer code: {raw}"),
            DecodeError::UnmappedStatusCode(code) => write!(f, "status code {code} is not mapped to a status"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// A decoded status event payload.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub status: OrderStatus,
    /// Raw code from the payload; `None` when the field was absent.
    pub code: Option<i64>,
    pub timestamp: Option<i64>,
    /// Stage-specific fields (e.g. `baking_time`), kept only for logging.
    pub extra: Map<String, Value>,
}

/// Decode the message key into an order id.
///
/// The id is opaque: it is returned byte for byte, whitespace included.
pub fn decode_order_id(key: Option<&[u8]>) -> Result<String, DecodeError> {
    let key = key.ok_or(DecodeError::MissingKey)?;
    let order_id = std::str::from_utf8(key).map_err(|e| DecodeError::InvalidKey(e.to_string()))?;
    if order_id.is_empty() {
        return Err(DecodeError::InvalidKey("empty key".to_string()));
    }
    Ok(order_id.to_string())
}

/// Decode a status payload.
///
/// A payload without a `status` field decodes to [`OrderStatus::Unknown`].
pub fn decode_status_event(payload: Option<&[u8]>, codes: &StatusCodes) -> Result<StatusEvent, DecodeError> {
    let payload = payload.ok_or(DecodeError::MissingPayload)?;
    let value: Value = serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let Value::Object(mut fields) = value else {
        return Err(DecodeError::Malformed("payload is not a JSON object".to_string()));
    };

    let (status, code) = match fields.remove("status") {
        None | Some(Value::Null) => (OrderStatus::Unknown, None),
        Some(raw) => {
            let code = raw
                .as_i64()
                .ok_or_else(|| DecodeError::InvalidStatusCode(raw.to_string()))?;
            let status = codes.status_of(code).ok_or(DecodeError::UnmappedStatusCode(code))?;
            (status, Some(code))
        }
    };

    let timestamp = match fields.remove("timestamp") {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    };

    Ok(StatusEvent {
        status,
        code,
        timestamp,
        extra: fields,
    })
}

/// Render raw bytes for a log line without failing on invalid UTF-8.
pub(crate) fn lossy(bytes: Option<&[u8]>) -> String {
    match bytes {
        Some(b) => String::from_utf8_lossy(b).into_owned(),
        None => "<none>".to_string(),
    }
}
