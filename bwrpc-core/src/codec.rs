//! Encoding and classification of wire messages
//!
//! Outgoing messages are plain serde serialization. Inbound text frames go
//! through two steps:
//!
//! 1. [`decode_frame`] parses the JSON and splits batch arrays from single
//!    messages; each batch element is classified independently so one bad
//!    element cannot poison its siblings.
//! 2. [`classify`] turns a raw JSON value into a typed [`ServerMessage`]
//!    variant, or rejects it.
//!
//! # Classification modes
//!
//! In strict mode (the default) a small ordered set of shape rules is applied:
//! notification, then result, then error. A rule passes when every required
//! property is present and valid and every optional property is absent or
//! valid; the first passing rule decides the variant. The result rule also
//! requires the `error` member to be absent, which keeps the ordered rules a
//! partition: no frame can satisfy two of them.
//!
//! In lax mode only the presence of the discriminating member is checked
//! (`notification`, `result`, `error`, in that order). This is a compatibility
//! fallback for peers that are sloppy about the `jsonrpc` marker.

use crate::error::{Error, Result};
use crate::types::{PushNotification, RpcError, RpcResult, ServerMessage};
use serde::Serialize;
use serde_json::Value;

/// A parsed inbound text frame: one message or a batch of them.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// A single message object
    Single(Value),
    /// A JSON array of messages, processed element-wise
    Batch(Vec<Value>),
}

/// Encode any serializable message to a JSON string.
pub fn encode<T: Serialize>(msg: &T) -> Result<String> {
    serde_json::to_string(msg).map_err(|e| Error::InvalidArgs(e.to_string()))
}

/// Parse an inbound text frame into a single message or a batch.
///
/// A parse failure is a `JSON-RPC` layer error; the caller reports it and
/// keeps the connection alive.
pub fn decode_frame(data: &str) -> Result<InboundFrame> {
    let value: Value = serde_json::from_str(data).map_err(|e| Error::Parse(e.to_string()))?;
    match value {
        Value::Array(items) => Ok(InboundFrame::Batch(items)),
        other => Ok(InboundFrame::Single(other)),
    }
}

/// Classify a raw inbound value as notification, result, or error.
///
/// `strict` selects full shape validation; lax mode keys off discriminant
/// presence only. Values matching no rule are returned inside
/// [`Error::InvalidMessage`] so the caller can surface them.
pub fn classify(value: Value, strict: bool) -> Result<ServerMessage> {
    let matched = if strict {
        if is_notification_shape(&value) {
            Some(Kind::Notification)
        } else if is_result_shape(&value) {
            Some(Kind::Result)
        } else if is_error_shape(&value) {
            Some(Kind::Error)
        } else {
            None
        }
    } else {
        let obj = value.as_object();
        obj.and_then(|o| {
            if o.contains_key("notification") {
                Some(Kind::Notification)
            } else if o.contains_key("result") {
                Some(Kind::Result)
            } else if o.contains_key("error") {
                Some(Kind::Error)
            } else {
                None
            }
        })
    };

    match matched {
        Some(Kind::Notification) => {
            let msg: PushNotification = serde_json::from_value(value.clone())
                .map_err(|_| Error::InvalidMessage(value))?;
            Ok(ServerMessage::Notification(msg))
        }
        Some(Kind::Result) => {
            let msg: RpcResult = serde_json::from_value(value.clone())
                .map_err(|_| Error::InvalidMessage(value))?;
            Ok(ServerMessage::Result(msg))
        }
        Some(Kind::Error) => {
            let msg: RpcError = serde_json::from_value(value.clone())
                .map_err(|_| Error::InvalidMessage(value))?;
            Ok(ServerMessage::Error(msg))
        }
        None => Err(Error::InvalidMessage(value)),
    }
}

enum Kind {
    Notification,
    Result,
    Error,
}

/// `notification` required non-empty string; `params` optional array|object.
fn is_notification_shape(value: &Value) -> bool {
    let obj = match value.as_object() {
        Some(obj) => obj,
        None => return false,
    };
    match obj.get("notification") {
        Some(Value::String(name)) if !name.is_empty() => {}
        _ => return false,
    }
    match obj.get("params") {
        None => true,
        Some(params) => params.is_array() || params.is_object(),
    }
}

/// `jsonrpc` required "2.0"; `result` optional any; `id` required non-null
/// number|string; `error` must be absent.
fn is_result_shape(value: &Value) -> bool {
    let obj = match value.as_object() {
        Some(obj) => obj,
        None => return false,
    };
    if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return false;
    }
    if obj.contains_key("error") {
        return false;
    }
    matches!(obj.get("id"), Some(id) if id.is_number() || id.is_string())
}

/// `jsonrpc` required "2.0"; `error` required object; `id` required
/// null|number|string.
fn is_error_shape(value: &Value) -> bool {
    let obj = match value.as_object() {
        Some(obj) => obj,
        None => return false,
    };
    if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return false;
    }
    if !matches!(obj.get("error"), Some(err) if err.is_object()) {
        return false;
    }
    matches!(obj.get("id"), Some(id) if id.is_null() || id.is_number() || id.is_string())
}
