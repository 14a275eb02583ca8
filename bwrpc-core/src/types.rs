//! Wire types for the JSON-RPC 2.0 over WebSocket protocol
//!
//! This module defines the message shapes that travel over the socket:
//!
//! 1. **Request**: a call to a remote method; carries an `id` when a response
//!    is expected, and omits it for fire-and-forget notifications
//! 2. **Result / Error responses**: the two possible outcomes of a call,
//!    correlated back to the request by `id`
//! 3. **Push notification**: an unsolicited `{notification, params}` message
//!    from the server, keyed by an event name — this is the server-push
//!    convention layered on top of plain JSON-RPC 2.0
//!
//! # Request IDs
//!
//! Outgoing request ids are small integers from a wrapping 16-bit counter,
//! unique only among currently outstanding calls. Inbound response ids may be
//! numbers or strings per the JSON-RPC 2.0 spec; an error response may also
//! carry a `null` id when the server could not determine which request failed.

use crate::error::ErrorObject;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// JSON-RPC 2.0 response ID
///
/// Correlates a response with its originating request. The spec allows string
/// or number ids; a `null` wire id is represented as `Option<Id>::None` on the
/// containing message rather than as a variant here, so that every `Id` value
/// is actually correlatable.
///
/// Uses `#[serde(untagged)]` to serialize directly as the inner value, matching
/// the wire format exactly. Implements `Hash`/`Eq` for use as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    /// Numeric identifier - what this client assigns to its own calls
    Number(i64),
    /// String identifier - allowed by the spec for foreign peers
    String(String),
}

impl Id {
    /// Returns the numeric value if this is a number id.
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Id::Number(n) => Some(*n),
            Id::String(_) => None,
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Number(n) => write!(f, "{}", n),
            Id::String(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Id::Number(n)
    }
}

impl From<u16> for Id {
    fn from(n: u16) -> Self {
        Id::Number(n as i64)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::String(s.to_string())
    }
}

/// JSON-RPC 2.0 request message
///
/// A request with an `id` expects a response; one without an `id` is a
/// notification and the server must not reply to it.
///
/// # Examples
///
/// ```rust
/// use bwrpc_core::Request;
/// use serde_json::json;
///
/// let call = Request::call("rpc.echo", Some(json!(["hello"])), 1);
/// assert_eq!(call.id, Some(1));
///
/// let notify = Request::notification("rpc.broadcast", Some(json!(["tick", []])));
/// assert!(notify.id.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// JSON-RPC version - always "2.0"
    pub jsonrpc: String,
    /// Name of the remote method to invoke
    pub method: String,
    /// Optional parameters, by-position (array) or by-name (object)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Request id; omitted for notifications
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u16>,
}

impl Request {
    /// Create a request that expects a response.
    pub fn call(method: impl Into<String>, params: Option<Value>, id: u16) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id: Some(id),
        }
    }

    /// Create a fire-and-forget notification (no id, no response).
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id: None,
        }
    }

    /// Check whether this request expects a response.
    pub fn expects_response(&self) -> bool {
        self.id.is_some()
    }
}

/// Server-push notification message
///
/// Not part of strict JSON-RPC 2.0: the server pushes `{notification, params}`
/// objects for events the client has subscribed to via `rpc.on`. The
/// `notification` field names the event; `params` carries the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushNotification {
    /// Event name this notification belongs to
    pub notification: String,
    /// Event payload, usually a by-position array
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl PushNotification {
    pub fn new(notification: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            notification: notification.into(),
            params,
        }
    }
}

fn version() -> String {
    "2.0".to_string()
}

/// Successful JSON-RPC 2.0 response
///
/// `result` may legitimately be absent for void methods; callers observe that
/// as a JSON `null`. The `jsonrpc` marker defaults when absent so that lax
/// classification can still produce a typed value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResult {
    /// JSON-RPC version - always "2.0"
    #[serde(default = "version")]
    pub jsonrpc: String,
    /// The result of the method invocation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Id of the request this responds to
    pub id: Id,
}

impl RpcResult {
    pub fn new(result: Value, id: Id) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            id,
        }
    }

    /// The result payload, with an absent value read as `null`.
    pub fn into_value(self) -> Value {
        self.result.unwrap_or(Value::Null)
    }
}

/// Error JSON-RPC 2.0 response
///
/// `id` is `None` when the wire id was `null`, i.e. the server could not tell
/// which request failed (a parse error, typically). How such errors are mapped
/// onto pending calls is a client policy decision, not decided here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// JSON-RPC version - always "2.0"
    #[serde(default = "version")]
    pub jsonrpc: String,
    /// The error details
    pub error: ErrorObject,
    /// Id of the failed request, or `None` for a `null` wire id
    pub id: Option<Id>,
}

impl RpcError {
    pub fn new(error: ErrorObject, id: Option<Id>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            error,
            id,
        }
    }
}

/// Closed sum over every message the server can send
///
/// Produced by [`crate::codec::classify`]; inbound frames are decoded into
/// exactly one of these variants or rejected, so downstream dispatch is a
/// plain `match` instead of duck-typed property checks.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    /// Server-push event notification
    Notification(PushNotification),
    /// Successful call response
    Result(RpcResult),
    /// Failed call response
    Error(RpcError),
}

impl ServerMessage {
    pub fn is_notification(&self) -> bool {
        matches!(self, ServerMessage::Notification(_))
    }

    pub fn is_result(&self) -> bool {
        matches!(self, ServerMessage::Result(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ServerMessage::Error(_))
    }
}
