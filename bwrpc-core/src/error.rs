//! Error types for bwrpc
//!
//! Every failure the client can surface carries a layer tag telling the caller
//! which part of the stack produced it:
//!
//! - **Transport**: socket-level failures - connect retries exhausted, illegal
//!   ready-state transitions, send on a closed socket, authentication
//! - **JsonRpc**: protocol failures - malformed outgoing arguments, unparseable
//!   or unrecognized inbound messages, server error responses, call timeouts
//! - **Event**: subscription and event-wait failures - partial subscribe
//!   results, wait mismatches, wait timeouts
//!
//! All of these reach the caller as an `Err` on the operation that owns them.
//! Inbound problems with no owning call (parse errors, unknown response ids)
//! are re-emitted on the client's local `error` event instead.

use crate::types::Id;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Result type for bwrpc operations
pub type Result<T> = std::result::Result<T, Error>;

/// The layer of the stack an [`Error`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    /// WebSocket/connection lifecycle
    Transport,
    /// JSON-RPC request/response protocol
    JsonRpc,
    /// Server-push subscriptions and event waits
    Event,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Transport => write!(f, "TRANSPORT"),
            Layer::JsonRpc => write!(f, "JSON-RPC"),
            Layer::Event => write!(f, "EVENT"),
        }
    }
}

/// A single failed entry from a subscribe/unsubscribe round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFailure {
    /// The event name that failed
    pub event: String,
    /// The server's error string for it
    pub reason: String,
}

impl fmt::Display for EventFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.event, self.reason)
    }
}

/// Client error type covering all three layers.
///
/// Use [`Error::layer`] to branch on origin without matching every variant.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Connect failed after exhausting retries; carries the last cause
    #[error("could not connect to server: {0}")]
    Connect(String),

    /// A lifecycle operation was attempted in the wrong ready state,
    /// e.g. re-entrant connect while a previous connection is not yet closed
    #[error("illegal ready state: {0}")]
    IllegalReadyState(String),

    /// The socket refused or failed an outgoing frame
    #[error("could not send message: {0}")]
    Send(String),

    /// The connection went away while an operation was waiting on it
    #[error("connection closed")]
    ConnectionClosed,

    /// The digest handshake was rejected or the challenge was malformed
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Outgoing method/params failed strict argument validation
    #[error("invalid argument: {0}")]
    InvalidArgs(String),

    /// An inbound frame was not valid JSON
    #[error("JSON parse error: {0}")]
    Parse(String),

    /// An inbound message matched none of the known shapes
    #[error("received invalid message: {0}")]
    InvalidMessage(Value),

    /// An inbound response carried an id with no pending call
    #[error("received message has unknown id: {0}")]
    UnknownId(Id),

    /// The server answered a call with an error response
    #[error("received error response from server: {0}")]
    Server(ErrorObject),

    /// No response arrived for a call within its timeout
    #[error("timeout waiting for result of [{method}]")]
    ResponseTimeout {
        /// Method name of the timed-out call
        method: String,
    },

    /// A batch builder produced no requests at all
    #[error("invalid request: empty batch is not allowed")]
    EmptyBatch,

    /// One or more events in a subscribe/unsubscribe reply were not "ok"
    #[error("event {action} error: [{}]", format_failures(.failures))]
    Subscription {
        /// "subscribe" or "unsubscribe"
        action: &'static str,
        /// The failing events with their server-reported reasons
        failures: Vec<EventFailure>,
    },

    /// A once-mode event wait saw a first notification that did not match
    #[error("event [{event}] params did not match")]
    EventMismatch {
        /// The awaited event name
        event: String,
        /// The params that failed to match
        params: Value,
    },

    /// An event wait timed out before a matching notification arrived
    #[error("timeout waiting for event [{event}]")]
    EventTimeout {
        /// The awaited event name
        event: String,
    },
}

fn format_failures(failures: &[EventFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// The layer of the stack this error originated from.
    pub fn layer(&self) -> Layer {
        match self {
            Error::Connect(_)
            | Error::IllegalReadyState(_)
            | Error::Send(_)
            | Error::ConnectionClosed
            | Error::Authentication(_) => Layer::Transport,
            Error::InvalidArgs(_)
            | Error::Parse(_)
            | Error::InvalidMessage(_)
            | Error::UnknownId(_)
            | Error::Server(_)
            | Error::ResponseTimeout { .. }
            | Error::EmptyBatch => Layer::JsonRpc,
            Error::Subscription { .. }
            | Error::EventMismatch { .. }
            | Error::EventTimeout { .. } => Layer::Event,
        }
    }
}

/// JSON-RPC 2.0 error object as it appears on the wire
///
/// Appears in the `error` field of an error response. `code` and `message`
/// default when a server omits them, since inbound validation only requires
/// the field to be an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Numeric error code; spec reserves -32768..-32000
    #[serde(default)]
    pub code: i32,
    /// Short human-readable description
    #[serde(default)]
    pub message: String,
    /// Optional additional error information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(code: i32, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Parse error (-32700): the peer received invalid JSON.
    pub fn parse_error() -> Self {
        Self::new(-32700, "Parse error")
    }

    /// Invalid request (-32600): valid JSON, malformed request object.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(-32600, msg)
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(-32601, format!("Method not found: {}", method.into()))
    }

    /// Invalid params (-32602).
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::new(-32602, msg)
    }

    /// Internal error (-32603).
    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::new(-32603, msg)
    }
}

impl fmt::Display for ErrorObject {
    /// Formats as "[code] message" for log readability.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorObject {}
