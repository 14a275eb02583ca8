//! Core wire types and message classification for bwrpc
//!
//! This crate provides the protocol foundation shared by the bwrpc client
//! stack:
//!
//! - **Types**: requests, result/error responses, and the `{notification,
//!   params}` server-push message this protocol layers on top of JSON-RPC 2.0
//! - **Codec**: frame decoding (single vs. batch) and strict/lax
//!   classification of inbound messages into a closed sum type
//! - **Error handling**: one error enum spanning the transport, JSON-RPC, and
//!   event layers, tagged by [`Layer`]
//!
//! The crate is transport-agnostic: it knows nothing about WebSockets. The
//! `bwrpc-client` crate builds the connection lifecycle, subscription
//! management, and session semantics on top of it.
//!
//! # Example
//!
//! ```rust
//! use bwrpc_core::{codec, Request, ServerMessage};
//! use serde_json::json;
//!
//! let request = Request::call("rpc.echo", Some(json!(["hello"])), 1);
//! let text = codec::encode(&request).unwrap();
//! assert!(text.contains("\"method\":\"rpc.echo\""));
//!
//! let inbound = json!({"jsonrpc": "2.0", "result": "hello", "id": 1});
//! let message = codec::classify(inbound, true).unwrap();
//! assert!(matches!(message, ServerMessage::Result(_)));
//! ```

pub mod codec;
pub mod error;
pub mod types;

// Re-export the most commonly used types for convenience
pub use error::{Error, ErrorObject, EventFailure, Layer, Result};
pub use types::{Id, PushNotification, Request, RpcError, RpcResult, ServerMessage};
