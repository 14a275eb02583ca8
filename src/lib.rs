//! bwrpc - JSON-RPC 2.0 over WebSocket with server-push events
//!
//! This is the convenience crate that re-exports the bwrpc sub-crates. Use it
//! if you want a single dependency for talking to a WebSocket RPC endpoint
//! with server-push subscriptions and digest authentication.
//!
//! # Architecture
//!
//! bwrpc is organized into modular crates:
//!
//! - **bwrpc-core**: wire types, message classification, error taxonomy
//! - **bwrpc-client**: the client stack - transport, subscriptions, session
//!
//! The client itself is three composed layers: a `Transport` owning the
//! socket and the pending-call registry, a `Subscriptions` layer owning the
//! server-subscribed event set, and an `RpcSession` adding the digest
//! handshake, the reconfigure-and-restart protocol, and convenience RPCs.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use bwrpc::{ClientOptions, RpcSession};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> bwrpc::Result<()> {
//!     let session = RpcSession::new("ws://localhost:8887", ClientOptions::default())?;
//!     session.connect(0).await?;
//!
//!     let echoed = session.call("rpc.echo", json!(["hello"])).await?;
//!     println!("echoed: {}", echoed);
//!
//!     session.subscribe(["transport.play"]).await?;
//!     let params = session.event("transport.play").occurs().wait().await?;
//!     println!("transport started: {}", params);
//!
//!     session.close().await
//! }
//! ```

// Re-export the sub-crates under stable module names
pub use bwrpc_client as client;
pub use bwrpc_core as core;

// Convenience re-exports of the types most callers need
pub use bwrpc_client::{
    ClientOptions, ConnectOptions, NullIdPolicy, RpcSession, SessionState, Subscriptions,
    Transport,
};
pub use bwrpc_core::{Error, ErrorObject, Layer, Result};
