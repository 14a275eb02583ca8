//! JSON-RPC 2.0 over WebSocket client with server-push events
//!
//! This crate implements the client stack as three composed layers, each
//! consuming the public surface of the one below:
//!
//! - [`Transport`]: owns the socket; request/response correlation, per-call
//!   timeouts, batch requests, inbound message classification, and a local
//!   event bus with a generic wait-for-event primitive
//! - [`Subscriptions`]: the server-subscribed event set, notification fan-out
//!   into the bus, and the fluent event-wait builder
//! - [`RpcSession`]: digest-authenticated connect, the
//!   reconfigure-and-restart protocol, popup messages, and convenience RPCs
//!
//! Most callers only touch [`RpcSession`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use bwrpc_client::{ClientOptions, RpcSession};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> bwrpc_core::Result<()> {
//!     let session = RpcSession::new("ws://localhost:8887", ClientOptions::default())?;
//!     session.connect(0).await?;
//!
//!     let echoed = session.call("rpc.echo", json!(["hello"])).await?;
//!     println!("echoed: {}", echoed);
//!
//!     session.subscribe(["transport.getPosition"]).await?;
//!     session
//!         .on("transport.getPosition", |params| async move {
//!             println!("position: {}", params);
//!         })
//!         .await;
//!
//!     // wait declaratively for a future notification
//!     let position = session
//!         .event("transport.getPosition")
//!         .matches(|p| p[0].as_f64().unwrap_or(0.0) > 4.0)
//!         .wait()
//!         .await?;
//!     println!("past bar four: {}", position);
//!
//!     session.close().await
//! }
//! ```

pub mod auth;
mod batch;
mod bus;
mod options;
mod pending;
mod retry;
mod session;
mod subscriptions;
mod transport;
mod wait;

pub use batch::BatchScope;
pub use bus::{match_any, EventBus, ListenerHandle, MatcherFn};
pub use options::{ClientOptions, NullIdPolicy};
pub use retry::RetryPolicy;
pub use session::{ConnectOptions, RpcSession, SessionState};
pub use subscriptions::Subscriptions;
pub use transport::{CloseInfo, ConnectionState, Transport};
pub use wait::EventWait;
