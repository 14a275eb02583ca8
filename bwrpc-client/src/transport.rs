//! WebSocket transport with request/response correlation
//!
//! The transport exclusively owns one socket per connection lifecycle plus
//! the two registries that multiplex logically independent awaits over it:
//! the pending-call table (calls, keyed by request id) and the event bus
//! (lifecycle events and, via the layer above, server-push notifications).
//!
//! # Lifecycle
//!
//! `connect` is only legal from the fully `Closed` state - a re-entrant
//! connect while a previous connection is still winding down is rejected
//! rather than racing two sockets. Every connect starts from a clean slate:
//! pending calls, bus listeners, and (through the injected teardown hook)
//! the subscription layer's state are all cleared, so nothing leaks across
//! reconnects. A spawned receive task drains the socket for the lifetime of
//! the connection and performs the same teardown when the socket goes away.
//!
//! # Cloning
//!
//! `Transport` is cheaply cloneable; all clones share the same connection
//! and registries.

use crate::batch::{self, BatchItem, BatchScope};
use crate::bus::{match_any, EventBus, ListenerHandle, MatcherFn};
use crate::options::{ClientOptions, NullIdPolicy};
use crate::pending::PendingCalls;
use crate::retry::RetryPolicy;
use bwrpc_core::codec::{self, InboundFrame};
use bwrpc_core::{Error, Id, PushNotification, Request, Result, ServerMessage};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Hook invoked for every inbound server-push notification.
pub type NotificationHook =
    Arc<dyn Fn(PushNotification) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Hook invoked during connection teardown, before the `close` event fires.
pub type TeardownHook =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Socket ready state, mirrored from the underlying connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A connect sequence (including its retries) is in progress
    Connecting,
    /// The socket is open and usable
    Open,
    /// A local close was requested and is in flight
    Closing,
    /// No socket; the only state `connect` may start from
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closing => write!(f, "closing"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Code and reason of the most recent close, kept for callers that need to
/// inspect it after the fact (the digest handshake reads its challenge from
/// here).
#[derive(Debug, Clone)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

#[derive(Default)]
struct Hooks {
    notification: Option<NotificationHook>,
    teardown: Option<TeardownHook>,
}

/// JSON-RPC 2.0 client transport over one WebSocket.
#[derive(Clone)]
pub struct Transport {
    options: ClientOptions,
    state: Arc<RwLock<ConnectionState>>,
    sink: Arc<Mutex<Option<WsSink>>>,
    pending: PendingCalls,
    bus: EventBus,
    hooks: Arc<RwLock<Hooks>>,
    last_close: Arc<RwLock<Option<CloseInfo>>>,
}

impl Transport {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            state: Arc::new(RwLock::new(ConnectionState::Closed)),
            sink: Arc::new(Mutex::new(None)),
            pending: PendingCalls::new(),
            bus: EventBus::new(),
            hooks: Arc::new(RwLock::new(Hooks::default())),
            last_close: Arc::new(RwLock::new(None)),
        }
    }

    /// Current ready state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read().expect("state lock poisoned")
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Code and reason of the most recent close, if any.
    pub fn last_close(&self) -> Option<CloseInfo> {
        self.last_close.read().expect("close lock poisoned").clone()
    }

    pub(crate) fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Install the handler for inbound server-push notifications. Without
    /// one, notifications are reported on the `error` event and dropped.
    pub(crate) fn set_notification_hook(&self, hook: NotificationHook) {
        self.hooks.write().expect("hooks lock poisoned").notification = Some(hook);
    }

    /// Install a hook run during every teardown, for state owned by layers
    /// above (e.g. the subscribed-event set).
    pub(crate) fn set_teardown_hook(&self, hook: TeardownHook) {
        self.hooks.write().expect("hooks lock poisoned").teardown = Some(hook);
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write().expect("state lock poisoned") = state;
    }

    /// Open the socket, retrying on a fixed backoff.
    ///
    /// `retries` is the number of additional attempts after the first failure;
    /// `-1` retries indefinitely. `timeout` bounds each individual attempt.
    /// Rejected with an illegal-ready-state error unless fully closed.
    pub async fn connect(&self, url: &str, retries: i32, timeout: Duration) -> Result<()> {
        {
            // claim the lifecycle atomically so concurrent connects cannot
            // race two sockets
            let mut state = self.state.write().expect("state lock poisoned");
            if *state != ConnectionState::Closed {
                return Err(Error::IllegalReadyState(format!(
                    "connect attempted while {}",
                    *state
                )));
            }
            *state = ConnectionState::Connecting;
        }

        // fresh lifecycle: nothing from a previous connection may leak in
        self.pending.reject_all(Error::ConnectionClosed);
        self.bus.clear().await;
        *self.last_close.write().expect("close lock poisoned") = None;
        if let Some(hook) = self.teardown_hook() {
            hook().await;
        }

        tracing::info!(url, retries, "connecting to server");

        let mut policy = RetryPolicy::new(retries);
        let mut last_cause;
        let ws = loop {
            match tokio::time::timeout(timeout, connect_async(url)).await {
                Ok(Ok((ws, _response))) => break ws,
                Ok(Err(e)) => last_cause = e.to_string(),
                Err(_) => last_cause = format!("no open event within {:?}", timeout),
            }
            match policy.next_delay() {
                Some(delay) => {
                    tracing::warn!(cause = %last_cause, "connect attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                None => {
                    self.set_state(ConnectionState::Closed);
                    return Err(Error::Connect(last_cause));
                }
            }
        };

        let (sink, stream) = ws.split();
        *self.sink.lock().await = Some(sink);
        self.set_state(ConnectionState::Open);

        // the receive task owns the read half for this connection's lifetime
        let transport = self.clone();
        tokio::spawn(async move { transport.receive_loop(stream).await });

        self.bus.emit("open", Value::Null).await;
        tracing::info!("connected");
        Ok(())
    }

    /// Send a fire-and-forget notification. No id, no registry entry.
    pub async fn notify(
        &self,
        method: impl Into<String>,
        params: impl Into<Option<Value>>,
    ) -> Result<()> {
        let method = method.into();
        let params = params.into();
        if self.options.strict_args {
            batch::check_args(&method, &params)?;
        }
        let request = Request::notification(method, params);
        self.send(codec::encode(&request)?).await
    }

    /// Send a call and await its result with the default response timeout.
    pub async fn call(
        &self,
        method: impl Into<String>,
        params: impl Into<Option<Value>>,
    ) -> Result<Value> {
        self.call_timeout(method, params, self.options.response_timeout)
            .await
    }

    /// Send a call and await its result within `timeout`.
    ///
    /// The pending entry is settled or discarded exactly once: by the matching
    /// result, by a server error response, or by the timeout - whichever
    /// fires first. A response arriving after timeout is ignored.
    pub async fn call_timeout(
        &self,
        method: impl Into<String>,
        params: impl Into<Option<Value>>,
        timeout: Duration,
    ) -> Result<Value> {
        let method = method.into();
        let params = params.into();
        if self.options.strict_args {
            batch::check_args(&method, &params)?;
        }

        let (id, rx) = self.pending.register();
        let request = Request::call(method.as_str(), params, id);
        let text = match codec::encode(&request) {
            Ok(text) => text,
            Err(e) => {
                self.pending.discard(id);
                return Err(e);
            }
        };
        if let Err(e) = self.send(text).await {
            self.pending.discard(id);
            return Err(e);
        }
        tracing::debug!(method = %method, id, "request sent, waiting for response");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_recv)) => Err(Error::ConnectionClosed),
            Err(_elapsed) => {
                self.pending.discard(id);
                tracing::warn!(method = %method, id, "response timed out");
                Err(Error::ResponseTimeout { method })
            }
        }
    }

    /// Build and send a batch with the default response timeout.
    pub async fn batch<F>(&self, build: F) -> Result<Option<Value>>
    where
        F: FnOnce(&mut BatchScope) -> Result<()>,
    {
        self.batch_timeout(build, self.options.response_timeout)
            .await
    }

    /// Build and send a batch; every recorded call gets its own pending entry
    /// and an independent `timeout`.
    ///
    /// Resolves `None` for an all-notification batch, the bare result for a
    /// single call, and an array in call order for more - even when the
    /// responses arrive out of order. An empty batch is rejected.
    pub async fn batch_timeout<F>(&self, build: F, timeout: Duration) -> Result<Option<Value>>
    where
        F: FnOnce(&mut BatchScope) -> Result<()>,
    {
        let mut scope = BatchScope::new(self.options.strict_args);
        build(&mut scope)?;
        if scope.is_empty() {
            return Err(Error::EmptyBatch);
        }

        let mut frames: Vec<Value> = Vec::new();
        let mut calls: Vec<(u16, String, oneshot::Receiver<Result<Value>>)> = Vec::new();
        for item in scope.into_items() {
            match item {
                BatchItem::Call { method, params } => {
                    let (id, rx) = self.pending.register();
                    let request = Request::call(method.as_str(), params, id);
                    frames.push(
                        serde_json::to_value(&request)
                            .map_err(|e| Error::InvalidArgs(e.to_string()))?,
                    );
                    calls.push((id, method, rx));
                }
                BatchItem::Notify { method, params } => {
                    let request = Request::notification(method, params);
                    frames.push(
                        serde_json::to_value(&request)
                            .map_err(|e| Error::InvalidArgs(e.to_string()))?,
                    );
                }
            }
        }

        let text =
            serde_json::to_string(&frames).map_err(|e| Error::InvalidArgs(e.to_string()))?;
        if let Err(e) = self.send(text).await {
            for (id, _, _) in &calls {
                self.pending.discard(*id);
            }
            return Err(e);
        }
        tracing::debug!(batch_size = frames.len(), "batch sent, waiting for responses");

        let waits = calls.into_iter().map(|(id, method, rx)| {
            let pending = self.pending.clone();
            async move {
                match tokio::time::timeout(timeout, rx).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(_recv)) => Err(Error::ConnectionClosed),
                    Err(_elapsed) => {
                        pending.discard(id);
                        Err(Error::ResponseTimeout { method })
                    }
                }
            }
        });
        let settled = futures::future::join_all(waits).await;

        let mut results = Vec::with_capacity(settled.len());
        for outcome in settled {
            results.push(outcome?);
        }
        Ok(batch::shape_results(results))
    }

    /// Low-level enqueue of one text frame. Fails unless the socket is open.
    pub async fn send(&self, data: String) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Open {
            return Err(Error::Send(format!("socket is not open ({})", state)));
        }
        tracing::trace!(data = %data, "send");
        let mut guard = self.sink.lock().await;
        match guard.as_mut() {
            Some(sink) => sink
                .send(Message::Text(data))
                .await
                .map_err(|e| Error::Send(e.to_string())),
            None => Err(Error::Send("socket is not open".to_string())),
        }
    }

    /// Close the connection and resolve only after full teardown.
    ///
    /// A connect still in flight is waited out first; an already closing or
    /// closed connection makes this a no-op.
    pub async fn close(&self, code: u16, reason: Option<String>) -> Result<()> {
        match self.state() {
            ConnectionState::Closed | ConnectionState::Closing => return Ok(()),
            ConnectionState::Connecting => {
                self.wait_event(
                    "open",
                    true,
                    Some(self.options.connect_timeout),
                    match_any(),
                )
                .await?;
            }
            ConnectionState::Open => {}
        }

        self.set_state(ConnectionState::Closing);
        {
            let mut guard = self.sink.lock().await;
            if let Some(sink) = guard.as_mut() {
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.unwrap_or_default().into(),
                };
                sink.send(Message::Close(Some(frame)))
                    .await
                    .map_err(|e| Error::Send(e.to_string()))?;
            }
        }
        // the receive loop emits `close` after it has torn everything down
        self.wait_event(
            "close",
            true,
            Some(self.options.connect_timeout),
            match_any(),
        )
        .await?;
        Ok(())
    }

    /// Wait for a local event matching `matcher`.
    ///
    /// `timeout` semantics: `None` uses the configured event-wait default,
    /// an explicit `Duration::ZERO` waits forever. With `once` set the wait
    /// settles on the first emission evaluated, mismatch included.
    pub async fn wait_event(
        &self,
        event: &str,
        once: bool,
        timeout: Option<Duration>,
        matcher: MatcherFn,
    ) -> Result<Value> {
        let timeout = match timeout {
            Some(limit) if limit.is_zero() => None,
            Some(limit) => Some(limit),
            None => Some(self.options.event_timeout),
        };
        self.bus.wait(event, once, timeout, matcher).await
    }

    /// Register a listener for a local event. Listeners for one event run in
    /// registration order.
    pub async fn on<F, Fut>(&self, event: impl Into<String>, callback: F) -> ListenerHandle
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.bus.on(event, callback).await
    }

    /// Remove one previously registered listener.
    pub async fn off(&self, event: &str, handle: ListenerHandle) -> bool {
        self.bus.off(event, handle).await
    }

    fn teardown_hook(&self) -> Option<TeardownHook> {
        self.hooks.read().expect("hooks lock poisoned").teardown.clone()
    }

    async fn receive_loop(self, mut stream: WsStream) {
        let mut close_info: Option<CloseInfo> = None;
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => self.handle_frame(&text).await,
                Ok(Message::Close(frame)) => {
                    close_info = frame.map(|f| CloseInfo {
                        code: u16::from(f.code),
                        reason: f.reason.into_owned(),
                    });
                    tracing::info!(
                        code = close_info.as_ref().map(|c| c.code),
                        "connection closed by server"
                    );
                    break;
                }
                Ok(_) => {} // ping/pong/binary are handled by the library
                Err(e) => {
                    tracing::error!(error = %e, "websocket error");
                    self.bus
                        .emit("error", json!({ "message": e.to_string() }))
                        .await;
                    break;
                }
            }
        }
        self.teardown(close_info).await;
    }

    /// Tear the connection state down and announce the close.
    ///
    /// Runs exactly once per connection, from the receive task. Pending calls
    /// and the subscription layer's state never survive into the next
    /// connection; the `close` event is the last thing waiters observe.
    async fn teardown(&self, close_info: Option<CloseInfo>) {
        // 1006: closed without a close frame
        let info = close_info.unwrap_or(CloseInfo {
            code: 1006,
            reason: String::new(),
        });
        self.set_state(ConnectionState::Closed);
        *self.last_close.write().expect("close lock poisoned") = Some(info.clone());
        *self.sink.lock().await = None;
        self.pending.reject_all(Error::ConnectionClosed);
        if let Some(hook) = self.teardown_hook() {
            hook().await;
        }
        self.bus
            .emit(
                "close",
                json!({ "code": info.code, "reason": info.reason }),
            )
            .await;
        self.bus.clear().await;
    }

    async fn handle_frame(&self, text: &str) {
        tracing::trace!(data = %text, "message received");
        let frame = match codec::decode_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                // a bad frame must not bring the client down
                tracing::warn!(error = %e, "dropping unparseable frame");
                self.bus
                    .emit("error", json!({ "message": e.to_string() }))
                    .await;
                return;
            }
        };
        match frame {
            InboundFrame::Single(value) => self.dispatch(value).await,
            InboundFrame::Batch(values) => {
                for value in values {
                    self.dispatch(value).await;
                }
            }
        }
    }

    async fn dispatch(&self, value: Value) {
        match codec::classify(value, self.options.strict_messages) {
            Ok(ServerMessage::Notification(push)) => {
                let hook = self
                    .hooks
                    .read()
                    .expect("hooks lock poisoned")
                    .notification
                    .clone();
                match hook {
                    Some(hook) => hook(push).await,
                    None => {
                        // no layer above has claimed server-push messages
                        self.bus
                            .emit(
                                "error",
                                json!({
                                    "message": "received invalid message",
                                    "notification": push.notification,
                                }),
                            )
                            .await;
                    }
                }
            }
            Ok(ServerMessage::Result(result)) => {
                let id = result.id.clone();
                let settled = numeric_id(&id)
                    .map(|n| self.pending.resolve(n, result.into_value()))
                    .unwrap_or(false);
                if !settled {
                    tracing::warn!(id = %id, "response with unknown id");
                    self.bus
                        .emit(
                            "error",
                            json!({ "message": Error::UnknownId(id).to_string() }),
                        )
                        .await;
                }
            }
            Ok(ServerMessage::Error(response)) => {
                let cause = Error::Server(response.error.clone());
                match response.id {
                    Some(id) => {
                        let settled = numeric_id(&id)
                            .map(|n| self.pending.reject(n, cause.clone()))
                            .unwrap_or(false);
                        if !settled {
                            tracing::warn!(id = %id, "error response with unknown id");
                            self.bus
                                .emit(
                                    "error",
                                    json!({ "message": Error::UnknownId(id).to_string() }),
                                )
                                .await;
                        }
                    }
                    None => match self.options.null_id_policy {
                        NullIdPolicy::RejectFirst => {
                            self.pending.reject_oldest(cause);
                        }
                        NullIdPolicy::RejectAll => {
                            self.pending.reject_all(cause);
                        }
                        NullIdPolicy::DontCare => {
                            tracing::debug!("ignoring error response with null id");
                            self.bus
                                .emit("error", json!({ "message": cause.to_string() }))
                                .await;
                        }
                    },
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping invalid message");
                self.bus
                    .emit("error", json!({ "message": e.to_string() }))
                    .await;
            }
        }
    }
}

fn numeric_id(id: &Id) -> Option<u16> {
    id.as_number().and_then(|n| u16::try_from(n).ok())
}
