//! Authenticated, restart-tolerant session layer
//!
//! [`RpcSession`] wraps the subscription layer with the domain's connection
//! semantics: the digest handshake woven into connect, the
//! reconfigure-and-restart protocol (`rpc.config` restarts the server's
//! endpoint, possibly on a new port), popup messages with an owned repeat
//! task, and thin wrappers for the fixed-name convenience RPCs. Everything
//! else delegates straight down to the layers below.

use crate::auth::{self, Challenge};
use crate::batch::BatchScope;
use crate::bus::{match_any, ListenerHandle, MatcherFn};
use crate::options::ClientOptions;
use crate::subscriptions::Subscriptions;
use crate::transport::{CloseInfo, ConnectionState, Transport};
use crate::wait::EventWait;
use bwrpc_core::{Error, Result};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use url::Url;

/// Close code the server uses to deliver its auth challenge, substituting
/// for an HTTP 401 the WebSocket handshake cannot carry.
const CHALLENGE_CLOSE_CODE: u16 = 4401;
/// How long to give the server to demand authentication; a socket that
/// outlives this window did not want a challenge.
const CHALLENGE_WINDOW: Duration = Duration::from_secs(1);
/// Re-send cadence for continuous popup messages; the host hides a popup
/// after a couple of seconds.
const MSG_REPEAT_INTERVAL: Duration = Duration::from_secs(2);
/// Connect retry budget while the server restarts its endpoint.
const RESTART_RETRIES: i32 = 10;
/// How long to wait for the restart-triggered close after pushing new
/// configuration.
const RESTART_CLOSE_WAIT: Duration = Duration::from_secs(10);

/// Connection state as session users see it: the transport's ready states
/// plus the transient authenticating phase of a challenge round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Open,
    Closing,
    Closed,
}

/// Arguments for [`RpcSession::connect`].
///
/// Convertible from the common shorthands: a bare retry count or a password.
///
/// ```rust,no_run
/// # async fn example(session: &bwrpc_client::RpcSession) -> bwrpc_core::Result<()> {
/// use bwrpc_client::ConnectOptions;
/// use std::time::Duration;
///
/// session.connect(3).await?;          // retry count
/// session.connect("secret").await?;   // password
/// session.connect(ConnectOptions {
///     retry: -1,
///     timeout: Some(Duration::from_secs(10)),
///     password: Some("secret".to_string()),
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Additional attempts after the first failure; `-1` retries forever
    pub retry: i32,
    /// Per-attempt budget; `None` uses the configured connect timeout
    pub timeout: Option<Duration>,
    /// Password for this connect; `None` falls back to the configured one
    pub password: Option<String>,
}

impl From<i32> for ConnectOptions {
    fn from(retry: i32) -> Self {
        Self {
            retry,
            ..Default::default()
        }
    }
}

impl From<&str> for ConnectOptions {
    fn from(password: &str) -> Self {
        Self {
            password: Some(password.to_string()),
            ..Default::default()
        }
    }
}

impl From<String> for ConnectOptions {
    fn from(password: String) -> Self {
        Self {
            password: Some(password),
            ..Default::default()
        }
    }
}

/// The full client: transport, subscriptions, and session semantics behind
/// one surface. Cheaply cloneable.
#[derive(Clone)]
pub struct RpcSession {
    subs: Subscriptions,
    url: Arc<Mutex<Url>>,
    authenticating: Arc<AtomicBool>,
    nonce_count: Arc<AtomicU32>,
    msg_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for RpcSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcSession").finish_non_exhaustive()
    }
}

impl RpcSession {
    /// Create a session for `url` with the given options. No I/O happens
    /// until [`RpcSession::connect`].
    pub fn new(url: &str, options: ClientOptions) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::InvalidArgs(format!("invalid url: {}", e)))?;
        let transport = Transport::new(options);
        Ok(Self {
            subs: Subscriptions::new(transport),
            url: Arc::new(Mutex::new(url)),
            authenticating: Arc::new(AtomicBool::new(false)),
            nonce_count: Arc::new(AtomicU32::new(0)),
            msg_task: Arc::new(Mutex::new(None)),
        })
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Transport {
        self.subs.transport()
    }

    /// The subscription layer.
    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subs
    }

    /// Current state, including the authenticating phase.
    pub fn state(&self) -> SessionState {
        if self.authenticating.load(Ordering::SeqCst) {
            return SessionState::Authenticating;
        }
        match self.transport().state() {
            ConnectionState::Connecting => SessionState::Connecting,
            ConnectionState::Open => SessionState::Open,
            ConnectionState::Closing => SessionState::Closing,
            ConnectionState::Closed => SessionState::Closed,
        }
    }

    /// The endpoint this session connects to. Rewritten by [`RpcSession::config`]
    /// when the server restarts on a different port.
    pub async fn url(&self) -> String {
        self.url.lock().await.to_string()
    }

    /// Connect, running the digest handshake when a password is configured.
    ///
    /// Accepts a retry count, a password, or a full [`ConnectOptions`].
    pub async fn connect(&self, options: impl Into<ConnectOptions>) -> Result<()> {
        let options = options.into();
        let timeout = options
            .timeout
            .unwrap_or(self.transport().options().connect_timeout);
        let password = options
            .password
            .or_else(|| self.transport().options().password.clone());

        match password {
            None => {
                let url = self.url().await;
                self.transport().connect(&url, options.retry, timeout).await
            }
            Some(password) => {
                self.authenticating.store(true, Ordering::SeqCst);
                let outcome = self.auth_handshake(&password, options.retry, timeout).await;
                self.authenticating.store(false, Ordering::SeqCst);
                outcome
            }
        }
    }

    /// Read or change the server configuration.
    ///
    /// With `merge` set, settings already satisfied by the current
    /// configuration short-circuit to a plain read. Otherwise the new
    /// configuration is pushed as a notification - the server acknowledges by
    /// restarting its RPC endpoint, i.e. the `close` event, not a response.
    /// The session then rewrites its port if the restart moved it, reconnects
    /// with a bounded retry budget while the server comes back up, and
    /// returns the configuration actually in effect.
    pub async fn config(&self, settings: Value, merge: bool) -> Result<Value> {
        let requested = match settings.as_object() {
            Some(map) => map.clone(),
            None => {
                return Err(Error::InvalidArgs(
                    "settings should be an object".to_string(),
                ))
            }
        };

        let current = self.call("rpc.config", None).await?;
        let fulfilled = requested
            .iter()
            .all(|(key, value)| current.get(key) == Some(value));
        if merge && fulfilled {
            return Ok(current);
        }

        let mut merged: Map<String, Value> = if merge {
            current.as_object().cloned().unwrap_or_default()
        } else {
            let mut seed = Map::new();
            seed.insert("useAbbreviatedMethodNames".to_string(), Value::Bool(false));
            seed
        };
        for (key, value) in requested {
            merged.insert(key, value);
        }
        let new_settings = Value::Object(merged);

        self.notify("rpc.config", new_settings.clone()).await?;
        if self.await_close_within(RESTART_CLOSE_WAIT).await.is_none() {
            return Err(Error::EventTimeout {
                event: "close".to_string(),
            });
        }

        if let Some(port) = new_settings.get("webSocketPort").and_then(Value::as_u64) {
            let mut url = self.url.lock().await;
            let _ = url.set_port(Some(port as u16));
        }

        tracing::info!("server endpoint restarted, reconnecting");
        self.connect(ConnectOptions {
            retry: RESTART_RETRIES,
            ..Default::default()
        })
        .await?;
        self.call("rpc.config", None).await
    }

    /// Show a popup message on the host.
    ///
    /// With `continuous` the message is re-sent on a fixed cadence until
    /// `seconds` have elapsed; `0` keeps it up until the next `msg` call.
    /// There is only ever one repeat task; a new call always cancels the
    /// previous one first.
    pub async fn msg(&self, text: &str, continuous: bool, seconds: u64) -> Result<()> {
        if let Some(task) = self.msg_task.lock().await.take() {
            task.abort();
        }
        self.notify("host.showPopupNotification", json!([text]))
            .await?;

        if continuous {
            let transport = self.transport().clone();
            let text = text.to_string();
            let deadline =
                (seconds > 0).then(|| tokio::time::Instant::now() + Duration::from_secs(seconds));
            let task = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(MSG_REPEAT_INTERVAL);
                // the first tick completes immediately and the popup is
                // already showing
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Some(deadline) = deadline {
                        if tokio::time::Instant::now() >= deadline {
                            break;
                        }
                    }
                    let params = json!([text.as_str()]);
                    if transport
                        .notify("host.showPopupNotification", params)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            });
            *self.msg_task.lock().await = Some(task);
        }
        Ok(())
    }

    /// Report the methods and events the server exposes.
    pub async fn report(&self) -> Result<Value> {
        self.call("rpc.report", None).await
    }

    /// List the actions available on the host application.
    pub async fn actions(&self) -> Result<Value> {
        self.call("application.getActions", None).await
    }

    /// Invoke a host application action by id. Fire-and-forget.
    pub async fn action(&self, id: &str) -> Result<()> {
        self.notify("application.getAction.invoke", json!([id]))
            .await
    }

    /// Broadcast an event to the other connected clients. Fire-and-forget.
    pub async fn broadcast(&self, event: &str, params: Value) -> Result<()> {
        self.notify("rpc.broadcast", json!([event, params])).await
    }

    /// Close the connection, cancelling any popup repeat task.
    pub async fn close(&self) -> Result<()> {
        self.close_with(1000, None).await
    }

    /// Close with an explicit code and reason.
    pub async fn close_with(&self, code: u16, reason: Option<String>) -> Result<()> {
        if let Some(task) = self.msg_task.lock().await.take() {
            task.abort();
        }
        self.transport().close(code, reason).await
    }

    // ---- delegation to the layers below ----

    /// See `Transport::call`.
    pub async fn call(
        &self,
        method: impl Into<String>,
        params: impl Into<Option<Value>>,
    ) -> Result<Value> {
        self.transport().call(method, params).await
    }

    /// See `Transport::call_timeout`.
    pub async fn call_timeout(
        &self,
        method: impl Into<String>,
        params: impl Into<Option<Value>>,
        timeout: Duration,
    ) -> Result<Value> {
        self.transport().call_timeout(method, params, timeout).await
    }

    /// See `Transport::notify`.
    pub async fn notify(
        &self,
        method: impl Into<String>,
        params: impl Into<Option<Value>>,
    ) -> Result<()> {
        self.transport().notify(method, params).await
    }

    /// See `Transport::batch`.
    pub async fn batch<F>(&self, build: F) -> Result<Option<Value>>
    where
        F: FnOnce(&mut BatchScope) -> Result<()>,
    {
        self.transport().batch(build).await
    }

    /// See `Subscriptions::subscribe`.
    pub async fn subscribe<I, S>(&self, events: I) -> Result<HashMap<String, String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subs.subscribe(events).await
    }

    /// See `Subscriptions::unsubscribe`.
    pub async fn unsubscribe<I, S>(&self, events: I) -> Result<HashMap<String, String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subs.unsubscribe(events).await
    }

    /// See `Subscriptions::is_subscribed`.
    pub async fn is_subscribed(&self, event: &str) -> bool {
        self.subs.is_subscribed(event).await
    }

    /// See `Subscriptions::event`.
    pub fn event(&self, name: impl Into<String>) -> EventWait {
        self.subs.event(name)
    }

    /// See `Transport::wait_event`.
    pub async fn wait_event(
        &self,
        event: &str,
        once: bool,
        timeout: Option<Duration>,
        matcher: MatcherFn,
    ) -> Result<Value> {
        self.transport()
            .wait_event(event, once, timeout, matcher)
            .await
    }

    /// See `Transport::on`.
    pub async fn on<F, Fut>(&self, event: impl Into<String>, callback: F) -> ListenerHandle
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.transport().on(event, callback).await
    }

    /// See `Transport::off`.
    pub async fn off(&self, event: &str, handle: ListenerHandle) -> bool {
        self.transport().off(event, handle).await
    }

    // ---- digest handshake ----

    async fn auth_handshake(&self, password: &str, retry: i32, timeout: Duration) -> Result<()> {
        let transport = self.transport();
        let auth_url = self.auth_url(None).await;
        transport.connect(&auth_url, retry, timeout).await?;

        // the server delivers its challenge by closing the handshake socket
        let info = match self.await_close_within(CHALLENGE_WINDOW).await {
            // socket outlived the window: no challenge was demanded
            None => return Ok(()),
            Some(info) => info,
        };
        if info.code != CHALLENGE_CLOSE_CODE {
            return Err(Error::Connect(format!(
                "connection closed before authentication (code {})",
                info.code
            )));
        }
        let challenge = Challenge::parse(&info.reason)?;
        tracing::debug!(realm = %challenge.realm, "received auth challenge");

        let uri = self.digest_uri().await?;
        let nc = auth::format_nc(self.nonce_count.fetch_add(1, Ordering::SeqCst) + 1);
        let cnonce = auth::random_cnonce();
        let query = auth::auth_query(&challenge, password, &uri, &nc, &cnonce);
        let authed_url = self.auth_url(Some(&query)).await;
        transport.connect(&authed_url, retry, timeout).await?;

        // a second close inside the window means the response was rejected
        match self.await_close_within(CHALLENGE_WINDOW).await {
            None => {
                tracing::info!("authenticated");
                Ok(())
            }
            Some(info) => Err(Error::Authentication(format!(
                "server rejected digest response (code {})",
                info.code
            ))),
        }
    }

    /// Wait up to `window` for the connection to close. `None` means the
    /// socket stayed open. Also recognizes a close that raced the waiter
    /// registration, via the transport's close record.
    async fn await_close_within(&self, window: Duration) -> Option<CloseInfo> {
        let transport = self.transport();
        match transport
            .wait_event("close", true, Some(window), match_any())
            .await
        {
            Ok(payload) => Some(CloseInfo {
                code: close_code(&payload),
                reason: payload
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            Err(_) if transport.state() == ConnectionState::Closed => transport.last_close(),
            Err(_) => None,
        }
    }

    /// The `/auth` endpoint, with the digest response query when given.
    async fn auth_url(&self, query: Option<&str>) -> String {
        let mut url = self.url.lock().await.clone();
        url.set_path("/auth");
        url.set_query(query);
        url.to_string()
    }

    /// The `uri` value entering the digest, as the server derives it from
    /// the handshake's Host header.
    async fn digest_uri(&self) -> Result<String> {
        let url = self.url.lock().await;
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidArgs("url has no host".to_string()))?;
        Ok(match url.port() {
            Some(port) => format!("ws://{}:{}/auth", host, port),
            None => format!("ws://{}/auth", host),
        })
    }
}

fn close_code(payload: &Value) -> u16 {
    payload
        .get("code")
        .and_then(Value::as_u64)
        .and_then(|code| u16::try_from(code).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_options_conversions() {
        let from_retry: ConnectOptions = 3.into();
        assert_eq!(from_retry.retry, 3);
        assert!(from_retry.password.is_none());

        let from_password: ConnectOptions = "secret".into();
        assert_eq!(from_password.retry, 0);
        assert_eq!(from_password.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_new_rejects_bad_url() {
        let err = RpcSession::new("not a url", ClientOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgs(_)));
    }

    #[tokio::test]
    async fn test_auth_url_derivation() {
        let session = RpcSession::new("ws://localhost:8887", ClientOptions::default()).unwrap();
        assert_eq!(session.auth_url(None).await, "ws://localhost:8887/auth");
        assert_eq!(
            session.auth_url(Some("a=1&b=2")).await,
            "ws://localhost:8887/auth?a=1&b=2"
        );
        assert_eq!(
            session.digest_uri().await.unwrap(),
            "ws://localhost:8887/auth"
        );
    }

    #[tokio::test]
    async fn test_initial_state_is_closed() {
        let session = RpcSession::new("ws://localhost:8887", ClientOptions::default()).unwrap();
        assert_eq!(session.state(), SessionState::Closed);
    }
}
