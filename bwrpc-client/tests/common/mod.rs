//! Common test utilities for bwrpc-client integration tests
//!
//! Provides a lightweight mock WebSocket server so client behavior can be
//! exercised without a real RPC host. Beyond answering requests through a
//! handler closure, the server can push unsolicited frames (server-push
//! notifications), close every connection on demand (the reconfigure-restart
//! flow), and run a digest challenge on the `/auth` path.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{
    Request as HsRequest, Response as HsResponse,
};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

type Handler =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = Option<String>> + Send>> + Send + Sync>;

/// Commands broadcast to every live connection.
#[derive(Clone, Debug)]
enum Ctrl {
    /// Send one unsolicited text frame
    Push(String),
    /// Close with code and reason
    Close(u16, String),
}

struct AuthState {
    password: String,
    nonce: String,
    nc: u32,
}

/// Mock WebSocket server for client testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    ctrl_tx: broadcast::Sender<Ctrl>,
    message_rx: mpsc::Receiver<String>,
}

impl MockWsServer {
    /// A server that records inbound messages but never replies.
    pub async fn new() -> Self {
        let handler: Handler = Arc::new(|_| Box::pin(async { None }));
        Self::start(handler, None).await
    }

    /// A server answering each inbound message through `handler`.
    ///
    /// The handler receives the raw text frame and returns an optional reply
    /// frame; return a JSON array to answer a batch.
    pub async fn with_handler<F, Fut>(handler: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<String>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |msg| Box::pin(handler(msg)));
        Self::start(handler, None).await
    }

    /// Like `with_handler`, but the `/auth` path runs a digest challenge
    /// with the given password before any RPC traffic is accepted.
    pub async fn with_auth<F, Fut>(password: &str, handler: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<String>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |msg| Box::pin(handler(msg)));
        let auth = AuthState {
            password: password.to_string(),
            nonce: "mocknonce0123456789ab".to_string(),
            nc: 0,
        };
        Self::start(handler, Some(auth)).await
    }

    async fn start(handler: Handler, auth: Option<AuthState>) -> Self {
        // surface client traces when RUST_LOG asks for them
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (ctrl_tx, _) = broadcast::channel::<Ctrl>(32);
        let (msg_tx, msg_rx) = mpsc::channel::<String>(100);

        let auth = auth.map(|state| Arc::new(Mutex::new(state)));
        let accept_ctrl = ctrl_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accepted = listener.accept() => {
                        if let Ok((stream, _)) = accepted {
                            let handler = Arc::clone(&handler);
                            let msg_tx = msg_tx.clone();
                            let ctrl_rx = accept_ctrl.subscribe();
                            let auth = auth.clone();
                            tokio::spawn(async move {
                                serve_connection(stream, addr, handler, msg_tx, ctrl_rx, auth)
                                    .await;
                            });
                        }
                    }
                }
            }
        });

        // let the accept loop come up before tests connect
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        Self {
            addr,
            shutdown_tx,
            ctrl_tx,
            message_rx: msg_rx,
        }
    }

    /// WebSocket URL for connecting to this server.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Send an unsolicited text frame to every live connection.
    pub fn push(&self, text: String) {
        let _ = self.ctrl_tx.send(Ctrl::Push(text));
    }

    /// Close every live connection with the given code and reason.
    pub fn close_all(&self, code: u16, reason: &str) {
        let _ = self.ctrl_tx.send(Ctrl::Close(code, reason.to_string()));
    }

    /// Next message received by the server, within a 5 second budget.
    pub async fn wait_for_message(&mut self) -> Option<String> {
        tokio::time::timeout(tokio::time::Duration::from_secs(5), self.message_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Shut the server down, closing live connections first.
    pub async fn shutdown(self) {
        let _ = self.ctrl_tx.send(Ctrl::Close(1001, "shutdown".to_string()));
        let _ = self.shutdown_tx.send(()).await;
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    }
}

async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handler: Handler,
    msg_tx: mpsc::Sender<String>,
    mut ctrl_rx: broadcast::Receiver<Ctrl>,
    auth: Option<Arc<Mutex<AuthState>>>,
) {
    // capture the request path during the handshake
    let path: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let path_slot = Arc::clone(&path);
    let callback = move |req: &HsRequest, response: HsResponse| {
        *path_slot.lock().unwrap() = Some(req.uri().to_string());
        Ok(response)
    };
    let mut ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(_) => return,
    };
    let path = path.lock().unwrap().clone().unwrap_or_default();

    if let Some(auth) = auth {
        if path == "/auth" {
            // deliver the challenge as a 4401 close, like the real server
            let challenge = {
                let state = auth.lock().unwrap();
                json!({
                    "realm": "mock-realm",
                    "nonce": state.nonce,
                    "algorithm": "md5",
                    "qop": "auth",
                })
                .to_string()
            };
            close_with(&mut ws, 4401, &challenge).await;
            return;
        }
        if let Some(query) = path.strip_prefix("/auth?") {
            let accepted = {
                let mut state = auth.lock().unwrap();
                validate_auth(&mut state, &addr, query)
            };
            if !accepted {
                close_with(&mut ws, 4401, "").await;
                return;
            }
            // fall through to normal traffic
        }
    }

    let (mut write, mut read) = ws.split();
    loop {
        tokio::select! {
            inbound = read.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let _ = msg_tx.send(text.clone()).await;
                        if let Some(reply) = handler(text).await {
                            let _ = write.send(Message::Text(reply)).await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            ctrl = ctrl_rx.recv() => {
                match ctrl {
                    Ok(Ctrl::Push(text)) => {
                        let _ = write.send(Message::Text(text)).await;
                    }
                    Ok(Ctrl::Close(code, reason)) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        let _ = write.send(Message::Close(Some(frame))).await;
                        break;
                    }
                    Err(_) => break,
                }
            }
        }
    }
}

async fn close_with(ws: &mut WebSocketStream<TcpStream>, code: u16, reason: &str) {
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_string().into(),
    };
    let _ = ws.close(Some(frame)).await;
    // drain until the peer acknowledges
    while let Some(Ok(_)) = ws.next().await {}
}

/// Verify a digest response query the way the real server does: split on
/// `&`/`=`, check the fixed username, replay protection via the nonce count,
/// then compare the recomputed response.
fn validate_auth(state: &mut AuthState, addr: &SocketAddr, query: &str) -> bool {
    let params: HashMap<&str, &str> = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .collect();
    state.nc += 1;
    let expected_nc = format!("{:08x}", state.nc);
    let uri = format!("ws://{}/auth", addr);

    if params.get("username") != Some(&"bitwig") {
        return false;
    }
    if params.get("nonce").copied() != Some(state.nonce.as_str()) {
        return false;
    }
    if params.get("uri").copied() != Some(uri.as_str()) {
        return false;
    }
    if params.get("nc").copied() != Some(expected_nc.as_str()) {
        return false;
    }
    let cnonce = match params.get("cnonce") {
        Some(cnonce) => cnonce,
        None => return false,
    };
    let expected = bwrpc_client::auth::digest_response(
        &state.password,
        "mock-realm",
        &state.nonce,
        "auth",
        &uri,
        &expected_nc,
        cnonce,
    );
    params.get("response").copied() == Some(expected.as_str())
}

/// Parse the id of an inbound request frame, if it carries one.
pub fn request_id(msg: &str) -> Option<i64> {
    serde_json::from_str::<Value>(msg)
        .ok()?
        .get("id")?
        .as_i64()
}

/// Parse the method of an inbound request frame.
pub fn request_method(msg: &str) -> Option<String> {
    serde_json::from_str::<Value>(msg)
        .ok()?
        .get("method")?
        .as_str()
        .map(str::to_string)
}

/// Build a result response echoing the request's id.
pub fn result_frame(id: i64, result: Value) -> String {
    json!({ "jsonrpc": "2.0", "result": result, "id": id }).to_string()
}

/// Build an error response.
pub fn error_frame(id: Value, code: i32, message: &str) -> String {
    json!({
        "jsonrpc": "2.0",
        "error": { "code": code, "message": message },
        "id": id,
    })
    .to_string()
}

/// Build a server-push notification frame.
pub fn notification_frame(event: &str, params: Value) -> String {
    json!({ "notification": event, "params": params }).to_string()
}
