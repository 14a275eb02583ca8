//! Local event bus
//!
//! Fan-out point for everything the transport surfaces as an event: lifecycle
//! transitions (`open`, `close`, `error`) and, via the subscription layer,
//! every server-push notification re-emitted under its event name.
//!
//! Two kinds of consumers hang off an event name:
//!
//! - **Listeners**: persistent async callbacks held in an ordered list and
//!   invoked in registration order. An opaque [`ListenerHandle`] deregisters
//!   one listener; dispatch never relies on string-keyed dynamic lookup
//!   beyond the event name itself.
//! - **Waiters**: one-shot suspension points created by [`EventBus::wait`].
//!   A waiter holds a synchronous matcher and settles exactly once:
//!   a matching emission resolves it, a non-matching emission rejects it when
//!   it is in once mode, and its timeout rejects it if the timer fires first.
//!
//! Emission awaits every listener for the event sequentially before waiters
//! are evaluated, so all listeners observe a notification before the next
//! inbound frame is processed.

use bwrpc_core::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};

/// Async listener callback type.
pub type ListenerFn =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Synchronous matcher applied to emitted params.
pub type MatcherFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Handle identifying one registered listener, for [`EventBus::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle(u64);

struct Listener {
    id: u64,
    callback: ListenerFn,
}

struct Waiter {
    id: u64,
    once: bool,
    matcher: MatcherFn,
    tx: oneshot::Sender<Result<Value>>,
}

#[derive(Default)]
struct Inner {
    listeners: HashMap<String, Vec<Listener>>,
    waiters: HashMap<String, Vec<Waiter>>,
    next_id: u64,
}

/// Per-event listener registry plus the generic wait-for-event primitive.
///
/// Cheaply cloneable; clones share state.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Inner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Register an async listener; it runs for every emission of `event`
    /// until removed with [`EventBus::off`].
    pub async fn on<F, Fut>(&self, event: impl Into<String>, callback: F) -> ListenerHandle
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: ListenerFn = Arc::new(move |params| Box::pin(callback(params)));
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .listeners
            .entry(event.into())
            .or_default()
            .push(Listener { id, callback });
        ListenerHandle(id)
    }

    /// Remove one listener. Returns `false` if it was already gone.
    pub async fn off(&self, event: &str, handle: ListenerHandle) -> bool {
        let mut inner = self.inner.lock().await;
        if let Some(list) = inner.listeners.get_mut(event) {
            let before = list.len();
            list.retain(|l| l.id != handle.0);
            return list.len() != before;
        }
        false
    }

    /// Remove every listener registered for `event`.
    pub async fn remove_listeners(&self, event: &str) {
        self.inner.lock().await.listeners.remove(event);
    }

    /// Emit `event` with `params`: run listeners in registration order, then
    /// settle matching waiters.
    pub async fn emit(&self, event: &str, params: Value) {
        let callbacks: Vec<ListenerFn> = {
            let inner = self.inner.lock().await;
            inner
                .listeners
                .get(event)
                .map(|list| list.iter().map(|l| Arc::clone(&l.callback)).collect())
                .unwrap_or_default()
        };
        for callback in callbacks {
            callback(params.clone()).await;
        }

        // settle waiters after listeners so listener side effects are visible
        let mut inner = self.inner.lock().await;
        if let Some(waiters) = inner.waiters.get_mut(event) {
            let mut kept = Vec::with_capacity(waiters.len());
            for waiter in waiters.drain(..) {
                if (waiter.matcher)(&params) {
                    let _ = waiter.tx.send(Ok(params.clone()));
                } else if waiter.once {
                    let _ = waiter.tx.send(Err(Error::EventMismatch {
                        event: event.to_string(),
                        params: params.clone(),
                    }));
                } else {
                    kept.push(waiter);
                }
            }
            *waiters = kept;
        }
    }

    /// Suspend until an emission of `event` satisfies `matcher`.
    ///
    /// - `once = true` settles on the first emission evaluated, rejecting with
    ///   a mismatch error when it does not satisfy the matcher
    /// - `timeout = None` waits forever; otherwise the wait rejects with an
    ///   event-timeout error when the timer fires first
    ///
    /// Exactly one terminal transition happens per wait; the waiter entry and
    /// its timer are cleaned up on every path.
    pub async fn wait(
        &self,
        event: &str,
        once: bool,
        timeout: Option<Duration>,
        matcher: MatcherFn,
    ) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        let waiter_id = {
            let mut inner = self.inner.lock().await;
            inner.next_id += 1;
            let id = inner.next_id;
            inner
                .waiters
                .entry(event.to_string())
                .or_default()
                .push(Waiter {
                    id,
                    once,
                    matcher,
                    tx,
                });
            id
        };

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(settled) => settled,
                Err(_elapsed) => {
                    self.discard_waiter(event, waiter_id).await;
                    return Err(Error::EventTimeout {
                        event: event.to_string(),
                    });
                }
            },
            None => rx.await,
        };

        // a dropped sender means the bus was torn down underneath us
        outcome.unwrap_or(Err(Error::ConnectionClosed))
    }

    async fn discard_waiter(&self, event: &str, id: u64) {
        let mut inner = self.inner.lock().await;
        if let Some(waiters) = inner.waiters.get_mut(event) {
            waiters.retain(|w| w.id != id);
        }
    }

    /// Drop every listener and waiter. Pending waits observe a closed
    /// connection.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.listeners.clear();
        inner.waiters.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Matcher accepting any params.
pub fn match_any() -> MatcherFn {
    Arc::new(|_| true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_listeners_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            bus.on("x", move |_| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().await.push(tag);
                }
            })
            .await;
        }

        bus.emit("x", json!([])).await;
        assert_eq!(*order.lock().await, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_off_removes_single_listener() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits1 = Arc::clone(&hits);
        let handle = bus
            .on("x", move |_| {
                let hits = Arc::clone(&hits1);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        let hits2 = Arc::clone(&hits);
        bus.on("x", move |_| {
            let hits = Arc::clone(&hits2);
            async move {
                hits.fetch_add(10, Ordering::SeqCst);
            }
        })
        .await;

        assert!(bus.off("x", handle).await);
        bus.emit("x", json!(null)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_wait_resolves_on_match() {
        let bus = EventBus::new();
        let waiting = {
            let bus = bus.clone();
            tokio::spawn(async move {
                bus.wait(
                    "x",
                    false,
                    Some(Duration::from_secs(1)),
                    Arc::new(|p: &Value| p[0] == json!(3)),
                )
                .await
            })
        };
        tokio::task::yield_now().await;

        bus.emit("x", json!([1])).await;
        bus.emit("x", json!([2])).await;
        bus.emit("x", json!([3])).await;

        let got = waiting.await.unwrap().unwrap();
        assert_eq!(got, json!([3]));
    }

    #[tokio::test]
    async fn test_once_wait_rejects_on_first_mismatch() {
        let bus = EventBus::new();
        let waiting = {
            let bus = bus.clone();
            tokio::spawn(async move {
                bus.wait(
                    "x",
                    true,
                    Some(Duration::from_secs(1)),
                    Arc::new(|p: &Value| p[0] == json!(2)),
                )
                .await
            })
        };
        tokio::task::yield_now().await;

        bus.emit("x", json!([1])).await;
        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::EventMismatch { .. }));
    }

    #[tokio::test]
    async fn test_wait_times_out_and_deregisters() {
        let bus = EventBus::new();
        let err = bus
            .wait("x", false, Some(Duration::from_millis(20)), match_any())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EventTimeout { .. }));

        // the waiter is gone; a later emission settles nobody
        bus.emit("x", json!([])).await;
    }

    #[tokio::test]
    async fn test_clear_fails_pending_wait() {
        let bus = EventBus::new();
        let waiting = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.wait("x", false, None, match_any()).await })
        };
        tokio::task::yield_now().await;

        bus.clear().await;
        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }
}
