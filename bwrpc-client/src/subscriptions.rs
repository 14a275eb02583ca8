//! Server-push subscription management
//!
//! The server only pushes notifications for events it has been told about via
//! the reserved `rpc.on` method; `rpc.off` is the symmetric teardown. This
//! layer owns the set of subscribed event names, fans every inbound
//! `{notification, params}` message out as a local bus event named by the
//! notification, and exposes the fluent event-wait builder.
//!
//! Subscriptions do not survive a socket recreation: a teardown hook injected
//! into the transport clears the set on every disconnect, so callers observe
//! an honest `is_subscribed` after a reconnect.

use crate::transport::{NotificationHook, TeardownHook, Transport};
use crate::wait::EventWait;
use bwrpc_core::{Error, EventFailure, Result};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Reserved method for subscribing to server-push events.
const SUBSCRIBE_METHOD: &str = "rpc.on";
/// Reserved method for unsubscribing.
const UNSUBSCRIBE_METHOD: &str = "rpc.off";
/// Extra response budget per event name; subscribe lists can run into the
/// thousands and the server registers them one by one.
const PER_EVENT_TIMEOUT: Duration = Duration::from_millis(5);

/// Subscription layer over a [`Transport`].
///
/// Cheaply cloneable; clones share the transport and the subscribed set.
#[derive(Clone)]
pub struct Subscriptions {
    transport: Transport,
    events: Arc<Mutex<HashSet<String>>>,
}

impl Subscriptions {
    /// Wrap a transport, claiming its notification hook and registering the
    /// teardown hook that clears the subscribed set on disconnect.
    pub fn new(transport: Transport) -> Self {
        let events = Arc::new(Mutex::new(HashSet::new()));

        // re-emit server pushes as local events named by the notification
        let bus = transport.bus().clone();
        let notification_hook: NotificationHook = Arc::new(move |push| {
            let bus = bus.clone();
            Box::pin(async move {
                let params = push.params.unwrap_or(Value::Null);
                bus.emit(&push.notification, params).await;
            })
        });
        transport.set_notification_hook(notification_hook);

        let teardown_events = Arc::clone(&events);
        let teardown_hook: TeardownHook = Arc::new(move || {
            let events = Arc::clone(&teardown_events);
            Box::pin(async move {
                events.lock().await.clear();
            })
        });
        transport.set_teardown_hook(teardown_hook);

        Self { transport, events }
    }

    /// The wrapped transport.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Tell the server to start pushing the named events.
    ///
    /// The reply maps each event name to `"ok"` or an error string; only the
    /// `"ok"` names are recorded as subscribed. With raise-on-partial enabled
    /// (the default) any failing entry rejects the whole call with an
    /// aggregate error - the successes stay recorded regardless.
    pub async fn subscribe<I, S>(&self, events: I) -> Result<HashMap<String, String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = events.into_iter().map(Into::into).collect();
        self.process_events(names, true).await
    }

    /// Tell the server to stop pushing the named events.
    ///
    /// The names are dropped from the subscribed set, and local listeners for
    /// them are removed unless configured otherwise.
    pub async fn unsubscribe<I, S>(&self, events: I) -> Result<HashMap<String, String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = events.into_iter().map(Into::into).collect();
        self.process_events(names, false).await
    }

    /// Whether `event` is currently recorded as server-subscribed. Pure set
    /// membership, no I/O.
    pub async fn is_subscribed(&self, event: &str) -> bool {
        self.events.lock().await.contains(event)
    }

    /// Names currently recorded as subscribed.
    pub async fn subscribed_events(&self) -> Vec<String> {
        self.events.lock().await.iter().cloned().collect()
    }

    /// Start a fluent wait for a server-push event.
    pub fn event(&self, name: impl Into<String>) -> EventWait {
        EventWait::new(
            self.transport.bus().clone(),
            self.transport.options().event_timeout,
            name,
        )
    }

    async fn process_events(
        &self,
        names: Vec<String>,
        on: bool,
    ) -> Result<HashMap<String, String>> {
        let method = if on { SUBSCRIBE_METHOD } else { UNSUBSCRIBE_METHOD };
        if names.is_empty() {
            return Err(Error::InvalidArgs(
                "empty event list is not allowed".to_string(),
            ));
        }

        let timeout = self.transport.options().response_timeout
            + PER_EVENT_TIMEOUT * names.len() as u32;
        let params = Value::Array(names.iter().cloned().map(Value::String).collect());
        let reply = self.transport.call_timeout(method, params, timeout).await?;

        let statuses: HashMap<String, String> = match serde_json::from_value(reply.clone()) {
            Ok(map) => map,
            Err(_) => return Err(Error::InvalidMessage(reply)),
        };

        {
            let mut set = self.events.lock().await;
            if on {
                for (name, status) in &statuses {
                    if status == "ok" {
                        set.insert(name.clone());
                    }
                }
            } else {
                for name in &names {
                    set.remove(name);
                }
            }
        }
        if !on && self.transport.options().remove_listeners_on_unsubscribe {
            for name in &names {
                self.transport.bus().remove_listeners(name).await;
            }
        }
        tracing::debug!(
            method,
            requested = names.len(),
            "subscription round trip finished"
        );

        if self.transport.options().raise_on_partial_subscribe {
            let failures: Vec<EventFailure> = names
                .iter()
                .filter(|name| statuses.get(*name).map(String::as_str) != Some("ok"))
                .map(|name| EventFailure {
                    event: name.clone(),
                    reason: statuses
                        .get(name)
                        .cloned()
                        .unwrap_or_else(|| "missing from reply".to_string()),
                })
                .collect();
            if !failures.is_empty() {
                return Err(Error::Subscription {
                    action: if on { "subscribe" } else { "unsubscribe" },
                    failures,
                });
            }
        }

        Ok(statuses)
    }
}
