//! Fluent event-wait builder
//!
//! Declarative waits for future server-push notifications, layered over the
//! bus wait primitive. The builder accumulates an immutable configuration and
//! the terminal [`EventWait::wait`] hands it to the bus:
//!
//! ```rust,no_run
//! # async fn example(subs: &bwrpc_client::Subscriptions) -> bwrpc_core::Result<()> {
//! use std::time::Duration;
//! use serde_json::json;
//!
//! // any occurrence, default timeout
//! subs.event("transport.play").occurs().wait().await?;
//!
//! // value equality with a bounded wait
//! subs.event("transport.play")
//!     .becomes(json!([true]))
//!     .within(Duration::from_secs(2))
//!     .wait()
//!     .await?;
//!
//! // predicate against the second send slot of track two
//! subs.event("mainTrackBank.getItemAt.sendBank.getItemAt.value")
//!     .at_slot([1, 0])
//!     .matches(|p| p[0].as_f64().unwrap_or(0.0) >= 0.5)
//!     .wait()
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Slot Filtering
//!
//! Bank events prefix their params with the slot indexes identifying which
//! item of a paginated bank fired. [`EventWait::at_slot`] compares the leading
//! params against the given indexes and both the matcher and the resolved
//! value see only the sliced remainder, so callers never re-derive the
//! slicing.
//!
//! # Once Mode
//!
//! [`EventWait::next`] makes the first notification evaluated decide the
//! wait: a match resolves, anything else rejects with a mismatch error.
//! Without it the wait keeps listening until a match or its timeout.

use crate::bus::{EventBus, MatcherFn};
use bwrpc_core::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

enum WaitMatcher {
    /// Any notification matches
    Occurs,
    /// Params must be deep-equal to the expected value
    Becomes(Value),
    /// Caller-supplied predicate over the params
    Predicate(MatcherFn),
}

/// Builder for one wait on one event. Consumed by [`EventWait::wait`].
pub struct EventWait {
    bus: EventBus,
    default_timeout: Duration,
    event: String,
    once: bool,
    timeout: Option<Duration>,
    slots: Vec<Value>,
    matcher: WaitMatcher,
}

impl EventWait {
    pub(crate) fn new(bus: EventBus, default_timeout: Duration, event: impl Into<String>) -> Self {
        Self {
            bus,
            default_timeout,
            event: event.into(),
            once: false,
            timeout: None,
            slots: Vec::new(),
            matcher: WaitMatcher::Occurs,
        }
    }

    /// Let the first notification evaluated decide: resolve on match, reject
    /// on mismatch.
    pub fn next(mut self) -> Self {
        self.once = true;
        self
    }

    /// Only consider notifications whose leading params equal `indexes`; the
    /// matcher and the resolved value receive the remaining params.
    pub fn at_slot<I>(mut self, indexes: I) -> Self
    where
        I: IntoIterator<Item = i64>,
    {
        self.slots = indexes.into_iter().map(Value::from).collect();
        self
    }

    /// Match any notification on the event.
    pub fn occurs(mut self) -> Self {
        self.matcher = WaitMatcher::Occurs;
        self
    }

    /// Match when the params are deep-equal to `expected`.
    pub fn becomes(mut self, expected: Value) -> Self {
        self.matcher = WaitMatcher::Becomes(expected);
        self
    }

    /// Match when `predicate` returns true for the params.
    pub fn matches<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.matcher = WaitMatcher::Predicate(Arc::new(predicate));
        self
    }

    /// Bound the wait. `Duration::ZERO` waits indefinitely; without `within`
    /// the configured default applies.
    pub fn within(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Run the wait until exactly one terminal transition: a satisfying
    /// notification resolves, a once-mode mismatch or the timeout rejects.
    pub async fn wait(self) -> Result<Value> {
        let EventWait {
            bus,
            default_timeout,
            event,
            once,
            timeout,
            slots,
            matcher,
        } = self;

        let timeout = match timeout {
            Some(limit) if limit.is_zero() => None,
            Some(limit) => Some(limit),
            None => Some(default_timeout),
        };

        let inner: MatcherFn = match matcher {
            WaitMatcher::Occurs => Arc::new(|_| true),
            WaitMatcher::Becomes(expected) => Arc::new(move |params| *params == expected),
            WaitMatcher::Predicate(predicate) => predicate,
        };
        let matcher: MatcherFn = if slots.is_empty() {
            inner
        } else {
            let prefix = slots.clone();
            Arc::new(move |params| match slice_slots(params, &prefix) {
                Some(rest) => inner(&rest),
                None => false,
            })
        };

        let params = bus.wait(&event, once, timeout, matcher).await?;
        if slots.is_empty() {
            return Ok(params);
        }
        match slice_slots(&params, &slots) {
            Some(rest) => Ok(rest),
            None => Ok(params),
        }
    }
}

/// Strip a matching slot prefix off a by-position params array.
fn slice_slots(params: &Value, prefix: &[Value]) -> Option<Value> {
    let items = params.as_array()?;
    if items.len() < prefix.len() || &items[..prefix.len()] != prefix {
        return None;
    }
    Some(Value::Array(items[prefix.len()..].to_vec()))
}
