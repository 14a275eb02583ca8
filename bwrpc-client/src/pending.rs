//! Pending-call registry
//!
//! Tracks every in-flight call from the moment its request is sent until a
//! response, an error, or a timeout settles it - whichever comes first.
//!
//! # Call Lifecycle
//!
//! 1. **Register**: allocate an id and a oneshot channel
//! 2. **Send**: transmit the request over the socket
//! 3. **Wait**: caller awaits the oneshot receiver, racing its timeout
//! 4. **Settle**: a matching response resolves or rejects via the channel,
//!    removing the entry; a timeout discards the entry instead
//!
//! Timeouts are applied by the caller racing the receiver against
//! `tokio::time::timeout`; the registry only guarantees that an entry is
//! settled or discarded exactly once, so a late response for a timed-out id
//! finds nothing to resolve and is dropped harmlessly.
//!
//! # Id Assignment
//!
//! Ids come from a shared counter wrapped at 16 bits and are unique only among
//! outstanding calls: allocation skips over ids that are still in flight, so
//! an id is reused only after the counter wraps and its previous entry is
//! gone.

use bwrpc_core::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

struct Entry {
    /// Insertion order, for oldest-first rejection under `RejectFirst`
    seq: u64,
    tx: oneshot::Sender<Result<Value>>,
}

/// Registry of calls awaiting a response, keyed by request id.
///
/// Cheaply cloneable; all clones share one underlying table.
#[derive(Clone)]
pub(crate) struct PendingCalls {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    entries: HashMap<u16, Entry>,
    counter: u16,
    seq: u64,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                counter: 0,
                seq: 0,
            })),
        }
    }

    /// Allocate the next free id and register an entry for it.
    ///
    /// Returns the id together with the receiver the caller awaits.
    pub fn register(&self) -> (u16, oneshot::Receiver<Result<Value>>) {
        let mut inner = self.inner.lock().expect("pending registry poisoned");
        // skip ids still owned by an outstanding call
        let mut id = inner.counter;
        while inner.entries.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        inner.counter = id.wrapping_add(1);
        inner.seq += 1;
        let seq = inner.seq;

        let (tx, rx) = oneshot::channel();
        inner.entries.insert(id, Entry { seq, tx });
        (id, rx)
    }

    /// Settle the entry for `id` with a successful result.
    ///
    /// Returns `false` when no entry exists (late response after timeout, or
    /// an id this client never issued).
    pub fn resolve(&self, id: u16, value: Value) -> bool {
        let entry = self
            .inner
            .lock()
            .expect("pending registry poisoned")
            .entries
            .remove(&id);
        match entry {
            Some(entry) => {
                let _ = entry.tx.send(Ok(value));
                true
            }
            None => false,
        }
    }

    /// Settle the entry for `id` with an error.
    pub fn reject(&self, id: u16, error: Error) -> bool {
        let entry = self
            .inner
            .lock()
            .expect("pending registry poisoned")
            .entries
            .remove(&id);
        match entry {
            Some(entry) => {
                let _ = entry.tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Settle the oldest outstanding entry with an error.
    pub fn reject_oldest(&self, error: Error) -> bool {
        let entry = {
            let mut inner = self.inner.lock().expect("pending registry poisoned");
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.seq)
                .map(|(id, _)| *id);
            oldest.and_then(|id| inner.entries.remove(&id))
        };
        match entry {
            Some(entry) => {
                let _ = entry.tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Settle every outstanding entry with clones of `error`.
    pub fn reject_all(&self, error: Error) {
        let drained: Vec<Entry> = {
            let mut inner = self.inner.lock().expect("pending registry poisoned");
            inner.entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            let _ = entry.tx.send(Err(error.clone()));
        }
    }

    /// Drop the entry for `id` without settling it.
    ///
    /// Used on timeout, after the caller has already produced its own error.
    pub fn discard(&self, id: u16) {
        self.inner
            .lock()
            .expect("pending registry poisoned")
            .entries
            .remove(&id);
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("pending registry poisoned")
            .entries
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_resolve() {
        let pending = PendingCalls::new();
        let (id, rx) = pending.register();
        assert_eq!(pending.len(), 1);

        assert!(pending.resolve(id, json!(42)));
        assert_eq!(pending.len(), 0);

        let value = rx.await.unwrap().unwrap();
        assert_eq!(value, json!(42));
    }

    #[tokio::test]
    async fn test_ids_are_sequential_and_distinct() {
        let pending = PendingCalls::new();
        let (id0, _rx0) = pending.register();
        let (id1, _rx1) = pending.register();
        let (id2, _rx2) = pending.register();
        assert_eq!(id0, 0);
        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
    }

    #[tokio::test]
    async fn test_resolve_unknown_id_is_noop() {
        let pending = PendingCalls::new();
        assert!(!pending.resolve(99, json!(null)));
    }

    #[tokio::test]
    async fn test_discard_then_late_resolve() {
        let pending = PendingCalls::new();
        let (id, _rx) = pending.register();
        pending.discard(id);
        // late response for a timed-out call finds nothing
        assert!(!pending.resolve(id, json!("late")));
    }

    #[tokio::test]
    async fn test_reject_oldest_order() {
        let pending = PendingCalls::new();
        let (_id0, rx0) = pending.register();
        let (_id1, rx1) = pending.register();

        assert!(pending.reject_oldest(Error::ConnectionClosed));
        assert!(rx0.await.unwrap().is_err());

        // second call is untouched until rejected as well
        assert_eq!(pending.len(), 1);
        assert!(pending.reject_oldest(Error::ConnectionClosed));
        assert!(rx1.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_reject_all_drains() {
        let pending = PendingCalls::new();
        let (_id0, rx0) = pending.register();
        let (_id1, rx1) = pending.register();

        pending.reject_all(Error::ConnectionClosed);
        assert_eq!(pending.len(), 0);
        assert!(rx0.await.unwrap().is_err());
        assert!(rx1.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_counter_skips_outstanding_id() {
        let pending = PendingCalls::new();
        // exhaust one full lap of the counter minus one entry
        let (id_held, _rx_held) = pending.register();
        assert_eq!(id_held, 0);
        // wind the counter to just before wrap
        for _ in 0..u16::MAX {
            let (id, rx) = pending.register();
            drop(rx);
            pending.discard(id);
        }
        // next allocation lands on 0 which is still held, so it must skip
        let (id, _rx) = pending.register();
        assert_ne!(id, id_held);
    }
}
