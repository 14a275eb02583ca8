//! Batch request building and result shaping
//!
//! A batch is built by a caller-supplied closure that receives a
//! [`BatchScope`] and records calls and notifications on it. The transport
//! then sends the collected requests as one JSON array; every recorded call
//! still gets its own pending-call entry and independent timeout.
//!
//! # Result Policy
//!
//! The resolved value depends on how many *calls* (not notifications) the
//! scope recorded:
//!
//! - zero calls: `None` - an all-notification batch has nothing to return
//! - exactly one: the bare result of that call
//! - more than one: an array of results in call order, regardless of the
//!   order responses arrive in

use bwrpc_core::{Error, Result};
use serde_json::Value;

/// One recorded batch entry.
#[derive(Debug, Clone)]
pub(crate) enum BatchItem {
    /// Expects a response; gets an id and a pending-call entry at send time
    Call {
        method: String,
        params: Option<Value>,
    },
    /// Fire-and-forget
    Notify {
        method: String,
        params: Option<Value>,
    },
}

/// Collects the requests of one batch.
///
/// Obtained through `Transport::batch`; the closure records entries and the
/// transport sends them all in one frame afterwards.
///
/// ```rust,no_run
/// # async fn example(transport: &bwrpc_client::Transport) -> bwrpc_core::Result<()> {
/// use serde_json::json;
///
/// let result = transport
///     .batch(|scope| {
///         scope.call("rpc.echo", json!(["yahoo"]))?;
///         scope.notify("test.nop", None)?;
///         scope.call("rpc.echo", json!(["hello"]))?;
///         Ok(())
///     })
///     .await?;
/// assert_eq!(result, Some(json!(["yahoo", "hello"])));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct BatchScope {
    strict: bool,
    items: Vec<BatchItem>,
}

impl BatchScope {
    pub(crate) fn new(strict: bool) -> Self {
        Self {
            strict,
            items: Vec::new(),
        }
    }

    /// Record a call; its result participates in the batch result.
    pub fn call(&mut self, method: impl Into<String>, params: impl Into<Option<Value>>) -> Result<()> {
        let method = method.into();
        let params = params.into();
        if self.strict {
            check_args(&method, &params)?;
        }
        self.items.push(BatchItem::Call { method, params });
        Ok(())
    }

    /// Record a notification; no id, no result.
    pub fn notify(
        &mut self,
        method: impl Into<String>,
        params: impl Into<Option<Value>>,
    ) -> Result<()> {
        let method = method.into();
        let params = params.into();
        if self.strict {
            check_args(&method, &params)?;
        }
        self.items.push(BatchItem::Notify { method, params });
        Ok(())
    }

    /// Number of recorded entries of either kind.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn into_items(self) -> Vec<BatchItem> {
        self.items
    }
}

/// Strict validation of outgoing method/params shapes.
///
/// The method must be a non-empty string and params, when present, must be a
/// by-position array or by-name object; an explicit JSON `null` is rejected
/// rather than silently sent.
pub(crate) fn check_args(method: &str, params: &Option<Value>) -> Result<()> {
    if method.is_empty() {
        return Err(Error::InvalidArgs(
            "method should be a non-empty string".to_string(),
        ));
    }
    match params {
        None => Ok(()),
        Some(Value::Array(_)) | Some(Value::Object(_)) => Ok(()),
        Some(Value::Null) => Err(Error::InvalidArgs(
            "null params are not allowed".to_string(),
        )),
        Some(_) => Err(Error::InvalidArgs(
            "params should be an array or object".to_string(),
        )),
    }
}

/// Apply the batch result policy to the collected call results.
pub(crate) fn shape_results(mut results: Vec<Value>) -> Option<Value> {
    match results.len() {
        0 => None,
        1 => Some(results.remove(0)),
        _ => Some(Value::Array(results)),
    }
}
