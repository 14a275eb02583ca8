//! Client configuration
//!
//! One plain options struct shared by all three layers. Defaults mirror the
//! protocol's conventions: five-second connect/response budgets, a
//! three-second default for event waits, strict validation on both the
//! outgoing and inbound side.

use std::time::Duration;

/// Policy for server error responses whose wire id is `null`.
///
/// A `null` id means the server could not tell which request failed (e.g. it
/// could not parse the frame), so the client cannot correlate the error
/// either. This enum makes the choice explicit instead of baking one in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullIdPolicy {
    /// Fail the oldest pending call - it is the most likely culprit
    RejectFirst,
    /// Fail every pending call
    RejectAll,
    /// Ignore the error (it is still surfaced on the `error` event)
    DontCare,
}

/// Configuration for the client stack.
///
/// ```rust
/// use bwrpc_client::ClientOptions;
/// use std::time::Duration;
///
/// let options = ClientOptions {
///     response_timeout: Duration::from_secs(10),
///     password: Some("bitwig".to_string()),
///     ..ClientOptions::default()
/// };
/// assert!(options.strict_messages);
/// ```
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Budget for a single socket-open attempt
    pub connect_timeout: Duration,
    /// Default budget for a call to produce a response
    pub response_timeout: Duration,
    /// Default budget for event waits that do not specify one
    pub event_timeout: Duration,
    /// Validate outgoing method/params shapes before sending
    pub strict_args: bool,
    /// Apply full shape validation to inbound messages
    /// (`false` keys classification off discriminant presence only)
    pub strict_messages: bool,
    /// What to do with error responses carrying a `null` id
    pub null_id_policy: NullIdPolicy,
    /// Reject subscribe/unsubscribe when any event entry is not "ok"
    pub raise_on_partial_subscribe: bool,
    /// Drop local listeners for an event when unsubscribing from it
    pub remove_listeners_on_unsubscribe: bool,
    /// Password for the digest handshake; `None` connects unauthenticated
    pub password: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(5),
            event_timeout: Duration::from_secs(3),
            strict_args: true,
            strict_messages: true,
            null_id_policy: NullIdPolicy::RejectFirst,
            raise_on_partial_subscribe: true,
            remove_listeners_on_unsubscribe: true,
            password: None,
        }
    }
}
