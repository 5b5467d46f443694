//! Client configuration.

use std::time::Duration;

use lifeline_shared::constants::{
    DEFAULT_CALL_POLL, DEFAULT_MESSAGE_POLL, DEFAULT_PRESENCE_POLL, RECONCILE_TOLERANCE,
};

/// Tunable client settings. The poll cadences trade server load against
/// perceived latency; correctness never depends on them.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the realtime server, e.g. `http://localhost:8080`.
    pub base_url: String,

    /// Cadence of the message poll for the open conversation.
    pub message_poll: Duration,

    /// Cadence of the active-call poll.
    pub call_poll: Duration,

    /// Cadence of the peer-presence poll.
    pub presence_poll: Duration,

    /// Window within which a server message confirms a pending local one.
    pub reconcile_tolerance: Duration,

    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            message_poll: DEFAULT_MESSAGE_POLL,
            call_poll: DEFAULT_CALL_POLL,
            presence_poll: DEFAULT_PRESENCE_POLL,
            reconcile_tolerance: RECONCILE_TOLERANCE,
            request_timeout: Duration::from_secs(10),
        }
    }
}
