//! Tunable defaults shared by the server and client.
//!
//! The poll cadences trade server load against perceived latency; they are
//! defaults, not correctness requirements, and every consumer accepts an
//! override.

use std::time::Duration;

/// A user is online iff their last heartbeat is at most this old.
pub const ONLINE_WINDOW: Duration = Duration::from_secs(60);

/// How long a call may stay in `Ringing` before it expires to `Missed`.
pub const DEFAULT_RING_TIMEOUT: Duration = Duration::from_secs(60);

/// Client cadence for polling new messages in the open conversation.
pub const DEFAULT_MESSAGE_POLL: Duration = Duration::from_secs(3);

/// Client cadence for polling the active call (incoming ring, remote
/// accept/reject/end, new signaling payloads).
pub const DEFAULT_CALL_POLL: Duration = Duration::from_secs(2);

/// Client cadence for refreshing peer presence.
pub const DEFAULT_PRESENCE_POLL: Duration = Duration::from_secs(15);

/// A pending (optimistic) message is confirmed by a server message with the
/// same sender, receiver and body created within this window of the local
/// send time.
pub const RECONCILE_TOLERANCE: Duration = Duration::from_secs(5);
