//! Optimistic message reconciliation.
//!
//! A just-sent message is displayed immediately as a pending copy, before
//! the server round-trip completes. Once a poll returns the authoritative
//! log, the pending copy must be replaced by its server twin without
//! producing a duplicate or a flicker, and a pending copy whose send never
//! landed must survive to the next poll.
//!
//! The merge is a pure function over plain slices so the whole behavior is
//! unit-testable without a network.

use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use lifeline_shared::{Message, UserId};

/// A locally-sent message awaiting server confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    /// Client-local correlation id; never seen by the server.
    pub local_id: Uuid,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: String,
    /// Local clock at send time.
    pub sent_at: DateTime<Utc>,
}

impl PendingMessage {
    pub fn new(sender_id: UserId, receiver_id: UserId, body: impl Into<String>) -> Self {
        Self {
            local_id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            body: body.into(),
            sent_at: Utc::now(),
        }
    }
}

/// One record of the merged, display-ready view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayMessage {
    /// Server-authoritative copy.
    Confirmed(Message),
    /// Still awaiting confirmation.
    Pending(PendingMessage),
}

/// Whether `server` is the authoritative twin of `pending`.
///
/// Same sender, receiver and body, created within `tolerance` of the local
/// send time. Local and server clocks may disagree in either direction, so
/// the window is symmetric.
pub fn confirms(server: &Message, pending: &PendingMessage, tolerance: Duration) -> bool {
    if server.sender_id != pending.sender_id
        || server.receiver_id != pending.receiver_id
        || server.body != pending.body
    {
        return false;
    }
    let skew = server
        .created_at
        .signed_duration_since(pending.sent_at)
        .abs();
    skew.to_std().map(|skew| skew <= tolerance).unwrap_or(false)
}

/// Merge the authoritative server log with the local pending outbox.
///
/// Each server message confirms at most one pending entry and vice versa
/// (claim-once), so two identical-bodied sends in quick succession need two
/// server records to both disappear from the outbox. Confirmed entries
/// appear exactly once, in server order; unmatched pending entries follow in
/// send order.
pub fn reconcile(
    server: &[Message],
    pending: &[PendingMessage],
    tolerance: Duration,
) -> Vec<DisplayMessage> {
    let unmatched = unmatched_pending(server, pending, tolerance);

    let mut display: Vec<DisplayMessage> = server
        .iter()
        .cloned()
        .map(DisplayMessage::Confirmed)
        .collect();
    display.extend(unmatched.into_iter().cloned().map(DisplayMessage::Pending));
    display
}

/// The pending entries not confirmed by any server record, claim-once.
pub fn unmatched_pending<'p>(
    server: &[Message],
    pending: &'p [PendingMessage],
    tolerance: Duration,
) -> Vec<&'p PendingMessage> {
    let mut claimed = vec![false; server.len()];
    let mut unmatched = Vec::new();

    for entry in pending {
        let twin = server.iter().enumerate().find(|(idx, msg)| {
            !claimed[*idx] && confirms(msg, entry, tolerance)
        });
        match twin {
            Some((idx, _)) => claimed[idx] = true,
            None => unmatched.push(entry),
        }
    }
    unmatched
}
