//! Wire models exchanged between the server and its polling clients.
//!
//! Every struct derives `Serialize` and `Deserialize` so the same shape is
//! persisted by the store, returned by the HTTP API, and consumed by the
//! client cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CallId, CallKind, CallStatus, MessageId, UserId};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message. Immutable once created; ordered by
/// `(created_at, id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Call
// ---------------------------------------------------------------------------

/// A call session between two connected users.
///
/// At most one non-terminal call may exist per user, whether they are the
/// caller or the receiver. Once the status is terminal the row never changes
/// again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Call {
    pub id: CallId,
    pub caller_id: UserId,
    pub receiver_id: UserId,
    pub kind: CallKind,
    pub status: CallStatus,
    /// SDP offer, written once by the caller.
    pub offer: Option<String>,
    /// SDP answer, written once by the receiver.
    pub answer: Option<String>,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Connected time in whole seconds, set only on `Connected -> Ended`.
    pub duration_seconds: Option<i64>,
}

impl Call {
    /// Whether `user` is one of the two participants.
    pub fn involves(&self, user: UserId) -> bool {
        self.caller_id == user || self.receiver_id == user
    }

    /// The participant opposite `user`, if `user` is a participant at all.
    pub fn peer_of(&self, user: UserId) -> Option<UserId> {
        if user == self.caller_id {
            Some(self.receiver_id)
        } else if user == self.receiver_id {
            Some(self.caller_id)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// ICE candidate
// ---------------------------------------------------------------------------

/// One entry of the per-call append-only candidate log.
///
/// `sequence_no` is assigned by the relay at write time and is strictly
/// increasing within a call, which gives both peers a stable resumable
/// cursor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceCandidateRecord {
    pub call_id: CallId,
    pub from_user_id: UserId,
    pub sequence_no: i64,
    pub payload: String,
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Read-time presence view of a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceSnapshot {
    pub user_id: UserId,
    pub online: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn call_between(caller: UserId, receiver: UserId) -> Call {
        Call {
            id: CallId::new(),
            caller_id: caller,
            receiver_id: receiver,
            kind: CallKind::Audio,
            status: CallStatus::Ringing,
            offer: None,
            answer: None,
            started_at: Utc::now(),
            answered_at: None,
            ended_at: None,
            duration_seconds: None,
        }
    }

    #[test]
    fn peer_of_resolves_both_sides() {
        let a = UserId::new();
        let b = UserId::new();
        let other = UserId::new();
        let call = call_between(a, b);

        assert_eq!(call.peer_of(a), Some(b));
        assert_eq!(call.peer_of(b), Some(a));
        assert_eq!(call.peer_of(other), None);
        assert!(call.involves(a) && call.involves(b));
        assert!(!call.involves(other));
    }
}
