//! Client-side conversation state: the confirmed log plus the pending
//! outbox.
//!
//! The cache never talks to the network itself; callers feed it poll
//! results and send outcomes, and read back the merged display view. That
//! keeps every state change synchronous and deterministic.

use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use lifeline_shared::{constants::RECONCILE_TOLERANCE, CoreError, Message, UserId};

use crate::reconcile::{reconcile, unmatched_pending, DisplayMessage, PendingMessage};

pub struct ConversationCache {
    user: UserId,
    peer: UserId,
    tolerance: Duration,
    /// Server-authoritative messages, ordered by `(created_at, id)`,
    /// deduplicated by id.
    confirmed: Vec<Message>,
    /// Sends awaiting confirmation, in send order.
    pending: Vec<PendingMessage>,
}

impl ConversationCache {
    pub fn new(user: UserId, peer: UserId) -> Self {
        Self::with_tolerance(user, peer, RECONCILE_TOLERANCE)
    }

    pub fn with_tolerance(user: UserId, peer: UserId, tolerance: Duration) -> Self {
        Self {
            user,
            peer,
            tolerance,
            confirmed: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn peer(&self) -> UserId {
        self.peer
    }

    /// Record an optimistic send and return its correlation id.
    pub fn note_sent(&mut self, body: impl Into<String>) -> Uuid {
        let entry = PendingMessage::new(self.user, self.peer, body);
        let local_id = entry.local_id;
        self.pending.push(entry);
        local_id
    }

    /// The send RPC returned the authoritative copy: replace the pending
    /// entry right away instead of waiting for the next poll.
    pub fn confirm_sent(&mut self, local_id: Uuid, message: Message) {
        self.pending.retain(|p| p.local_id != local_id);
        self.absorb(message);
    }

    /// The send definitively failed (e.g. the connection was revoked
    /// mid-conversation): drop the pending copy so the failure is visible
    /// to the sender instead of a forever-pending ghost.
    pub fn mark_failed(&mut self, local_id: Uuid, error: &CoreError) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.local_id != local_id);
        let removed = self.pending.len() != before;
        if removed {
            tracing::warn!(code = error.code(), "optimistic send failed, dropping pending copy");
        }
        removed
    }

    /// Fold a poll result into the cache. The batch may overlap the cursor;
    /// duplicates are dropped by id. Pending entries confirmed by the new
    /// records leave the outbox.
    pub fn apply_poll(&mut self, batch: Vec<Message>) {
        for message in batch {
            self.absorb(message);
        }
        let survivors: Vec<PendingMessage> =
            unmatched_pending(&self.confirmed, &self.pending, self.tolerance)
                .into_iter()
                .cloned()
                .collect();
        self.pending = survivors;
    }

    /// Timestamp cursor for the next poll: the newest confirmed record.
    /// Inclusive on the server side, so boundary records may be redelivered
    /// and are deduplicated here.
    pub fn since_cursor(&self) -> Option<DateTime<Utc>> {
        self.confirmed.last().map(|m| m.created_at)
    }

    /// The merged display view: confirmed log, then unconfirmed sends.
    pub fn display(&self) -> Vec<DisplayMessage> {
        reconcile(&self.confirmed, &self.pending, self.tolerance)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn absorb(&mut self, message: Message) {
        if self.confirmed.iter().any(|m| m.id == message.id) {
            return;
        }
        self.confirmed.push(message);
        self.confirmed
            .sort_by(|x, y| (x.created_at, x.id.0).cmp(&(y.created_at, y.id.0)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use lifeline_shared::MessageId;

    fn server_message(sender: UserId, receiver: UserId, body: &str) -> Message {
        Message {
            id: MessageId::new(),
            sender_id: sender,
            receiver_id: receiver,
            body: body.into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn optimistic_send_confirmed_by_poll() {
        let a = UserId::new();
        let b = UserId::new();
        let mut cache = ConversationCache::new(a, b);

        cache.note_sent("hello");
        assert_eq!(cache.display().len(), 1);
        assert_eq!(cache.pending_count(), 1);

        // The next poll returns the authoritative copy.
        cache.apply_poll(vec![server_message(a, b, "hello")]);
        let display = cache.display();
        assert_eq!(display.len(), 1);
        assert!(matches!(display[0], DisplayMessage::Confirmed(_)));
        assert_eq!(cache.pending_count(), 0);
    }

    #[test]
    fn confirm_sent_replaces_without_waiting_for_poll() {
        let a = UserId::new();
        let b = UserId::new();
        let mut cache = ConversationCache::new(a, b);

        let local_id = cache.note_sent("hello");
        let authoritative = server_message(a, b, "hello");
        cache.confirm_sent(local_id, authoritative.clone());

        assert_eq!(
            cache.display(),
            vec![DisplayMessage::Confirmed(authoritative.clone())]
        );

        // The same record coming back from a poll is not duplicated.
        cache.apply_poll(vec![authoritative]);
        assert_eq!(cache.display().len(), 1);
    }

    #[test]
    fn definite_failure_drops_the_pending_copy() {
        let a = UserId::new();
        let b = UserId::new();
        let mut cache = ConversationCache::new(a, b);

        let local_id = cache.note_sent("hello");
        assert!(cache.mark_failed(local_id, &CoreError::Unauthorized));
        assert!(cache.display().is_empty());
        assert!(!cache.mark_failed(local_id, &CoreError::Unauthorized));
    }

    #[test]
    fn timeout_keeps_the_send_pending_across_polls() {
        let a = UserId::new();
        let b = UserId::new();
        let mut cache = ConversationCache::new(a, b);

        cache.note_sent("did this land?");

        // Polls that do not contain the copy leave it pending.
        cache.apply_poll(vec![server_message(b, a, "unrelated")]);
        assert_eq!(cache.pending_count(), 1);
        assert_eq!(cache.display().len(), 2);

        // It did land after all; the late copy confirms it.
        cache.apply_poll(vec![server_message(a, b, "did this land?")]);
        assert_eq!(cache.pending_count(), 0);
        assert_eq!(cache.display().len(), 2);
    }

    #[test]
    fn cursor_tracks_newest_confirmed() {
        let a = UserId::new();
        let b = UserId::new();
        let mut cache = ConversationCache::new(a, b);
        assert!(cache.since_cursor().is_none());

        let old = Message {
            created_at: Utc::now() - ChronoDuration::seconds(60),
            ..server_message(b, a, "old")
        };
        let new = server_message(b, a, "new");
        let newest = new.created_at;

        cache.apply_poll(vec![new, old]);
        assert_eq!(cache.since_cursor(), Some(newest));
    }
}
