//! The per-pair message log.
//!
//! Messages are append-only and immutable; the ordering key is
//! `(created_at, id)` so repeated polling with a timestamp cursor is
//! naturally resumable. Authorization is the caller's duty: handlers consult
//! [`Database::can_interact`] before appending.

use chrono::{DateTime, Utc};
use lifeline_shared::{Message, MessageId, UserId};
use rusqlite::params;

use crate::database::{fmt_ts, parse_ts, Database};
use crate::error::Result;

impl Database {
    /// Append a message and return the authoritative copy.
    pub fn append_message(
        &self,
        sender: UserId,
        receiver: UserId,
        body: &str,
    ) -> Result<Message> {
        let message = Message {
            id: MessageId::new(),
            sender_id: sender,
            receiver_id: receiver,
            body: body.to_string(),
            created_at: Utc::now(),
        };

        self.conn().execute(
            "INSERT INTO messages (id, sender_id, receiver_id, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id.to_string(),
                message.sender_id.to_string(),
                message.receiver_id.to_string(),
                message.body,
                fmt_ts(message.created_at),
            ],
        )?;

        Ok(message)
    }

    /// All messages between the pair, ordered by `(created_at, id)`.
    ///
    /// `since` is an inclusive lower bound; records straddling the cursor
    /// may be redelivered, which the client cache deduplicates by id.
    pub fn messages_between(
        &self,
        user: UserId,
        peer: UserId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        let floor = since.map(fmt_ts).unwrap_or_default();
        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, receiver_id, body, created_at
             FROM messages
             WHERE ((sender_id = ?1 AND receiver_id = ?2)
                 OR (sender_id = ?2 AND receiver_id = ?1))
               AND created_at >= ?3
             ORDER BY created_at ASC, id ASC",
        )?;

        let rows = stmt.query_map(
            params![user.to_string(), peer.to_string(), floor],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let receiver_str: String = row.get(2)?;
    let body: String = row.get(3)?;
    let ts_str: String = row.get(4)?;

    let id = MessageId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let sender_id = UserId::parse(&sender_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let receiver_id = UserId::parse(&receiver_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let created_at = parse_ts(&ts_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Message {
        id,
        sender_id,
        receiver_id,
        body,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_fetch_in_order() {
        let db = Database::open_in_memory().unwrap();
        let a = UserId::new();
        let b = UserId::new();

        let first = db.append_message(a, b, "hello").unwrap();
        let second = db.append_message(b, a, "hi yourself").unwrap();
        let third = db.append_message(a, b, "how are you").unwrap();

        let seen = db.messages_between(a, b, None).unwrap();
        assert_eq!(
            seen.iter().map(|m| m.id).collect::<Vec<_>>(),
            vec![first.id, second.id, third.id]
        );

        // Both participants see the identical log.
        assert_eq!(db.messages_between(b, a, None).unwrap(), seen);
    }

    #[test]
    fn third_parties_see_nothing() {
        let db = Database::open_in_memory().unwrap();
        let a = UserId::new();
        let b = UserId::new();
        let c = UserId::new();

        db.append_message(a, b, "private").unwrap();
        assert!(db.messages_between(a, c, None).unwrap().is_empty());
        assert!(db.messages_between(c, b, None).unwrap().is_empty());
    }

    #[test]
    fn since_cursor_is_inclusive() {
        let db = Database::open_in_memory().unwrap();
        let a = UserId::new();
        let b = UserId::new();

        db.append_message(a, b, "old").unwrap();
        let marker = db.append_message(a, b, "marker").unwrap();
        db.append_message(a, b, "new").unwrap();

        let tail = db
            .messages_between(a, b, Some(marker.created_at))
            .unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].id, marker.id);
        assert_eq!(tail[1].body, "new");
    }
}
