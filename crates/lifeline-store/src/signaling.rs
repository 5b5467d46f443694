//! The signaling relay: write-once offer/answer and the per-call ICE
//! candidate log.
//!
//! Offer and answer live directly on the call row, single-writer-per-field:
//! only the caller writes `offer`, only the receiver writes `answer`, and a
//! second write is rejected rather than overwritten so a stale retry cannot
//! clobber a payload the peer already consumed. Candidates are an
//! append-only sequence with relay-assigned, strictly increasing
//! `sequence_no` per call, giving both peers a stable resumable cursor.

use lifeline_shared::{CallId, IceCandidateRecord, UserId};
use rusqlite::{params, TransactionBehavior};

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    /// Store the caller's SDP offer. Write-once.
    pub fn set_offer(&self, id: CallId, by: UserId, payload: &str) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE calls SET offer = ?1
             WHERE id = ?2 AND caller_id = ?3 AND offer IS NULL
               AND status IN ('ringing', 'connected')",
            params![payload, id.to_string(), by.to_string()],
        )?;
        if affected == 1 {
            return Ok(());
        }
        Err(self.diagnose_sdp_write(id, by, SdpField::Offer))
    }

    /// Store the receiver's SDP answer. Write-once.
    pub fn set_answer(&self, id: CallId, by: UserId, payload: &str) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE calls SET answer = ?1
             WHERE id = ?2 AND receiver_id = ?3 AND answer IS NULL
               AND status IN ('ringing', 'connected')",
            params![payload, id.to_string(), by.to_string()],
        )?;
        if affected == 1 {
            return Ok(());
        }
        Err(self.diagnose_sdp_write(id, by, SdpField::Answer))
    }

    /// Append an ICE candidate and return its relay-assigned sequence
    /// number.
    pub fn append_candidate(&mut self, id: CallId, from: UserId, payload: &str) -> Result<i64> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let guard: Option<(String, String, String)> = tx
            .query_row(
                "SELECT caller_id, receiver_id, status FROM calls WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(StoreError::Sqlite(other)),
            })?;

        let Some((caller, receiver, status)) = guard else {
            return Err(StoreError::NotFound);
        };
        let from_str = from.to_string();
        if from_str != caller && from_str != receiver {
            return Err(StoreError::NotFound);
        }
        if status != "ringing" && status != "connected" {
            return Err(StoreError::InvalidTransition(format!(
                "candidate on {status}"
            )));
        }

        let sequence_no: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence_no), 0) + 1 FROM ice_candidates WHERE call_id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO ice_candidates (call_id, sequence_no, from_user_id, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![id.to_string(), sequence_no, from_str, payload],
        )?;
        tx.commit()?;

        Ok(sequence_no)
    }

    /// All candidates with `sequence_no > cursor` produced by the peer
    /// (never the reader's own), ascending. Redelivery past a stale cursor
    /// is harmless; the sequence makes it avoidable.
    pub fn candidates_since(
        &self,
        id: CallId,
        for_user: UserId,
        cursor: i64,
    ) -> Result<Vec<IceCandidateRecord>> {
        let call = self.get_call(id)?;
        if !call.involves(for_user) {
            return Err(StoreError::NotFound);
        }

        let mut stmt = self.conn().prepare(
            "SELECT call_id, from_user_id, sequence_no, payload
             FROM ice_candidates
             WHERE call_id = ?1 AND sequence_no > ?2 AND from_user_id != ?3
             ORDER BY sequence_no ASC",
        )?;
        let rows = stmt.query_map(
            params![id.to_string(), cursor, for_user.to_string()],
            row_to_candidate,
        )?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Discard the candidate log of a terminal call. Refused while the call
    /// is live, since a live connection attempt may still need every
    /// candidate.
    pub fn purge_candidates(&self, id: CallId) -> Result<usize> {
        let call = self.get_call(id)?;
        if !call.status.is_terminal() {
            return Err(StoreError::InvalidTransition(format!(
                "purge on {}",
                call.status
            )));
        }
        let purged = self.conn().execute(
            "DELETE FROM ice_candidates WHERE call_id = ?1",
            params![id.to_string()],
        )?;
        if purged > 0 {
            tracing::debug!(call = %id, count = purged, "purged candidate log");
        }
        Ok(purged)
    }

    fn diagnose_sdp_write(&self, id: CallId, by: UserId, field: SdpField) -> StoreError {
        let call = match self.get_call(id) {
            Ok(call) => call,
            Err(e) => return e,
        };
        if !call.involves(by) {
            return StoreError::NotFound;
        }
        let (owner, existing, name) = match field {
            SdpField::Offer => (call.caller_id, &call.offer, "offer"),
            SdpField::Answer => (call.receiver_id, &call.answer, "answer"),
        };
        if by != owner {
            return StoreError::InvalidTransition(format!("{name} is not writable by this user"));
        }
        if existing.is_some() {
            return StoreError::InvalidTransition(format!("{name} already set"));
        }
        StoreError::InvalidTransition(format!("{name} on {}", call.status))
    }
}

enum SdpField {
    Offer,
    Answer,
}

fn row_to_candidate(row: &rusqlite::Row<'_>) -> rusqlite::Result<IceCandidateRecord> {
    fn bad(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    }

    let call_str: String = row.get(0)?;
    let from_str: String = row.get(1)?;
    let sequence_no: i64 = row.get(2)?;
    let payload: String = row.get(3)?;

    Ok(IceCandidateRecord {
        call_id: CallId::parse(&call_str).map_err(|e| bad(0, e))?,
        from_user_id: UserId::parse(&from_str).map_err(|e| bad(1, e))?,
        sequence_no,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifeline_shared::CallKind;
    use std::time::Duration;

    const RING: Duration = Duration::from_secs(60);

    fn ringing_call(db: &mut Database) -> (lifeline_shared::Call, UserId, UserId) {
        let a = UserId::new();
        let b = UserId::new();
        let call = db.initiate_call(a, b, CallKind::Audio, RING).unwrap();
        (call, a, b)
    }

    #[test]
    fn offer_and_answer_are_write_once() {
        let mut db = Database::open_in_memory().unwrap();
        let (call, a, b) = ringing_call(&mut db);

        db.set_offer(call.id, a, "sdp-offer-v1").unwrap();
        assert!(matches!(
            db.set_offer(call.id, a, "sdp-offer-v2"),
            Err(StoreError::InvalidTransition(_))
        ));

        db.set_answer(call.id, b, "sdp-answer-v1").unwrap();
        assert!(matches!(
            db.set_answer(call.id, b, "sdp-answer-v2"),
            Err(StoreError::InvalidTransition(_))
        ));

        let call = db.get_call(call.id).unwrap();
        assert_eq!(call.offer.as_deref(), Some("sdp-offer-v1"));
        assert_eq!(call.answer.as_deref(), Some("sdp-answer-v1"));
    }

    #[test]
    fn sdp_fields_are_single_writer() {
        let mut db = Database::open_in_memory().unwrap();
        let (call, a, b) = ringing_call(&mut db);

        assert!(matches!(
            db.set_offer(call.id, b, "sdp"),
            Err(StoreError::InvalidTransition(_))
        ));
        assert!(matches!(
            db.set_answer(call.id, a, "sdp"),
            Err(StoreError::InvalidTransition(_))
        ));
        assert!(matches!(
            db.set_offer(call.id, UserId::new(), "sdp"),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn candidate_cursor_semantics() {
        let mut db = Database::open_in_memory().unwrap();
        let (call, a, b) = ringing_call(&mut db);

        for (i, payload) in ["cand-1", "cand-2", "cand-3"].iter().enumerate() {
            let seq = db.append_candidate(call.id, a, payload).unwrap();
            assert_eq!(seq, i as i64 + 1);
        }

        // B sees all three, ascending, none of its own.
        let seen = db.candidates_since(call.id, b, 0).unwrap();
        assert_eq!(
            seen.iter().map(|c| c.sequence_no).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(seen.iter().all(|c| c.from_user_id == a));

        // Cursor past the end yields nothing.
        assert!(db.candidates_since(call.id, b, 3).unwrap().is_empty());

        // A never receives its own candidates back.
        assert!(db.candidates_since(call.id, a, 0).unwrap().is_empty());
        let seq = db.append_candidate(call.id, b, "cand-from-b").unwrap();
        assert_eq!(seq, 4);
        let mine = db.candidates_since(call.id, a, 0).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].sequence_no, 4);
    }

    #[test]
    fn candidates_rejected_on_terminal_call() {
        let mut db = Database::open_in_memory().unwrap();
        let (call, a, b) = ringing_call(&mut db);

        db.append_candidate(call.id, a, "cand").unwrap();
        db.reject_call(call.id, b, RING).unwrap();

        assert!(matches!(
            db.append_candidate(call.id, a, "late"),
            Err(StoreError::InvalidTransition(_))
        ));
    }

    #[test]
    fn purge_only_after_terminal() {
        let mut db = Database::open_in_memory().unwrap();
        let (call, a, b) = ringing_call(&mut db);

        db.append_candidate(call.id, a, "cand-1").unwrap();
        db.append_candidate(call.id, b, "cand-2").unwrap();

        assert!(matches!(
            db.purge_candidates(call.id),
            Err(StoreError::InvalidTransition(_))
        ));

        db.end_call(call.id, a, RING).unwrap();
        assert_eq!(db.purge_candidates(call.id).unwrap(), 2);
        assert_eq!(db.purge_candidates(call.id).unwrap(), 0);
    }

    #[test]
    fn ring_timeout_drops_candidate_log() {
        use crate::database::fmt_ts;
        use chrono::Utc;

        let mut db = Database::open_in_memory().unwrap();
        let (call, a, b) = ringing_call(&mut db);

        db.append_candidate(call.id, a, "cand-1").unwrap();
        db.append_candidate(call.id, b, "cand-2").unwrap();

        // Backdate the ring past the timeout; the next read expires it.
        let old = Utc::now() - chrono::Duration::seconds(120);
        db.conn()
            .execute(
                "UPDATE calls SET started_at = ?1 WHERE id = ?2",
                params![fmt_ts(old), call.id.to_string()],
            )
            .unwrap();

        assert!(db.active_call(a, RING).unwrap().is_none());
        assert!(db.candidates_since(call.id, a, 0).unwrap().is_empty());
        assert!(db.candidates_since(call.id, b, 0).unwrap().is_empty());
    }

    #[test]
    fn outsiders_cannot_read_candidates() {
        let mut db = Database::open_in_memory().unwrap();
        let (call, a, _b) = ringing_call(&mut db);

        db.append_candidate(call.id, a, "cand").unwrap();
        assert!(matches!(
            db.candidates_since(call.id, UserId::new(), 0),
            Err(StoreError::NotFound)
        ));
    }
}
