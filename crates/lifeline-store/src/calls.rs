//! The call session state machine.
//!
//! `ringing -> connected | rejected | missed | ended`; `connected -> ended`.
//! Every transition is a conditional `UPDATE ... WHERE status = ?`; zero
//! rows affected after a previously-valid read means the other participant
//! won a concurrent race and the caller gets [`StoreError::StaleState`].
//!
//! `missed` is produced only by ring timeout, enforced lazily on every read
//! and transition through the same conditional-update path; an explicit end
//! of a ringing call is always `ended`, whichever participant asks.

use std::time::Duration;

use chrono::Utc;
use lifeline_shared::{Call, CallId, CallKind, CallStatus, UserId};
use rusqlite::{params, Connection, TransactionBehavior};

use crate::database::{fmt_ts, parse_ts, Database};
use crate::error::{Result, StoreError};

impl Database {
    /// Create a call in `ringing`.
    ///
    /// The "neither party has an active call" check and the insert run
    /// inside one IMMEDIATE transaction, so two interleaved initiations
    /// cannot both succeed.
    pub fn initiate_call(
        &mut self,
        caller: UserId,
        receiver: UserId,
        kind: CallKind,
        ring_timeout: Duration,
    ) -> Result<Call> {
        let call = Call {
            id: CallId::new(),
            caller_id: caller,
            receiver_id: receiver,
            kind,
            status: CallStatus::Ringing,
            offer: None,
            answer: None,
            started_at: Utc::now(),
            answered_at: None,
            ended_at: None,
            duration_seconds: None,
        };

        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        expire_overdue(&tx, ring_timeout)?;

        let busy: bool = tx.query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM calls
                 WHERE status IN ('ringing', 'connected')
                   AND (caller_id IN (?1, ?2) OR receiver_id IN (?1, ?2))
             )",
            params![caller.to_string(), receiver.to_string()],
            |row| row.get(0),
        )?;
        if busy {
            return Err(StoreError::AlreadyInCall);
        }

        tx.execute(
            "INSERT INTO calls (id, caller_id, receiver_id, kind, status, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                call.id.to_string(),
                call.caller_id.to_string(),
                call.receiver_id.to_string(),
                call.kind.as_str(),
                call.status.as_str(),
                fmt_ts(call.started_at),
            ],
        )?;
        tx.commit()?;

        tracing::info!(
            call = %call.id,
            caller = %caller.short(),
            receiver = %receiver.short(),
            kind = call.kind.as_str(),
            "call initiated"
        );

        Ok(call)
    }

    /// Fetch a call by id.
    pub fn get_call(&self, id: CallId) -> Result<Call> {
        self.conn()
            .query_row(
                "SELECT id, caller_id, receiver_id, kind, status, offer, answer,
                        started_at, answered_at, ended_at, duration_seconds
                 FROM calls WHERE id = ?1",
                params![id.to_string()],
                row_to_call,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// The single non-terminal call involving `user`, if any.
    ///
    /// This is the polling anchor for both clients: it surfaces an incoming
    /// ring, a remote accept, and a remote end alike. Overdue ringing calls
    /// are expired to `missed` before the lookup.
    pub fn active_call(&self, user: UserId, ring_timeout: Duration) -> Result<Option<Call>> {
        expire_overdue(self.conn(), ring_timeout)?;

        self.conn()
            .query_row(
                "SELECT id, caller_id, receiver_id, kind, status, offer, answer,
                        started_at, answered_at, ended_at, duration_seconds
                 FROM calls
                 WHERE status IN ('ringing', 'connected')
                   AND (caller_id = ?1 OR receiver_id = ?1)
                 ORDER BY started_at DESC
                 LIMIT 1",
                params![user.to_string()],
                row_to_call,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(StoreError::Sqlite(other)),
            })
    }

    /// `ringing -> connected`, receiver only.
    ///
    /// A duplicate accept on an already-connected call returns the current
    /// row instead of erroring, so client retries are harmless.
    pub fn accept_call(&self, id: CallId, by: UserId, ring_timeout: Duration) -> Result<Call> {
        expire_overdue(self.conn(), ring_timeout)?;

        let call = self.get_call(id)?;
        if !call.involves(by) {
            return Err(StoreError::NotFound);
        }
        if by != call.receiver_id {
            return Err(StoreError::InvalidTransition(
                "only the receiver may accept".into(),
            ));
        }

        match call.status {
            CallStatus::Ringing => {
                let affected = self.conn().execute(
                    "UPDATE calls SET status = 'connected', answered_at = ?1
                     WHERE id = ?2 AND status = 'ringing'",
                    params![fmt_ts(Utc::now()), id.to_string()],
                )?;
                if affected == 1 {
                    tracing::info!(call = %id, "call accepted");
                    return self.get_call(id);
                }
                // Lost the race; a concurrent duplicate accept still counts
                // as success.
                let current = self.get_call(id)?;
                if current.status == CallStatus::Connected {
                    Ok(current)
                } else {
                    Err(StoreError::StaleState)
                }
            }
            CallStatus::Connected => Ok(call),
            other => Err(StoreError::InvalidTransition(format!("accept on {other}"))),
        }
    }

    /// `ringing -> rejected`, receiver only.
    pub fn reject_call(&self, id: CallId, by: UserId, ring_timeout: Duration) -> Result<Call> {
        expire_overdue(self.conn(), ring_timeout)?;

        let call = self.get_call(id)?;
        if !call.involves(by) {
            return Err(StoreError::NotFound);
        }
        if by != call.receiver_id {
            return Err(StoreError::InvalidTransition(
                "only the receiver may reject".into(),
            ));
        }
        if call.status != CallStatus::Ringing {
            return Err(StoreError::InvalidTransition(format!(
                "reject on {}",
                call.status
            )));
        }

        let affected = self.conn().execute(
            "UPDATE calls SET status = 'rejected', ended_at = ?1
             WHERE id = ?2 AND status = 'ringing'",
            params![fmt_ts(Utc::now()), id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::StaleState);
        }

        tracing::info!(call = %id, "call rejected");
        self.get_call(id)
    }

    /// `ringing | connected -> ended`, either participant.
    ///
    /// Ending a connected call records `duration_seconds` from `answered_at`
    /// to `ended_at`; ending a ringing call records no duration.
    pub fn end_call(&self, id: CallId, by: UserId, ring_timeout: Duration) -> Result<Call> {
        expire_overdue(self.conn(), ring_timeout)?;

        let call = self.get_call(id)?;
        if !call.involves(by) {
            return Err(StoreError::NotFound);
        }

        let ended_at = Utc::now();
        let affected = match call.status {
            CallStatus::Ringing => self.conn().execute(
                "UPDATE calls SET status = 'ended', ended_at = ?1
                 WHERE id = ?2 AND status = 'ringing'",
                params![fmt_ts(ended_at), id.to_string()],
            )?,
            CallStatus::Connected => {
                // answered_at is immutable while the call stays connected,
                // so the duration computed from the read copy is safe under
                // the status CAS.
                let answered_at = call.answered_at.ok_or_else(|| {
                    StoreError::Corrupt("connected call without answered_at".into())
                })?;
                let duration = ended_at
                    .signed_duration_since(answered_at)
                    .num_seconds()
                    .max(0);
                self.conn().execute(
                    "UPDATE calls SET status = 'ended', ended_at = ?1, duration_seconds = ?2
                     WHERE id = ?3 AND status = 'connected'",
                    params![fmt_ts(ended_at), duration, id.to_string()],
                )?
            }
            other => {
                return Err(StoreError::InvalidTransition(format!("end on {other}")));
            }
        };
        if affected == 0 {
            return Err(StoreError::StaleState);
        }

        tracing::info!(call = %id, "call ended");
        self.get_call(id)
    }
}

/// Expire overdue ringing calls to `missed` through the same conditional
/// update discipline as every other transition. Called on every read and
/// transition so no background sweeper is needed.
fn expire_overdue(conn: &Connection, ring_timeout: Duration) -> Result<usize> {
    let now = Utc::now();
    let cutoff = now
        - chrono::Duration::from_std(ring_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
    let expired = conn.execute(
        "UPDATE calls SET status = 'missed', ended_at = ?1
         WHERE status = 'ringing' AND started_at < ?2",
        params![fmt_ts(now), fmt_ts(cutoff)],
    )?;
    if expired > 0 {
        // No handler observes a missed call's transition, so the candidate
        // log is dropped here rather than in the explicit reject/end paths.
        conn.execute(
            "DELETE FROM ice_candidates
             WHERE call_id IN (SELECT id FROM calls WHERE status = 'missed')",
            [],
        )?;
        tracing::debug!(count = expired, "expired overdue ringing calls to missed");
    }
    Ok(expired)
}

fn row_to_call(row: &rusqlite::Row<'_>) -> rusqlite::Result<Call> {
    fn bad(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    }

    let id_str: String = row.get(0)?;
    let caller_str: String = row.get(1)?;
    let receiver_str: String = row.get(2)?;
    let kind_str: String = row.get(3)?;
    let status_str: String = row.get(4)?;
    let offer: Option<String> = row.get(5)?;
    let answer: Option<String> = row.get(6)?;
    let started_str: String = row.get(7)?;
    let answered_str: Option<String> = row.get(8)?;
    let ended_str: Option<String> = row.get(9)?;
    let duration_seconds: Option<i64> = row.get(10)?;

    let id = CallId::parse(&id_str).map_err(|e| bad(0, e))?;
    let caller_id = UserId::parse(&caller_str).map_err(|e| bad(1, e))?;
    let receiver_id = UserId::parse(&receiver_str).map_err(|e| bad(2, e))?;
    let kind = CallKind::from_str(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown call kind: {kind_str}").into(),
        )
    })?;
    let status = CallStatus::from_str(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown call status: {status_str}").into(),
        )
    })?;
    let started_at = parse_ts(&started_str).map_err(|e| bad(7, e))?;
    let answered_at = answered_str
        .map(|s| parse_ts(&s).map_err(|e| bad(8, e)))
        .transpose()?;
    let ended_at = ended_str
        .map(|s| parse_ts(&s).map_err(|e| bad(9, e)))
        .transpose()?;

    Ok(Call {
        id,
        caller_id,
        receiver_id,
        kind,
        status,
        offer,
        answer,
        started_at,
        answered_at,
        ended_at,
        duration_seconds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RING: Duration = Duration::from_secs(60);

    fn db_with_pair() -> (Database, UserId, UserId) {
        let db = Database::open_in_memory().unwrap();
        (db, UserId::new(), UserId::new())
    }

    #[test]
    fn full_lifecycle_with_duration() {
        let (mut db, a, b) = db_with_pair();

        let call = db.initiate_call(a, b, CallKind::Audio, RING).unwrap();
        assert_eq!(call.status, CallStatus::Ringing);

        let call = db.accept_call(call.id, b, RING).unwrap();
        assert_eq!(call.status, CallStatus::Connected);
        assert!(call.answered_at.is_some());

        // Backdate the answer so the duration is observable.
        let answered = Utc::now() - chrono::Duration::seconds(90);
        db.conn()
            .execute(
                "UPDATE calls SET answered_at = ?1 WHERE id = ?2",
                params![fmt_ts(answered), call.id.to_string()],
            )
            .unwrap();

        let call = db.end_call(call.id, a, RING).unwrap();
        assert_eq!(call.status, CallStatus::Ended);
        assert!(call.ended_at.is_some());
        assert_eq!(call.duration_seconds, Some(90));
    }

    #[test]
    fn one_active_call_per_user() {
        let (mut db, a, b) = db_with_pair();
        let c = UserId::new();

        let call = db.initiate_call(a, b, CallKind::Video, RING).unwrap();

        // Neither participant may enter a second call, from either side.
        assert!(matches!(
            db.initiate_call(a, c, CallKind::Audio, RING),
            Err(StoreError::AlreadyInCall)
        ));
        assert!(matches!(
            db.initiate_call(c, b, CallKind::Audio, RING),
            Err(StoreError::AlreadyInCall)
        ));

        // A terminal call frees both.
        db.reject_call(call.id, b, RING).unwrap();
        db.initiate_call(a, c, CallKind::Audio, RING).unwrap();
    }

    #[test]
    fn only_receiver_accepts_or_rejects() {
        let (mut db, a, b) = db_with_pair();
        let call = db.initiate_call(a, b, CallKind::Audio, RING).unwrap();

        assert!(matches!(
            db.accept_call(call.id, a, RING),
            Err(StoreError::InvalidTransition(_))
        ));
        assert!(matches!(
            db.reject_call(call.id, a, RING),
            Err(StoreError::InvalidTransition(_))
        ));

        // A stranger cannot even observe the call.
        let outsider = UserId::new();
        assert!(matches!(
            db.accept_call(call.id, outsider, RING),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn duplicate_accept_is_idempotent() {
        let (mut db, a, b) = db_with_pair();
        let call = db.initiate_call(a, b, CallKind::Audio, RING).unwrap();

        let first = db.accept_call(call.id, b, RING).unwrap();
        let second = db.accept_call(call.id, b, RING).unwrap();
        assert_eq!(first.status, CallStatus::Connected);
        assert_eq!(second.answered_at, first.answered_at);
    }

    #[test]
    fn transitions_illegal_after_terminal() {
        let (mut db, a, b) = db_with_pair();
        let call = db.initiate_call(a, b, CallKind::Audio, RING).unwrap();
        db.reject_call(call.id, b, RING).unwrap();

        assert!(matches!(
            db.accept_call(call.id, b, RING),
            Err(StoreError::InvalidTransition(_))
        ));
        assert!(matches!(
            db.reject_call(call.id, b, RING),
            Err(StoreError::InvalidTransition(_))
        ));
        assert!(matches!(
            db.end_call(call.id, b, RING),
            Err(StoreError::InvalidTransition(_))
        ));
    }

    #[test]
    fn explicit_end_of_ringing_is_ended_for_both_sides() {
        let (mut db, a, b) = db_with_pair();

        let call = db.initiate_call(a, b, CallKind::Audio, RING).unwrap();
        let call = db.end_call(call.id, a, RING).unwrap();
        assert_eq!(call.status, CallStatus::Ended);
        assert_eq!(call.duration_seconds, None);

        // Same rule when the receiver hangs up the ring.
        let call = db.initiate_call(a, b, CallKind::Audio, RING).unwrap();
        let call = db.end_call(call.id, b, RING).unwrap();
        assert_eq!(call.status, CallStatus::Ended);
    }

    #[test]
    fn overdue_ring_expires_to_missed() {
        let (mut db, a, b) = db_with_pair();
        let call = db.initiate_call(a, b, CallKind::Audio, RING).unwrap();

        // Backdate the ring past the timeout.
        let old = Utc::now() - chrono::Duration::seconds(120);
        db.conn()
            .execute(
                "UPDATE calls SET started_at = ?1 WHERE id = ?2",
                params![fmt_ts(old), call.id.to_string()],
            )
            .unwrap();

        assert!(db.active_call(a, RING).unwrap().is_none());
        let call = db.get_call(call.id).unwrap();
        assert_eq!(call.status, CallStatus::Missed);
        assert!(call.ended_at.is_some());

        // Accepting the expired ring is a stale request.
        assert!(matches!(
            db.accept_call(call.id, b, RING),
            Err(StoreError::InvalidTransition(_))
        ));
    }

    #[test]
    fn active_call_visible_to_both_participants_only() {
        let (mut db, a, b) = db_with_pair();
        let call = db.initiate_call(a, b, CallKind::Video, RING).unwrap();

        assert_eq!(db.active_call(a, RING).unwrap().unwrap().id, call.id);
        assert_eq!(db.active_call(b, RING).unwrap().unwrap().id, call.id);
        assert!(db.active_call(UserId::new(), RING).unwrap().is_none());
    }
}
