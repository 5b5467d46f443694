//! Friend edges and the authorization gate.
//!
//! Edges are stored once per unordered pair, canonicalized as
//! `(min(uuid), max(uuid))`, so symmetry is structural rather than a
//! query-side `OR`. Edge rows are owned by the friend-request service; the
//! realtime core itself only reads them through [`Database::can_interact`],
//! re-evaluated on every operation so a revoked connection takes effect on
//! the very next interaction.

use chrono::Utc;
use lifeline_shared::UserId;
use rusqlite::params;

use crate::database::{fmt_ts, Database};
use crate::error::{Result, StoreError};

/// State of a connection edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Pending,
    Accepted,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
        }
    }
}

/// Canonical storage order for an unordered pair.
fn canonical_pair(a: UserId, b: UserId) -> (UserId, UserId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Database {
    /// True iff an accepted connection exists between the two users.
    ///
    /// Symmetric by construction; a user is never "connected" to themself.
    pub fn can_interact(&self, a: UserId, b: UserId) -> Result<bool> {
        if a == b {
            return Ok(false);
        }
        let (lo, hi) = canonical_pair(a, b);
        let exists: bool = self.conn().query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM connections
                 WHERE user_a = ?1 AND user_b = ?2 AND state = 'accepted'
             )",
            params![lo.to_string(), hi.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Create or update an edge. Interface for the friend-request service
    /// (and for tests); the realtime core never calls this itself.
    ///
    /// Self-pairs are rejected before they can trip the schema's
    /// `user_a < user_b` check.
    pub fn upsert_connection(&self, a: UserId, b: UserId, state: ConnectionState) -> Result<()> {
        if a == b {
            return Err(StoreError::SelfPair);
        }
        let (lo, hi) = canonical_pair(a, b);
        self.conn().execute(
            "INSERT INTO connections (user_a, user_b, state, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_a, user_b) DO UPDATE SET state = excluded.state",
            params![
                lo.to_string(),
                hi.to_string(),
                state.as_str(),
                fmt_ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Remove an edge (friend removal). Idempotent.
    pub fn remove_connection(&self, a: UserId, b: UserId) -> Result<bool> {
        let (lo, hi) = canonical_pair(a, b);
        let affected = self.conn().execute(
            "DELETE FROM connections WHERE user_a = ?1 AND user_b = ?2",
            params![lo.to_string(), hi.to_string()],
        )?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_is_symmetric() {
        let db = Database::open_in_memory().unwrap();
        let a = UserId::new();
        let b = UserId::new();

        assert!(!db.can_interact(a, b).unwrap());
        db.upsert_connection(a, b, ConnectionState::Accepted).unwrap();
        assert!(db.can_interact(a, b).unwrap());
        assert!(db.can_interact(b, a).unwrap());
    }

    #[test]
    fn pending_edge_does_not_authorize() {
        let db = Database::open_in_memory().unwrap();
        let a = UserId::new();
        let b = UserId::new();

        db.upsert_connection(b, a, ConnectionState::Pending).unwrap();
        assert!(!db.can_interact(a, b).unwrap());

        db.upsert_connection(a, b, ConnectionState::Accepted).unwrap();
        assert!(db.can_interact(b, a).unwrap());
    }

    #[test]
    fn removal_takes_effect_immediately() {
        let db = Database::open_in_memory().unwrap();
        let a = UserId::new();
        let b = UserId::new();

        db.upsert_connection(a, b, ConnectionState::Accepted).unwrap();
        assert!(db.remove_connection(b, a).unwrap());
        assert!(!db.can_interact(a, b).unwrap());
        assert!(!db.remove_connection(a, b).unwrap());
    }

    #[test]
    fn self_pair_is_never_connected() {
        let db = Database::open_in_memory().unwrap();
        let a = UserId::new();
        assert!(!db.can_interact(a, a).unwrap());
    }

    #[test]
    fn self_pair_edge_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let a = UserId::new();

        assert!(matches!(
            db.upsert_connection(a, a, ConnectionState::Accepted),
            Err(StoreError::SelfPair)
        ));
        assert!(!db.can_interact(a, a).unwrap());
    }
}
