//! Presence heartbeats.
//!
//! `touch_presence` is a single upsert with no derived counters, cheap
//! enough to run on the hot path of every authenticated request. Online
//! state is computed at read time from the stored timestamp; there is no
//! background sweep to go stale.

use chrono::{DateTime, Utc};
use lifeline_shared::{presence, PresenceSnapshot, UserId};
use rusqlite::params;

use crate::database::{fmt_ts, parse_ts, Database};
use crate::error::{Result, StoreError};

impl Database {
    /// Record "now" as the user's heartbeat. Idempotent.
    pub fn touch_presence(&self, user: UserId) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, last_seen_at) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET last_seen_at = excluded.last_seen_at",
            params![user.to_string(), fmt_ts(Utc::now())],
        )?;
        Ok(())
    }

    /// The user's last heartbeat, or `None` if they never sent one.
    pub fn last_seen(&self, user: UserId) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<Option<String>> = self
            .conn()
            .query_row(
                "SELECT last_seen_at FROM users WHERE id = ?1",
                params![user.to_string()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(StoreError::Sqlite(other)),
            })?;

        match raw.flatten() {
            Some(s) => {
                let ts = parse_ts(&s)
                    .map_err(|e| StoreError::Corrupt(format!("last_seen_at: {e}")))?;
                Ok(Some(ts))
            }
            None => Ok(None),
        }
    }

    /// Read-time presence view of a user.
    pub fn presence(&self, user: UserId) -> Result<PresenceSnapshot> {
        let last_seen_at = self.last_seen(user)?;
        Ok(PresenceSnapshot {
            user_id: user,
            online: presence::is_online(last_seen_at, Utc::now()),
            last_seen_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_then_online() {
        let db = Database::open_in_memory().unwrap();
        let user = UserId::new();

        assert!(db.last_seen(user).unwrap().is_none());
        assert!(!db.presence(user).unwrap().online);

        db.touch_presence(user).unwrap();
        let snapshot = db.presence(user).unwrap();
        assert!(snapshot.online);
        assert!(snapshot.last_seen_at.is_some());
    }

    #[test]
    fn touch_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let user = UserId::new();

        db.touch_presence(user).unwrap();
        db.touch_presence(user).unwrap();
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn stale_heartbeat_is_offline() {
        let db = Database::open_in_memory().unwrap();
        let user = UserId::new();

        let old = Utc::now() - chrono::Duration::seconds(90);
        db.conn()
            .execute(
                "INSERT INTO users (id, last_seen_at) VALUES (?1, ?2)",
                params![user.to_string(), fmt_ts(old)],
            )
            .unwrap();

        let snapshot = db.presence(user).unwrap();
        assert!(!snapshot.online);
        assert!(snapshot.last_seen_at.is_some());
    }
}
