//! v001 -- Initial schema creation.
//!
//! Creates the five core tables: `users`, `connections`, `messages`,
//! `calls`, and `ice_candidates`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (presence heartbeat only; accounts live elsewhere)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    last_seen_at TEXT                         -- ISO-8601 / RFC-3339, nullable
);

-- ----------------------------------------------------------------
-- Connections (friend edges, written by the friend-request service)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS connections (
    user_a     TEXT NOT NULL,                 -- lower UUID of the pair
    user_b     TEXT NOT NULL,                 -- higher UUID of the pair
    state      TEXT NOT NULL,                 -- 'pending' | 'accepted'
    created_at TEXT NOT NULL,

    PRIMARY KEY (user_a, user_b),
    CHECK (user_a < user_b)
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    sender_id   TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    body        TEXT NOT NULL,
    created_at  TEXT NOT NULL                 -- ISO-8601, fixed width
);

CREATE INDEX IF NOT EXISTS idx_messages_pair_ts
    ON messages(sender_id, receiver_id, created_at);

-- ----------------------------------------------------------------
-- Calls
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS calls (
    id               TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    caller_id        TEXT NOT NULL,
    receiver_id      TEXT NOT NULL,
    kind             TEXT NOT NULL,              -- 'audio' | 'video'
    status           TEXT NOT NULL,              -- call state machine
    offer            TEXT,                       -- write-once, caller only
    answer           TEXT,                       -- write-once, receiver only
    started_at       TEXT NOT NULL,
    answered_at      TEXT,
    ended_at         TEXT,
    duration_seconds INTEGER
);

CREATE INDEX IF NOT EXISTS idx_calls_active
    ON calls(status, caller_id, receiver_id);

-- ----------------------------------------------------------------
-- ICE candidates (append-only log per call)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS ice_candidates (
    call_id      TEXT NOT NULL,
    sequence_no  INTEGER NOT NULL,            -- strictly increasing per call
    from_user_id TEXT NOT NULL,
    payload      TEXT NOT NULL,

    PRIMARY KEY (call_id, sequence_no),
    FOREIGN KEY (call_id) REFERENCES calls(id) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
