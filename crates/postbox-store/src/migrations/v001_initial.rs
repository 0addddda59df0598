//! v001 -- Initial schema creation.
//!
//! Creates `messages` (per-recipient log), `group_messages` (broadcast log)
//! and `profiles` (memberships and fan-out mark).

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
///
/// Timestamps are RFC-3339 with a fixed six-digit fraction and a `Z`
/// suffix, so lexical order equals chronological order.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Messages (one row per recipient copy)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id               TEXT PRIMARY KEY NOT NULL,  -- UUID v7, or v5 for fan-out copies
    owner            TEXT NOT NULL,              -- recipient partition
    from_user        TEXT NOT NULL,
    to_user          TEXT NOT NULL,
    to_group         TEXT,                       -- set on fan-out copies
    group_message_id TEXT,                       -- source broadcast of a copy
    sent_at          TEXT NOT NULL,
    subject          TEXT NOT NULL,
    content          TEXT NOT NULL,
    is_read          INTEGER NOT NULL DEFAULT 0  -- boolean 0/1
);

CREATE INDEX IF NOT EXISTS idx_messages_owner_sent
    ON messages(owner, sent_at DESC, id DESC);

CREATE INDEX IF NOT EXISTS idx_messages_owner_unread
    ON messages(owner, is_read);

CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_owner_source
    ON messages(owner, group_message_id)
    WHERE group_message_id IS NOT NULL;

-- ----------------------------------------------------------------
-- Group messages (broadcasts, never deleted)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS group_messages (
    seq       INTEGER PRIMARY KEY AUTOINCREMENT,  -- append order
    id        TEXT NOT NULL UNIQUE,               -- UUID v7
    from_user TEXT NOT NULL,
    to_group  TEXT NOT NULL,
    sent_at   TEXT NOT NULL,
    subject   TEXT NOT NULL,
    content   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_group_messages_group_seq
    ON group_messages(to_group, seq);

-- ----------------------------------------------------------------
-- Profiles
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS profiles (
    user       TEXT PRIMARY KEY NOT NULL,
    groups     TEXT NOT NULL DEFAULT '[]',   -- JSON array of group names
    fanout_at  TEXT NOT NULL,                -- send time of the last copied broadcast
    fanout_seq INTEGER NOT NULL,             -- seq of the last copied broadcast
    created_at TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
