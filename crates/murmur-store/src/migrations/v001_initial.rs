//! v001 -- Initial schema creation.
//!
//! Channels and messages are stored as JSON documents next to the scalar
//! columns needed for lookups. Also creates the `users`, `user_channels`,
//! `chat_history` (previews) and `files` tables.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (profile mirror)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID
    display_name TEXT NOT NULL,
    avatar       TEXT NOT NULL DEFAULT '',
    created_at   TEXT NOT NULL                -- RFC-3339
);

-- ----------------------------------------------------------------
-- Channels
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS channels (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    name       TEXT NOT NULL,
    kind       TEXT NOT NULL,                 -- Private | Group
    document   TEXT NOT NULL,                 -- JSON Channel
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_channels_name ON channels(name);

-- ----------------------------------------------------------------
-- Membership index: channels a user belongs to
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS user_channels (
    user_id     TEXT NOT NULL,
    channel_id  TEXT NOT NULL,
    last_active TEXT NOT NULL,

    PRIMARY KEY (user_id, channel_id)
);

CREATE INDEX IF NOT EXISTS idx_user_channels_channel ON user_channels(channel_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    channel_id TEXT,                          -- NULL on legacy records
    sender_id  TEXT NOT NULL,
    timestamp  TEXT NOT NULL,                 -- RFC-3339, fixed width
    document   TEXT NOT NULL                  -- JSON Message
);

CREATE INDEX IF NOT EXISTS idx_messages_channel_ts
    ON messages(channel_id, timestamp DESC);

-- ----------------------------------------------------------------
-- Chat history: one preview per channel
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_history (
    channel_id   TEXT PRIMARY KEY NOT NULL,
    message_id   TEXT NOT NULL,
    content      TEXT NOT NULL,
    message_type TEXT NOT NULL,
    sender_id    TEXT NOT NULL,
    last_active  TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Files (references into external file storage)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS files (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    file_name   TEXT NOT NULL,
    kind        TEXT NOT NULL,
    size        INTEGER NOT NULL DEFAULT 0,
    url         TEXT NOT NULL,
    uploaded_at TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
