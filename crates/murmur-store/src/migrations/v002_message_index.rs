use rusqlite::Connection;

// Routes message IDs to channels for records that predate `messages.channel_id`.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS history_messages (
    message_id TEXT PRIMARY KEY NOT NULL,
    channel_id TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_history_messages_channel ON history_messages(channel_id);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
