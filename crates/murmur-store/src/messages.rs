//! Message documents and the secondary message -> channel index.

use rusqlite::{params, OptionalExtension};

use murmur_shared::{ChannelId, MessageId, UserId};

use crate::database::{fmt_ts, not_found, parse_document, parse_uuid, Database};
use crate::error::{Result, StoreError};
use crate::models::Message;
use crate::repository::MessageStore;

impl MessageStore for Database {
    fn insert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, channel_id, sender_id, timestamp, document)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id.to_string(),
                message.channel_id.map(|c| c.to_string()),
                message.sender_id.to_string(),
                fmt_ts(&message.timestamp),
                serde_json::to_string(message)?,
            ],
        )?;
        Ok(())
    }

    fn get_message(&self, id: &MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                "SELECT document FROM messages WHERE id = ?1",
                params![id.to_string()],
                row_to_message,
            )
            .map_err(not_found)
    }

    fn replace_message(&self, message: &Message) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE messages SET channel_id = ?2, document = ?3 WHERE id = ?1",
            params![
                message.id.to_string(),
                message.channel_id.map(|c| c.to_string()),
                serde_json::to_string(message)?,
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn messages_for_channel(
        &self,
        channel: &ChannelId,
        viewer: Option<&UserId>,
        before: Option<&MessageId>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT m.document FROM messages m
             WHERE m.channel_id = ?1
               AND (?2 IS NULL OR (m.timestamp, m.rowid) <
                    (SELECT c.timestamp, c.rowid FROM messages c WHERE c.id = ?2))
               AND (?3 IS NULL OR NOT EXISTS (
                    SELECT 1 FROM json_each(m.document, '$.hiddenBy') h
                    WHERE h.value = ?3))
             ORDER BY m.timestamp DESC, m.rowid DESC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![
                channel.to_string(),
                before.map(|id| id.to_string()),
                viewer.map(|v| v.to_string()),
                limit as i64,
            ],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        messages.reverse();
        Ok(messages)
    }

    fn latest_visible_message(
        &self,
        channel: &ChannelId,
        viewer: &UserId,
    ) -> Result<Option<Message>> {
        Ok(self
            .messages_for_channel(channel, Some(viewer), None, 1)?
            .pop())
    }

    fn index_message(&self, message: &MessageId, channel: &ChannelId) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO history_messages (message_id, channel_id) VALUES (?1, ?2)",
            params![message.to_string(), channel.to_string()],
        )?;
        Ok(())
    }

    fn channel_for_message(&self, message: &MessageId) -> Result<Option<ChannelId>> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT channel_id FROM history_messages WHERE message_id = ?1",
                params![message.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|s| parse_uuid(0, &s).map(ChannelId))
            .transpose()
            .map_err(StoreError::from)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let document: String = row.get(0)?;
    parse_document(0, &document)
}
