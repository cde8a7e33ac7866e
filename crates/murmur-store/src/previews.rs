//! One "last message" preview per channel (`chat_history`).

use rusqlite::{params, OptionalExtension};

use murmur_shared::{ChannelId, MessageId, UserId};

use crate::database::{fmt_ts, parse_ts, parse_uuid, Database};
use crate::error::Result;
use crate::models::ChannelPreview;
use crate::repository::PreviewStore;

impl PreviewStore for Database {
    fn upsert_preview(&self, preview: &ChannelPreview) -> Result<()> {
        self.conn().execute(
            "INSERT INTO chat_history
                (channel_id, message_id, content, message_type, sender_id, last_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(channel_id) DO UPDATE SET
                message_id   = excluded.message_id,
                content      = excluded.content,
                message_type = excluded.message_type,
                sender_id    = excluded.sender_id,
                last_active  = excluded.last_active",
            params![
                preview.channel_id.to_string(),
                preview.message_id.to_string(),
                preview.content,
                preview.message_type.as_str(),
                preview.sender_id.to_string(),
                fmt_ts(&preview.last_active),
            ],
        )?;
        Ok(())
    }

    fn get_preview(&self, channel: &ChannelId) -> Result<Option<ChannelPreview>> {
        let preview = self
            .conn()
            .query_row(
                "SELECT channel_id, message_id, content, message_type, sender_id, last_active
                 FROM chat_history WHERE channel_id = ?1",
                params![channel.to_string()],
                row_to_preview,
            )
            .optional()?;
        Ok(preview)
    }

    fn delete_preview(&self, channel: &ChannelId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM chat_history WHERE channel_id = ?1",
            params![channel.to_string()],
        )?;
        Ok(affected > 0)
    }

    fn rewrite_preview_content(
        &self,
        channel: &ChannelId,
        message: &MessageId,
        content: &str,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE chat_history SET content = ?3
             WHERE channel_id = ?1 AND message_id = ?2",
            params![channel.to_string(), message.to_string(), content],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_preview(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChannelPreview> {
    let channel: String = row.get(0)?;
    let message: String = row.get(1)?;
    let message_type: String = row.get(3)?;
    let sender: String = row.get(4)?;
    let last_active: String = row.get(5)?;

    let message_type = message_type.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(ChannelPreview {
        channel_id: ChannelId(parse_uuid(0, &channel)?),
        message_id: MessageId(parse_uuid(1, &message)?),
        content: row.get(2)?,
        message_type,
        sender_id: UserId(parse_uuid(4, &sender)?),
        last_active: parse_ts(5, &last_active)?,
    })
}
