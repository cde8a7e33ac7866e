//! Document CRUD for [`Channel`] records.

use rusqlite::params;

use murmur_shared::{ChannelId, ChannelKind, UserId};

use crate::database::{fmt_ts, not_found, parse_document, Database};
use crate::error::{Result, StoreError};
use crate::models::Channel;
use crate::repository::ChannelStore;

impl ChannelStore for Database {
    fn insert_channel(&self, channel: &Channel) -> Result<()> {
        self.conn().execute(
            "INSERT INTO channels (id, name, kind, document, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                channel.id.to_string(),
                channel.name,
                channel.kind.as_str(),
                serde_json::to_string(channel)?,
                fmt_ts(&channel.settings.created_at),
            ],
        )?;
        Ok(())
    }

    fn get_channel(&self, id: &ChannelId) -> Result<Channel> {
        self.conn()
            .query_row(
                "SELECT document FROM channels WHERE id = ?1",
                params![id.to_string()],
                row_to_channel,
            )
            .map_err(not_found)
    }

    fn replace_channel(&self, channel: &Channel) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE channels SET name = ?2, document = ?3 WHERE id = ?1",
            params![
                channel.id.to_string(),
                channel.name,
                serde_json::to_string(channel)?,
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn search_channels(&self, keyword: &str) -> Result<Vec<Channel>> {
        let pattern = format!("%{}%", escape_like(keyword));
        let mut stmt = self.conn().prepare(
            "SELECT document FROM channels
             WHERE name LIKE ?1 ESCAPE '\\'
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![pattern], row_to_channel)?;

        let mut channels = Vec::new();
        for row in rows {
            channels.push(row?);
        }
        Ok(channels)
    }

    fn find_private_channel(&self, a: &UserId, b: &UserId) -> Result<Option<Channel>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.document FROM channels c
             JOIN user_channels ua ON ua.channel_id = c.id AND ua.user_id = ?1
             JOIN user_channels ub ON ub.channel_id = c.id AND ub.user_id = ?2
             WHERE c.kind = ?3
             ORDER BY c.created_at ASC",
        )?;
        let rows = stmt.query_map(
            params![a.to_string(), b.to_string(), ChannelKind::Private.as_str()],
            row_to_channel,
        )?;

        for row in rows {
            let channel = row?;
            if channel.members.len() == 2 && channel.is_member(a) && channel.is_member(b) {
                return Ok(Some(channel));
            }
        }
        Ok(None)
    }
}

fn row_to_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<Channel> {
    let document: String = row.get(0)?;
    parse_document(0, &document)
}

fn escape_like(keyword: &str) -> String {
    let mut out = String::with_capacity(keyword.len());
    for ch in keyword.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
