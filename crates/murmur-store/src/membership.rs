//! The `user_channels` index: which channels a user belongs to.

use chrono::{DateTime, Utc};
use rusqlite::params;

use murmur_shared::{ChannelId, UserId};

use crate::database::{fmt_ts, parse_ts, parse_uuid, Database};
use crate::error::Result;
use crate::models::UserChannel;
use crate::repository::MembershipIndex;

impl MembershipIndex for Database {
    fn add_user_channel(
        &self,
        user: &UserId,
        channel: &ChannelId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO user_channels (user_id, channel_id, last_active)
             VALUES (?1, ?2, ?3)",
            params![user.to_string(), channel.to_string(), fmt_ts(&at)],
        )?;
        Ok(())
    }

    fn remove_user_channel(&self, user: &UserId, channel: &ChannelId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM user_channels WHERE user_id = ?1 AND channel_id = ?2",
            params![user.to_string(), channel.to_string()],
        )?;
        Ok(affected > 0)
    }

    fn channels_for_user(&self, user: &UserId) -> Result<Vec<UserChannel>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, channel_id, last_active
             FROM user_channels
             WHERE user_id = ?1
             ORDER BY last_active DESC",
        )?;
        let rows = stmt.query_map(params![user.to_string()], |row| {
            let user: String = row.get(0)?;
            let channel: String = row.get(1)?;
            let last_active: String = row.get(2)?;
            Ok(UserChannel {
                user_id: UserId(parse_uuid(0, &user)?),
                channel_id: ChannelId(parse_uuid(1, &channel)?),
                last_active: parse_ts(2, &last_active)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn touch_user_channel(
        &self,
        user: &UserId,
        channel: &ChannelId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE user_channels SET last_active = ?3
             WHERE user_id = ?1 AND channel_id = ?2",
            params![user.to_string(), channel.to_string(), fmt_ts(&at)],
        )?;
        Ok(())
    }
}
