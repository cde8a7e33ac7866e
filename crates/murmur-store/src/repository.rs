//! Narrow persistence interface consumed by the engines.
//!
//! Split per document family so tests and alternative backends can implement
//! only what they need; [`Repository`] bundles them for the server.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use murmur_shared::{ChannelId, MessageId, UserId};

use crate::error::Result;
use crate::models::{Channel, ChannelPreview, FileRecord, Message, User, UserChannel};

pub trait UserStore {
    fn upsert_user(&self, user: &User) -> Result<()>;
    /// `Ok(None)` when the identity is unknown to the profile mirror.
    fn get_user(&self, id: &UserId) -> Result<Option<User>>;
}

pub trait ChannelStore {
    fn insert_channel(&self, channel: &Channel) -> Result<()>;
    /// Fails with [`StoreError::NotFound`](crate::StoreError::NotFound).
    fn get_channel(&self, id: &ChannelId) -> Result<Channel>;
    /// Whole-document replace, last writer wins.
    fn replace_channel(&self, channel: &Channel) -> Result<()>;
    /// Case-insensitive substring match on the stored name.
    fn search_channels(&self, keyword: &str) -> Result<Vec<Channel>>;
    /// The live private channel whose only members are `a` and `b`.
    fn find_private_channel(&self, a: &UserId, b: &UserId) -> Result<Option<Channel>>;
}

/// "Channels a user belongs to" index.
pub trait MembershipIndex {
    /// Idempotent: re-adding keeps the existing row.
    fn add_user_channel(&self, user: &UserId, channel: &ChannelId, at: DateTime<Utc>)
        -> Result<()>;
    fn remove_user_channel(&self, user: &UserId, channel: &ChannelId) -> Result<bool>;
    fn channels_for_user(&self, user: &UserId) -> Result<Vec<UserChannel>>;
    fn touch_user_channel(&self, user: &UserId, channel: &ChannelId, at: DateTime<Utc>)
        -> Result<()>;
}

pub trait MessageStore {
    fn insert_message(&self, message: &Message) -> Result<()>;
    fn get_message(&self, id: &MessageId) -> Result<Message>;
    fn replace_message(&self, message: &Message) -> Result<()>;
    /// Up to `limit` messages older than the `before` message, returned
    /// oldest first. Ties on timestamp are ordered by insertion. Messages
    /// hidden by `viewer` are skipped.
    fn messages_for_channel(
        &self,
        channel: &ChannelId,
        viewer: Option<&UserId>,
        before: Option<&MessageId>,
        limit: usize,
    ) -> Result<Vec<Message>>;
    fn latest_visible_message(&self, channel: &ChannelId, viewer: &UserId)
        -> Result<Option<Message>>;
    /// Secondary message -> channel routing for legacy records.
    fn index_message(&self, message: &MessageId, channel: &ChannelId) -> Result<()>;
    fn channel_for_message(&self, message: &MessageId) -> Result<Option<ChannelId>>;
}

pub trait PreviewStore {
    fn upsert_preview(&self, preview: &ChannelPreview) -> Result<()>;
    fn get_preview(&self, channel: &ChannelId) -> Result<Option<ChannelPreview>>;
    fn delete_preview(&self, channel: &ChannelId) -> Result<bool>;
    /// Rewrites the label only while the preview still points at `message`.
    fn rewrite_preview_content(
        &self,
        channel: &ChannelId,
        message: &MessageId,
        content: &str,
    ) -> Result<bool>;
}

pub trait FileStore {
    fn insert_file(&self, file: &FileRecord) -> Result<()>;
    fn get_file(&self, id: &Uuid) -> Result<FileRecord>;
}

/// Everything the server needs from persistence.
pub trait Repository:
    UserStore + ChannelStore + MembershipIndex + MessageStore + PreviewStore + FileStore + Send
{
}

impl<T> Repository for T where
    T: UserStore + ChannelStore + MembershipIndex + MessageStore + PreviewStore + FileStore + Send
{
}
