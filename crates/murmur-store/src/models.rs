//! Domain documents persisted by the store.
//!
//! Channels and messages are stored whole as JSON documents; every struct
//! derives `Serialize` and `Deserialize` so it can be handed to the HTTP
//! layer as-is.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use murmur_shared::constants::RECALLED_LABEL;
use murmur_shared::protocol::Attachment;
use murmur_shared::{ChannelId, ChannelKind, MessageId, MessageStatus, MessageType, Role, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// Profile attributes owned by the identity service; mirrored here so the
/// core can enrich payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    /// Avatar path or absolute URL.
    pub avatar: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMember {
    pub member_id: UserId,
    pub role: Role,
}

/// Typed replacement for the channel's extra attributes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSettings {
    /// `None` for private channels and after dissolution.
    pub leader_id: Option<UserId>,
    pub approval_required: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dissolved_at: Option<DateTime<Utc>>,
}

/// A conversation scope: a 2-party private chat or a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: ChannelId,
    /// Empty for private channels (resolved per viewer at read time).
    pub name: String,
    pub kind: ChannelKind,
    /// Ordered member list; IDs are unique.
    pub members: Vec<ChannelMember>,
    #[serde(default)]
    pub blocked: Vec<UserId>,
    pub settings: ChannelSettings,
    #[serde(default)]
    pub avatar: String,
}

impl Channel {
    /// Role of `user` in this channel.
    ///
    /// Identities absent from the member list get `Member`, the least
    /// privileged role, so non-members fail every privileged check.
    pub fn role_of(&self, user: &UserId) -> Role {
        self.members
            .iter()
            .find(|m| &m.member_id == user)
            .map(|m| m.role)
            .unwrap_or(Role::Member)
    }

    pub fn is_member(&self, user: &UserId) -> bool {
        self.members.iter().any(|m| &m.member_id == user)
    }

    pub fn is_blocked(&self, user: &UserId) -> bool {
        self.blocked.contains(user)
    }

    pub fn member_ids(&self) -> Vec<UserId> {
        self.members.iter().map(|m| m.member_id).collect()
    }

    pub fn leader(&self) -> Option<UserId> {
        self.settings.leader_id
    }

    pub fn is_dissolved(&self) -> bool {
        self.settings.dissolved_at.is_some()
    }

    /// The other participant of a private channel.
    pub fn counterpart(&self, viewer: &UserId) -> Option<UserId> {
        self.members
            .iter()
            .map(|m| m.member_id)
            .find(|id| id != viewer)
    }

    /// Remove `user` from the member list; returns whether it was present.
    pub fn remove_member(&mut self, user: &UserId) -> bool {
        let before = self.members.len();
        self.members.retain(|m| &m.member_id != user);
        self.members.len() != before
    }

    pub fn set_role(&mut self, user: &UserId, role: Role) -> bool {
        match self.members.iter_mut().find(|m| &m.member_id == user) {
            Some(member) => {
                member.role = role;
                true
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message. Never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    /// Legacy records may lack this; see the secondary message index.
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    pub sender_id: UserId,
    #[serde(default)]
    pub content: String,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    #[serde(default)]
    pub recalled: bool,
    /// Viewers who deleted this message for themselves.
    #[serde(default)]
    pub hidden_by: BTreeSet<UserId>,
    /// File storage reference for binary-bearing and sticker messages.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub file_id: Option<Uuid>,
    #[serde(default)]
    pub reply_to: Option<MessageId>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    pub recall_deadline: DateTime<Utc>,
    /// emoji -> reactors. An emoji key never maps to an empty set.
    #[serde(default)]
    pub reactions: BTreeMap<String, BTreeSet<UserId>>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn is_hidden_for(&self, viewer: &UserId) -> bool {
        self.hidden_by.contains(viewer)
    }

    /// Content as shown to readers: recalled messages show only the marker.
    pub fn visible_content(&self) -> &str {
        if self.recalled {
            RECALLED_LABEL
        } else {
            &self.content
        }
    }
}

// ---------------------------------------------------------------------------
// Preview / membership index
// ---------------------------------------------------------------------------

/// Denormalized summary of a channel's latest message, for list views.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelPreview {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub content: String,
    pub message_type: MessageType,
    pub sender_id: UserId,
    pub last_active: DateTime<Utc>,
}

/// One row of the "channels a user belongs to" index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserChannel {
    pub user_id: UserId,
    pub channel_id: ChannelId,
    pub last_active: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// File record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Video,
    Audio,
    Document,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "Image",
            Self::Video => "Video",
            Self::Audio => "Audio",
            Self::Document => "Document",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Image" => Some(Self::Image),
            "Video" => Some(Self::Video),
            "Audio" => Some(Self::Audio),
            "Document" => Some(Self::Document),
            _ => None,
        }
    }
}

/// Metadata for a binary payload held by file storage. Only the URL is
/// ours; the bytes live elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: Uuid,
    pub file_name: String,
    pub kind: FileKind,
    pub size: i64,
    pub url: String,
    pub uploaded_at: DateTime<Utc>,
}
