//! Realtime wire envelopes.
//!
//! Inbound: a single "send message" shape decoded from websocket text frames.
//! Outbound: [`ServerEvent`], a JSON object tagged by `type`, pushed to the
//! connections affected by a message lifecycle change.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ChannelId, MessageId, MessageStatus, MessageType, UserId};

/// Reference to a binary payload already placed in file storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    pub mime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<i32>,
    /// Audio/video length in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i32>,
}

/// The only frame a client sends over the realtime socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageEnvelope {
    pub channel_id: ChannelId,
    pub sender_id: UserId,
    #[serde(default)]
    pub content: String,
    pub message_type: MessageType,
    #[serde(default)]
    pub reply_to: Option<MessageId>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl SendMessageEnvelope {
    pub fn from_json(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

/// Short quote of the message being replied to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPreview {
    pub id: MessageId,
    pub content: String,
    pub sender_id: UserId,
    pub sender_name: String,
    pub message_type: MessageType,
}

/// A message as rendered to clients, enriched with live sender attributes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub message_type: MessageType,
    pub sender_id: UserId,
    pub sender_name: String,
    pub sender_avatar: String,
    pub status: MessageStatus,
    pub recalled: bool,
    pub edited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyPreview>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<ReactionSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecallNotice {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub by: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReactionSummary {
    pub emoji: String,
    pub user_ids: Vec<UserId>,
    pub count: usize,
}

impl ReactionSummary {
    pub fn from_map(reactions: &BTreeMap<String, BTreeSet<UserId>>) -> Vec<Self> {
        reactions
            .iter()
            .map(|(emoji, users)| Self {
                emoji: emoji.clone(),
                user_ids: users.iter().copied().collect(),
                count: users.len(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReactionNotice {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub reactions: Vec<ReactionSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HiddenNotice {
    /// Absent when the message's channel could not be resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorNotice {
    pub message: String,
}

/// Everything the server pushes to connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    MessageNew(MessagePayload),
    MessageUpdated(MessagePayload),
    MessageRecalled(RecallNotice),
    MessageReaction(ReactionNotice),
    MessageHidden(HiddenNotice),
    Error(ErrorNotice),
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageNew(_) => "message_new",
            Self::MessageUpdated(_) => "message_updated",
            Self::MessageRecalled(_) => "message_recalled",
            Self::MessageReaction(_) => "message_reaction",
            Self::MessageHidden(_) => "message_hidden",
            Self::Error(_) => "error",
        }
    }
}
