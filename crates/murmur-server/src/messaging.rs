//! Message lifecycle engine: send, edit, recall, hide, react, status.
//!
//! The message document is the primary write; the channel preview, the
//! secondary message index and the sender's `lastActive` are secondary writes
//! whose failures are logged and never undo the message.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use murmur_shared::constants::{
    ATTACHMENT_LABEL, FILE_LABEL, RECALLED_LABEL, STICKER_LABEL, VOICE_LABEL,
};
use murmur_shared::protocol::{
    Attachment, MessagePayload, ReactionSummary, ReplyPreview, SendMessageEnvelope,
};
use murmur_shared::{ChannelId, ChatError, Conflict, MessageId, MessageStatus, MessageType, UserId};
use murmur_store::{ChannelPreview, FileKind, FileRecord, Message, Repository, StoreError};

use crate::membership::{missing, Result};
use crate::profiles::ProfileDirectory;
use crate::SharedRepo;

/// A mutated message plus the channel its side effects were routed to.
/// `channel_id` is `None` when neither the document nor the secondary index
/// names one.
#[derive(Debug, Clone)]
pub struct MessageChange {
    pub message: Message,
    pub channel_id: Option<ChannelId>,
}

#[derive(Clone)]
pub struct MessageService {
    repo: SharedRepo,
    profiles: Arc<dyn ProfileDirectory>,
    recall_window: Duration,
    edit_window: Duration,
}

impl MessageService {
    pub fn new(
        repo: SharedRepo,
        profiles: Arc<dyn ProfileDirectory>,
        recall_window: Duration,
        edit_window: Duration,
    ) -> Self {
        Self {
            repo,
            profiles,
            recall_window,
            edit_window,
        }
    }

    // ------------------------------------------------------------------
    // Send
    // ------------------------------------------------------------------

    pub async fn send_message(&self, req: SendMessageEnvelope) -> Result<Message> {
        let SendMessageEnvelope {
            channel_id,
            sender_id,
            content,
            message_type,
            reply_to,
            attachments,
        } = req;

        if message_type == MessageType::Text && content.trim().is_empty() && attachments.is_empty()
        {
            return Err(ChatError::validation("message content is empty"));
        }

        let repo = self.repo.lock().await;
        let channel = repo.get_channel(&channel_id).map_err(missing("channel"))?;
        if !channel.is_member(&sender_id) {
            return Err(ChatError::forbidden("sender is not a member of this channel"));
        }

        if let Some(parent) = reply_to {
            match repo.get_message(&parent) {
                Ok(parent) => {
                    if parent.channel_id.is_some_and(|c| c != channel_id) {
                        return Err(ChatError::validation(
                            "reply target belongs to another channel",
                        ));
                    }
                }
                Err(StoreError::NotFound) => {
                    debug!(channel = %channel_id, parent = %parent, "Reply target missing");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let now = Utc::now();
        let mut message = Message {
            id: MessageId::new(),
            channel_id: Some(channel_id),
            sender_id,
            content: String::new(),
            message_type,
            timestamp: now,
            status: MessageStatus::Sending,
            recalled: false,
            hidden_by: BTreeSet::new(),
            url: String::new(),
            file_id: None,
            reply_to,
            edited: false,
            edited_at: None,
            recall_deadline: now + self.recall_window,
            reactions: BTreeMap::new(),
            attachments,
        };

        match message_type {
            MessageType::File | MessageType::Voice => {
                let attachment = message.attachments.first().ok_or_else(|| {
                    ChatError::validation("file and voice messages need an attachment")
                })?;
                let file = file_record(message_type, attachment, now);
                repo.insert_file(&file)?;
                message.url = file.url;
                message.file_id = Some(file.id);
            }
            MessageType::Sticker => {
                let url = message
                    .attachments
                    .first()
                    .map(|a| a.url.clone())
                    .unwrap_or(content);
                if url.trim().is_empty() {
                    return Err(ChatError::validation("sticker messages need a url"));
                }
                message.url = url;
            }
            _ => message.content = content,
        }

        repo.insert_message(&message)?;

        if let Err(e) = repo.index_message(&message.id, &channel_id) {
            warn!(message = %message.id, error = %e, "Secondary message index write failed");
        }
        let preview = ChannelPreview {
            channel_id,
            message_id: message.id,
            content: preview_label(&message),
            message_type,
            sender_id,
            last_active: now,
        };
        if let Err(e) = repo.upsert_preview(&preview) {
            warn!(channel = %channel_id, error = %e, "Preview update failed, left stale");
        }
        if let Err(e) = repo.touch_user_channel(&sender_id, &channel_id, now) {
            warn!(channel = %channel_id, user = %sender_id, error = %e, "lastActive update failed");
        }

        debug!(
            channel = %channel_id,
            message = %message.id,
            kind = message_type.as_str(),
            "Message stored"
        );
        Ok(message)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub async fn edit_message(
        &self,
        id: &MessageId,
        editor: &UserId,
        new_content: &str,
    ) -> Result<MessageChange> {
        let new_content = new_content.trim();
        if new_content.is_empty() {
            return Err(ChatError::validation("message content is empty"));
        }

        let repo = self.repo.lock().await;
        let mut message = repo.get_message(id).map_err(missing("message"))?;
        if &message.sender_id != editor {
            return Err(ChatError::forbidden("only the sender may edit a message"));
        }
        if message.recalled {
            return Err(Conflict::MessageRecalled.into());
        }
        if message.message_type.is_binary() || message.message_type == MessageType::Sticker {
            return Err(ChatError::validation("only text messages can be edited"));
        }
        let now = Utc::now();
        if now - message.timestamp > self.edit_window {
            return Err(Conflict::EditWindowExpired.into());
        }

        message.content = new_content.to_string();
        message.edited = true;
        message.edited_at = Some(now);
        repo.replace_message(&message)?;

        let channel_id = resolve_channel(&*repo, &message);
        if let Some(channel) = channel_id {
            rewrite_preview(&*repo, &channel, &message.id, &preview_label(&message));
        }

        info!(message = %id, editor = %editor, "Message edited");
        Ok(MessageChange {
            message,
            channel_id,
        })
    }

    pub async fn recall_message(&self, id: &MessageId, requester: &UserId) -> Result<MessageChange> {
        self.recall_message_within(id, requester, self.recall_window)
            .await
    }

    /// Recall if `requester` sent the message no more than `window` ago. The
    /// content is kept; readers only ever see the recalled marker.
    pub async fn recall_message_within(
        &self,
        id: &MessageId,
        requester: &UserId,
        window: Duration,
    ) -> Result<MessageChange> {
        let repo = self.repo.lock().await;
        let mut message = repo.get_message(id).map_err(missing("message"))?;
        if &message.sender_id != requester {
            return Err(ChatError::forbidden("only the sender may recall a message"));
        }
        if message.recalled {
            return Err(Conflict::MessageRecalled.into());
        }
        if Utc::now() - message.timestamp > window {
            return Err(Conflict::RecallWindowExpired.into());
        }

        message.recalled = true;
        repo.replace_message(&message)?;

        let channel_id = resolve_channel(&*repo, &message);
        if let Some(channel) = channel_id {
            rewrite_preview(&*repo, &channel, &message.id, RECALLED_LABEL);
        }

        info!(message = %id, requester = %requester, "Message recalled");
        Ok(MessageChange {
            message,
            channel_id,
        })
    }

    /// Hide for `viewer` only. Idempotent.
    pub async fn hide_message(&self, id: &MessageId, viewer: &UserId) -> Result<MessageChange> {
        let repo = self.repo.lock().await;
        let mut message = repo.get_message(id).map_err(missing("message"))?;
        let channel_id = resolve_channel(&*repo, &message);
        ensure_participant(&*repo, channel_id.as_ref(), viewer)?;

        if message.hidden_by.insert(*viewer) {
            repo.replace_message(&message)?;
            debug!(message = %id, viewer = %viewer, "Message hidden");
        }
        Ok(MessageChange {
            message,
            channel_id,
        })
    }

    /// Add `user` to the reactors of `emoji`, or remove them if present.
    /// Recalled messages take no reactions.
    pub async fn toggle_reaction(
        &self,
        id: &MessageId,
        user: &UserId,
        emoji: &str,
    ) -> Result<MessageChange> {
        let emoji = emoji.trim();
        if emoji.is_empty() {
            return Err(ChatError::validation("emoji must not be empty"));
        }

        let repo = self.repo.lock().await;
        let mut message = repo.get_message(id).map_err(missing("message"))?;
        if message.recalled {
            return Err(Conflict::MessageRecalled.into());
        }
        let channel_id = resolve_channel(&*repo, &message);
        ensure_participant(&*repo, channel_id.as_ref(), user)?;

        let added = toggle(&mut message.reactions, emoji, *user);
        repo.replace_message(&message)?;

        debug!(message = %id, user = %user, emoji, added, "Reaction toggled");
        Ok(MessageChange {
            message,
            channel_id,
        })
    }

    /// Delivery and read receipts. Status only moves forward; a stale
    /// receipt leaves the message untouched and comes back with `false`.
    pub async fn update_message_status(
        &self,
        id: &MessageId,
        actor: &UserId,
        status: MessageStatus,
    ) -> Result<(MessageChange, bool)> {
        let repo = self.repo.lock().await;
        let mut message = repo.get_message(id).map_err(missing("message"))?;
        let channel_id = resolve_channel(&*repo, &message);
        ensure_participant(&*repo, channel_id.as_ref(), actor)?;

        let advanced = status > message.status;
        if advanced {
            message.status = status;
            repo.replace_message(&message)?;
        } else {
            debug!(
                message = %id,
                current = ?message.status,
                requested = ?status,
                "Stale receipt ignored"
            );
        }
        Ok((
            MessageChange {
                message,
                channel_id,
            },
            advanced,
        ))
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    /// Client view of `message` with live sender attributes. Recalled
    /// messages carry only the marker.
    pub async fn render(&self, message: &Message, channel_id: ChannelId) -> MessagePayload {
        let sender = self.profiles.profile_or_placeholder(&message.sender_id).await;
        let reply_to = match &message.reply_to {
            Some(parent) => self.reply_preview(parent).await,
            None => None,
        };
        let (url, attachments, reactions) = if message.recalled {
            (String::new(), Vec::new(), Vec::new())
        } else {
            (
                message.url.clone(),
                message.attachments.clone(),
                ReactionSummary::from_map(&message.reactions),
            )
        };

        MessagePayload {
            id: message.id,
            channel_id,
            content: message.visible_content().to_string(),
            timestamp: message.timestamp,
            message_type: message.message_type,
            sender_id: message.sender_id,
            sender_name: sender.display_name,
            sender_avatar: sender.avatar,
            status: message.status,
            recalled: message.recalled,
            edited: message.edited,
            edited_at: message.edited_at,
            url,
            reply_to,
            attachments,
            reactions,
        }
    }

    async fn reply_preview(&self, parent: &MessageId) -> Option<ReplyPreview> {
        let found = self.repo.lock().await.get_message(parent);
        let parent = match found {
            Ok(parent) => parent,
            Err(StoreError::NotFound) => return None,
            Err(e) => {
                warn!(parent = %parent, error = %e, "Reply preview lookup failed");
                return None;
            }
        };
        let sender_name = self
            .profiles
            .profile_or_placeholder(&parent.sender_id)
            .await
            .display_name;
        Some(ReplyPreview {
            id: parent.id,
            content: preview_label(&parent),
            sender_id: parent.sender_id,
            sender_name,
            message_type: parent.message_type,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// List-view label: binary and sticker payloads never leak into previews.
pub fn preview_label(message: &Message) -> String {
    if message.recalled {
        return RECALLED_LABEL.to_string();
    }
    match message.message_type {
        MessageType::File => FILE_LABEL.to_string(),
        MessageType::Voice => VOICE_LABEL.to_string(),
        MessageType::Sticker => STICKER_LABEL.to_string(),
        _ if !message.attachments.is_empty() => ATTACHMENT_LABEL.to_string(),
        _ => message.content.clone(),
    }
}

/// Returns `true` when the reaction was added, `false` when removed.
pub fn toggle(
    reactions: &mut BTreeMap<String, BTreeSet<UserId>>,
    emoji: &str,
    user: UserId,
) -> bool {
    let reactors = reactions.entry(emoji.to_string()).or_default();
    if reactors.insert(user) {
        return true;
    }
    reactors.remove(&user);
    if reactors.is_empty() {
        reactions.remove(emoji);
    }
    false
}

/// Self-described channel first, then the secondary index.
pub(crate) fn resolve_channel(repo: &dyn Repository, message: &Message) -> Option<ChannelId> {
    if let Some(channel) = message.channel_id {
        return Some(channel);
    }
    match repo.channel_for_message(&message.id) {
        Ok(Some(channel)) => Some(channel),
        Ok(None) => {
            warn!(message = %message.id, "Message has no resolvable channel");
            None
        }
        Err(e) => {
            warn!(message = %message.id, error = %e, "Channel lookup for message failed");
            None
        }
    }
}

/// Members only, when the channel is known.
fn ensure_participant(
    repo: &dyn Repository,
    channel: Option<&ChannelId>,
    user: &UserId,
) -> Result<()> {
    let Some(channel) = channel else {
        return Ok(());
    };
    let channel = repo.get_channel(channel).map_err(missing("channel"))?;
    if channel.is_member(user) {
        Ok(())
    } else {
        Err(ChatError::forbidden("not a member of this channel"))
    }
}

fn rewrite_preview(repo: &dyn Repository, channel: &ChannelId, message: &MessageId, label: &str) {
    match repo.rewrite_preview_content(channel, message, label) {
        Ok(true) => debug!(channel = %channel, message = %message, "Preview rewritten"),
        Ok(false) => {}
        Err(e) => warn!(channel = %channel, message = %message, error = %e, "Preview repair failed"),
    }
}

fn file_record(message_type: MessageType, attachment: &Attachment, now: DateTime<Utc>) -> FileRecord {
    let kind = if message_type == MessageType::Voice {
        FileKind::Audio
    } else {
        kind_from_mime(&attachment.mime)
    };
    let file_name = attachment
        .url
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("file")
        .to_string();
    FileRecord {
        id: Uuid::new_v4(),
        file_name,
        kind,
        size: attachment.size.unwrap_or(0),
        url: attachment.url.clone(),
        uploaded_at: now,
    }
}

fn kind_from_mime(mime: &str) -> FileKind {
    match mime.split('/').next() {
        Some("image") => FileKind::Image,
        Some("video") => FileKind::Video,
        Some("audio") => FileKind::Audio,
        _ => FileKind::Document,
    }
}
