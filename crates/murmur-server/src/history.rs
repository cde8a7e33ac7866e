//! Read path: paged channel history and the per-user chat list.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use murmur_shared::constants::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use murmur_shared::protocol::MessagePayload;
use murmur_shared::{ChannelId, ChannelKind, ChatError, MessageId, MessageType, UserId};
use murmur_store::{Channel, ChannelPreview, Message, Repository, StoreError};

use crate::membership::{missing, Result};
use crate::messaging::{preview_label, MessageService};
use crate::profiles::ProfileDirectory;
use crate::SharedRepo;

/// One row of a user's chat list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub channel_id: ChannelId,
    pub kind: ChannelKind,
    pub name: String,
    pub avatar: String,
    pub last_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_type: Option<MessageType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sender_id: Option<UserId>,
    pub last_active: DateTime<Utc>,
}

#[derive(Clone)]
pub struct HistoryService {
    repo: SharedRepo,
    profiles: Arc<dyn ProfileDirectory>,
    messages: MessageService,
}

impl HistoryService {
    pub fn new(
        repo: SharedRepo,
        profiles: Arc<dyn ProfileDirectory>,
        messages: MessageService,
    ) -> Self {
        Self {
            repo,
            profiles,
            messages,
        }
    }

    /// A page of messages older than the `before` message, oldest first, as
    /// `viewer` sees them.
    pub async fn channel_messages(
        &self,
        channel: &ChannelId,
        viewer: &UserId,
        before: Option<MessageId>,
        limit: Option<usize>,
    ) -> Result<Vec<MessagePayload>> {
        let limit = clamp_limit(limit);
        let page = {
            let repo = self.repo.lock().await;
            let found = repo.get_channel(channel).map_err(missing("channel"))?;
            if !found.is_member(viewer) {
                return Err(ChatError::forbidden("not a member of this channel"));
            }
            if let Some(cursor) = &before {
                let anchor = repo.get_message(cursor).map_err(missing("message"))?;
                if anchor.channel_id != Some(*channel) {
                    return Err(ChatError::validation("cursor message is not in this channel"));
                }
            }
            repo.messages_for_channel(channel, Some(viewer), before.as_ref(), limit)?
        };

        let mut out = Vec::with_capacity(page.len());
        for message in &page {
            out.push(self.messages.render(message, *channel).await);
        }
        Ok(out)
    }

    /// Every channel in `user`'s membership index, newest activity first.
    pub async fn chat_list(&self, user: &UserId) -> Result<Vec<ChatSummary>> {
        let rows = {
            let repo = self.repo.lock().await;
            let mut rows = Vec::new();
            for entry in repo.channels_for_user(user)? {
                let channel = match repo.get_channel(&entry.channel_id) {
                    Ok(channel) => channel,
                    Err(StoreError::NotFound) => {
                        warn!(user = %user, channel = %entry.channel_id, "Index points at a missing channel");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                let shared = match repo.get_preview(&channel.id)? {
                    Some(preview) => visible_preview(&*repo, preview, user)?,
                    None => None,
                };
                let preview = match shared {
                    Some(preview) => Some(preview),
                    None => repo
                        .latest_visible_message(&channel.id, user)?
                        .map(|m| preview_of(channel.id, &m)),
                };
                rows.push((channel, preview, entry.last_active));
            }
            rows
        };

        let mut out = Vec::with_capacity(rows.len());
        for (channel, preview, indexed_at) in rows {
            out.push(self.summarize(user, channel, preview, indexed_at).await);
        }
        out.sort_by(|a, b| b.last_active.cmp(&a.last_active));
        Ok(out)
    }

    /// Drop the channel's preview record. Returns whether one existed.
    pub async fn clear_preview(&self, channel: &ChannelId, actor: &UserId) -> Result<bool> {
        let repo = self.repo.lock().await;
        let found = repo.get_channel(channel).map_err(missing("channel"))?;
        if !found.is_member(actor) {
            return Err(ChatError::forbidden("not a member of this channel"));
        }
        Ok(repo.delete_preview(channel)?)
    }

    async fn summarize(
        &self,
        viewer: &UserId,
        channel: Channel,
        preview: Option<ChannelPreview>,
        indexed_at: DateTime<Utc>,
    ) -> ChatSummary {
        let (name, avatar) = match channel.kind {
            ChannelKind::Private => match channel.counterpart(viewer) {
                Some(other) => {
                    let profile = self.profiles.profile_or_placeholder(&other).await;
                    (profile.display_name, profile.avatar)
                }
                None => (channel.name.clone(), channel.avatar.clone()),
            },
            ChannelKind::Group => (channel.name.clone(), channel.avatar.clone()),
        };
        let last_active = preview
            .as_ref()
            .map(|p| p.last_active.max(indexed_at))
            .unwrap_or(indexed_at);

        ChatSummary {
            channel_id: channel.id,
            kind: channel.kind,
            name,
            avatar,
            last_message: preview.as_ref().map(|p| p.content.clone()).unwrap_or_default(),
            last_message_type: preview.as_ref().map(|p| p.message_type),
            last_sender_id: preview.as_ref().map(|p| p.sender_id),
            last_active,
        }
    }
}

/// The shared preview, unless it points at a message `viewer` has hidden.
fn visible_preview(
    repo: &dyn Repository,
    preview: ChannelPreview,
    viewer: &UserId,
) -> Result<Option<ChannelPreview>> {
    match repo.get_message(&preview.message_id) {
        Ok(message) if message.is_hidden_for(viewer) => Ok(None),
        Ok(_) | Err(StoreError::NotFound) => Ok(Some(preview)),
        Err(e) => Err(e.into()),
    }
}

fn preview_of(channel_id: ChannelId, message: &Message) -> ChannelPreview {
    ChannelPreview {
        channel_id,
        message_id: message.id,
        content: preview_label(message),
        message_type: message.message_type,
        sender_id: message.sender_id,
        last_active: message.timestamp,
    }
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use murmur_shared::constants::RECALLED_LABEL;
    use murmur_shared::protocol::SendMessageEnvelope;

    use super::*;
    use crate::testutil::Fixture;

    fn text(channel: ChannelId, sender: UserId, content: &str) -> SendMessageEnvelope {
        SendMessageEnvelope {
            channel_id: channel,
            sender_id: sender,
            content: content.into(),
            message_type: MessageType::Text,
            reply_to: None,
            attachments: vec![],
        }
    }

    #[test]
    fn page_limits_are_clamped() {
        assert_eq!(clamp_limit(None), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(10_000)), MAX_PAGE_SIZE);
    }

    #[tokio::test]
    async fn history_is_viewer_specific_and_masks_recalls() {
        let fx = Fixture::new();
        let (a, b, c) = fx.trio().await;
        let channel = fx.group(&a, &[a, b, c]).await;

        let first = fx.messages.send_message(text(channel.id, a, "one")).await.unwrap();
        let second = fx.messages.send_message(text(channel.id, b, "two")).await.unwrap();
        fx.messages.send_message(text(channel.id, c, "three")).await.unwrap();
        fx.messages.recall_message(&first.id, &a).await.unwrap();
        fx.messages.hide_message(&second.id, &c).await.unwrap();

        let for_b = fx.history.channel_messages(&channel.id, &b, None, None).await.unwrap();
        let contents: Vec<_> = for_b.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, [RECALLED_LABEL, "two", "three"]);
        assert_eq!(for_b[1].sender_name, "Bob");

        let for_c = fx.history.channel_messages(&channel.id, &c, None, None).await.unwrap();
        assert_eq!(for_c.len(), 2);

        let outsider = fx.user("Eve").await;
        let err = fx
            .history
            .channel_messages(&channel.id, &outsider, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn history_pages_backwards() {
        let fx = Fixture::new();
        let (a, b, c) = fx.trio().await;
        let channel = fx.group(&a, &[a, b, c]).await;
        for n in 0..5 {
            fx.messages
                .send_message(text(channel.id, a, &format!("m{n}")))
                .await
                .unwrap();
        }

        let newest = fx
            .history
            .channel_messages(&channel.id, &b, None, Some(2))
            .await
            .unwrap();
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[1].content, "m4");

        let older = fx
            .history
            .channel_messages(&channel.id, &b, Some(newest[0].id), Some(10))
            .await
            .unwrap();
        let contents: Vec<_> = older.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["m0", "m1", "m2"]);

        let elsewhere = fx.group(&a, &[a, b, c]).await;
        let foreign = fx.messages.send_message(text(elsewhere.id, a, "x")).await.unwrap();
        let err = fx
            .history
            .channel_messages(&channel.id, &b, Some(foreign.id), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        let err = fx
            .history
            .channel_messages(&channel.id, &b, Some(MessageId::new()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[tokio::test]
    async fn history_carries_reactions() {
        let fx = Fixture::new();
        let (a, b, c) = fx.trio().await;
        let channel = fx.group(&a, &[a, b, c]).await;
        let sent = fx.messages.send_message(text(channel.id, a, "hi")).await.unwrap();
        fx.messages.toggle_reaction(&sent.id, &b, "👍").await.unwrap();
        fx.messages.toggle_reaction(&sent.id, &c, "👍").await.unwrap();
        fx.messages.toggle_reaction(&sent.id, &c, "🎉").await.unwrap();

        let page = fx.history.channel_messages(&channel.id, &c, None, None).await.unwrap();
        let reactions = &page[0].reactions;
        assert_eq!(reactions.len(), 2);
        let thumbs = reactions.iter().find(|r| r.emoji == "👍").unwrap();
        assert_eq!(thumbs.count, 2);
        assert!(thumbs.user_ids.contains(&b) && thumbs.user_ids.contains(&c));

        let json = serde_json::to_value(&page[0]).unwrap();
        assert_eq!(json["reactions"].as_array().unwrap().len(), 2);

        let quiet = fx.messages.send_message(text(channel.id, b, "plain")).await.unwrap();
        let page = fx.history.channel_messages(&channel.id, &a, None, None).await.unwrap();
        let plain = page.iter().find(|m| m.id == quiet.id).unwrap();
        assert!(serde_json::to_value(plain).unwrap().get("reactions").is_none());
    }

    #[tokio::test]
    async fn chat_list_names_private_chats_after_the_counterpart() {
        let fx = Fixture::new();
        let (a, b, c) = fx.trio().await;
        let group = fx.named_group(&a, &[a, b, c], "Weekend").await;
        let private = fx.channels.find_or_create_private_channel(&a, &b).await.unwrap();

        fx.messages.send_message(text(group.id, c, "plans?")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        fx.messages.send_message(text(private.id, b, "psst")).await.unwrap();

        let list = fx.history.chat_list(&a).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].channel_id, private.id);
        assert_eq!(list[0].name, "Bob");
        assert_eq!(list[0].avatar, fx.avatar_of("Bob"));
        assert_eq!(list[0].last_message, "psst");
        assert_eq!(list[1].name, "Weekend");
        assert_eq!(list[1].last_message, "plans?");
        assert_eq!(list[1].last_sender_id, Some(c));

        let for_b = fx.history.chat_list(&b).await.unwrap();
        let private_row = for_b.iter().find(|r| r.channel_id == private.id).unwrap();
        assert_eq!(private_row.name, "Alice");
    }

    #[tokio::test]
    async fn cleared_preview_falls_back_to_latest_visible_message() {
        let fx = Fixture::new();
        let (a, b, c) = fx.trio().await;
        let channel = fx.group(&a, &[a, b, c]).await;
        fx.messages.send_message(text(channel.id, a, "visible")).await.unwrap();
        let last = fx.messages.send_message(text(channel.id, b, "hidden")).await.unwrap();
        fx.messages.hide_message(&last.id, &c).await.unwrap();

        assert!(fx.history.clear_preview(&channel.id, &a).await.unwrap());
        assert!(!fx.history.clear_preview(&channel.id, &a).await.unwrap());

        let for_c = fx.history.chat_list(&c).await.unwrap();
        assert_eq!(for_c[0].last_message, "visible");
        let for_a = fx.history.chat_list(&a).await.unwrap();
        assert_eq!(for_a[0].last_message, "hidden");

        let outsider = fx.user("Eve").await;
        let err = fx.history.clear_preview(&channel.id, &outsider).await.unwrap_err();
        assert!(matches!(err, ChatError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn chat_list_skips_a_preview_the_viewer_hid() {
        let fx = Fixture::new();
        let (a, b, c) = fx.trio().await;
        let channel = fx.group(&a, &[a, b, c]).await;
        fx.messages.send_message(text(channel.id, a, "older")).await.unwrap();
        let secret = fx.messages.send_message(text(channel.id, a, "secret")).await.unwrap();
        fx.messages.hide_message(&secret.id, &b).await.unwrap();

        let for_b = fx.history.chat_list(&b).await.unwrap();
        assert_eq!(for_b[0].last_message, "older");
        let for_a = fx.history.chat_list(&a).await.unwrap();
        assert_eq!(for_a[0].last_message, "secret");

        // Hiding everything leaves the row without a preview.
        let page = fx.history.channel_messages(&channel.id, &c, None, None).await.unwrap();
        fx.messages.hide_message(&page[0].id, &c).await.unwrap();
        fx.messages.hide_message(&secret.id, &c).await.unwrap();
        let for_c = fx.history.chat_list(&c).await.unwrap();
        assert!(for_c[0].last_message.is_empty());
    }

    #[tokio::test]
    async fn empty_channel_lists_without_preview() {
        let fx = Fixture::with_windows(Duration::minutes(2), Duration::minutes(15));
        let (a, b, c) = fx.trio().await;
        let channel = fx.group(&a, &[a, b, c]).await;

        let list = fx.history.chat_list(&b).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].channel_id, channel.id);
        assert!(list[0].last_message.is_empty());
        assert!(list[0].last_message_type.is_none());
        assert_eq!(list[0].avatar, fx.default_avatar());
    }
}
