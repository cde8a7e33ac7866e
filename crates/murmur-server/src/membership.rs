//! Membership & permission engine.
//!
//! Every mutation follows the same shape: load the channel document, check
//! lifecycle state and the caller's role, mutate, replace the whole document
//! (last writer wins), then bring the `user_channels` index in line.
//!
//! Role checks go through [`Channel::role_of`], which reports `Member` for
//! identities that are not in the channel at all, so outsiders fail every
//! privileged check.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use murmur_shared::constants::{
    CHANNEL_NAME_MAX, DEFAULT_GROUP_NAME_PREFIX, ELLIPSIS, GROUP_NAME_BUDGET, MIN_GROUP_MEMBERS,
    PRIVATE_MEMBERS,
};
use murmur_shared::{ChannelId, ChannelKind, ChatError, Conflict, Role, UserId};
use murmur_store::{Channel, ChannelMember, ChannelSettings, Repository, StoreError};

use crate::profiles::ProfileDirectory;
use crate::SharedRepo;

pub type Result<T> = std::result::Result<T, ChatError>;

/// Arguments of a channel creation.
#[derive(Debug, Clone)]
pub struct NewChannel {
    /// Ignored for private channels; synthesized for groups when absent.
    pub name: Option<String>,
    pub kind: ChannelKind,
    pub member_ids: Vec<UserId>,
    pub approval_required: bool,
}

/// A member or blocked identity, enriched with profile attributes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub member_id: UserId,
    /// Absent for blocked identities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    pub display_name: String,
    pub avatar: String,
}

#[derive(Clone)]
pub struct ChannelService {
    repo: SharedRepo,
    profiles: Arc<dyn ProfileDirectory>,
    default_avatar: String,
}

impl ChannelService {
    pub fn new(
        repo: SharedRepo,
        profiles: Arc<dyn ProfileDirectory>,
        default_avatar: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            profiles,
            default_avatar: default_avatar.into(),
        }
    }

    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    pub async fn create_channel(&self, creator: &UserId, req: NewChannel) -> Result<Channel> {
        validate_new_channel(creator, &req)?;
        let now = Utc::now();

        // Profile lookups go through the same store lock; finish them first.
        let (name, avatar) = match req.kind {
            ChannelKind::Private => {
                let other = req
                    .member_ids
                    .iter()
                    .find(|id| *id != creator)
                    .copied()
                    .unwrap_or(*creator);
                (String::new(), self.profiles.avatar(&other).await?)
            }
            ChannelKind::Group => {
                let supplied = req.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
                let name = match supplied {
                    Some(name) => name.to_string(),
                    None => {
                        let mut names = Vec::with_capacity(req.member_ids.len());
                        for id in &req.member_ids {
                            if let Some(profile) = self.profiles.lookup(id).await? {
                                names.push(profile.display_name);
                            }
                        }
                        synthesize_group_name(&names, now)
                    }
                };
                (truncate_chars(&name, CHANNEL_NAME_MAX), self.default_avatar.clone())
            }
        };

        let mut leader_assigned = false;
        let members = req
            .member_ids
            .iter()
            .map(|id| {
                let role = if req.kind == ChannelKind::Group && id == creator && !leader_assigned {
                    leader_assigned = true;
                    Role::Leader
                } else {
                    Role::Member
                };
                ChannelMember {
                    member_id: *id,
                    role,
                }
            })
            .collect();

        let channel = Channel {
            id: ChannelId::new(),
            name,
            kind: req.kind,
            members,
            blocked: Vec::new(),
            settings: ChannelSettings {
                leader_id: (req.kind == ChannelKind::Group).then_some(*creator),
                approval_required: req.kind == ChannelKind::Group && req.approval_required,
                created_at: now,
                dissolved_at: None,
            },
            avatar,
        };

        let repo = self.repo.lock().await;
        repo.insert_channel(&channel)?;
        index_members(&*repo, &channel, now)?;

        info!(
            channel = %channel.id,
            kind = channel.kind.as_str(),
            creator = %creator,
            members = channel.members.len(),
            "Channel created"
        );
        Ok(channel)
    }

    /// The live private channel between `a` and `b`, created on first use.
    pub async fn find_or_create_private_channel(&self, a: &UserId, b: &UserId) -> Result<Channel> {
        if a == b {
            return Err(ChatError::validation(
                "cannot open a private channel with yourself",
            ));
        }
        if let Some(existing) = self.repo.lock().await.find_private_channel(a, b)? {
            return Ok(existing);
        }
        self.create_channel(
            a,
            NewChannel {
                name: None,
                kind: ChannelKind::Private,
                member_ids: vec![*a, *b],
                approval_required: false,
            },
        )
        .await
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub async fn get_channel(&self, id: &ChannelId) -> Result<Channel> {
        let repo = self.repo.lock().await;
        load(&*repo, id)
    }

    pub async fn list_members(&self, id: &ChannelId, viewer: &UserId) -> Result<Vec<MemberView>> {
        let channel = self.readable(id, viewer).await?;
        let mut out = Vec::with_capacity(channel.members.len());
        for member in &channel.members {
            let profile = self.profiles.profile_or_placeholder(&member.member_id).await;
            out.push(MemberView {
                member_id: member.member_id,
                role: Some(member.role),
                display_name: profile.display_name,
                avatar: profile.avatar,
            });
        }
        Ok(out)
    }

    /// Blocked identities; unknown users get the placeholder name.
    pub async fn list_blocked_members(
        &self,
        id: &ChannelId,
        viewer: &UserId,
    ) -> Result<Vec<MemberView>> {
        let channel = self.readable(id, viewer).await?;
        let mut out = Vec::with_capacity(channel.blocked.len());
        for blocked in &channel.blocked {
            let profile = self.profiles.profile_or_placeholder(blocked).await;
            out.push(MemberView {
                member_id: *blocked,
                role: None,
                display_name: profile.display_name,
                avatar: profile.avatar,
            });
        }
        Ok(out)
    }

    /// Live group channels whose name contains `keyword`.
    pub async fn search_channels(&self, keyword: &str) -> Result<Vec<Channel>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(ChatError::validation("search keyword must not be empty"));
        }
        let found = self.repo.lock().await.search_channels(keyword)?;
        Ok(found
            .into_iter()
            .filter(|c| c.kind == ChannelKind::Group && !c.is_dissolved())
            .collect())
    }

    pub async fn channels_for_user(&self, user: &UserId) -> Result<Vec<Channel>> {
        let repo = self.repo.lock().await;
        let mut channels = Vec::new();
        for entry in repo.channels_for_user(user)? {
            match repo.get_channel(&entry.channel_id) {
                Ok(channel) => channels.push(channel),
                Err(StoreError::NotFound) => {
                    warn!(user = %user, channel = %entry.channel_id, "Index points at a missing channel");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(channels)
    }

    async fn readable(&self, id: &ChannelId, viewer: &UserId) -> Result<Channel> {
        let channel = self.get_channel(id).await?;
        if !channel.is_member(viewer) {
            return Err(ChatError::forbidden("not a member of this channel"));
        }
        Ok(channel)
    }

    // ------------------------------------------------------------------
    // Moderation
    // ------------------------------------------------------------------

    pub async fn add_member(
        &self,
        id: &ChannelId,
        actor: &UserId,
        new_member: &UserId,
    ) -> Result<Channel> {
        let repo = self.repo.lock().await;
        let mut channel = load(&*repo, id)?;
        ensure_group(&channel)?;
        ensure_moderator(&channel, actor, "add members")?;

        if channel.is_member(new_member) {
            return Err(Conflict::AlreadyMember.into());
        }
        if channel.is_blocked(new_member) {
            return Err(Conflict::TargetBlocked.into());
        }

        channel.members.push(ChannelMember {
            member_id: *new_member,
            role: Role::Member,
        });
        save(&*repo, &channel)?;
        if let Err(e) = repo.add_user_channel(new_member, id, Utc::now()) {
            warn!(channel = %id, member = %new_member, error = %e, "Membership index insert failed");
        }

        info!(channel = %id, actor = %actor, member = %new_member, "Member added");
        Ok(channel)
    }

    pub async fn remove_member(
        &self,
        id: &ChannelId,
        actor: &UserId,
        target: &UserId,
    ) -> Result<Channel> {
        let repo = self.repo.lock().await;
        let mut channel = load(&*repo, id)?;
        ensure_group(&channel)?;
        ensure_moderator(&channel, actor, "remove members")?;

        if !channel.is_member(target) {
            return Err(ChatError::not_found("member"));
        }
        match (channel.role_of(actor), channel.role_of(target)) {
            (_, Role::Leader) => return Err(Conflict::LeaderCannotBeRemoved.into()),
            (Role::Deputy, Role::Deputy) if actor != target => {
                return Err(Conflict::ProtectedRole.into())
            }
            _ => {}
        }

        channel.remove_member(target);
        save(&*repo, &channel)?;
        unindex(&*repo, target, id);

        info!(channel = %id, actor = %actor, member = %target, "Member removed");
        Ok(channel)
    }

    /// Leave a group. The leader must hand over to `new_leader` in the same call.
    pub async fn leave_channel(
        &self,
        id: &ChannelId,
        member: &UserId,
        new_leader: Option<&UserId>,
    ) -> Result<Channel> {
        let repo = self.repo.lock().await;
        let mut channel = load(&*repo, id)?;
        ensure_group(&channel)?;

        if !channel.is_member(member) {
            return Err(ChatError::not_found("member"));
        }

        if channel.leader() == Some(*member) {
            let successor = new_leader.ok_or(Conflict::LeaderMustNameSuccessor)?;
            if successor == member {
                return Err(ChatError::validation("successor must be another member"));
            }
            if !channel.set_role(successor, Role::Leader) {
                return Err(ChatError::validation("successor is not a member"));
            }
            channel.settings.leader_id = Some(*successor);
            info!(channel = %id, from = %member, to = %successor, "Leadership handed over");
        }

        channel.remove_member(member);
        save(&*repo, &channel)?;
        unindex(&*repo, member, id);

        info!(channel = %id, member = %member, "Member left");
        Ok(channel)
    }

    pub async fn dissolve_channel(&self, id: &ChannelId, actor: &UserId) -> Result<Channel> {
        let repo = self.repo.lock().await;
        let mut channel = load(&*repo, id)?;
        ensure_group(&channel)?;
        ensure_leader(&channel, actor, "dissolve the channel")?;

        let former = channel.member_ids();
        channel.members.clear();
        channel.blocked.clear();
        channel.settings.leader_id = None;
        channel.settings.dissolved_at = Some(Utc::now());
        save(&*repo, &channel)?;
        for member in &former {
            unindex(&*repo, member, id);
        }

        info!(channel = %id, actor = %actor, former_members = former.len(), "Channel dissolved");
        Ok(channel)
    }

    pub async fn block_member(
        &self,
        id: &ChannelId,
        actor: &UserId,
        target: &UserId,
    ) -> Result<Channel> {
        let repo = self.repo.lock().await;
        let mut channel = load(&*repo, id)?;
        ensure_group(&channel)?;
        ensure_moderator(&channel, actor, "block members")?;

        if actor == target {
            return Err(ChatError::validation("cannot block yourself"));
        }
        if channel.role_of(target).can_moderate() {
            return Err(Conflict::ProtectedRole.into());
        }
        if channel.is_blocked(target) {
            return Err(Conflict::AlreadyBlocked.into());
        }

        channel.blocked.push(*target);
        let evicted = channel.remove_member(target);
        save(&*repo, &channel)?;
        if evicted {
            unindex(&*repo, target, id);
        }

        info!(channel = %id, actor = %actor, target = %target, evicted, "Member blocked");
        Ok(channel)
    }

    pub async fn unblock_member(
        &self,
        id: &ChannelId,
        actor: &UserId,
        target: &UserId,
    ) -> Result<Channel> {
        let repo = self.repo.lock().await;
        let mut channel = load(&*repo, id)?;
        ensure_group(&channel)?;
        ensure_moderator(&channel, actor, "unblock members")?;

        if actor == target {
            return Err(ChatError::validation("cannot unblock yourself"));
        }
        if !channel.is_blocked(target) {
            return Err(Conflict::NotBlocked.into());
        }

        channel.blocked.retain(|b| b != target);
        save(&*repo, &channel)?;

        info!(channel = %id, actor = %actor, target = %target, "Member unblocked");
        Ok(channel)
    }

    pub async fn toggle_approval(
        &self,
        id: &ChannelId,
        actor: &UserId,
        enabled: bool,
    ) -> Result<Channel> {
        let repo = self.repo.lock().await;
        let mut channel = load(&*repo, id)?;
        ensure_group(&channel)?;
        ensure_leader(&channel, actor, "change approval settings")?;

        channel.settings.approval_required = enabled;
        save(&*repo, &channel)?;

        debug!(channel = %id, enabled, "Approval requirement updated");
        Ok(channel)
    }

    /// Appoint a Deputy or demote one back to Member. Leadership itself only
    /// moves through [`Self::transfer_leadership`] or a leader's leave.
    pub async fn set_member_role(
        &self,
        id: &ChannelId,
        actor: &UserId,
        target: &UserId,
        role: Role,
    ) -> Result<Channel> {
        let repo = self.repo.lock().await;
        let mut channel = load(&*repo, id)?;
        ensure_group(&channel)?;
        ensure_leader(&channel, actor, "change member roles")?;

        if role == Role::Leader {
            return Err(ChatError::validation(
                "leadership is transferred, not assigned",
            ));
        }
        if actor == target {
            return Err(ChatError::validation("the leader cannot change their own role"));
        }
        if !channel.set_role(target, role) {
            return Err(ChatError::not_found("member"));
        }
        save(&*repo, &channel)?;

        info!(channel = %id, target = %target, role = ?role, "Member role changed");
        Ok(channel)
    }

    pub async fn transfer_leadership(
        &self,
        id: &ChannelId,
        actor: &UserId,
        new_leader: &UserId,
    ) -> Result<Channel> {
        let repo = self.repo.lock().await;
        let mut channel = load(&*repo, id)?;
        ensure_group(&channel)?;
        ensure_leader(&channel, actor, "transfer leadership")?;

        if actor == new_leader {
            return Err(ChatError::validation("already the leader"));
        }
        if !channel.set_role(new_leader, Role::Leader) {
            return Err(ChatError::not_found("member"));
        }
        channel.set_role(actor, Role::Member);
        channel.settings.leader_id = Some(*new_leader);
        save(&*repo, &channel)?;

        info!(channel = %id, from = %actor, to = %new_leader, "Leadership transferred");
        Ok(channel)
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Shape checks for a creation request, in the order clients see them.
pub fn validate_new_channel(creator: &UserId, req: &NewChannel) -> Result<()> {
    let mut seen = HashSet::with_capacity(req.member_ids.len());
    for id in &req.member_ids {
        if !seen.insert(id) {
            return Err(ChatError::validation(format!("duplicate member id {id}")));
        }
    }

    match req.kind {
        ChannelKind::Private if req.member_ids.len() != PRIVATE_MEMBERS => {
            return Err(ChatError::validation(format!(
                "a private channel needs exactly {PRIVATE_MEMBERS} members"
            )));
        }
        ChannelKind::Group if req.member_ids.len() < MIN_GROUP_MEMBERS => {
            return Err(ChatError::validation(format!(
                "a group channel needs at least {MIN_GROUP_MEMBERS} members"
            )));
        }
        _ => {}
    }

    if !req.member_ids.contains(creator) {
        return Err(ChatError::validation(
            "creator must be a member of the channel",
        ));
    }
    Ok(())
}

/// Structural invariants of a stored channel document.
pub fn validate_channel(channel: &Channel) -> Result<()> {
    let mut seen = HashSet::with_capacity(channel.members.len());
    for member in &channel.members {
        if !seen.insert(member.member_id) {
            return Err(ChatError::validation(format!(
                "member {} listed twice",
                member.member_id
            )));
        }
        if channel.is_blocked(&member.member_id) {
            return Err(ChatError::validation(format!(
                "member {} is also blocked",
                member.member_id
            )));
        }
    }

    if channel.is_dissolved() {
        if !channel.members.is_empty() || channel.leader().is_some() {
            return Err(ChatError::validation("dissolved channel still has members"));
        }
        return Ok(());
    }

    let leaders: Vec<_> = channel
        .members
        .iter()
        .filter(|m| m.role == Role::Leader)
        .map(|m| m.member_id)
        .collect();

    match channel.kind {
        ChannelKind::Private => {
            if channel.members.len() != PRIVATE_MEMBERS {
                return Err(ChatError::validation("private channel must have 2 members"));
            }
            if channel.leader().is_some() || channel.members.iter().any(|m| m.role != Role::Member)
            {
                return Err(ChatError::validation("private channel has no roles"));
            }
        }
        ChannelKind::Group => match (channel.leader(), leaders.as_slice()) {
            (Some(leader), [only]) if leader == *only => {}
            _ => {
                return Err(ChatError::validation(
                    "group channel must have exactly one leader",
                ))
            }
        },
    }
    Ok(())
}

/// Keep whole code points; over-long strings end in the ellipsis marker.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(ELLIPSIS.chars().count());
    let mut out: String = s.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

pub fn synthesize_group_name(names: &[String], now: DateTime<Utc>) -> String {
    let usable: Vec<&str> = names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .collect();
    if usable.is_empty() {
        return format!(
            "{DEFAULT_GROUP_NAME_PREFIX} {}",
            now.format("%Y-%m-%d %H:%M:%S")
        );
    }
    truncate_chars(&usable.join(", "), GROUP_NAME_BUDGET)
}

fn ensure_group(channel: &Channel) -> Result<()> {
    if channel.is_dissolved() {
        return Err(Conflict::ChannelDissolved.into());
    }
    if channel.kind == ChannelKind::Private {
        return Err(Conflict::PrivateChannel.into());
    }
    Ok(())
}

fn ensure_moderator(channel: &Channel, actor: &UserId, action: &str) -> Result<()> {
    if channel.role_of(actor).can_moderate() {
        Ok(())
    } else {
        Err(ChatError::forbidden(format!(
            "only a leader or deputy may {action}"
        )))
    }
}

fn ensure_leader(channel: &Channel, actor: &UserId, action: &str) -> Result<()> {
    if channel.leader() == Some(*actor) {
        Ok(())
    } else {
        Err(ChatError::forbidden(format!("only the leader may {action}")))
    }
}

// ---------------------------------------------------------------------------
// Store helpers
// ---------------------------------------------------------------------------

/// Map the store's "no rows" onto a named [`ChatError::NotFound`].
pub(crate) fn missing(what: &'static str) -> impl Fn(StoreError) -> ChatError {
    move |err| match err {
        StoreError::NotFound => ChatError::not_found(what),
        other => other.into(),
    }
}

fn load(repo: &dyn Repository, id: &ChannelId) -> Result<Channel> {
    repo.get_channel(id).map_err(missing("channel"))
}

fn save(repo: &dyn Repository, channel: &Channel) -> Result<()> {
    validate_channel(channel)?;
    repo.replace_channel(channel)?;
    Ok(())
}

fn unindex(repo: &dyn Repository, user: &UserId, channel: &ChannelId) {
    if let Err(e) = repo.remove_user_channel(user, channel) {
        warn!(channel = %channel, member = %user, error = %e, "Membership index delete failed");
    }
}

/// Register every member in the index. On failure, undo the entries already
/// written (best effort) and report which member failed; the channel
/// document itself stays.
fn index_members(repo: &dyn Repository, channel: &Channel, at: DateTime<Utc>) -> Result<()> {
    for (n, member) in channel.members.iter().enumerate() {
        if let Err(e) = repo.add_user_channel(&member.member_id, &channel.id, at) {
            error!(
                channel = %channel.id,
                member = %member.member_id,
                error = %e,
                "Membership index insert failed during create"
            );
            for done in &channel.members[..n] {
                unindex(repo, &done.member_id, &channel.id);
            }
            return Err(ChatError::dependency(format!(
                "membership index for member {} failed: {e}",
                member.member_id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use murmur_store::Database;

    use super::*;
    use crate::testutil::Fixture;

    fn group_req(members: &[UserId]) -> NewChannel {
        NewChannel {
            name: None,
            kind: ChannelKind::Group,
            member_ids: members.to_vec(),
            approval_required: false,
        }
    }

    // -- creation -----------------------------------------------------------

    #[tokio::test]
    async fn group_creation_assigns_leader_and_index() {
        let fx = Fixture::new();
        let (a, b, c) = fx.trio().await;
        let channel = fx
            .channels
            .create_channel(&a, group_req(&[b, a, c]))
            .await
            .unwrap();

        assert_eq!(channel.role_of(&a), Role::Leader);
        assert_eq!(channel.role_of(&b), Role::Member);
        assert_eq!(channel.leader(), Some(a));
        assert_eq!(channel.name, "Bob, Alice, Carol");
        assert_eq!(channel.avatar, fx.default_avatar());
        validate_channel(&channel).unwrap();

        for user in [a, b, c] {
            let mine = fx.channels.channels_for_user(&user).await.unwrap();
            assert_eq!(mine.len(), 1);
            assert_eq!(mine[0].id, channel.id);
        }
    }

    #[tokio::test]
    async fn group_creation_rejects_bad_shapes() {
        let fx = Fixture::new();
        let (a, b, c) = fx.trio().await;

        for members in [vec![a, b], vec![a, b, b], vec![a, a, b, c]] {
            let err = fx
                .channels
                .create_channel(&a, group_req(&members))
                .await
                .unwrap_err();
            assert!(matches!(err, ChatError::Validation(_)), "{members:?}: {err}");
        }

        let outsider = UserId::new();
        let err = fx
            .channels
            .create_channel(&outsider, group_req(&[a, b, c]))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[tokio::test]
    async fn private_creation_needs_exactly_two() {
        let fx = Fixture::new();
        let (a, b, c) = fx.trio().await;

        for members in [vec![a], vec![a, b, c], vec![a, a]] {
            let err = fx
                .channels
                .create_channel(
                    &a,
                    NewChannel {
                        name: None,
                        kind: ChannelKind::Private,
                        member_ids: members,
                        approval_required: false,
                    },
                )
                .await
                .unwrap_err();
            assert!(matches!(err, ChatError::Validation(_)));
        }

        let dm = fx
            .channels
            .create_channel(
                &a,
                NewChannel {
                    name: Some("ignored".into()),
                    kind: ChannelKind::Private,
                    member_ids: vec![a, b],
                    approval_required: true,
                },
            )
            .await
            .unwrap();
        assert!(dm.name.is_empty());
        assert_eq!(dm.leader(), None);
        assert!(!dm.settings.approval_required);
        assert_eq!(dm.avatar, fx.avatar_of("Bob"));
        assert!(dm.members.iter().all(|m| m.role == Role::Member));
    }

    #[tokio::test]
    async fn private_channel_is_reused() {
        let fx = Fixture::new();
        let (a, b, _) = fx.trio().await;
        let first = fx.channels.find_or_create_private_channel(&a, &b).await.unwrap();
        let second = fx.channels.find_or_create_private_channel(&b, &a).await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(fx
            .channels
            .find_or_create_private_channel(&a, &a)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn supplied_names_are_capped() {
        let fx = Fixture::new();
        let (a, b, c) = fx.trio().await;
        let long = "é".repeat(80);
        let channel = fx
            .channels
            .create_channel(
                &a,
                NewChannel {
                    name: Some(long),
                    ..group_req(&[a, b, c])
                },
            )
            .await
            .unwrap();
        assert_eq!(channel.name.chars().count(), CHANNEL_NAME_MAX);
        assert!(channel.name.ends_with(ELLIPSIS));
    }

    #[tokio::test]
    async fn create_saga_undoes_partial_index() {
        let fx = Fixture::new();
        let (a, b, c) = fx.trio().await;

        // Fail the index insert for the second member.
        let side = Database::open_at(&fx.db_path()).unwrap();
        side.conn()
            .execute_batch(&format!(
                "CREATE TRIGGER fail_member BEFORE INSERT ON user_channels
                 WHEN NEW.user_id = '{b}'
                 BEGIN SELECT RAISE(ABORT, 'injected'); END;"
            ))
            .unwrap();

        let err = fx
            .channels
            .create_channel(&a, group_req(&[a, b, c]))
            .await
            .unwrap_err();
        match err {
            ChatError::Dependency(reason) => assert!(reason.contains(&b.to_string())),
            other => panic!("unexpected {other:?}"),
        }

        // Member 0 was rolled back, member 2 was never written.
        for user in [a, b, c] {
            assert!(fx.channels.channels_for_user(&user).await.unwrap().is_empty());
        }
        // The channel document itself is retained.
        let kept = fx.channels.search_channels("Alice").await.unwrap();
        assert_eq!(kept.len(), 1);
    }

    // -- moderation ---------------------------------------------------------

    #[tokio::test]
    async fn block_evicts_and_prevents_re_add() {
        let fx = Fixture::new();
        let (a, b, c) = fx.trio().await;
        let d = fx.user("Dave").await;
        let channel = fx.group(&a, &[a, b, c, d]).await;

        let after = fx.channels.block_member(&channel.id, &a, &d).await.unwrap();
        assert!(after.is_blocked(&d));
        assert!(!after.is_member(&d));
        assert!(fx.channels.channels_for_user(&d).await.unwrap().is_empty());

        let err = fx.channels.add_member(&channel.id, &a, &d).await.unwrap_err();
        assert_eq!(err, ChatError::StateConflict(Conflict::TargetBlocked));

        let err = fx.channels.block_member(&channel.id, &a, &d).await.unwrap_err();
        assert_eq!(err, ChatError::StateConflict(Conflict::AlreadyBlocked));

        fx.channels.unblock_member(&channel.id, &a, &d).await.unwrap();
        let back = fx.channels.add_member(&channel.id, &a, &d).await.unwrap();
        assert!(back.is_member(&d));
    }

    #[tokio::test]
    async fn block_rules() {
        let fx = Fixture::new();
        let (a, b, c) = fx.trio().await;
        let channel = fx.group(&a, &[a, b, c]).await;

        let err = fx.channels.block_member(&channel.id, &b, &c).await.unwrap_err();
        assert!(matches!(err, ChatError::PermissionDenied(_)));

        let err = fx.channels.block_member(&channel.id, &a, &a).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));

        fx.channels
            .set_member_role(&channel.id, &a, &b, Role::Deputy)
            .await
            .unwrap();
        let err = fx.channels.block_member(&channel.id, &b, &a).await.unwrap_err();
        assert_eq!(err, ChatError::StateConflict(Conflict::ProtectedRole));

        // Deputies moderate ordinary members, and outsiders can be pre-blocked.
        fx.channels.block_member(&channel.id, &b, &c).await.unwrap();
        let stranger = UserId::new();
        fx.channels.block_member(&channel.id, &b, &stranger).await.unwrap();

        let err = fx
            .channels
            .unblock_member(&channel.id, &a, &UserId::new())
            .await
            .unwrap_err();
        assert_eq!(err, ChatError::StateConflict(Conflict::NotBlocked));
    }

    #[tokio::test]
    async fn outsiders_and_members_cannot_moderate() {
        let fx = Fixture::new();
        let (a, b, c) = fx.trio().await;
        let channel = fx.group(&a, &[a, b, c]).await;
        let outsider = fx.user("Eve").await;

        let err = fx
            .channels
            .add_member(&channel.id, &outsider, &outsider)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::PermissionDenied(_)));

        let err = fx.channels.remove_member(&channel.id, &b, &c).await.unwrap_err();
        assert!(matches!(err, ChatError::PermissionDenied(_)));

        let err = fx
            .channels
            .toggle_approval(&channel.id, &b, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::PermissionDenied(_)));

        let err = fx.channels.dissolve_channel(&channel.id, &b).await.unwrap_err();
        assert!(matches!(err, ChatError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn remove_member_rules() {
        let fx = Fixture::new();
        let (a, b, c) = fx.trio().await;
        let d = fx.user("Dave").await;
        let channel = fx.group(&a, &[a, b, c, d]).await;
        for deputy in [b, c] {
            fx.channels
                .set_member_role(&channel.id, &a, &deputy, Role::Deputy)
                .await
                .unwrap();
        }

        let err = fx.channels.remove_member(&channel.id, &b, &a).await.unwrap_err();
        assert_eq!(err, ChatError::StateConflict(Conflict::LeaderCannotBeRemoved));

        let err = fx.channels.remove_member(&channel.id, &b, &c).await.unwrap_err();
        assert_eq!(err, ChatError::StateConflict(Conflict::ProtectedRole));

        let err = fx
            .channels
            .remove_member(&channel.id, &b, &UserId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));

        let after = fx.channels.remove_member(&channel.id, &b, &d).await.unwrap();
        assert!(!after.is_member(&d));
        assert!(fx.channels.channels_for_user(&d).await.unwrap().is_empty());

        let after = fx.channels.remove_member(&channel.id, &a, &c).await.unwrap();
        assert!(!after.is_member(&c));
    }

    #[tokio::test]
    async fn leader_leave_requires_successor() {
        let fx = Fixture::new();
        let (a, b, c) = fx.trio().await;
        let channel = fx.group(&a, &[a, b, c]).await;

        let err = fx
            .channels
            .leave_channel(&channel.id, &a, None)
            .await
            .unwrap_err();
        assert_eq!(err, ChatError::StateConflict(Conflict::LeaderMustNameSuccessor));

        let after = fx
            .channels
            .leave_channel(&channel.id, &a, Some(&b))
            .await
            .unwrap();
        assert_eq!(after.role_of(&b), Role::Leader);
        assert_eq!(after.leader(), Some(b));
        assert!(!after.is_member(&a));
        assert!(fx.channels.channels_for_user(&a).await.unwrap().is_empty());

        let left = fx.channels.leave_channel(&channel.id, &c, None).await.unwrap();
        assert_eq!(left.member_ids(), vec![b]);
    }

    #[tokio::test]
    async fn leave_rejects_bad_successor_and_private_channels() {
        let fx = Fixture::new();
        let (a, b, c) = fx.trio().await;
        let channel = fx.group(&a, &[a, b, c]).await;

        let stranger = UserId::new();
        let err = fx
            .channels
            .leave_channel(&channel.id, &a, Some(&stranger))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        // Nothing changed.
        let unchanged = fx.channels.get_channel(&channel.id).await.unwrap();
        assert_eq!(unchanged.leader(), Some(a));

        let dm = fx.channels.find_or_create_private_channel(&a, &b).await.unwrap();
        let err = fx.channels.leave_channel(&dm.id, &a, None).await.unwrap_err();
        assert_eq!(err, ChatError::StateConflict(Conflict::PrivateChannel));
    }

    #[tokio::test]
    async fn dissolve_clears_everything() {
        let fx = Fixture::new();
        let (a, b, c) = fx.trio().await;
        let channel = fx.group(&a, &[a, b, c]).await;
        fx.channels
            .block_member(&channel.id, &a, &UserId::new())
            .await
            .unwrap();

        let dissolved = fx.channels.dissolve_channel(&channel.id, &a).await.unwrap();
        assert!(dissolved.members.is_empty());
        assert!(dissolved.blocked.is_empty());
        assert!(dissolved.is_dissolved());
        validate_channel(&dissolved).unwrap();

        for user in [a, b, c] {
            assert!(fx.channels.channels_for_user(&user).await.unwrap().is_empty());
        }
        let err = fx.channels.add_member(&channel.id, &a, &b).await.unwrap_err();
        assert_eq!(err, ChatError::StateConflict(Conflict::ChannelDissolved));
        // Retained for audit.
        assert!(fx.channels.get_channel(&channel.id).await.is_ok());
    }

    #[tokio::test]
    async fn approval_and_leadership_are_leader_only() {
        let fx = Fixture::new();
        let (a, b, c) = fx.trio().await;
        let channel = fx.group(&a, &[a, b, c]).await;

        let on = fx.channels.toggle_approval(&channel.id, &a, true).await.unwrap();
        assert!(on.settings.approval_required);

        fx.channels
            .set_member_role(&channel.id, &a, &b, Role::Deputy)
            .await
            .unwrap();
        let err = fx
            .channels
            .set_member_role(&channel.id, &b, &c, Role::Deputy)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::PermissionDenied(_)));
        let err = fx
            .channels
            .set_member_role(&channel.id, &a, &c, Role::Leader)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));

        let moved = fx
            .channels
            .transfer_leadership(&channel.id, &a, &c)
            .await
            .unwrap();
        assert_eq!(moved.leader(), Some(c));
        assert_eq!(moved.role_of(&a), Role::Member);
        assert_eq!(moved.role_of(&c), Role::Leader);
        validate_channel(&moved).unwrap();

        let err = fx.channels.toggle_approval(&channel.id, &a, false).await.unwrap_err();
        assert!(matches!(err, ChatError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn member_listings_are_enriched() {
        let fx = Fixture::new();
        let (a, b, c) = fx.trio().await;
        let channel = fx.group(&a, &[a, b, c]).await;
        let ghost = UserId::new();
        fx.channels.block_member(&channel.id, &a, &ghost).await.unwrap();

        let members = fx.channels.list_members(&channel.id, &b).await.unwrap();
        assert_eq!(members.len(), 3);
        assert_eq!(members[0].display_name, "Alice");
        assert_eq!(members[0].role, Some(Role::Leader));

        let blocked = fx.channels.list_blocked_members(&channel.id, &a).await.unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].member_id, ghost);
        assert_eq!(
            blocked[0].display_name,
            murmur_shared::constants::UNKNOWN_USER_NAME
        );

        let err = fx
            .channels
            .list_members(&channel.id, &ghost)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn search_skips_private_and_dissolved() {
        let fx = Fixture::new();
        let (a, b, c) = fx.trio().await;
        let keep = fx.named_group(&a, &[a, b, c], "Rust club").await;
        let gone = fx.named_group(&a, &[a, b, c], "Rust archive").await;
        fx.channels.dissolve_channel(&gone.id, &a).await.unwrap();

        let hits = fx.channels.search_channels("rust").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, keep.id);

        assert!(matches!(
            fx.channels.search_channels("  ").await,
            Err(ChatError::Validation(_))
        ));
    }

    // -- pure helpers -------------------------------------------------------

    #[test]
    fn truncation_respects_code_points() {
        assert_eq!(truncate_chars("short", 20), "short");
        let s = "日本語のグループ名がとても長い場合のテスト";
        let t = truncate_chars(s, 20);
        assert_eq!(t.chars().count(), 20);
        assert!(t.ends_with(ELLIPSIS));
        assert!(s.starts_with(t.trim_end_matches(ELLIPSIS)));
    }

    #[test]
    fn group_name_synthesis() {
        let now = Utc::now();
        let names = vec!["Alice".to_string(), "".to_string(), "Bob".to_string()];
        assert_eq!(synthesize_group_name(&names, now), "Alice, Bob");

        let many: Vec<String> = ["Alexandra", "Bartholomew", "Cecilia"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let name = synthesize_group_name(&many, now);
        assert_eq!(name, "Alexandra, Bartho...");

        let fallback = synthesize_group_name(&[], now);
        assert!(fallback.starts_with("Group "));
    }
}
