//! Shared fixture for engine, hub and ingress tests: a real SQLite store in a
//! temp dir with every service wired the way `main` wires them.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::TempDir;
use tokio::sync::{mpsc, Mutex};

use murmur_shared::{ChannelKind, UserId};
use murmur_store::{Channel, Database, User};

use crate::history::HistoryService;
use crate::hub::Hub;
use crate::membership::{ChannelService, NewChannel};
use crate::messaging::MessageService;
use crate::profiles::StoreProfiles;
use crate::SharedRepo;

pub const BASE_URL: &str = "http://chat.test";
const GROUP_AVATAR: &str = "http://chat.test/uploads/group.png";

pub struct Fixture {
    dir: TempDir,
    pub repo: SharedRepo,
    pub channels: ChannelService,
    pub messages: MessageService,
    pub history: HistoryService,
    pub hub: Hub,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_windows(Duration::minutes(2), Duration::minutes(15))
    }

    pub fn with_windows(recall: Duration, edit: Duration) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("murmur.db")).unwrap();
        let repo: SharedRepo = Arc::new(Mutex::new(db));
        let profiles = Arc::new(StoreProfiles::new(repo.clone(), BASE_URL));

        let channels = ChannelService::new(repo.clone(), profiles.clone(), GROUP_AVATAR);
        let messages = MessageService::new(repo.clone(), profiles.clone(), recall, edit);
        let history = HistoryService::new(repo.clone(), profiles, messages.clone());
        let hub = Hub::new(repo.clone());

        Self {
            dir,
            repo,
            channels,
            messages,
            history,
            hub,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("murmur.db")
    }

    pub fn default_avatar(&self) -> &'static str {
        GROUP_AVATAR
    }

    pub fn avatar_of(&self, name: &str) -> String {
        format!("{BASE_URL}/uploads/{}.png", name.to_lowercase())
    }

    pub async fn user(&self, name: &str) -> UserId {
        let id = UserId::new();
        self.repo
            .lock()
            .await
            .upsert_user(&User {
                id,
                display_name: name.to_string(),
                avatar: format!("/uploads/{}.png", name.to_lowercase()),
                created_at: Utc::now(),
            })
            .unwrap();
        id
    }

    pub async fn trio(&self) -> (UserId, UserId, UserId) {
        (
            self.user("Alice").await,
            self.user("Bob").await,
            self.user("Carol").await,
        )
    }

    pub async fn group(&self, creator: &UserId, members: &[UserId]) -> Channel {
        self.create(creator, members, None).await
    }

    pub async fn named_group(&self, creator: &UserId, members: &[UserId], name: &str) -> Channel {
        self.create(creator, members, Some(name)).await
    }

    async fn create(&self, creator: &UserId, members: &[UserId], name: Option<&str>) -> Channel {
        self.channels
            .create_channel(
                creator,
                NewChannel {
                    name: name.map(str::to_string),
                    kind: ChannelKind::Group,
                    member_ids: members.to_vec(),
                    approval_required: false,
                },
            )
            .await
            .unwrap()
    }

    /// A fake live connection for `user`.
    pub async fn connect(&self, user: &UserId) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(64);
        self.hub.register(*user, tx).await;
        rx
    }
}

/// Drain everything currently queued on a fake connection.
pub fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        out.push(serde_json::from_str(&frame).unwrap());
    }
    out
}
