//! Profile lookups used to enrich payloads and synthesize group names.

use async_trait::async_trait;

use murmur_shared::constants::UNKNOWN_USER_NAME;
use murmur_shared::{ChatError, UserId};

use crate::SharedRepo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub display_name: String,
    /// Absolute URL, or empty.
    pub avatar: String,
}

#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn lookup(&self, user: &UserId) -> Result<Option<Profile>, ChatError>;

    async fn avatar(&self, user: &UserId) -> Result<String, ChatError> {
        Ok(self.lookup(user).await?.map(|p| p.avatar).unwrap_or_default())
    }

    /// Lookup that never fails the caller: unknown or unreachable profiles
    /// degrade to the placeholder name.
    async fn profile_or_placeholder(&self, user: &UserId) -> Profile {
        match self.lookup(user).await {
            Ok(Some(profile)) => profile,
            Ok(None) => placeholder(),
            Err(e) => {
                tracing::warn!(user = %user, error = %e, "Profile lookup failed");
                placeholder()
            }
        }
    }
}

fn placeholder() -> Profile {
    Profile {
        display_name: UNKNOWN_USER_NAME.to_string(),
        avatar: String::new(),
    }
}

/// Reads the `users` mirror in the document store.
pub struct StoreProfiles {
    repo: SharedRepo,
    public_base_url: String,
}

impl StoreProfiles {
    pub fn new(repo: SharedRepo, public_base_url: impl Into<String>) -> Self {
        Self {
            repo,
            public_base_url: public_base_url.into(),
        }
    }
}

#[async_trait]
impl ProfileDirectory for StoreProfiles {
    async fn lookup(&self, user: &UserId) -> Result<Option<Profile>, ChatError> {
        let found = self.repo.lock().await.get_user(user)?;
        Ok(found.map(|u| Profile {
            display_name: u.display_name,
            avatar: absolute_url(&self.public_base_url, &u.avatar),
        }))
    }
}

/// Prefix relative paths with the public base URL.
pub fn absolute_url(base: &str, path: &str) -> String {
    if path.is_empty() || path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
