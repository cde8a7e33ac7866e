//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::Duration;

use murmur_shared::constants::{
    DEFAULT_EDIT_WINDOW_SECS, DEFAULT_HTTP_PORT, DEFAULT_RECALL_WINDOW_SECS,
};

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API and websocket endpoint.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite document store.
    /// Env: `DATABASE_PATH`
    /// Default: `./murmur.db`
    pub database_path: PathBuf,

    /// Prefix for avatar paths that are not already absolute URLs.
    /// Env: `PUBLIC_BASE_URL`
    /// Default: `http://localhost:8080`
    pub public_base_url: String,

    /// Avatar assigned to newly created group channels.
    /// Env: `DEFAULT_CHANNEL_AVATAR_URL`
    pub default_channel_avatar: String,

    /// Env: `RECALL_WINDOW_SECS`
    pub recall_window_secs: u64,

    /// Env: `EDIT_WINDOW_SECS`
    pub edit_window_secs: u64,

    /// Frames buffered per connection before a slow client starts losing them.
    /// Env: `OUTBOUND_QUEUE`
    pub outbound_queue: usize,

    /// `token=userUuid,...` table for the development authenticator.
    /// Env: `AUTH_TOKENS`
    pub auth_tokens: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./murmur.db"),
            public_base_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            default_channel_avatar: "/uploads/default-group.png".to_string(),
            recall_window_secs: DEFAULT_RECALL_WINDOW_SECS,
            edit_window_secs: DEFAULT_EDIT_WINDOW_SECS,
            outbound_queue: 256,
            auth_tokens: String::new(),
        }
    }
}

// Token table stays out of logs.
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("public_base_url", &self.public_base_url)
            .field("default_channel_avatar", &self.default_channel_avatar)
            .field("recall_window_secs", &self.recall_window_secs)
            .field("edit_window_secs", &self.edit_window_secs)
            .field("outbound_queue", &self.outbound_queue)
            .finish_non_exhaustive()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = get("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = get("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(url) = get("PUBLIC_BASE_URL") {
            config.public_base_url = url.trim_end_matches('/').to_string();
        }

        if let Some(url) = get("DEFAULT_CHANNEL_AVATAR_URL") {
            if !url.is_empty() {
                config.default_channel_avatar = url;
            }
        }

        if let Some(secs) = parse_number::<u64>(&get, "RECALL_WINDOW_SECS") {
            config.recall_window_secs = secs;
        }

        if let Some(secs) = parse_number::<u64>(&get, "EDIT_WINDOW_SECS") {
            config.edit_window_secs = secs;
        }

        if let Some(n) = parse_number::<usize>(&get, "OUTBOUND_QUEUE") {
            if n > 0 {
                config.outbound_queue = n;
            }
        }

        if let Some(tokens) = get("AUTH_TOKENS") {
            config.auth_tokens = tokens;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }

    pub fn recall_window(&self) -> Duration {
        Duration::seconds(self.recall_window_secs as i64)
    }

    pub fn edit_window(&self) -> Duration {
        Duration::seconds(self.edit_window_secs as i64)
    }
}

fn parse_number<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = get(key)?;
    match raw.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid number, using default");
            None
        }
    }
}
