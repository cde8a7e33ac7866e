//! # murmur-server
//!
//! Channel-based chat core:
//! - **Membership engine** for private and group channels, roles, blocking
//!   and dissolution
//! - **Message engine** for send, edit, recall, per-viewer hide and reactions
//! - **Connection hub** that fans realtime events out to online members
//! - **REST API** and **websocket ingress** (axum) on one listener

mod api;
mod auth;
mod config;
mod error;
mod history;
mod hub;
mod ingress;
mod membership;
mod messaging;
mod profiles;
#[cfg(test)]
mod testutil;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use murmur_store::{Database, Repository};

use crate::api::AppState;
use crate::auth::TokenTable;
use crate::config::ServerConfig;
use crate::history::HistoryService;
use crate::hub::Hub;
use crate::membership::ChannelService;
use crate::messaging::MessageService;
use crate::profiles::{absolute_url, StoreProfiles};

/// The document store, shared by every engine.
pub type SharedRepo = Arc<Mutex<dyn Repository>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,murmur_server=debug,murmur_store=info")),
        )
        .init();

    info!("Starting murmur server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the store and build the engines
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)?;
    info!(path = %config.database_path.display(), "Document store ready");
    let repo: SharedRepo = Arc::new(Mutex::new(db));

    let profiles = Arc::new(StoreProfiles::new(repo.clone(), config.public_base_url.clone()));
    let default_avatar = absolute_url(&config.public_base_url, &config.default_channel_avatar);

    let channels = ChannelService::new(repo.clone(), profiles.clone(), default_avatar);
    let messages = MessageService::new(
        repo.clone(),
        profiles.clone(),
        config.recall_window(),
        config.edit_window(),
    );
    let history = HistoryService::new(repo.clone(), profiles, messages.clone());
    let hub = Hub::new(repo);

    let tokens = TokenTable::parse(&config.auth_tokens);
    if tokens.is_empty() {
        tracing::warn!("AUTH_TOKENS is empty; every request will be rejected");
    } else {
        info!(tokens = tokens.len(), "Token authenticator loaded");
    }

    let http_addr = config.http_addr;
    let app_state = AppState {
        channels,
        messages,
        history,
        hub,
        auth: Arc::new(tokens),
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
