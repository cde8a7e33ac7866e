//! # murmur-store
//!
//! Document persistence for the murmur chat core, backed by SQLite.
//!
//! Channels and messages are kept whole as JSON documents beside the scalar
//! columns used for lookups. The crate exposes a synchronous [`Database`]
//! handle that implements every [`repository`] trait; the server shares it
//! behind a mutex as a `dyn Repository`.

pub mod channels;
pub mod database;
pub mod files;
pub mod membership;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod previews;
pub mod repository;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use repository::{
    ChannelStore, FileStore, MembershipIndex, MessageStore, PreviewStore, Repository, UserStore,
};
