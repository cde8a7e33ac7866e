//! # murmur-shared
//!
//! Types shared by the store and the server: identifiers, role and message
//! enums, fixed windows and labels, the error taxonomy of the messaging core,
//! and the realtime wire envelopes.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::{ChatError, Conflict};
pub use types::{ChannelId, ChannelKind, MessageId, MessageStatus, MessageType, Role, UserId};
