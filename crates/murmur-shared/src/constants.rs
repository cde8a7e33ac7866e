/// How long after sending a message its sender may still recall it (seconds)
pub const DEFAULT_RECALL_WINDOW_SECS: u64 = 120;

/// How long after sending a message its sender may still edit it (seconds)
pub const DEFAULT_EDIT_WINDOW_SECS: u64 = 15 * 60;

/// Minimum members of a group channel at creation
pub const MIN_GROUP_MEMBERS: usize = 3;

/// Exact member count of a private channel
pub const PRIVATE_MEMBERS: usize = 2;

/// Character budget for a synthesized group name
pub const GROUP_NAME_BUDGET: usize = 20;

/// Hard cap on any stored channel name (characters)
pub const CHANNEL_NAME_MAX: usize = 50;

/// Marker appended to truncated names
pub const ELLIPSIS: &str = "...";

/// Prefix of the fallback group name (followed by a timestamp)
pub const DEFAULT_GROUP_NAME_PREFIX: &str = "Group";

/// Preview label shown in place of recalled content
pub const RECALLED_LABEL: &str = "Message recalled";

/// Preview labels for attachment-bearing messages
pub const FILE_LABEL: &str = "[File]";
pub const VOICE_LABEL: &str = "[Voice message]";
pub const STICKER_LABEL: &str = "Sticker";
pub const ATTACHMENT_LABEL: &str = "[Attachment]";

/// Display name used when a blocked identity has no profile
pub const UNKNOWN_USER_NAME: &str = "Unknown user";

/// History page size bounds
pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 100;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;
