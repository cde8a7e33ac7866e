use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// User identity as handed over by the authentication collaborator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ChannelId(pub Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! uuid_display {
    ($($ty:ident),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl FromStr for $ty {
                type Err = uuid::Error;

                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    Uuid::parse_str(s.trim()).map(Self)
                }
            }
        )*
    };
}

uuid_display!(UserId, ChannelId, MessageId);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Private,
    Group,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "Private",
            Self::Group => "Group",
        }
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Private" => Ok(Self::Private),
            "Group" => Ok(Self::Group),
            other => Err(format!("invalid channel kind '{other}'")),
        }
    }
}

/// Role of a member inside a group channel, most privileged first.
///
/// Private channels carry `Member` for both participants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Role {
    Leader,
    Deputy,
    Member,
}

impl Role {
    /// Leader and Deputy may moderate (add, remove, block, unblock).
    pub fn can_moderate(&self) -> bool {
        matches!(self, Self::Leader | Self::Deputy)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MessageType {
    Text,
    Voice,
    Link,
    Icon,
    Sticker,
    Location,
    Contact,
    Reaction,
    File,
}

impl MessageType {
    /// Types whose payload lives in file storage; `content` stays empty.
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::File | Self::Voice)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "Text",
            Self::Voice => "Voice",
            Self::Link => "Link",
            Self::Icon => "Icon",
            Self::Sticker => "Sticker",
            Self::Location => "Location",
            Self::Contact => "Contact",
            Self::Reaction => "Reaction",
            Self::File => "File",
        }
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Text" => Self::Text,
            "Voice" => Self::Voice,
            "Link" => Self::Link,
            "Icon" => Self::Icon,
            "Sticker" => Self::Sticker,
            "Location" => Self::Location,
            "Contact" => Self::Contact,
            "Reaction" => Self::Reaction,
            "File" => Self::File,
            other => return Err(format!("invalid message type '{other}'")),
        })
    }
}

/// Delivery status. Ordered: a message only ever moves forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageStatus {
    Sending,
    Sent,
    Received,
    Seen,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = ChannelId(Uuid::nil());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000000\"");
        let back: ChannelId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn channel_kind_parsing() {
        assert_eq!("Group".parse::<ChannelKind>().unwrap(), ChannelKind::Group);
        assert!("Broadcast".parse::<ChannelKind>().is_err());
    }

    #[test]
    fn message_type_text_matches_serde() {
        for ty in [MessageType::Text, MessageType::Voice, MessageType::Sticker] {
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{}\"", ty.as_str()));
            assert_eq!(ty.as_str().parse::<MessageType>().unwrap(), ty);
        }
    }

    #[test]
    fn status_only_orders_forward() {
        assert!(MessageStatus::Sending < MessageStatus::Sent);
        assert!(MessageStatus::Received < MessageStatus::Seen);
    }

    #[test]
    fn only_leader_and_deputy_moderate() {
        assert!(Role::Leader.can_moderate());
        assert!(Role::Deputy.can_moderate());
        assert!(!Role::Member.can_moderate());
    }
}
