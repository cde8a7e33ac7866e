use thiserror::Error;

/// Failures of the messaging core, as returned to request handlers and the
/// socket loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Forbidden: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    StateConflict(#[from] Conflict),

    #[error("Dependency failure: {0}")]
    Dependency(String),
}

impl ChatError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::PermissionDenied(reason.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn dependency(reason: impl Into<String>) -> Self {
        Self::Dependency(reason.into())
    }
}

/// Actions that are well-formed and permitted by role, but violate a
/// lifecycle invariant of the channel or message.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    #[error("Recall window expired")]
    RecallWindowExpired,

    #[error("Edit window expired")]
    EditWindowExpired,

    #[error("Message has been recalled")]
    MessageRecalled,

    #[error("Cannot block or unblock a leader or deputy")]
    ProtectedRole,

    #[error("Leader must name a new leader before leaving")]
    LeaderMustNameSuccessor,

    #[error("The leader cannot be removed")]
    LeaderCannotBeRemoved,

    #[error("Member already exists")]
    AlreadyMember,

    #[error("Member is already blocked")]
    AlreadyBlocked,

    #[error("This member is blocked and cannot be added")]
    TargetBlocked,

    #[error("Member is not in the blocked list")]
    NotBlocked,

    #[error("Channel has been dissolved")]
    ChannelDissolved,

    #[error("Operation not supported on a private channel")]
    PrivateChannel,
}

impl Conflict {
    /// "Too late" rather than "not allowed".
    pub fn is_window_expired(&self) -> bool {
        matches!(self, Self::RecallWindowExpired | Self::EditWindowExpired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_conflicts_are_distinguishable() {
        assert!(Conflict::RecallWindowExpired.is_window_expired());
        assert!(Conflict::EditWindowExpired.is_window_expired());
        assert!(!Conflict::ProtectedRole.is_window_expired());
    }

    #[test]
    fn conflict_converts_into_chat_error() {
        let err: ChatError = Conflict::AlreadyBlocked.into();
        assert_eq!(err, ChatError::StateConflict(Conflict::AlreadyBlocked));
        assert_eq!(err.to_string(), "Member is already blocked");
    }
}
