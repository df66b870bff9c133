use crate::types::DisconnectReason;

/// Error delivered to a pending response callback, or to the session-level
/// handler on drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session is not active")]
    Inactive,

    #[error("request timed out")]
    NetworkTimeout,

    #[error("peer sent a malformed frame")]
    Protocol,

    #[error("session closed due to a duplicate peer connection")]
    DuplicateSession,

    #[error("session disconnected: {0:?}")]
    Disconnect(DisconnectReason),
}
