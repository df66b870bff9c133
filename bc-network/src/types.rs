use bc_primitives::NodeId;

/// Lifecycle of one peer connection. Only `Active` accepts sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Closing,
    Closed,
}

/// Observable reasons a session can end, surfaced to the installed
/// message handler and to peers where applicable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    DisconnectRequested,
    TCPError,
    BadProtocol,
    DuplicatePeer,
    ClientQuit,
    UserReason,
    LocalIdentity,
}

#[derive(Debug, Clone, Copy)]
pub struct SendOptions {
    /// Zero means no timeout: the callback only fires on response or drop.
    pub timeout: std::time::Duration,
}

impl SendOptions {
    pub fn no_timeout() -> Self {
        Self { timeout: std::time::Duration::ZERO }
    }

    pub fn with_timeout(timeout: std::time::Duration) -> Self {
        Self { timeout }
    }
}

/// Identifies the remote peer of a session, used for duplicate-session
/// detection by the `Host`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub NodeId);
