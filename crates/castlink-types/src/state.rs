//! Channel and connection lifecycle states.

use serde::{Deserialize, Serialize};

/// State of a message channel.
///
/// A channel is one-shot: once it leaves `Connected` it is never
/// resurrected — a fresh channel is created for any future need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelState {
    /// No live transport path.
    Closed,
    /// Transport path being established.
    Connecting,
    /// Live; `send` is permitted.
    Connected,
    /// Presentation torn down; terminal.
    Terminated,
}

impl ChannelState {
    /// Whether `send` is permitted in this state.
    pub fn can_send(self) -> bool {
        self == Self::Connected
    }

    /// Whether the channel still counts as live for reuse purposes.
    ///
    /// A connection keeps handing out the same channel while it is
    /// connecting or connected; anything else triggers a fresh creation.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// State of a connection.
///
/// Mirrors the state of the channel the connection currently holds, and
/// reverts toward `Closed` when the channel is lost. `Terminated` is
/// terminal and only ever entered through an explicit terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No live channel; a new one may still be established.
    Closed,
    /// Channel establishment in progress.
    Connecting,
    /// Live channel; messages flow.
    Connected,
    /// Torn down for good; terminal.
    Terminated,
}

impl ConnectionState {
    /// Whether the connection can still be closed gracefully.
    pub fn can_close(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    /// Whether this is the terminal state.
    pub fn is_terminal(self) -> bool {
        self == Self::Terminated
    }
}

impl From<ChannelState> for ConnectionState {
    fn from(state: ChannelState) -> Self {
        match state {
            ChannelState::Closed => Self::Closed,
            ChannelState::Connecting => Self::Connecting,
            ChannelState::Connected => Self::Connected,
            ChannelState::Terminated => Self::Terminated,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connected_can_send() {
        assert!(ChannelState::Connected.can_send());
        assert!(!ChannelState::Connecting.can_send());
        assert!(!ChannelState::Closed.can_send());
        assert!(!ChannelState::Terminated.can_send());
    }

    #[test]
    fn liveness_covers_connecting() {
        assert!(ChannelState::Connecting.is_live());
        assert!(ChannelState::Connected.is_live());
        assert!(!ChannelState::Closed.is_live());
        assert!(!ChannelState::Terminated.is_live());
    }

    #[test]
    fn connection_state_adopts_channel_state() {
        assert_eq!(
            ConnectionState::from(ChannelState::Connected),
            ConnectionState::Connected
        );
        assert_eq!(
            ConnectionState::from(ChannelState::Closed),
            ConnectionState::Closed
        );
    }

    #[test]
    fn terminated_is_terminal() {
        assert!(ConnectionState::Terminated.is_terminal());
        assert!(!ConnectionState::Terminated.can_close());
    }
}
