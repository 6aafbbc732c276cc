//! Channel State Machine
//!
//! ```text
//! Unsubscribed
//!   ↓ subscribe
//! Subscribing ──error / timeout──→ Errored
//!   ↓ joined                          ↓ resume
//! Subscribed ──resume──→ Subscribing ←┘
//! ```
//!
//! Unsubscribe or teardown returns any state to `Unsubscribed`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    #[default]
    Unsubscribed,
    Subscribing,
    Subscribed,
    Errored,
}

impl ChannelState {
    pub fn can_transition_to(&self, target: ChannelState) -> bool {
        match (self, target) {
            (ChannelState::Unsubscribed, ChannelState::Subscribing) => true,
            (ChannelState::Subscribing, ChannelState::Subscribed) => true,
            (ChannelState::Subscribing, ChannelState::Errored) => true,
            (ChannelState::Subscribed, ChannelState::Errored) => true,
            // Resume re-joins live and failed channels alike
            (ChannelState::Subscribed, ChannelState::Subscribing) => true,
            (ChannelState::Errored, ChannelState::Subscribing) => true,
            // A failed channel can still be reported joined by the backend
            (ChannelState::Errored, ChannelState::Subscribed) => true,
            (_, ChannelState::Unsubscribed) => true,
            (a, b) if *a == b => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Unsubscribed => "unsubscribed",
            ChannelState::Subscribing => "subscribing",
            ChannelState::Subscribed => "subscribed",
            ChannelState::Errored => "errored",
        }
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle callback values reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    Subscribed,
    ChannelError,
    TimedOut,
    Closed,
}

impl ChannelStatus {
    pub fn channel_state(&self) -> ChannelState {
        match self {
            ChannelStatus::Subscribed => ChannelState::Subscribed,
            ChannelStatus::ChannelError | ChannelStatus::TimedOut => ChannelState::Errored,
            ChannelStatus::Closed => ChannelState::Unsubscribed,
        }
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        match self {
            ChannelStatus::Subscribed => ConnectionStatus::Connected,
            ChannelStatus::ChannelError | ChannelStatus::TimedOut => ConnectionStatus::Error,
            ChannelStatus::Closed => ConnectionStatus::Connecting,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ChannelStatus::ChannelError | ChannelStatus::TimedOut)
    }
}

/// What a subscriber shows: a non-blocking connection indicator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn from_channel_state(state: ChannelState) -> Self {
        match state {
            ChannelState::Subscribed => ConnectionStatus::Connected,
            ChannelState::Errored => ConnectionStatus::Error,
            ChannelState::Unsubscribed | ChannelState::Subscribing => ConnectionStatus::Connecting,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(ChannelState::Unsubscribed.can_transition_to(ChannelState::Subscribing));
        assert!(ChannelState::Subscribing.can_transition_to(ChannelState::Subscribed));
        assert!(ChannelState::Subscribing.can_transition_to(ChannelState::Errored));
        assert!(ChannelState::Errored.can_transition_to(ChannelState::Subscribing));
        assert!(ChannelState::Subscribed.can_transition_to(ChannelState::Unsubscribed));
    }

    #[test]
    fn test_invalid_transitions() {
        // Must go through Subscribing first
        assert!(!ChannelState::Unsubscribed.can_transition_to(ChannelState::Subscribed));
        assert!(!ChannelState::Unsubscribed.can_transition_to(ChannelState::Errored));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ChannelStatus::TimedOut.connection_status(),
            ConnectionStatus::Error
        );
        assert_eq!(
            ChannelStatus::Closed.channel_state(),
            ChannelState::Unsubscribed
        );
        assert!(!ChannelStatus::Closed.is_failure());
    }
}
