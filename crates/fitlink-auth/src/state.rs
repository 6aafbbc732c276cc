//! Session lifecycle state machine
//!
//! ```text
//! Unauthenticated
//!   ↓ auto-login / sign-in
//! Authenticated
//!   ↓ expiry, 401 or explicit refresh
//! Refreshing ──failure──→ Unauthenticated
//!   ↓ success
//! Authenticated
//! ```
//!
//! Sign-out forces `Unauthenticated` from any state.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthState {
    #[default]
    Unauthenticated,
    Authenticated,
    Refreshing,
}

impl AuthState {
    pub fn can_transition_to(&self, target: AuthState) -> bool {
        match (self, target) {
            (AuthState::Unauthenticated, AuthState::Authenticated) => true,
            (AuthState::Authenticated, AuthState::Refreshing) => true,
            (AuthState::Refreshing, AuthState::Authenticated) => true,
            // Failure from refresh, or sign-out from anywhere
            (_, AuthState::Unauthenticated) => true,
            (a, b) if *a == b => true,
            _ => false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::Authenticated => "authenticated",
            AuthState::Refreshing => "refreshing",
        }
    }
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(AuthState::Unauthenticated.can_transition_to(AuthState::Authenticated));
        assert!(AuthState::Authenticated.can_transition_to(AuthState::Refreshing));
        assert!(AuthState::Refreshing.can_transition_to(AuthState::Authenticated));
        assert!(AuthState::Refreshing.can_transition_to(AuthState::Unauthenticated));
        assert!(AuthState::Authenticated.can_transition_to(AuthState::Unauthenticated));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!AuthState::Unauthenticated.can_transition_to(AuthState::Refreshing));
    }
}
