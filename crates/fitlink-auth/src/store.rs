//! Session Store
//!
//! Typed get/set/delete of the session record, bearer token and active
//! profile against any durable key-value backend. No policy lives here.

use std::sync::Arc;

use fitlink_storage::KeyValueStore;

use crate::profile::Profile;
use crate::session::Session;
use crate::Result;

pub const SESSION_KEY: &str = "auth.session";
pub const TOKEN_KEY: &str = "auth.token";
pub const PROFILE_KEY: &str = "auth.profile";

#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Load the persisted session. Unreadable or incomplete records yield `None`.
    pub fn load_session(&self) -> Result<Option<Session>> {
        let Some(raw) = self.kv.get(SESSION_KEY)? else {
            return Ok(None);
        };

        let session: Session = match serde_json::from_str(&raw) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "Stored session is unreadable");
                return Ok(None);
            }
        };

        if let Err(e) = session.validate() {
            tracing::warn!(
                user_id = %session.identity.id,
                error = %e,
                "Stored session is missing required fields"
            );
            return Ok(None);
        }

        Ok(Some(session))
    }

    pub fn save_session(&self, session: &Session) -> Result<()> {
        let json = serde_json::to_string(session)?;
        self.kv.set(SESSION_KEY, &json)?;
        tracing::debug!(user_id = %session.identity.id, "Session stored");
        Ok(())
    }

    pub fn load_token(&self) -> Result<Option<String>> {
        Ok(self.kv.get(TOKEN_KEY)?.filter(|t| !t.is_empty()))
    }

    pub fn save_token(&self, token: &str) -> Result<()> {
        self.kv.set(TOKEN_KEY, token)?;
        Ok(())
    }

    /// Remove the token only if it is still the one given.
    pub fn discard_token(&self, token: &str) -> Result<()> {
        if self.load_token()?.as_deref() == Some(token) {
            self.kv.delete(TOKEN_KEY)?;
        }
        Ok(())
    }

    /// Delete session and token together. The profile survives.
    pub fn clear(&self) -> Result<()> {
        self.kv.delete_many(&[SESSION_KEY, TOKEN_KEY])?;
        tracing::debug!("Session cleared");
        Ok(())
    }

    pub fn load_profile(&self) -> Result<Profile> {
        let profile = match self.kv.get(PROFILE_KEY)? {
            Some(raw) => raw.parse().unwrap_or_else(|e: String| {
                tracing::warn!(error = %e, "Stored profile is unreadable, using primary");
                Profile::Primary
            }),
            None => Profile::Primary,
        };
        Ok(profile)
    }

    pub fn save_profile(&self, profile: Profile) -> Result<()> {
        self.kv.set(PROFILE_KEY, profile.as_str())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Identity;
    use fitlink_storage::{Database, MemoryStore};

    fn session() -> Session {
        Session::new(
            Identity::new("u1", "tv@example.com", "TV").with_tenant("t1"),
            "tok-1",
        )
    }

    #[test]
    fn test_session_round_trip_in_sqlite() {
        let db = Database::open_in_memory().unwrap();
        let store = SessionStore::new(Arc::new(db));

        assert_eq!(store.load_session().unwrap(), None);
        store.save_session(&session()).unwrap();
        assert_eq!(store.load_session().unwrap(), Some(session()));
    }

    #[test]
    fn test_incomplete_or_corrupt_sessions_are_ignored() {
        let kv = MemoryStore::new();
        let store = SessionStore::new(Arc::new(kv.clone()));

        let mut no_tenant = session();
        no_tenant.identity.tenant_id = None;
        store.save_session(&no_tenant).unwrap();
        assert_eq!(store.load_session().unwrap(), None);

        kv.set(SESSION_KEY, "{not json").unwrap();
        assert_eq!(store.load_session().unwrap(), None);
    }

    #[test]
    fn test_clear_keeps_profile() {
        let store = SessionStore::new(Arc::new(MemoryStore::new()));
        store.save_session(&session()).unwrap();
        store.save_token("tok-1").unwrap();
        store.save_profile(Profile::Secondary).unwrap();

        store.clear().unwrap();

        assert_eq!(store.load_session().unwrap(), None);
        assert_eq!(store.load_token().unwrap(), None);
        assert_eq!(store.load_profile().unwrap(), Profile::Secondary);
    }

    #[test]
    fn test_profile_defaults_to_primary() {
        let kv = MemoryStore::new();
        let store = SessionStore::new(Arc::new(kv.clone()));
        assert_eq!(store.load_profile().unwrap(), Profile::Primary);

        kv.set(PROFILE_KEY, "garbage").unwrap();
        assert_eq!(store.load_profile().unwrap(), Profile::Primary);
    }

    #[test]
    fn test_discard_token_only_removes_matching() {
        let store = SessionStore::new(Arc::new(MemoryStore::new()));
        store.save_token("new").unwrap();

        store.discard_token("old").unwrap();
        assert_eq!(store.load_token().unwrap().as_deref(), Some("new"));

        store.discard_token("new").unwrap();
        assert_eq!(store.load_token().unwrap(), None);
    }
}
