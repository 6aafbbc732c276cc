//! Session data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::Result;

/// Immutable snapshot of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
    /// Business the user belongs to. Every realtime filter is scoped by it.
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn new(id: impl Into<String>, email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            name: name.into(),
            role: "client".to_string(),
            tenant_id: None,
            email_verified: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub identity: Identity,
    /// Bearer token; also sent as the session cookie
    pub token: String,
    /// Absent means the backend did not report an expiry
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Backend-side session record id
    #[serde(default)]
    pub session_id: Option<String>,
}

impl Session {
    pub fn new(identity: Identity, token: impl Into<String>) -> Self {
        Self {
            identity,
            token: token.into(),
            expires_at: None,
            session_id: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.identity
            .tenant_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
    }

    /// A session without id, email or tenant must never be cached or handed out.
    pub fn validate(&self) -> Result<()> {
        if self.identity.id.trim().is_empty() {
            return Err(AuthError::InvalidSession("missing user id".to_string()));
        }
        if self.identity.email.trim().is_empty() {
            return Err(AuthError::InvalidSession("missing email".to_string()));
        }
        if self.tenant_id().is_none() {
            return Err(AuthError::MissingTenant);
        }
        Ok(())
    }
}
