//! Auth error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Storage error: {0}")]
    Storage(#[from] fitlink_storage::StorageError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Unexpected response status: {0}")]
    Status(u16),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Session is missing a tenant id")]
    MissingTenant,

    #[error("Superseded by a newer session operation")]
    Superseded,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl AuthError {
    /// Errors after which another auto-login attempt can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::MissingTenant | AuthError::Unauthorized)
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AuthError::Timeout
        } else if let Some(status) = err.status() {
            AuthError::Status(status.as_u16())
        } else {
            AuthError::Transport(err.to_string())
        }
    }
}

impl From<url::ParseError> for AuthError {
    fn from(err: url::ParseError) -> Self {
        AuthError::InvalidUrl(err.to_string())
    }
}
