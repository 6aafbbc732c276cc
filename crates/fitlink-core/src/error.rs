//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] fitlink_storage::StorageError),

    #[error("Auth error: {0}")]
    Auth(#[from] fitlink_auth::AuthError),

    #[error("Realtime error: {0}")]
    Realtime(#[from] fitlink_realtime::RealtimeError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

// Config files and data directories are the only direct fs access
impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Config(e.to_string())
    }
}
