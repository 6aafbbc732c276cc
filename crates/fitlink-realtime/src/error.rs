//! Realtime error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RealtimeError {
    #[error("Failed to join channel {channel}: {reason}")]
    Join { channel: String, reason: String },

    #[error("Failed to leave channel {channel}: {reason}")]
    Leave { channel: String, reason: String },

    #[error("Channel {channel}: {message}")]
    Channel { channel: String, message: String },

    #[error("Malformed change event: {0}")]
    Decode(String),
}
