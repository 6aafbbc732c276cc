//! Fitlink Core
//!
//! Wires the session manager, the realtime coordinator and the bridge that
//! tears channels down whenever the signed-in identity changes.

mod bridge;
mod client;
mod config;
mod error;

pub use bridge::IdentityBridge;
pub use client::GymClient;
pub use config::{Config, RetrySettings};
pub use error::CoreError;

// Re-export core components
pub use fitlink_auth::{
    ApiRequest, ApiResponse, AuthBackend, AuthError, AuthState, Credentials, HttpAuthBackend,
    Identity, Profile, ProfileCredentials, RetryPolicy, RetryState, Session, SessionManager,
    SwitchOutcome,
};
pub use fitlink_realtime::sources::{
    CheckIn, CheckInSource, NameResolver, PreferenceSource, PreferenceUpdate, TrainingSession,
    TrainingSessionEvent, TrainingSessionSource,
};
pub use fitlink_realtime::{
    AppLifecycle, Channel, ChannelSpec, ConnectionStatus, LocalBroker, RealtimeBackend,
    RealtimeCoordinator, RealtimeError, Subscription, Teardown,
};
pub use fitlink_storage::{Database, KeyValueStore, MemoryStore, StorageError};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(true).init();
}
