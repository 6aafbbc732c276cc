//! Fitlink Session Management
//!
//! Keeps exactly one authenticated identity alive across restarts:
//! - memory cache first, durable store second, auto-login last
//! - two fixed credential profiles, switchable with rollback
//! - bounded retries on refresh, missing tenant and 401 responses

mod backend;
mod config;
mod error;
mod http;
mod manager;
mod profile;
mod retry;
mod session;
mod state;
mod store;

pub use backend::{ApiRequest, ApiResponse, AuthBackend, Method, SignInGrant};
pub use config::AuthConfig;
pub use error::AuthError;
pub use http::HttpAuthBackend;
pub use manager::{SessionManager, SwitchOutcome};
pub use profile::{Credentials, Profile, ProfileCredentials};
pub use retry::{RetryPolicy, RetryState};
pub use session::{Identity, Session};
pub use state::AuthState;
pub use store::SessionStore;

pub type Result<T> = std::result::Result<T, AuthError>;
