//! Session manager configuration

use std::time::Duration;

use crate::profile::ProfileCredentials;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Fixed credential pairs used by auto-login
    pub credentials: ProfileCredentials,
    /// Upper bound on every backend call
    pub request_timeout: Duration,
    /// Pause between persisting the token and fetching the full profile
    pub propagation_delay: Duration,
    /// Extra auto-login attempts after a missing-tenant or rejected session
    pub auto_login_retries: u32,
}

impl AuthConfig {
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const DEFAULT_PROPAGATION_DELAY: Duration = Duration::from_millis(100);
    pub const DEFAULT_AUTO_LOGIN_RETRIES: u32 = 1;

    pub fn new(credentials: ProfileCredentials) -> Self {
        Self {
            credentials,
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
            propagation_delay: Self::DEFAULT_PROPAGATION_DELAY,
            auto_login_retries: Self::DEFAULT_AUTO_LOGIN_RETRIES,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_propagation_delay(mut self, delay: Duration) -> Self {
        self.propagation_delay = delay;
        self
    }

    pub fn with_auto_login_retries(mut self, retries: u32) -> Self {
        self.auto_login_retries = retries;
        self
    }
}
