//! Client configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fitlink_auth::{AuthConfig, Credentials, ProfileCredentials, RetryPolicy};
use fitlink_realtime::SubscriptionConfig;

use crate::error::CoreError;
use crate::Result;

/// Manual retry schedule for the "not authenticated" screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub base_ms: u64,
    pub cap_ms: u64,
    pub max_retries: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            cap_ms: 10_000,
            max_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the database file
    pub database_path: PathBuf,
    /// Auth API base URL
    pub api_url: String,
    /// Fixed credential pairs for the two operating profiles
    pub credentials: ProfileCredentials,
    pub request_timeout_ms: u64,
    /// Pause between storing a fresh token and fetching the profile
    pub propagation_delay_ms: u64,
    pub subscription_debounce_ms: u64,
    pub auto_login_retries: u32,
    pub retry: RetrySettings,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            database_path: data_dir.join("fitlink.db"),
            api_url: "http://localhost:3000".to_string(),
            credentials: ProfileCredentials::new(
                Credentials::new("", ""),
                Credentials::new("", ""),
            ),
            request_timeout_ms: AuthConfig::DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            propagation_delay_ms: AuthConfig::DEFAULT_PROPAGATION_DELAY.as_millis() as u64,
            subscription_debounce_ms: 100,
            auto_login_retries: AuthConfig::DEFAULT_AUTO_LOGIN_RETRIES,
            retry: RetrySettings::default(),
        }
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("Fitlink"))
            .unwrap_or_else(|| PathBuf::from(".fitlink"))
    }

    /// Read a JSON config file. Missing fields keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&raw)?;
        tracing::info!(path = %path.as_ref().display(), "Loaded config");
        Ok(config)
    }

    /// Override fields from `FITLINK_*` environment variables.
    pub fn apply_env(self) -> Self {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = var("FITLINK_API_URL") {
            self.api_url = url;
        }
        if let Some(path) = var("FITLINK_DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(email) = var("FITLINK_PRIMARY_EMAIL") {
            self.credentials.primary.email = email;
        }
        if let Some(password) = var("FITLINK_PRIMARY_PASSWORD") {
            self.credentials.primary.password = password;
        }
        if let Some(email) = var("FITLINK_SECONDARY_EMAIL") {
            self.credentials.secondary.email = email;
        }
        if let Some(password) = var("FITLINK_SECONDARY_PASSWORD") {
            self.credentials.secondary.password = password;
        }

        self
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.api_url)
            .map_err(|e| CoreError::Config(format!("invalid api_url {}: {}", self.api_url, e)))?;

        if self.request_timeout_ms == 0 {
            return Err(CoreError::Config("request_timeout_ms must be positive".to_string()));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig::new(self.credentials.clone())
            .with_request_timeout(self.request_timeout())
            .with_propagation_delay(Duration::from_millis(self.propagation_delay_ms))
            .with_auto_login_retries(self.auto_login_retries)
    }

    pub fn subscription_config(&self) -> SubscriptionConfig {
        SubscriptionConfig {
            debounce: Duration::from_millis(self.subscription_debounce_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry.base_ms),
            Duration::from_millis(self.retry.cap_ms),
            self.retry.max_retries,
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::data_dir())
    }
}
