//! Authentication backend boundary

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::profile::Credentials;
use crate::session::Session;
use crate::Result;

/// Result of the credential exchange step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInGrant {
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

/// A request the caller wants sent with the current bearer token attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Absolute URL, or a path resolved against the backend base URL
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::Post, url).with_body(body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Exchange credentials for a bearer token.
    async fn sign_in(&self, credentials: &Credentials) -> Result<SignInGrant>;

    /// Exchange a bearer token for the full profile. 401 maps to `Unauthorized`.
    async fn fetch_session(&self, token: &str) -> Result<Session>;

    /// Invalidate the token remotely.
    async fn sign_out(&self, token: Option<&str>) -> Result<()>;

    /// Send an arbitrary request with the token attached. Non-2xx is not an error here.
    async fn execute(&self, request: &ApiRequest, token: &str) -> Result<ApiResponse>;
}
