//! HTTP authentication backend

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_TYPE, COOKIE};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::backend::{ApiRequest, ApiResponse, AuthBackend, Method, SignInGrant};
use crate::error::AuthError;
use crate::profile::Credentials;
use crate::session::{Identity, Session};
use crate::Result;

const SIGN_IN_PATH: &str = "/api/auth/sign-in/email";
const GET_SESSION_PATH: &str = "/api/auth/get-session";
const SIGN_OUT_PATH: &str = "/api/auth/sign-out";

/// Cookie the backend also accepts in place of the bearer header
const SESSION_COOKIE: &str = "better-auth.session";

pub struct HttpAuthBackend {
    client: Client,
    base_url: Url,
}

impl HttpAuthBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn resolve(&self, path_or_url: &str) -> Result<Url> {
        match Url::parse(path_or_url) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(self.base_url.join(path_or_url)?),
            Err(e) => Err(e.into()),
        }
    }

    fn authorize(builder: RequestBuilder, token: &str) -> RequestBuilder {
        builder
            .bearer_auth(token)
            .header(COOKIE, format!("{}={}", SESSION_COOKIE, token))
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn sign_in(&self, credentials: &Credentials) -> Result<SignInGrant> {
        let url = self.resolve(SIGN_IN_PATH)?;
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({
                "email": credentials.email,
                "password": credentials.password,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Sign-in rejected");
            return Err(status_error(status));
        }

        let payload: SignInPayload = response.json().await?;
        match payload.token.filter(|t| !t.is_empty()) {
            Some(token) => Ok(SignInGrant { token }),
            None => Err(AuthError::InvalidSession(
                "sign-in response carried no token".to_string(),
            )),
        }
    }

    async fn fetch_session(&self, token: &str) -> Result<Session> {
        let url = self.resolve(GET_SESSION_PATH)?;
        let response = Self::authorize(self.client.get(url), token)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Session fetch rejected");
            return Err(status_error(status));
        }

        // The endpoint answers `null` when the token is unknown
        let payload: Option<SessionPayload> = response.json().await?;
        let payload = payload.ok_or_else(|| {
            AuthError::InvalidSession("session response was empty".to_string())
        })?;

        session_from_payload(payload, token)
    }

    async fn sign_out(&self, token: Option<&str>) -> Result<()> {
        let url = self.resolve(SIGN_OUT_PATH)?;
        let mut builder = self.client.post(url);
        if let Some(token) = token {
            builder = Self::authorize(builder, token);
        }

        let status = builder.send().await?.status();
        if !status.is_success() {
            return Err(status_error(status));
        }
        Ok(())
    }

    async fn execute(&self, request: &ApiRequest, token: &str) -> Result<ApiResponse> {
        let url = self.resolve(&request.url)?;
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = Self::authorize(builder, token);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(ApiResponse::new(status, body))
    }
}

fn status_error(status: StatusCode) -> AuthError {
    if status == StatusCode::UNAUTHORIZED {
        AuthError::Unauthorized
    } else {
        AuthError::Status(status.as_u16())
    }
}

#[derive(Debug, Deserialize)]
struct SignInPayload {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionPayload {
    user: Option<UserPayload>,
    session: Option<SessionMetaPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserPayload {
    id: String,
    email: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    business_id: Option<String>,
    #[serde(default)]
    email_verified: Option<bool>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionMetaPayload {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    expires_at: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

/// Map the backend's session document onto a `Session`. Tenant is left empty
/// when the backend omits it; the manager decides what that means.
fn session_from_payload(payload: SessionPayload, token: &str) -> Result<Session> {
    let user = payload
        .user
        .ok_or_else(|| AuthError::InvalidSession("session response has no user".to_string()))?;

    let identity = Identity {
        id: user.id,
        email: user.email,
        name: user.name.unwrap_or_default(),
        role: user
            .role
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "client".to_string()),
        tenant_id: user.business_id.filter(|id| !id.is_empty()),
        email_verified: user.email_verified,
        created_at: user.created_at.as_deref().and_then(parse_timestamp),
        updated_at: user.updated_at.as_deref().and_then(parse_timestamp),
    };

    let meta = payload.session;
    let session_token = meta
        .as_ref()
        .and_then(|m| m.token.clone())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| token.to_string());

    Ok(Session {
        identity,
        token: session_token,
        expires_at: meta
            .as_ref()
            .and_then(|m| m.expires_at.as_deref())
            .and_then(parse_timestamp),
        session_id: meta.and_then(|m| m.id).filter(|id| !id.is_empty()),
    })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
