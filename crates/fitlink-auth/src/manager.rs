//! Session Manager
//!
//! Owns acquisition policy: cache lookup, expiry check, sign-in, refresh,
//! account switching and the authenticated-request retry wrapper.
//!
//! Acquisition (`get_session`, `sign_in`, `switch_account`, `refresh_session`)
//! is serialized by an async operation lock. `sign_out` bypasses the lock and
//! bumps the request generation, so any sign-in still in flight discards its
//! result instead of resurrecting the session.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use crate::backend::{ApiRequest, ApiResponse, AuthBackend};
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::profile::{Credentials, Profile};
use crate::retry::{RetryPolicy, RetryState};
use crate::session::{Identity, Session};
use crate::state::AuthState;
use crate::store::SessionStore;
use crate::Result;

/// Result of `switch_account`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// Signed in under the requested profile
    Switched(Session),
    /// Switch failed; the previous profile is persisted again and the
    /// previous session (or a fresh auto-login under it) is active
    RolledBack {
        profile: Profile,
        session: Option<Session>,
    },
}

impl SwitchOutcome {
    pub fn session(&self) -> Option<&Session> {
        match self {
            SwitchOutcome::Switched(session) => Some(session),
            SwitchOutcome::RolledBack { session, .. } => session.as_ref(),
        }
    }

    pub fn is_switched(&self) -> bool {
        matches!(self, SwitchOutcome::Switched(_))
    }
}

pub struct SessionManager {
    /// In-memory session cache, at most one entry
    cache: Arc<RwLock<Option<Session>>>,
    /// Lifecycle state
    state: Arc<RwLock<AuthState>>,
    /// Bumped whenever an in-flight sign-in must no longer apply
    generation: Arc<AtomicU64>,
    /// Serializes acquisition operations
    op_lock: Arc<Mutex<()>>,
    /// Active identity id, observed by the identity bridge
    identity_tx: Arc<watch::Sender<Option<String>>>,
    /// Durable session record, token and profile
    store: SessionStore,
    backend: Arc<dyn AuthBackend>,
    config: AuthConfig,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn AuthBackend>, store: SessionStore, config: AuthConfig) -> Self {
        let (identity_tx, _) = watch::channel(None);

        Self {
            cache: Arc::new(RwLock::new(None)),
            state: Arc::new(RwLock::new(AuthState::Unauthenticated)),
            generation: Arc::new(AtomicU64::new(0)),
            op_lock: Arc::new(Mutex::new(())),
            identity_tx: Arc::new(identity_tx),
            store,
            backend,
            config,
        }
    }

    // === Acquisition ===

    /// Return the cached session, else the stored one, else auto-login with
    /// the active profile. Never returns a session without a tenant.
    pub async fn get_session(&self) -> Option<Session> {
        let _guard = self.op_lock.lock().await;
        self.get_session_locked().await
    }

    /// `get_session` driven by a capped backoff schedule.
    pub async fn get_session_with_retry(&self, policy: RetryPolicy) -> Option<Session> {
        let mut retry = RetryState::new(policy);

        loop {
            if let Some(session) = self.get_session().await {
                return Some(session);
            }
            if retry.exhausted() {
                tracing::error!(retries = retry.retries(), "Giving up on session acquisition");
                return None;
            }

            let delay = retry.next_delay();
            tracing::info!(
                delay_ms = delay.as_millis() as u64,
                retry = retry.retries(),
                "No session, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Two-step sign-in with explicit credentials. Failures yield `None`.
    pub async fn sign_in(&self, email: &str, password: &str) -> Option<Session> {
        let _guard = self.op_lock.lock().await;
        let credentials = Credentials::new(email, password);
        let generation = self.generation.load(Ordering::SeqCst);

        match self.sign_in_locked(&credentials, generation).await {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(email = %credentials.email, error = %e, "Sign-in failed");
                None
            }
        }
    }

    /// Switch to another profile's credentials, rolling back on any failure.
    pub async fn switch_account(&self, profile: Profile) -> SwitchOutcome {
        let _guard = self.op_lock.lock().await;

        let previous_session = match self.cached() {
            Some(session) => Some(session),
            None => self.store.load_session().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Could not read stored session before switch");
                None
            }),
        };
        let previous_token = self.store.load_token().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not read stored token before switch");
            None
        });
        let previous_profile = self.load_profile();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        tracing::info!(from = %previous_profile, to = %profile, "Switching account");

        match self.try_switch(profile, generation).await {
            Ok(session) => {
                tracing::info!(
                    profile = %profile,
                    user_id = %session.identity.id,
                    "Account switched"
                );
                SwitchOutcome::Switched(session)
            }
            Err(e) => {
                tracing::warn!(profile = %profile, error = %e, "Account switch failed, rolling back");
                let session = self
                    .rollback(previous_profile, previous_session, previous_token, generation)
                    .await;
                SwitchOutcome::RolledBack {
                    profile: previous_profile,
                    session,
                }
            }
        }
    }

    /// Drop the cache and re-fetch the profile with the stored token, falling
    /// back to auto-login.
    pub async fn refresh_session(&self) -> Option<Session> {
        let _guard = self.op_lock.lock().await;
        self.refresh_locked().await
    }

    /// Best-effort remote sign-out followed by an unconditional local clear.
    pub async fn sign_out(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);

        let token = self
            .store
            .load_token()
            .ok()
            .flatten()
            .or_else(|| self.cached().map(|s| s.token));

        if let Err(e) = self.with_timeout(self.backend.sign_out(token.as_deref())).await {
            tracing::warn!(error = %e, "Remote sign-out failed, clearing locally anyway");
        }

        if let Err(e) = self.store.clear() {
            tracing::error!(error = %e, "Failed to clear stored session");
        }
        self.mark_unauthenticated();

        tracing::info!("Signed out");
    }

    // === Authenticated requests ===

    /// Send `request` with the bearer token attached. A 401 triggers exactly
    /// one refresh and one retry; the retry's failure goes back to the caller.
    pub async fn authenticated_request(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let session = self.get_session().await.ok_or(AuthError::NotAuthenticated)?;
        let token = self.store.load_token()?.unwrap_or(session.token);

        let response = self
            .with_timeout(self.backend.execute(request, &token))
            .await?;
        if !response.is_unauthorized() {
            return check_response(response);
        }

        tracing::info!(url = %request.url, "Got 401, refreshing session");
        let refreshed = self
            .refresh_session()
            .await
            .ok_or(AuthError::Unauthorized)?;
        let token = self.store.load_token()?.unwrap_or(refreshed.token);

        let retry = self
            .with_timeout(self.backend.execute(request, &token))
            .await?;
        check_response(retry)
    }

    /// `authenticated_request` decoded as JSON, collapsing every failure to `None`.
    pub async fn authenticated_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Option<T> {
        let result = self
            .authenticated_request(request)
            .await
            .and_then(|response| response.json::<T>());

        match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(url = %request.url, error = %e, "Authenticated request failed");
                None
            }
        }
    }

    // === Read-only views ===

    /// Cached session without any I/O.
    pub fn current_session(&self) -> Option<Session> {
        self.cached()
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.cache.read().as_ref().map(|s| s.identity.clone())
    }

    pub fn current_tenant_id(&self) -> Option<String> {
        self.cache
            .read()
            .as_ref()
            .and_then(|s| s.tenant_id().map(str::to_string))
    }

    pub fn state(&self) -> AuthState {
        *self.state.read()
    }

    /// Active profile as persisted.
    pub fn profile(&self) -> Profile {
        self.load_profile()
    }

    /// Receiver tracking the active identity id.
    pub fn identity_changes(&self) -> watch::Receiver<Option<String>> {
        self.identity_tx.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    // === Internals (callers hold `op_lock`) ===

    async fn get_session_locked(&self) -> Option<Session> {
        let cached = self.cached();
        if let Some(session) = cached {
            if !session.is_expired() {
                tracing::debug!(user_id = %session.identity.id, "Session cache hit");
                return Some(session);
            }
            tracing::info!(user_id = %session.identity.id, "Cached session expired");
            self.cache.write().take();
            self.transition(AuthState::Refreshing);
        }

        match self.store.load_session() {
            Ok(Some(session)) if !session.is_expired() => {
                tracing::info!(user_id = %session.identity.id, "Restored session from storage");
                self.apply(session.clone());
                return Some(session);
            }
            Ok(Some(session)) => {
                tracing::info!(user_id = %session.identity.id, "Stored session expired");
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Could not read stored session"),
        }

        let profile = self.load_profile();
        self.auto_login_locked(profile).await
    }

    /// Sign in with the profile's fixed credentials. A missing tenant or a
    /// rejected session consumes one retry from a finite budget.
    async fn auto_login_locked(&self, profile: Profile) -> Option<Session> {
        let credentials = self.config.credentials.for_profile(profile).clone();
        let generation = self.generation.load(Ordering::SeqCst);
        let attempts = self.config.auto_login_retries.saturating_add(1);

        for attempt in 1..=attempts {
            tracing::info!(profile = %profile, attempt, "Auto-login");

            match self.sign_in_locked(&credentials, generation).await {
                Ok(session) => return Some(session),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    tracing::warn!(profile = %profile, attempt, error = %e, "Auto-login rejected, retrying");
                }
                Err(e) => {
                    tracing::error!(profile = %profile, attempt, error = %e, "Auto-login failed");
                    break;
                }
            }
        }

        self.mark_unauthenticated();
        None
    }

    async fn sign_in_locked(&self, credentials: &Credentials, generation: u64) -> Result<Session> {
        let grant = self
            .with_timeout(self.backend.sign_in(credentials))
            .await?;

        // Persisted before the profile fetch so the token is never lost
        self.store.save_token(&grant.token)?;

        if !self.config.propagation_delay.is_zero() {
            tokio::time::sleep(self.config.propagation_delay).await;
        }

        let fetched = self
            .with_timeout(self.backend.fetch_session(&grant.token))
            .await;
        let session = match fetched {
            Ok(session) => session,
            Err(e) => {
                self.store.discard_token(&grant.token)?;
                return Err(e);
            }
        };

        self.accept(session, &grant.token, generation)
    }

    async fn refresh_locked(&self) -> Option<Session> {
        self.transition(AuthState::Refreshing);
        self.cache.write().take();
        let generation = self.generation.load(Ordering::SeqCst);

        match self.refetch(generation).await {
            Ok(session) => {
                tracing::info!(user_id = %session.identity.id, "Session refreshed");
                Some(session)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Refresh failed, falling back to auto-login");
                let profile = self.load_profile();
                self.auto_login_locked(profile).await
            }
        }
    }

    async fn refetch(&self, generation: u64) -> Result<Session> {
        let token = self.store.load_token()?.ok_or(AuthError::NotAuthenticated)?;
        let session = self
            .with_timeout(self.backend.fetch_session(&token))
            .await?;
        self.accept(session, &token, generation)
    }

    async fn try_switch(&self, profile: Profile, generation: u64) -> Result<Session> {
        // Identity is not published here; only the final outcome is
        self.cache.write().take();
        self.store.clear()?;
        self.store.save_profile(profile)?;

        let credentials = self.config.credentials.for_profile(profile).clone();
        self.sign_in_locked(&credentials, generation).await
    }

    async fn rollback(
        &self,
        profile: Profile,
        previous: Option<Session>,
        previous_token: Option<String>,
        generation: u64,
    ) -> Option<Session> {
        if let Err(e) = self.store.save_profile(profile) {
            tracing::error!(profile = %profile, error = %e, "Failed to restore profile");
        }

        if self.generation.load(Ordering::SeqCst) != generation {
            // Signed out while switching; nothing to restore
            return None;
        }

        match previous {
            Some(session) => {
                // The stored bearer token may differ from the one on the session
                let token = previous_token.unwrap_or_else(|| session.token.clone());
                let restored = self
                    .store
                    .save_token(&token)
                    .and_then(|_| self.store.save_session(&session));
                if let Err(e) = restored {
                    tracing::error!(error = %e, "Failed to persist restored session");
                }
                tracing::info!(user_id = %session.identity.id, "Previous session restored");
                self.apply(session.clone());
                Some(session)
            }
            None => self.auto_login_locked(profile).await,
        }
    }

    /// Validate, check the generation, then persist and cache.
    fn accept(&self, mut session: Session, token: &str, generation: u64) -> Result<Session> {
        if session.token.is_empty() {
            session.token = token.to_string();
        }

        if let Err(e) = session.validate() {
            tracing::error!(
                user_id = %session.identity.id,
                error = %e,
                "Backend returned an unusable session, discarding"
            );
            self.store.clear()?;
            self.cache.write().take();
            return Err(e);
        }

        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::warn!(generation, "Discarding superseded sign-in");
            self.store.discard_token(token)?;
            return Err(AuthError::Superseded);
        }

        self.store.save_session(&session)?;
        self.apply(session.clone());

        tracing::info!(
            user_id = %session.identity.id,
            tenant_id = ?session.tenant_id(),
            "Session established"
        );

        Ok(session)
    }

    fn apply(&self, session: Session) {
        let id = session.identity.id.clone();
        *self.cache.write() = Some(session);
        self.transition(AuthState::Authenticated);
        self.publish_identity(Some(id));
    }

    fn mark_unauthenticated(&self) {
        self.cache.write().take();
        self.transition(AuthState::Unauthenticated);
        self.publish_identity(None);
    }

    fn publish_identity(&self, id: Option<String>) {
        self.identity_tx.send_if_modified(|current| {
            if *current == id {
                false
            } else {
                *current = id;
                true
            }
        });
    }

    fn transition(&self, target: AuthState) {
        let mut state = self.state.write();
        let current = *state;
        if current == target {
            return;
        }
        if current.can_transition_to(target) {
            tracing::debug!(from = %current, to = %target, "Auth state transition");
            *state = target;
        } else {
            tracing::debug!(from = %current, to = %target, "Ignoring invalid auth state transition");
        }
    }

    fn cached(&self) -> Option<Session> {
        self.cache.read().clone()
    }

    fn load_profile(&self) -> Profile {
        self.store.load_profile().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not read profile, using primary");
            Profile::Primary
        })
    }

    async fn with_timeout<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::Timeout),
        }
    }
}

impl Clone for SessionManager {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            state: Arc::clone(&self.state),
            generation: Arc::clone(&self.generation),
            op_lock: Arc::clone(&self.op_lock),
            identity_tx: Arc::clone(&self.identity_tx),
            store: self.store.clone(),
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
        }
    }
}

fn check_response(response: ApiResponse) -> Result<ApiResponse> {
    if response.is_success() {
        Ok(response)
    } else if response.is_unauthorized() {
        Err(AuthError::Unauthorized)
    } else {
        Err(AuthError::Status(response.status))
    }
}
