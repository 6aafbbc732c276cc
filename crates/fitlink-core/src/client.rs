//! Top-level client handle
//!
//! Owns the only session manager and realtime coordinator of the process.
//! Views receive clones of this handle instead of reaching for globals.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::task::JoinHandle;

use fitlink_auth::{
    ApiRequest, ApiResponse, AuthBackend, AuthState, HttpAuthBackend, Profile, Session,
    SessionManager, SessionStore, SwitchOutcome,
};
use fitlink_realtime::sources::TrainingSessionSource;
use fitlink_realtime::{
    AppLifecycle, Channel, ChannelSpec, EventSource, RealtimeBackend, RealtimeCoordinator,
    Subscription, Teardown,
};
use fitlink_storage::{Database, KeyValueStore};

use crate::bridge::IdentityBridge;
use crate::config::Config;
use crate::Result;

pub struct GymClient {
    /// Configuration
    config: Config,
    /// Session lifecycle
    sessions: SessionManager,
    /// Realtime channel registry
    realtime: RealtimeCoordinator,
    /// Identity bridge task, started by `initialize`
    bridge: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl GymClient {
    /// Open the database and the HTTP auth backend described by `config`.
    pub fn new(config: Config, realtime: Arc<dyn RealtimeBackend>) -> Result<Self> {
        config.validate()?;

        let db = Database::open(&config.database_path)?;
        let auth = HttpAuthBackend::new(&config.api_url, config.request_timeout())?;

        Ok(Self::with_backends(
            config,
            Arc::new(db),
            Arc::new(auth),
            realtime,
        ))
    }

    pub fn with_backends(
        config: Config,
        storage: Arc<dyn KeyValueStore>,
        auth: Arc<dyn AuthBackend>,
        realtime: Arc<dyn RealtimeBackend>,
    ) -> Self {
        let sessions = SessionManager::new(auth, SessionStore::new(storage), config.auth_config());

        Self {
            config,
            sessions,
            realtime: RealtimeCoordinator::new(realtime),
            bridge: Arc::new(Mutex::new(None)),
        }
    }

    /// Acquire the first session, then start the identity bridge.
    ///
    /// This is the single top-level initializer; further acquisition happens
    /// only through explicit retry, sign-in or switch actions. The bridge is
    /// seeded with the identity acquired here, so it never tears down on
    /// startup.
    pub async fn initialize(&self) -> Option<Session> {
        let session = self.sessions.get_session().await;
        self.start_bridge();

        match &session {
            Some(session) => tracing::info!(
                user_id = %session.identity.id,
                tenant_id = ?session.tenant_id(),
                profile = %self.sessions.profile(),
                "Client initialized"
            ),
            None => tracing::warn!("Client initialized without a session"),
        }
        session
    }

    /// Stop the bridge and close every channel.
    pub fn shutdown(&self) -> Teardown {
        if let Some(task) = self.bridge.lock().take() {
            task.abort();
        }
        tracing::info!("Client shut down");
        self.realtime.teardown_all()
    }

    fn start_bridge(&self) {
        let mut bridge = self.bridge.lock();
        if bridge.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        *bridge = Some(IdentityBridge::spawn(
            self.sessions.identity_changes(),
            self.realtime.clone(),
        ));
    }

    // === Session operations ===

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub async fn get_session(&self) -> Option<Session> {
        self.sessions.get_session().await
    }

    /// Manual retry from the "not authenticated" screen.
    pub async fn retry_session(&self) -> Option<Session> {
        self.sessions
            .get_session_with_retry(self.config.retry_policy())
            .await
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Option<Session> {
        self.sessions.sign_in(email, password).await
    }

    pub async fn sign_out(&self) {
        self.sessions.sign_out().await
    }

    pub async fn switch_account(&self, profile: Profile) -> SwitchOutcome {
        self.sessions.switch_account(profile).await
    }

    pub async fn refresh_session(&self) -> Option<Session> {
        self.sessions.refresh_session().await
    }

    pub async fn authenticated_request(
        &self,
        request: &ApiRequest,
    ) -> fitlink_auth::Result<ApiResponse> {
        self.sessions.authenticated_request(request).await
    }

    pub async fn authenticated_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Option<T> {
        self.sessions.authenticated_json(request).await
    }

    pub fn current_session(&self) -> Option<Session> {
        self.sessions.current_session()
    }

    pub fn current_tenant_id(&self) -> Option<String> {
        self.sessions.current_tenant_id()
    }

    pub fn auth_state(&self) -> AuthState {
        self.sessions.state()
    }

    pub fn profile(&self) -> Profile {
        self.sessions.profile()
    }

    // === Realtime operations ===

    pub fn realtime(&self) -> &RealtimeCoordinator {
        &self.realtime
    }

    pub async fn subscribe(&self, spec: ChannelSpec) -> Channel {
        self.realtime.subscribe(spec).await
    }

    pub fn unsubscribe(&self, name: &str) -> Teardown {
        self.realtime.unsubscribe(name)
    }

    pub fn teardown_all(&self) -> Teardown {
        self.realtime.teardown_all()
    }

    pub async fn handle_lifecycle(&self, next: AppLifecycle) -> bool {
        self.realtime.handle_lifecycle(next).await
    }

    /// Start a debounced subscription for any event source.
    pub fn watch<S, F>(&self, source: S, handler: F) -> Subscription<S>
    where
        S: EventSource,
        F: Fn(S::Event) + Send + Sync + 'static,
    {
        Subscription::start(
            &self.realtime,
            source,
            &self.config.subscription_config(),
            handler,
        )
    }

    /// Training-session notifications for the current tenant. `None` without a
    /// session.
    pub fn watch_training_sessions<F>(
        &self,
        handler: F,
    ) -> Option<Subscription<TrainingSessionSource>>
    where
        F: Fn(fitlink_realtime::sources::TrainingSessionEvent) + Send + Sync + 'static,
    {
        let tenant_id = self.current_tenant_id()?;
        Some(self.watch(TrainingSessionSource::new(tenant_id), handler))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Clone for GymClient {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            sessions: self.sessions.clone(),
            realtime: self.realtime.clone(),
            bridge: Arc::clone(&self.bridge),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fitlink_auth::{AuthError, Credentials, Identity, SignInGrant};
    use fitlink_realtime::sources::CheckInSource;
    use fitlink_realtime::{row, ChangeBinding, LocalBroker, RowChange};
    use fitlink_storage::MemoryStore;
    use serde_json::json;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    /// Two fixed accounts, one per tenant.
    #[derive(Default)]
    struct Accounts {
        tokens: parking_lot::Mutex<HashMap<String, Identity>>,
    }

    impl Accounts {
        fn identity_for(credentials: &Credentials) -> Option<Identity> {
            match (credentials.email.as_str(), credentials.password.as_str()) {
                ("front@gym.test", "front-pass") => {
                    Some(Identity::new("u1", "front@gym.test", "Front TV").with_tenant("t1"))
                }
                ("studio@gym.test", "studio-pass") => {
                    Some(Identity::new("u2", "studio@gym.test", "Studio TV").with_tenant("t2"))
                }
                _ => None,
            }
        }
    }

    #[async_trait]
    impl AuthBackend for Accounts {
        async fn sign_in(&self, credentials: &Credentials) -> fitlink_auth::Result<SignInGrant> {
            let identity = Self::identity_for(credentials).ok_or(AuthError::Unauthorized)?;
            let token = format!("token-{}", identity.id);
            self.tokens.lock().insert(token.clone(), identity);
            Ok(SignInGrant { token })
        }

        async fn fetch_session(&self, token: &str) -> fitlink_auth::Result<Session> {
            let identity = self
                .tokens
                .lock()
                .get(token)
                .cloned()
                .ok_or(AuthError::Unauthorized)?;
            Ok(Session::new(identity, token))
        }

        async fn sign_out(&self, token: Option<&str>) -> fitlink_auth::Result<()> {
            if let Some(token) = token {
                self.tokens.lock().remove(token);
            }
            Ok(())
        }

        async fn execute(
            &self,
            _request: &ApiRequest,
            token: &str,
        ) -> fitlink_auth::Result<ApiResponse> {
            let status = if self.tokens.lock().contains_key(token) {
                200
            } else {
                401
            };
            Ok(ApiResponse::new(status, r#"{"sessions":[]}"#))
        }
    }

    fn config(studio_password: &str) -> Config {
        let mut config = Config::new(PathBuf::from("/unused"));
        config.credentials = fitlink_auth::ProfileCredentials::new(
            Credentials::new("front@gym.test", "front-pass"),
            Credentials::new("studio@gym.test", studio_password),
        );
        config.propagation_delay_ms = 0;
        config
    }

    fn client_with(studio_password: &str) -> (GymClient, LocalBroker) {
        let broker = LocalBroker::new();
        let client = GymClient::with_backends(
            config(studio_password),
            Arc::new(MemoryStore::new()),
            Arc::new(Accounts::default()),
            Arc::new(broker.clone()),
        );
        (client, broker)
    }

    fn session_channel(session_id: &str) -> ChannelSpec {
        ChannelSpec::new(format!("tv-session-{}", session_id)).with_binding(
            ChangeBinding::table("user_training_session")
                .with_filter("training_session_id", session_id),
        )
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn test_initialize_acquires_primary_session() {
        let (client, _broker) = client_with("studio-pass");

        let session = client.initialize().await.unwrap();

        assert_eq!(session.tenant_id(), Some("t1"));
        assert_eq!(client.current_tenant_id().as_deref(), Some("t1"));
        assert_eq!(client.profile(), Profile::Primary);
        assert!(client.auth_state().is_authenticated());

        let body: Option<serde_json::Value> = client
            .authenticated_json(&ApiRequest::get("/api/training-sessions"))
            .await;
        assert_eq!(body, Some(json!({ "sessions": [] })));
    }

    #[tokio::test]
    async fn test_switch_tears_down_channels() {
        let (client, broker) = client_with("studio-pass");
        client.initialize().await.unwrap();
        client.subscribe(session_channel("s1")).await;

        let outcome = client.switch_account(Profile::Secondary).await;
        assert!(outcome.is_switched());
        assert_eq!(client.current_tenant_id().as_deref(), Some("t2"));

        wait_until(|| client.realtime().is_empty()).await;
        wait_until(|| broker.leave_count() == 1).await;
    }

    #[tokio::test]
    async fn test_failed_switch_keeps_channels_and_tenant() {
        let (client, broker) = client_with("wrong-pass");
        client.initialize().await.unwrap();
        client.subscribe(session_channel("s1")).await;

        let outcome = client.switch_account(Profile::Secondary).await;
        assert!(!outcome.is_switched());
        assert_eq!(client.profile(), Profile::Primary);
        assert_eq!(client.current_tenant_id().as_deref(), Some("t1"));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(client.realtime().len(), 1);
        assert_eq!(broker.leave_count(), 0);
    }

    #[tokio::test]
    async fn test_sign_out_tears_down_channels() {
        let (client, _broker) = client_with("studio-pass");
        client.initialize().await.unwrap();
        client.subscribe(session_channel("s1")).await;

        client.sign_out().await;

        assert_eq!(client.current_session(), None);
        wait_until(|| client.realtime().is_empty()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_delivers_typed_events() {
        let (client, broker) = client_with("studio-pass");
        client.initialize().await.unwrap();

        let arrivals = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&arrivals);
        let subscription = client.watch(CheckInSource::new("s1"), move |check_in| {
            sink.lock().push(check_in.user_id)
        });
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(subscription.is_connected());

        broker.publish(RowChange::update(
            "user_training_session",
            row(json!({
                "training_session_id": "s1",
                "user_id": "member-7",
                "status": "checked_in",
            })),
        ));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(*arrivals.lock(), vec!["member-7".to_string()]);

        let tenant_feed = client.watch_training_sessions(|_| {}).unwrap();
        assert_eq!(tenant_feed.channel_name(), "training-sessions-t1");
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let (client, broker) = client_with("studio-pass");
        client.initialize().await.unwrap();
        client.subscribe(session_channel("s1")).await;
        client.subscribe(session_channel("s2")).await;

        client.shutdown().wait().await;

        assert!(client.realtime().is_empty());
        assert!(broker.live_channels().is_empty());
        assert!(client.bridge.lock().is_none());
    }

    #[tokio::test]
    async fn test_new_opens_database_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config("studio-pass");
        config.database_path = dir.path().join("nested").join("fitlink.db");

        let client = GymClient::new(config, Arc::new(LocalBroker::new())).unwrap();

        assert!(dir.path().join("nested").join("fitlink.db").exists());
        assert_eq!(client.current_session(), None);
        assert!(client.watch_training_sessions(|_| {}).is_none());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = config("studio-pass");
        config.api_url = "::".to_string();

        assert!(GymClient::new(config, Arc::new(LocalBroker::new())).is_err());
    }
}
