//! Realtime channel registry
//!
//! Owns at most one live channel per name. Each registry entry keeps its own
//! broadcast sender, so listeners survive a re-join on resume.

use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::backend::{BackendChannel, RealtimeBackend};
use crate::event::{ChannelEvent, ChannelSpec};
use crate::state::{ChannelState, ChannelStatus};

const EVENT_CAPACITY: usize = 256;

/// Foreground/background phase of the hosting application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppLifecycle {
    #[default]
    Active,
    Inactive,
    Background,
}

struct Link {
    id: Uuid,
    pump: JoinHandle<()>,
}

struct ChannelInner {
    spec: ChannelSpec,
    state: RwLock<ChannelState>,
    events: broadcast::Sender<ChannelEvent>,
    link: Mutex<Option<Link>>,
    /// Subscriptions sharing this entry; only touched under the registry lock
    holders: AtomicUsize,
}

/// Handle to one registered channel.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    fn new(spec: ChannelSpec) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(ChannelInner {
                spec,
                state: RwLock::new(ChannelState::Unsubscribed),
                events,
                link: Mutex::new(None),
                holders: AtomicUsize::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.spec.name
    }

    pub fn spec(&self) -> &ChannelSpec {
        &self.inner.spec
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state.read()
    }

    /// Receive lifecycle statuses and row changes from now on.
    pub fn listen(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.events.subscribe()
    }

    pub fn ptr_eq(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn set_state(&self, target: ChannelState) -> bool {
        let mut state = self.inner.state.write();
        let current = *state;

        if !current.can_transition_to(target) {
            tracing::warn!(
                channel = %self.inner.spec.name,
                from = %current,
                to = %target,
                "Invalid channel state transition"
            );
            return false;
        }

        *state = target;
        true
    }

    fn emit(&self, event: ChannelEvent) {
        // No listeners is fine
        let _ = self.inner.events.send(event);
    }

    fn fail(&self, status: ChannelStatus) {
        self.set_state(status.channel_state());
        self.emit(ChannelEvent::Status(status));
    }

    /// Start forwarding a joined backend channel into this entry. Returns the
    /// backend id of a link it replaced, which the caller must leave.
    fn attach(&self, joined: BackendChannel) -> Option<Uuid> {
        let BackendChannel { id, mut events } = joined;
        let weak: Weak<ChannelInner> = Arc::downgrade(&self.inner);

        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let channel = Channel { inner };
                if let ChannelEvent::Status(status) = &event {
                    channel.set_state(status.channel_state());
                    if status.is_failure() {
                        tracing::warn!(channel = %channel.name(), ?status, "Channel failed");
                    }
                }
                channel.emit(event);
            }
        });

        self.inner
            .link
            .lock()
            .replace(Link { id, pump })
            .map(|previous| {
                previous.pump.abort();
                previous.id
            })
    }

    /// Stop forwarding and hand back the backend id to leave, if joined.
    fn detach(&self) -> Option<Uuid> {
        self.inner.link.lock().take().map(|link| {
            link.pump.abort();
            link.id
        })
    }

    fn close(&self) {
        self.set_state(ChannelState::Unsubscribed);
        self.emit(ChannelEvent::Status(ChannelStatus::Closed));
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.inner.spec.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Pending backend `leave` calls from an unsubscribe or teardown.
///
/// Dropping it leaves the calls running in the background. Await
/// [`Teardown::wait`] when the close must finish before re-subscribing.
#[derive(Debug, Default)]
pub struct Teardown {
    channels: Vec<String>,
    pending: Vec<JoinHandle<()>>,
}

impl Teardown {
    fn start(backend: &Arc<dyn RealtimeBackend>, removed: Vec<Channel>) -> Self {
        let runtime = tokio::runtime::Handle::try_current().ok();
        let mut teardown = Teardown::default();

        for channel in removed {
            let name = channel.name().to_string();
            let joined = channel.detach();
            channel.close();

            match (joined, &runtime) {
                (Some(id), Some(runtime)) => {
                    let backend = Arc::clone(backend);
                    let leaving = name.clone();
                    teardown.pending.push(runtime.spawn(async move {
                        if let Err(e) = backend.leave(id).await {
                            tracing::warn!(channel = %leaving, error = %e, "Failed to leave channel");
                        }
                    }));
                }
                (Some(_), None) => {
                    tracing::warn!(channel = %name, "No runtime to leave channel on");
                }
                (None, _) => {}
            }

            teardown.channels.push(name);
        }

        teardown
    }

    /// Names of the channels removed from the registry.
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Wait until every backend leave has completed.
    pub async fn wait(self) {
        join_all(self.pending).await;
    }
}

pub struct RealtimeCoordinator {
    channels: Arc<RwLock<HashMap<String, Channel>>>,
    backend: Arc<dyn RealtimeBackend>,
    lifecycle: Arc<RwLock<AppLifecycle>>,
}

impl RealtimeCoordinator {
    pub fn new(backend: Arc<dyn RealtimeBackend>) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            backend,
            lifecycle: Arc::new(RwLock::new(AppLifecycle::Active)),
        }
    }

    /// Return the registered channel for `spec.name`, or join a new one.
    ///
    /// A failed join keeps the entry registered in the errored state so that
    /// a later resume can retry it.
    pub async fn subscribe(&self, spec: ChannelSpec) -> Channel {
        let (channel, fresh) = self.register(spec, false);
        if fresh {
            tracing::info!(channel = %channel.name(), "Subscribing to channel");
            self.join(&channel).await;
        }
        channel
    }

    /// Like [`subscribe`](Self::subscribe), but counts the caller as a holder
    /// of the entry and joins in the background. Pair with
    /// [`release`](Self::release).
    pub fn retain(&self, spec: ChannelSpec) -> Channel {
        let (channel, fresh) = self.register(spec, true);
        if fresh {
            tracing::info!(channel = %channel.name(), "Subscribing to channel");
            channel.set_state(ChannelState::Subscribing);
            let coordinator = self.clone();
            let joining = channel.clone();
            tokio::spawn(async move {
                coordinator.join(&joining).await;
            });
        }
        channel
    }

    /// Drop one holder of a retained channel. The entry is closed only when
    /// its last holder releases it and it is still the registered one.
    pub fn release(&self, channel: &Channel) -> Teardown {
        let removed = {
            let mut channels = self.channels.write();
            let holders = &channel.inner.holders;
            let remaining = holders.load(Ordering::SeqCst).saturating_sub(1);
            holders.store(remaining, Ordering::SeqCst);

            let current = channels
                .get(channel.name())
                .is_some_and(|c| c.ptr_eq(channel));
            if remaining == 0 && current {
                channels.remove(channel.name())
            } else {
                None
            }
        };

        match removed {
            Some(channel) => {
                tracing::info!(channel = %channel.name(), "Released last holder of channel");
                Teardown::start(&self.backend, vec![channel])
            }
            None => Teardown::default(),
        }
    }

    /// Close and remove one channel. Absent names are a no-op.
    pub fn unsubscribe(&self, name: &str) -> Teardown {
        let removed: Vec<Channel> = self.channels.write().remove(name).into_iter().collect();
        if !removed.is_empty() {
            tracing::info!(channel = %name, "Unsubscribed from channel");
        }
        Teardown::start(&self.backend, removed)
    }

    /// Close and remove every registered channel.
    pub fn teardown_all(&self) -> Teardown {
        let removed: Vec<Channel> = self.channels.write().drain().map(|(_, c)| c).collect();
        tracing::info!(count = removed.len(), "Tearing down all channels");
        Teardown::start(&self.backend, removed)
    }

    /// Re-join every registered channel, keeping existing listeners.
    pub async fn resume(&self) {
        let channels: Vec<Channel> = self.channels.read().values().cloned().collect();
        tracing::info!(count = channels.len(), "Resuming channels");

        for channel in channels {
            if !self.is_registered(&channel) {
                continue;
            }
            if let Some(id) = channel.detach() {
                if let Err(e) = self.backend.leave(id).await {
                    tracing::warn!(channel = %channel.name(), error = %e, "Failed to leave stale channel");
                }
            }
            self.join(&channel).await;
        }
    }

    /// Record a lifecycle change. Returning to the foreground from the
    /// background resumes all channels; returns whether that happened.
    pub async fn handle_lifecycle(&self, next: AppLifecycle) -> bool {
        let previous = std::mem::replace(&mut *self.lifecycle.write(), next);
        tracing::debug!(?previous, ?next, "App lifecycle changed");

        if next == AppLifecycle::Active && previous != AppLifecycle::Active {
            self.resume().await;
            true
        } else {
            false
        }
    }

    pub fn lifecycle(&self) -> AppLifecycle {
        *self.lifecycle.read()
    }

    /// True if any registered channel is currently subscribed.
    pub fn is_connected(&self) -> bool {
        self.channels
            .read()
            .values()
            .any(|c| c.state() == ChannelState::Subscribed)
    }

    pub fn get(&self, name: &str) -> Option<Channel> {
        self.channels.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }

    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Look up or insert the entry for `spec.name`. `true` means it is new
    /// and still needs a join.
    fn register(&self, spec: ChannelSpec, hold: bool) -> (Channel, bool) {
        let mut channels = self.channels.write();
        let (channel, fresh) = match channels.get(&spec.name) {
            Some(existing) => (existing.clone(), false),
            None => {
                let channel = Channel::new(spec);
                channels.insert(channel.name().to_string(), channel.clone());
                (channel, true)
            }
        };
        if hold {
            channel.inner.holders.fetch_add(1, Ordering::SeqCst);
        }
        (channel, fresh)
    }

    async fn join(&self, channel: &Channel) {
        channel.set_state(ChannelState::Subscribing);

        match self.backend.join(channel.spec()).await {
            Ok(joined) if self.is_registered(channel) => {
                // A concurrent join (resume racing subscribe) already attached
                if let Some(stale) = channel.attach(joined) {
                    tracing::debug!(channel = %channel.name(), "Leaving superseded join");
                    if let Err(e) = self.backend.leave(stale).await {
                        tracing::warn!(channel = %channel.name(), error = %e, "Failed to leave channel");
                    }
                }
            }
            Ok(joined) => {
                // Torn down while joining
                tracing::debug!(channel = %channel.name(), "Leaving channel removed mid-join");
                if let Err(e) = self.backend.leave(joined.id).await {
                    tracing::warn!(channel = %channel.name(), error = %e, "Failed to leave channel");
                }
            }
            Err(e) => {
                tracing::warn!(channel = %channel.name(), error = %e, "Failed to join channel");
                if self.is_registered(channel) {
                    channel.fail(ChannelStatus::ChannelError);
                }
            }
        }
    }

    fn is_registered(&self, channel: &Channel) -> bool {
        self.channels
            .read()
            .get(channel.name())
            .is_some_and(|c| c.ptr_eq(channel))
    }
}

impl Clone for RealtimeCoordinator {
    fn clone(&self) -> Self {
        Self {
            channels: Arc::clone(&self.channels),
            backend: Arc::clone(&self.backend),
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::LocalBroker;
    use crate::event::{row, ChangeBinding, RowChange};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    /// Backend whose joins take a while to complete.
    struct SlowJoins {
        broker: LocalBroker,
        delay: Duration,
    }

    #[async_trait]
    impl RealtimeBackend for SlowJoins {
        async fn join(&self, spec: &ChannelSpec) -> crate::Result<BackendChannel> {
            tokio::time::sleep(self.delay).await;
            self.broker.join(spec).await
        }

        async fn leave(&self, id: Uuid) -> crate::Result<()> {
            self.broker.leave(id).await
        }
    }

    fn setup() -> (LocalBroker, RealtimeCoordinator) {
        let broker = LocalBroker::new();
        let coordinator = RealtimeCoordinator::new(Arc::new(broker.clone()));
        (broker, coordinator)
    }

    fn spec(session_id: &str) -> ChannelSpec {
        ChannelSpec::new(format!("tv-session-{}", session_id)).with_binding(
            ChangeBinding::table("user_training_session")
                .with_filter("training_session_id", session_id),
        )
    }

    async fn settle(channel: &Channel, target: ChannelState) {
        for _ in 0..100 {
            if channel.state() == target {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("channel {} never reached {}", channel.name(), target);
    }

    async fn next_change(rx: &mut broadcast::Receiver<ChannelEvent>) -> RowChange {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("timed out waiting for change")
                .expect("channel closed");
            if let ChannelEvent::Change(change) = event {
                return change;
            }
        }
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let (broker, coordinator) = setup();

        let first = coordinator.subscribe(spec("s1")).await;
        let second = coordinator.subscribe(spec("s1")).await;

        assert!(first.ptr_eq(&second));
        assert_eq!(coordinator.len(), 1);
        assert_eq!(broker.join_count(), 1);

        settle(&first, ChannelState::Subscribed).await;
        assert!(coordinator.is_connected());
    }

    #[tokio::test]
    async fn test_teardown_then_subscribe() {
        let (broker, coordinator) = setup();
        coordinator.subscribe(spec("s1")).await;

        let teardown = coordinator.teardown_all();
        assert_eq!(teardown.channels(), ["tv-session-s1".to_string()]);
        assert!(coordinator.is_empty());

        coordinator.subscribe(spec("s1")).await;
        assert_eq!(coordinator.len(), 1);

        teardown.wait().await;
        assert_eq!(broker.leave_count(), 1);
        assert_eq!(broker.live_channels(), vec!["tv-session-s1".to_string()]);
    }

    #[tokio::test]
    async fn test_awaited_teardown_leaves_everything() {
        let (broker, coordinator) = setup();
        let channel = coordinator.subscribe(spec("s1")).await;
        coordinator.subscribe(spec("s2")).await;
        let mut rx = channel.listen();

        coordinator.teardown_all().wait().await;

        assert!(broker.live_channels().is_empty());
        assert_eq!(broker.leave_count(), 2);
        assert_eq!(channel.state(), ChannelState::Unsubscribed);

        let mut saw_closed = false;
        while let Ok(event) = rx.try_recv() {
            saw_closed |= event == ChannelEvent::Status(ChannelStatus::Closed);
        }
        assert!(saw_closed);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_is_noop() {
        let (broker, coordinator) = setup();
        coordinator.subscribe(spec("s1")).await;

        let teardown = coordinator.unsubscribe("tv-session-missing");
        assert!(teardown.is_empty());
        teardown.wait().await;

        assert_eq!(coordinator.len(), 1);
        assert_eq!(broker.leave_count(), 0);
    }

    #[tokio::test]
    async fn test_resume_preserves_listeners() {
        let (broker, coordinator) = setup();
        let channel = coordinator.subscribe(spec("s1")).await;
        let mut rx = channel.listen();
        settle(&channel, ChannelState::Subscribed).await;

        coordinator.resume().await;
        assert_eq!(broker.join_count(), 2);
        assert_eq!(broker.leave_count(), 1);
        settle(&channel, ChannelState::Subscribed).await;

        let change = RowChange::insert(
            "user_training_session",
            row(json!({ "training_session_id": "s1", "user_id": "u1" })),
        );
        assert_eq!(broker.publish(change.clone()), 1);
        assert_eq!(next_change(&mut rx).await, change);
    }

    #[tokio::test]
    async fn test_failed_join_stays_registered_until_resume() {
        let (broker, coordinator) = setup();
        broker.set_reject_joins(true);

        let channel = coordinator.subscribe(spec("s1")).await;
        assert_eq!(channel.state(), ChannelState::Errored);
        assert_eq!(coordinator.len(), 1);
        assert!(!coordinator.is_connected());

        broker.set_reject_joins(false);
        assert!(!coordinator.handle_lifecycle(AppLifecycle::Background).await);
        assert!(coordinator.handle_lifecycle(AppLifecycle::Active).await);

        settle(&channel, ChannelState::Subscribed).await;
        assert!(coordinator.is_connected());
    }

    #[tokio::test]
    async fn test_lifecycle_only_resumes_from_background() {
        let (broker, coordinator) = setup();
        coordinator.subscribe(spec("s1")).await;

        assert!(!coordinator.handle_lifecycle(AppLifecycle::Active).await);
        assert_eq!(broker.join_count(), 1);

        assert!(!coordinator.handle_lifecycle(AppLifecycle::Inactive).await);
        assert_eq!(coordinator.lifecycle(), AppLifecycle::Inactive);
        assert!(coordinator.handle_lifecycle(AppLifecycle::Active).await);
        assert_eq!(broker.join_count(), 2);
    }

    #[tokio::test]
    async fn test_backend_failure_status_marks_errored() {
        let (broker, coordinator) = setup();
        let channel = coordinator.subscribe(spec("s1")).await;
        settle(&channel, ChannelState::Subscribed).await;

        broker.report("tv-session-s1", ChannelStatus::TimedOut);
        settle(&channel, ChannelState::Errored).await;
        assert!(!coordinator.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_during_join_leaves_superseded_link() {
        let broker = LocalBroker::new();
        let coordinator = RealtimeCoordinator::new(Arc::new(SlowJoins {
            broker: broker.clone(),
            delay: Duration::from_millis(50),
        }));

        let subscribing = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.subscribe(spec("s1")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        coordinator.resume().await;
        subscribing.await.unwrap();

        assert_eq!(broker.join_count(), 2);
        assert_eq!(broker.leave_count(), 1);
        assert_eq!(broker.live_channels(), vec!["tv-session-s1".to_string()]);

        coordinator.teardown_all().wait().await;
        assert!(broker.live_channels().is_empty());
        assert_eq!(broker.leave_count(), 2);
    }

    #[tokio::test]
    async fn test_retained_channel_closes_with_last_holder() {
        let (broker, coordinator) = setup();
        let first = coordinator.retain(spec("s1"));
        let second = coordinator.retain(spec("s1"));
        assert!(first.ptr_eq(&second));
        settle(&first, ChannelState::Subscribed).await;
        assert_eq!(broker.join_count(), 1);

        assert!(coordinator.release(&first).is_empty());
        assert_eq!(coordinator.len(), 1);
        assert_eq!(broker.live_channels(), vec!["tv-session-s1".to_string()]);

        let teardown = coordinator.release(&second);
        assert_eq!(teardown.channels(), ["tv-session-s1".to_string()]);
        teardown.wait().await;
        assert!(coordinator.is_empty());
        assert!(broker.live_channels().is_empty());
    }

    #[tokio::test]
    async fn test_stale_release_keeps_replacement_entry() {
        let (broker, coordinator) = setup();
        let stale = coordinator.retain(spec("s1"));
        settle(&stale, ChannelState::Subscribed).await;

        coordinator.teardown_all().wait().await;
        let current = coordinator.retain(spec("s1"));
        settle(&current, ChannelState::Subscribed).await;

        assert!(coordinator.release(&stale).is_empty());
        assert!(coordinator.get("tv-session-s1").is_some_and(|c| c.ptr_eq(&current)));
        assert_eq!(broker.live_channels(), vec!["tv-session-s1".to_string()]);
    }
}
