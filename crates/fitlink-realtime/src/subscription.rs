//! Typed, debounced subscriptions on top of the coordinator

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::coordinator::{Channel, RealtimeCoordinator, Teardown};
use crate::event::{ChannelEvent, ChannelSpec, RowChange};
use crate::state::{ChannelState, ChannelStatus, ConnectionStatus};
use crate::Result;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Turns raw row changes on one channel into typed domain events.
#[async_trait]
pub trait EventSource: Send + Sync + 'static {
    type Event: Send + 'static;

    fn channel_spec(&self) -> ChannelSpec;

    /// Client-side predicate applied before translation.
    fn accepts(&self, _change: &RowChange) -> bool {
        true
    }

    /// `Ok(None)` skips the change silently.
    async fn translate(&self, change: &RowChange) -> Result<Option<Self::Event>>;

    fn describe_error(&self, status: ChannelStatus) -> String {
        match status {
            ChannelStatus::TimedOut => "Connection timed out".to_string(),
            _ => "Failed to connect to realtime updates".to_string(),
        }
    }
}

type Handler<E> = Arc<dyn Fn(E) + Send + Sync>;

/// Replaceable callback. Swapping it never touches the underlying channel.
pub struct HandlerSlot<E> {
    handler: Arc<RwLock<Option<Handler<E>>>>,
}

impl<E> HandlerSlot<E> {
    pub fn new() -> Self {
        Self {
            handler: Arc::new(RwLock::new(None)),
        }
    }

    pub fn set<F>(&self, handler: F)
    where
        F: Fn(E) + Send + Sync + 'static,
    {
        *self.handler.write() = Some(Arc::new(handler));
    }

    pub fn clear(&self) {
        *self.handler.write() = None;
    }

    pub fn is_set(&self) -> bool {
        self.handler.read().is_some()
    }

    /// Invoke the current handler. Returns false when the slot is empty.
    pub fn call(&self, value: E) -> bool {
        // Clone out so the handler may replace itself
        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => {
                (*handler)(value);
                true
            }
            None => false,
        }
    }
}

impl<E> Default for HandlerSlot<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for HandlerSlot<E> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Delay between start and the actual subscribe
    pub debounce: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// What a subscription holds in the coordinator.
enum Hold {
    /// Still inside the debounce window
    Pending,
    Held(Channel),
    Released,
}

/// A live, typed view of one channel.
///
/// Subscriptions on the same channel share one registry entry. Stopping or
/// dropping one cancels a pending debounced subscribe and releases its hold;
/// the channel closes when the last holder lets go.
pub struct Subscription<S: EventSource> {
    coordinator: RealtimeCoordinator,
    channel_name: String,
    hold: Arc<Mutex<Hold>>,
    on_event: HandlerSlot<S::Event>,
    on_error: HandlerSlot<String>,
    status: watch::Receiver<ConnectionStatus>,
    last_error: Arc<RwLock<Option<String>>>,
    task: Option<JoinHandle<()>>,
}

impl<S: EventSource> Subscription<S> {
    pub fn start<F>(
        coordinator: &RealtimeCoordinator,
        source: S,
        config: &SubscriptionConfig,
        on_event: F,
    ) -> Self
    where
        F: Fn(S::Event) + Send + Sync + 'static,
    {
        let spec = source.channel_spec();
        let channel_name = spec.name.clone();
        let (status_tx, status) = watch::channel(ConnectionStatus::Connecting);

        let pump = Pump {
            source,
            on_event: HandlerSlot::new(),
            on_error: HandlerSlot::new(),
            status: status_tx,
            last_error: Arc::new(RwLock::new(None)),
        };
        pump.on_event.set(on_event);

        let mut subscription = Self {
            coordinator: coordinator.clone(),
            channel_name,
            hold: Arc::new(Mutex::new(Hold::Pending)),
            on_event: pump.on_event.clone(),
            on_error: pump.on_error.clone(),
            status,
            last_error: Arc::clone(&pump.last_error),
            task: None,
        };

        let coordinator = coordinator.clone();
        let hold = Arc::clone(&subscription.hold);
        let debounce = config.debounce;
        subscription.task = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            tracing::debug!(channel = %spec.name, "Setting up realtime subscription");

            let (events, state) = {
                let mut hold = hold.lock();
                if matches!(*hold, Hold::Released) {
                    return;
                }
                let channel = coordinator.retain(spec);
                let events = channel.listen();
                let state = channel.state();
                *hold = Hold::Held(channel);
                (events, state)
            };

            pump.run(state, events).await;
        }));

        subscription
    }

    /// Replace the event callback without re-subscribing.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(S::Event) + Send + Sync + 'static,
    {
        self.on_event.set(handler);
    }

    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.on_error.set(handler);
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn status_changes(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    pub fn stop(mut self) -> Teardown {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Teardown {
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let held = std::mem::replace(&mut *self.hold.lock(), Hold::Released);
        match held {
            Hold::Held(channel) => {
                tracing::debug!(channel = %self.channel_name, "Cleaning up realtime subscription");
                self.coordinator.release(&channel)
            }
            Hold::Pending | Hold::Released => Teardown::default(),
        }
    }
}

impl<S: EventSource> Drop for Subscription<S> {
    fn drop(&mut self) {
        // Leave calls still run in the background
        let _ = self.shutdown();
    }
}

struct Pump<S: EventSource> {
    source: S,
    on_event: HandlerSlot<S::Event>,
    on_error: HandlerSlot<String>,
    status: watch::Sender<ConnectionStatus>,
    last_error: Arc<RwLock<Option<String>>>,
}

impl<S: EventSource> Pump<S> {
    async fn run(&self, initial: ChannelState, mut events: broadcast::Receiver<ChannelEvent>) {
        // Statuses emitted before we started listening
        match initial {
            ChannelState::Subscribed => self.on_status(ChannelStatus::Subscribed),
            ChannelState::Errored => self.on_status(ChannelStatus::ChannelError),
            _ => {}
        }

        loop {
            match events.recv().await {
                Ok(ChannelEvent::Status(status)) => self.on_status(status),
                Ok(ChannelEvent::Change(change)) => self.on_change(&change).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Realtime subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        self.status.send_replace(ConnectionStatus::Connecting);
    }

    fn on_status(&self, status: ChannelStatus) {
        tracing::debug!(?status, "Subscription status changed");
        self.status.send_replace(status.connection_status());

        if status == ChannelStatus::Subscribed {
            *self.last_error.write() = None;
        } else if status.is_failure() {
            self.report(self.source.describe_error(status));
        }
    }

    async fn on_change(&self, change: &RowChange) {
        if !self.source.accepts(change) {
            return;
        }

        match self.source.translate(change).await {
            Ok(Some(event)) => {
                self.on_event.call(event);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, table = %change.table, "Failed to process change");
                self.report(e.to_string());
            }
        }
    }

    fn report(&self, message: String) {
        *self.last_error.write() = Some(message.clone());
        self.on_error.call(message);
    }
}
