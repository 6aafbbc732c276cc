//! In-process realtime backend
//!
//! Routes published row changes to every joined channel whose bindings
//! match, the way the hosted pub/sub service filters server-side.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::backend::{BackendChannel, RealtimeBackend};
use crate::error::RealtimeError;
use crate::event::{ChannelEvent, ChannelSpec, RowChange};
use crate::state::ChannelStatus;
use crate::Result;

struct Joined {
    spec: ChannelSpec,
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

#[derive(Default)]
struct BrokerState {
    channels: RwLock<HashMap<Uuid, Joined>>,
    joins: AtomicUsize,
    leaves: AtomicUsize,
    reject_joins: AtomicBool,
}

#[derive(Clone, Default)]
pub struct LocalBroker {
    state: Arc<BrokerState>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a row change. Returns how many channels received it.
    pub fn publish(&self, change: RowChange) -> usize {
        let channels = self.state.channels.read();
        let mut delivered = 0;

        for joined in channels.values() {
            if joined.spec.matches(&change)
                && joined.tx.send(ChannelEvent::Change(change.clone())).is_ok()
            {
                delivered += 1;
            }
        }

        tracing::debug!(table = %change.table, delivered, "Published change");
        delivered
    }

    /// Inject a lifecycle status on every joined channel with this name.
    pub fn report(&self, channel: &str, status: ChannelStatus) -> usize {
        self.state
            .channels
            .read()
            .values()
            .filter(|joined| joined.spec.name == channel)
            .filter(|joined| joined.tx.send(ChannelEvent::Status(status)).is_ok())
            .count()
    }

    /// Make subsequent joins fail, as an unreachable service would.
    pub fn set_reject_joins(&self, reject: bool) {
        self.state.reject_joins.store(reject, Ordering::SeqCst);
    }

    pub fn join_count(&self) -> usize {
        self.state.joins.load(Ordering::SeqCst)
    }

    pub fn leave_count(&self) -> usize {
        self.state.leaves.load(Ordering::SeqCst)
    }

    /// Names of currently joined channels, sorted.
    pub fn live_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .channels
            .read()
            .values()
            .map(|joined| joined.spec.name.clone())
            .collect();
        names.sort();
        names
    }
}

#[async_trait]
impl RealtimeBackend for LocalBroker {
    async fn join(&self, spec: &ChannelSpec) -> Result<BackendChannel> {
        self.state.joins.fetch_add(1, Ordering::SeqCst);

        if self.state.reject_joins.load(Ordering::SeqCst) {
            return Err(RealtimeError::Join {
                channel: spec.name.clone(),
                reason: "service unavailable".to_string(),
            });
        }

        let (tx, events) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        // Receiver is alive, the send cannot fail
        let _ = tx.send(ChannelEvent::Status(ChannelStatus::Subscribed));

        self.state.channels.write().insert(
            id,
            Joined {
                spec: spec.clone(),
                tx,
            },
        );

        tracing::debug!(channel = %spec.name, %id, "Channel joined");
        Ok(BackendChannel { id, events })
    }

    async fn leave(&self, id: Uuid) -> Result<()> {
        if let Some(joined) = self.state.channels.write().remove(&id) {
            self.state.leaves.fetch_add(1, Ordering::SeqCst);
            let _ = joined.tx.send(ChannelEvent::Status(ChannelStatus::Closed));
            tracing::debug!(channel = %joined.spec.name, %id, "Channel left");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{row, ChangeBinding};
    use serde_json::json;

    fn spec(tenant: &str) -> ChannelSpec {
        ChannelSpec::new(format!("training-sessions-{}", tenant))
            .with_binding(ChangeBinding::table("training_session").with_filter("business_id", tenant))
    }

    #[tokio::test]
    async fn test_join_reports_subscribed_and_routes_changes() {
        let broker = LocalBroker::new();
        let mut t1 = broker.join(&spec("t1")).await.unwrap();
        let mut t2 = broker.join(&spec("t2")).await.unwrap();

        assert_eq!(
            t1.events.recv().await,
            Some(ChannelEvent::Status(ChannelStatus::Subscribed))
        );
        t2.events.recv().await;

        let change = RowChange::insert("training_session", row(json!({ "business_id": "t1" })));
        assert_eq!(broker.publish(change.clone()), 1);
        assert_eq!(t1.events.recv().await, Some(ChannelEvent::Change(change)));
        assert!(t2.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_closes_and_is_idempotent() {
        let broker = LocalBroker::new();
        let mut joined = broker.join(&spec("t1")).await.unwrap();
        joined.events.recv().await;

        broker.leave(joined.id).await.unwrap();
        broker.leave(joined.id).await.unwrap();

        assert_eq!(
            joined.events.recv().await,
            Some(ChannelEvent::Status(ChannelStatus::Closed))
        );
        assert_eq!(joined.events.recv().await, None);
        assert_eq!(broker.leave_count(), 1);
        assert!(broker.live_channels().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_join() {
        let broker = LocalBroker::new();
        broker.set_reject_joins(true);

        assert!(matches!(
            broker.join(&spec("t1")).await,
            Err(RealtimeError::Join { .. })
        ));
        assert_eq!(broker.join_count(), 1);
    }
}
