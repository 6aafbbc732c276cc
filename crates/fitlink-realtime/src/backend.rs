//! Realtime backend boundary

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::event::{ChannelEvent, ChannelSpec};
use crate::Result;

/// A joined backend channel: its id and the stream of lifecycle and row events.
#[derive(Debug)]
pub struct BackendChannel {
    pub id: Uuid,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

#[async_trait]
pub trait RealtimeBackend: Send + Sync {
    /// Join a named channel. Lifecycle statuses arrive on the event stream.
    async fn join(&self, spec: &ChannelSpec) -> Result<BackendChannel>;

    /// Leave a joined channel. Leaving an unknown id is a no-op.
    async fn leave(&self, id: Uuid) -> Result<()>;
}
