//! Fitlink Realtime
//!
//! Registry of named channels against a pub/sub backend, plus the shared
//! subscription pattern the concrete feeds (check-ins, preference updates,
//! training-session notifications) are built on.

mod backend;
mod broker;
mod coordinator;
mod error;
mod event;
mod state;
mod subscription;

pub mod sources;

pub use backend::{BackendChannel, RealtimeBackend};
pub use broker::LocalBroker;
pub use coordinator::{AppLifecycle, Channel, RealtimeCoordinator, Teardown};
pub use error::RealtimeError;
pub use event::{row, ChangeBinding, ChangeKind, ChannelEvent, ChannelSpec, EqFilter, Row, RowChange};
pub use state::{ChannelState, ChannelStatus, ConnectionStatus};
pub use subscription::{EventSource, HandlerSlot, Subscription, SubscriptionConfig};

pub type Result<T> = std::result::Result<T, RealtimeError>;
