//! Identity-change bridge
//!
//! Tears down every realtime channel when the signed-in identity changes, so
//! no channel opened under one account keeps delivering after another signs in.

use tokio::sync::watch;
use tokio::task::JoinHandle;

use fitlink_realtime::{RealtimeCoordinator, Teardown};

pub struct IdentityBridge {
    /// Last identity seen; `None` until the first one arrives
    previous: Option<String>,
    coordinator: RealtimeCoordinator,
}

impl IdentityBridge {
    pub fn new(coordinator: RealtimeCoordinator) -> Self {
        Self {
            previous: None,
            coordinator,
        }
    }

    /// Record the current identity. Tears down all channels when a known
    /// previous identity differs from it.
    pub fn observe(&mut self, current: Option<&str>) -> Option<Teardown> {
        let teardown = match self.previous.as_deref() {
            Some(previous) if Some(previous) != current => {
                tracing::info!(
                    previous = %previous,
                    current = ?current,
                    "Identity changed, tearing down realtime channels"
                );
                Some(self.coordinator.teardown_all())
            }
            _ => None,
        };

        self.previous = current.map(str::to_string);
        teardown
    }

    pub fn previous(&self) -> Option<&str> {
        self.previous.as_deref()
    }

    /// Follow an identity channel until its sender is dropped. Each teardown
    /// is awaited before the next change is observed.
    pub fn spawn(
        mut identities: watch::Receiver<Option<String>>,
        coordinator: RealtimeCoordinator,
    ) -> JoinHandle<()> {
        let mut bridge = IdentityBridge::new(coordinator);
        let initial = identities.borrow_and_update().clone();
        bridge.observe(initial.as_deref());

        tokio::spawn(async move {
            while identities.changed().await.is_ok() {
                let current = identities.borrow_and_update().clone();
                if let Some(teardown) = bridge.observe(current.as_deref()) {
                    teardown.wait().await;
                }
            }
            tracing::debug!("Identity channel closed, bridge stopped");
        })
    }
}
