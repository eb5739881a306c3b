//! Event bus for cross-component notifications.
//!
//! A thin wrapper over a tokio broadcast channel. Constructed once at the
//! composition root and cloned into every publisher; publishing with no
//! subscribers is a silent no-op.

use tokio::sync::broadcast;
use tracing::debug;

use crate::events::BusEvent;

/// Broadcast channel capacity for bus events.
const CHANNEL_CAPACITY: usize = 256;

/// Shared publish/subscribe bus for [`BusEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
}

impl EventBus {
    /// Create a new bus.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: BusEvent) {
        if self.sender.receiver_count() > 0 {
            debug!(?event, "publishing bus event");
            let _ = self.sender.send(event);
        }
    }

    /// Subscribe to bus events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
