//! Store notifications for the transport layer.

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::state::StoreState;

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Something observable happened to the store.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// The store finished loading from persistence.
    Initialized,
    /// A dispatch produced a new state.
    StateUpdated(Arc<StoreState>),
    /// A flush reached the adapter.
    Synced,
    /// A background flush failed. It will be retried on the next trigger.
    SyncFailed { error: String },
}

/// Fan-out channel for [`StoreEvent`]s.
///
/// Slow subscribers lag and lose the oldest events rather than blocking
/// the store.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<StoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event.
    pub fn emit(&self, event: StoreEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_subscribers() {
        let bus = EventBus::default();
        bus.emit(StoreEvent::Synced);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit(StoreEvent::Initialized);
        bus.emit(StoreEvent::StateUpdated(Arc::new(StoreState::new())));
        bus.emit(StoreEvent::Synced);

        assert!(matches!(rx.recv().await.unwrap(), StoreEvent::Initialized));
        match rx.recv().await.unwrap() {
            StoreEvent::StateUpdated(state) => assert!(state.is_empty()),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(rx.recv().await.unwrap(), StoreEvent::Synced));
    }
}
