//! Event system for viewer notifications
//!
//! The viewer publishes connection, target and hit changes here so any
//! number of consumers (status printers, renderers) can follow along.

pub mod types;

pub use types::{CameraRole, SystemEvent};

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Event bus for broadcasting viewer events
///
/// # Example
///
/// ```no_run
/// use smartbow_viewer::events::{EventBus, SystemEvent};
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(SystemEvent::HitExpired { id: 1 });
///
/// tokio::spawn(async move {
///     while let Ok(event) = rx.recv().await {
///         println!("{}", event.event_name());
///     }
/// });
/// ```
pub struct EventBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all subscribers
    ///
    /// Dropped silently when nobody is listening.
    pub fn publish(&self, event: SystemEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to future events
    ///
    /// A subscriber that falls more than the ring size behind gets a
    /// `Lagged` error and misses events.
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
