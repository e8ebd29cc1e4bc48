//! # Event bus for lifecycle events.
//!
//! [`Bus`] wraps [`tokio::sync::broadcast`]: lifecycles and the supervisor publish,
//! the supervisor's listener (and any direct receiver) consumes.
//!
//! ```text
//! Lifecycle A ──┐
//! Lifecycle B ──┼──► Bus ──► listener ──► SubscriberSet ──► metrics, custom...
//! Supervisor  ──┘        └─► Lifecycle::events() receivers
//! ```
//!
//! ## Rules
//! - `publish()` never blocks and never fails; without receivers the event is dropped.
//! - One shared ring buffer; slow receivers see `RecvError::Lagged(n)` and skip `n` events.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus; capacity is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all current receivers.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver for events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn receivers_see_events_published_after_subscribing() {
        let bus = Bus::new(0);
        bus.publish(Event::new(EventKind::StopRequested));

        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::ControllerStopped));
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::ControllerStopped);
    }
}
