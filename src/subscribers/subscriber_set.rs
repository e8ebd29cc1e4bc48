//! # Non-blocking event fan-out.
//!
//! ```text
//! emit(event)
//!     ├──► [queue 1] ──► worker 1 ──► subscriber1.on_event()
//!     └──► [queue N] ──► worker N ──► subscriberN.on_event()
//! ```
//!
//! - `emit()` never waits (`try_send`); each subscriber sees events FIFO.
//! - A full or closed queue publishes `SubscriberOverflow` (never for an
//!   overflow event itself, so overflow cannot feed on itself).
//! - A panicking handler publishes `SubscriberPanicked`; its worker keeps going.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use super::Subscribe;
use crate::error::panic_message;
use crate::events::{Bus, Event, EventKind};

struct Lane {
    name: &'static str,
    tx: mpsc::Sender<Arc<Event>>,
    worker: JoinHandle<()>,
}

/// Delivers events to every subscriber through its own queue.
pub struct SubscriberSet {
    lanes: Vec<Lane>,
    bus: Bus,
}

impl SubscriberSet {
    /// Spawns one worker per subscriber; call from inside a scheduler.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let lanes = subs
            .into_iter()
            .map(|sub| Self::lane(sub, bus.clone()))
            .collect();
        Self { lanes, bus }
    }

    fn lane(sub: Arc<dyn Subscribe>, bus: Bus) -> Lane {
        let name = sub.name();
        let (tx, mut rx) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
        let worker = tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                if let Err(payload) = AssertUnwindSafe(sub.on_event(&ev)).catch_unwind().await {
                    let info = panic_message(payload.as_ref());
                    tracing::warn!(subscriber = name, panic = %info, "subscriber panicked");
                    bus.publish(Event::subscriber_panicked(name, info));
                }
            }
        });
        Lane { name, tx, worker }
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Queues `event` for every subscriber.
    pub fn emit(&self, event: Event) {
        let event = Arc::new(event);
        let is_overflow = event.kind == EventKind::SubscriberOverflow;

        for lane in &self.lanes {
            let reason = match lane.tx.try_send(Arc::clone(&event)) {
                Ok(()) => continue,
                Err(TrySendError::Full(_)) => "full",
                Err(TrySendError::Closed(_)) => "closed",
            };
            if !is_overflow {
                self.bus.publish(Event::subscriber_overflow(lane.name, reason));
            }
        }
    }

    /// Closes every queue and waits for the workers to drain them.
    pub async fn shutdown(self) {
        let workers: Vec<_> = self
            .lanes
            .into_iter()
            .map(|Lane { tx, worker, .. }| {
                drop(tx);
                worker
            })
            .collect();
        for worker in workers {
            let _ = worker.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<EventKind>>);

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, event: &Event) {
            self.0.lock().unwrap().push(event.kind);
        }
        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    struct Grumpy;

    #[async_trait]
    impl Subscribe for Grumpy {
        async fn on_event(&self, _event: &Event) {
            panic!("cannot handle this");
        }
        fn name(&self) -> &'static str {
            "grumpy"
        }
    }

    #[tokio::test]
    async fn delivers_in_order_and_drains_on_shutdown() {
        let rec = Arc::new(Recorder::default());
        let set = SubscriberSet::new(vec![rec.clone()], Bus::new(8));
        set.emit(Event::new(EventKind::ControllerStarting));
        set.emit(Event::new(EventKind::ControllerRunning));
        set.shutdown().await;

        assert_eq!(
            *rec.0.lock().unwrap(),
            vec![EventKind::ControllerStarting, EventKind::ControllerRunning]
        );
    }

    #[tokio::test]
    async fn panicking_subscriber_is_reported_and_others_still_receive() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        let rec = Arc::new(Recorder::default());
        let set = SubscriberSet::new(vec![Arc::new(Grumpy), rec.clone()], bus);

        set.emit(Event::new(EventKind::StopRequested));
        set.shutdown().await;

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::SubscriberPanicked);
        assert_eq!(ev.controller.as_deref(), Some("grumpy"));
        assert_eq!(ev.reason.as_deref(), Some("cannot handle this"));
        assert_eq!(*rec.0.lock().unwrap(), vec![EventKind::StopRequested]);
    }
}
