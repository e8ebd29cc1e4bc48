//! # Event subscriber trait.
//!
//! [`Subscribe`] plugs custom event handlers (metrics, alerts, audit trails)
//! into a supervisor. Each subscriber gets its own bounded queue and worker
//! task inside the [`SubscriberSet`](super::SubscriberSet):
//!
//! ```text
//! SubscriberSet ──► [bounded queue] ──► worker task ──► subscriber.on_event()
//!                                    └─► panic caught → EventKind::SubscriberPanicked
//! ```
//!
//! A full queue drops the event for that subscriber only and publishes
//! `EventKind::SubscriberOverflow`.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use ctrlvisor::{Event, EventKind, Subscribe};
//!
//! struct Pager;
//!
//! #[async_trait]
//! impl Subscribe for Pager {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::InitializationFailed {
//!             // page whoever is on call
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "pager" }
//!     fn queue_capacity(&self) -> usize { 64 }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Receives runtime events on a dedicated worker, in publication order.
///
/// Handle errors internally; a panic is contained but the event is lost.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    async fn on_event(&self, event: &Event);

    /// Name used in overflow/panic events. Defaults to the type name.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Queue size for this subscriber (min 1). Default: 1024.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
