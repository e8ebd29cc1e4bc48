//! # Event subscribers.
//!
//! ```text
//! Lifecycle ── publish(Event) ──► Bus ──► supervisor listener ──► SubscriberSet
//!                                                                   ├──► MetricsSubscriber ──► MetricsSink
//!                                                                   └──► custom Subscribe impls
//! ```
//!
//! - [`Subscribe`] extension point for custom handlers
//! - [`SubscriberSet`] per-subscriber queues, panic isolation
//! - [`MetricsSubscriber`] maps lifecycle events onto a [`MetricsSink`](crate::MetricsSink)

mod metrics;
mod subscriber;
mod subscriber_set;

pub use metrics::MetricsSubscriber;
pub use subscriber::Subscribe;
pub use subscriber_set::SubscriberSet;
