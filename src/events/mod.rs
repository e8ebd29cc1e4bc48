//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Lifecycle` (initialization, iterations, cleanup, stop),
//!   `Supervisor` (shutdown, grace), `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the supervisor listener (fans out to `SubscriberSet`) and
//!   receivers obtained from `Lifecycle::events()` / `Supervisor::events()`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
