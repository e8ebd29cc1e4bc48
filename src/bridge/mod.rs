//! Scheduler bridge: lets blocking and cooperative code share one process.
//!
//! ```text
//!  blocking caller ──run_blocking()──► [thread's SchedulerHandle] ──► cooperative op
//!  cooperative op  ──offload_blocking()──► [bounded worker pool]  ──► blocking fn
//!  any caller      ──spawn_if_active()──► Some(TaskHandle) | None
//! ```
//!
//! - [`SchedulerBridge`] / [`acquire_scheduler`]: one lazily created scheduler per thread.
//! - [`spawn_if_active`]: background work only when a scheduler is already running.
//! - [`offload_blocking`]: keep blocking code off the scheduler thread.

mod scheduler;
mod spawn;

pub use scheduler::{SchedulerBridge, SchedulerHandle, acquire_scheduler};
pub use spawn::{TaskHandle, offload_blocking, spawn_if_active};
