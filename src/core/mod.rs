//! Runtime core: controller lifecycles and their supervisor.
//!
//! - [`lifecycle`]: drives one controller through init, loop and cleanup;
//! - [`step`]: runs a single step in its resolved variant, with budget and panic containment;
//! - [`state`]: lifecycle states and the flags shared with step contexts;
//! - [`supervisor`]: owns lifecycles, fan-out to subscribers, graceful shutdown;
//! - [`shutdown`]: OS termination signals;
//! - [`config`]: supervisor, lifecycle and scheduler settings.

mod builder;
mod config;
mod lifecycle;
mod shutdown;
pub(crate) mod state;
mod step;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use config::{Config, LifecycleParams, SchedulerConfig};
pub use lifecycle::Lifecycle;
pub use state::LifecycleState;
pub use supervisor::Supervisor;
