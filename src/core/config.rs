//! # Runtime configuration.
//!
//! - [`Config`] settings for a [`Supervisor`](crate::Supervisor).
//! - [`LifecycleParams`] per-controller lifecycle knobs (init retries, pacing, budgets).
//! - [`SchedulerConfig`] how the scheduler bridge builds per-thread schedulers.
//!
//! ## Sentinel values
//! - `step_timeout = 0s` → loop steps are not bounded
//! - `max_consecutive_failures = 0` → iteration failures never stop a controller
//! - `sample_interval = 0s` → no pause between loop iterations

use std::time::Duration;

use crate::policies::RetryPolicy;

/// Global configuration for the supervisor.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum time to wait for all controllers to reach `Stopped` after a stop.
    ///
    /// When exceeded, [`Supervisor::run`](crate::Supervisor::run) returns
    /// `RuntimeError::GraceExceeded` listing the stuck controllers.
    pub grace: Duration,

    /// Capacity of the event bus ring buffer (min 1; clamped by the bus).
    pub bus_capacity: usize,

    /// Lifecycle defaults for controllers registered without explicit params.
    pub lifecycle: LifecycleParams,

    /// Used when a blocking caller drives the supervisor.
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for Config {
    /// - `grace = 60s`
    /// - `bus_capacity = 1024`
    /// - `lifecycle = LifecycleParams::default()`
    /// - `scheduler = SchedulerConfig::default()`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(60),
            bus_capacity: 1024,
            lifecycle: LifecycleParams::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Knobs for one controller lifecycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LifecycleParams {
    /// Initialization attempts before the controller is declared failed-to-start.
    pub init_tries: u32,
    /// Pause between initialization attempts.
    pub init_wait: Duration,
    /// Pause after every loop iteration; a stop request cuts it short.
    pub sample_interval: Duration,
    /// Per-iteration budget for the loop step (`0s` = unbounded).
    pub step_timeout: Duration,
    /// Consecutive failing iterations that clear the running flag (`0` = never).
    pub max_consecutive_failures: u32,
}

impl LifecycleParams {
    /// The `try_initialize(tries, wait)` policy.
    #[inline]
    pub fn init_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.init_tries, self.init_wait)
    }

    /// Returns the loop step budget as an `Option`.
    #[inline]
    pub fn step_budget(&self) -> Option<Duration> {
        (self.step_timeout > Duration::ZERO).then_some(self.step_timeout)
    }

    /// Returns the failure cap as an `Option`.
    #[inline]
    pub fn failure_cap(&self) -> Option<u32> {
        (self.max_consecutive_failures > 0).then_some(self.max_consecutive_failures)
    }

    /// Returns params with `try_initialize(tries, wait)` settings replaced.
    pub fn with_init(mut self, tries: u32, wait: Duration) -> Self {
        self.init_tries = tries;
        self.init_wait = wait;
        self
    }

    /// Returns params with a different pause between iterations.
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Returns params with a loop step budget (`Duration::ZERO` disables it).
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Returns params with a consecutive-failure cap (`0` disables it).
    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max;
        self
    }
}

impl Default for LifecycleParams {
    /// - `init_tries = 3`, `init_wait = 5s`
    /// - `sample_interval = 250ms`
    /// - `step_timeout = 0s` (unbounded)
    /// - `max_consecutive_failures = 0` (unbounded)
    fn default() -> Self {
        Self {
            init_tries: 3,
            init_wait: Duration::from_secs(5),
            sample_interval: Duration::from_millis(250),
            step_timeout: Duration::ZERO,
            max_consecutive_failures: 0,
        }
    }
}

/// How the bridge builds a thread's cooperative scheduler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Upper bound of the worker pool used by `offload_blocking` (min 1).
    pub max_blocking_threads: usize,
    /// Name given to offload worker threads.
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_blocking_threads: 64,
            thread_name: "ctrlvisor-blocking".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_map_to_none() {
        let params = LifecycleParams::default();
        assert_eq!(params.step_budget(), None);
        assert_eq!(params.failure_cap(), None);

        let params = params
            .with_step_timeout(Duration::from_secs(2))
            .with_max_consecutive_failures(5);
        assert_eq!(params.step_budget(), Some(Duration::from_secs(2)));
        assert_eq!(params.failure_cap(), Some(5));
    }

    #[test]
    fn init_policy_uses_tries_and_wait() {
        let policy = LifecycleParams::default()
            .with_init(4, Duration::from_millis(10))
            .init_policy();
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.backoff().next(2), Duration::from_millis(10));
    }

    #[test]
    fn bus_capacity_is_clamped() {
        let cfg = Config {
            bus_capacity: 0,
            ..Config::default()
        };
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }
}
