//! Lifecycle state machine and the flags shared between a lifecycle and its step contexts.
//!
//! ```text
//! Uninitialized ──start()──► Initializing ──ok──► Running ──► Stopping ──► Stopped
//!                                 │                                          ▲
//!                                 └────────── retries exhausted ─────────────┘
//! ```

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Where a controller is in its lifecycle. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LifecycleState {
    /// Created, `start()` not called yet.
    Uninitialized = 0,
    /// Initialization attempts in progress.
    Initializing = 1,
    /// Loop active (or about to exit after a stop request).
    Running = 2,
    /// Loop exited; cleanup in progress.
    Stopping = 3,
    /// Terminal.
    Stopped = 4,
}

impl LifecycleState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LifecycleState::Uninitialized,
            1 => LifecycleState::Initializing,
            2 => LifecycleState::Running,
            3 => LifecycleState::Stopping,
            _ => LifecycleState::Stopped,
        }
    }

    /// Short stable label.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
        }
    }

    /// `true` for `Stopping` and `Stopped`.
    pub fn is_winding_down(&self) -> bool {
        matches!(self, LifecycleState::Stopping | LifecycleState::Stopped)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one lifecycle, readable without touching the loop.
#[derive(Debug)]
pub(crate) struct Shared {
    state: AtomicU8,
    initialized: AtomicBool,
    running: AtomicBool,
    iterations: AtomicU64,
    last_error: Mutex<Option<String>>,
    stop_requested_at: Mutex<Option<Instant>>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Uninitialized as u8),
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
            iterations: AtomicU64::new(0),
            last_error: Mutex::new(None),
            stop_requested_at: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves forward to `to`; backwards moves are ignored.
    pub(crate) fn advance(&self, to: LifecycleState) {
        self.state.fetch_max(to as u8, Ordering::AcqRel);
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn mark_initialized(&self) {
        self.iterations.store(0, Ordering::Release);
        self.initialized.store(true, Ordering::Release);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, on: bool) {
        self.running.store(on, Ordering::Release);
    }

    pub(crate) fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Acquire)
    }

    /// Counts a finished iteration and returns its 1-based number.
    pub(crate) fn bump_iterations(&self) -> u64 {
        self.iterations.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    pub(crate) fn record_error(&self, err: &impl std::fmt::Display) {
        *lock(&self.last_error) = Some(err.to_string());
    }

    /// Remembers the first stop request; returns `false` if one was already recorded.
    pub(crate) fn note_stop_request(&self) -> bool {
        let mut at = lock(&self.stop_requested_at);
        if at.is_some() {
            return false;
        }
        *at = Some(Instant::now());
        true
    }

    pub(crate) fn stop_requested_at(&self) -> Option<Instant> {
        *lock(&self.stop_requested_at)
    }
}

/// Poisoning only means a panic elsewhere; the guarded values stay valid.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_never_moves_backwards() {
        let shared = Shared::new();
        shared.advance(LifecycleState::Running);
        shared.advance(LifecycleState::Initializing);
        assert_eq!(shared.state(), LifecycleState::Running);
        shared.advance(LifecycleState::Stopped);
        assert_eq!(shared.state(), LifecycleState::Stopped);
    }

    #[test]
    fn only_first_stop_request_is_recorded() {
        let shared = Shared::new();
        assert!(shared.note_stop_request());
        let first = shared.stop_requested_at();
        assert!(!shared.note_stop_request());
        assert_eq!(shared.stop_requested_at(), first);
    }

    #[test]
    fn initialization_resets_iteration_count() {
        let shared = Shared::new();
        shared.bump_iterations();
        shared.mark_initialized();
        assert_eq!(shared.iterations(), 0);
        assert_eq!(shared.bump_iterations(), 1);
    }

    #[test]
    fn states_serialize_as_snake_case() {
        let json = serde_json::to_string(&LifecycleState::Uninitialized).unwrap();
        assert_eq!(json, "\"uninitialized\"");
    }
}
