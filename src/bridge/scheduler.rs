//! # Per-thread cooperative schedulers.
//!
//! Every OS thread owns at most one live [`SchedulerHandle`]: a single-threaded
//! tokio runtime stored in a thread-local slot.
//!
//! ```text
//! acquire()
//!   ├─ slot holds an open handle ─► clone it
//!   └─ slot empty or closed      ─► build current_thread runtime, store, return
//!
//! run_blocking(op, timeout)
//!   ├─ already inside a scheduler ─► Err(NestedBlocking)
//!   └─ acquire() ─► block_on(op | with_timeout(op))
//! ```
//!
//! ## Rules
//! - `SchedulerHandle` is `!Send`: it cannot leave the thread that created it.
//! - A closed handle is never handed out again; the next `acquire()` builds a fresh one.
//! - Dropping the last clone shuts the runtime down in the background.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::runtime::{self, Runtime};

use crate::bridge::spawn::TaskHandle;
use crate::core::SchedulerConfig;
use crate::error::SchedulerError;
use crate::ops::{OperationBudget, with_timeout};

static GENERATION: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: RefCell<Option<SchedulerHandle>> = const { RefCell::new(None) };
}

struct Inner {
    runtime: Option<Runtime>,
    closed: Cell<bool>,
    generation: u64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(rt) = self.runtime.take() {
            rt.shutdown_background();
        }
    }
}

/// The calling thread's cooperative scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: Rc<Inner>,
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("generation", &self.inner.generation)
            .field("closed", &self.inner.closed.get())
            .finish()
    }
}

impl SchedulerHandle {
    fn build(cfg: &SchedulerConfig) -> Result<Self, SchedulerError> {
        let runtime = runtime::Builder::new_current_thread()
            .enable_all()
            .max_blocking_threads(cfg.max_blocking_threads.max(1))
            .thread_name(cfg.thread_name.clone())
            .build()
            .map_err(|e| SchedulerError::Build {
                reason: e.to_string(),
            })?;

        Ok(Self {
            inner: Rc::new(Inner {
                runtime: Some(runtime),
                closed: Cell::new(false),
                generation: GENERATION.fetch_add(1, Ordering::Relaxed),
            }),
        })
    }

    /// Process-unique number of this scheduler; a recreated scheduler gets a new one.
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    /// `true` once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// Marks the scheduler closed and releases the thread's slot.
    ///
    /// Work already spawned on it stops being driven; the runtime itself is
    /// shut down when the last clone is dropped.
    pub fn close(&self) {
        if self.inner.closed.replace(true) {
            return;
        }
        let _ = CURRENT.try_with(|slot| {
            if let Ok(mut slot) = slot.try_borrow_mut() {
                if slot
                    .as_ref()
                    .is_some_and(|h| Rc::ptr_eq(&h.inner, &self.inner))
                {
                    *slot = None;
                }
            }
        });
        tracing::debug!(generation = self.inner.generation, "scheduler closed");
    }

    /// Drives `fut` to completion on this scheduler, blocking the calling thread.
    pub fn block_on<F: Future>(&self, fut: F) -> Result<F::Output, SchedulerError> {
        if runtime::Handle::try_current().is_ok() {
            return Err(SchedulerError::NestedBlocking);
        }
        Ok(self.runtime()?.block_on(fut))
    }

    /// Enqueues `fut`; it makes progress whenever this scheduler is driven.
    pub fn spawn<F>(&self, fut: F) -> Result<TaskHandle<F::Output>, SchedulerError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        Ok(TaskHandle::new(self.runtime()?.spawn(fut)))
    }

    fn runtime(&self) -> Result<&Runtime, SchedulerError> {
        if self.is_closed() {
            return Err(SchedulerError::Closed);
        }
        self.inner.runtime.as_ref().ok_or(SchedulerError::Closed)
    }
}

/// Entry point for blocking callers that need to run cooperative work.
#[derive(Clone, Debug, Default)]
pub struct SchedulerBridge {
    cfg: SchedulerConfig,
}

impl SchedulerBridge {
    /// Creates a bridge that builds schedulers with `cfg`.
    pub fn new(cfg: SchedulerConfig) -> Self {
        Self { cfg }
    }

    /// Returns the calling thread's scheduler, creating it if absent or closed.
    pub fn acquire(&self) -> Result<SchedulerHandle, SchedulerError> {
        CURRENT.with(|slot| {
            let mut slot = slot.borrow_mut();
            if let Some(handle) = slot.as_ref().filter(|h| !h.is_closed()) {
                return Ok(handle.clone());
            }
            let handle = SchedulerHandle::build(&self.cfg)?;
            tracing::debug!(generation = handle.generation(), "scheduler created");
            *slot = Some(handle.clone());
            Ok(handle)
        })
    }

    /// Drives a cooperative operation from a blocking context.
    ///
    /// Blocks until `op` finishes or `timeout` elapses (the operation is dropped
    /// at the deadline). Fails with [`SchedulerError::NestedBlocking`] when called
    /// from inside a running scheduler: use `.await` there instead.
    pub fn run_blocking<F: Future>(
        &self,
        op: F,
        timeout: Option<Duration>,
    ) -> Result<F::Output, SchedulerError> {
        if runtime::Handle::try_current().is_ok() {
            return Err(SchedulerError::NestedBlocking);
        }
        let handle = self.acquire()?;
        match timeout {
            Some(after) => handle
                .block_on(with_timeout(op, OperationBudget::new(after)))?
                .map_err(SchedulerError::from),
            None => handle.block_on(op),
        }
    }
}

/// [`SchedulerBridge::acquire`] with default settings.
pub fn acquire_scheduler() -> Result<SchedulerHandle, SchedulerError> {
    SchedulerBridge::default().acquire()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::offload_blocking;

    #[test]
    fn acquire_reuses_open_scheduler() {
        let a = acquire_scheduler().unwrap();
        let b = acquire_scheduler().unwrap();
        assert_eq!(a.generation(), b.generation());
    }

    #[test]
    fn closed_scheduler_is_replaced_never_reused() {
        let first = acquire_scheduler().unwrap();
        first.close();
        assert!(first.is_closed());
        assert_eq!(first.block_on(async {}), Err(SchedulerError::Closed));

        let second = acquire_scheduler().unwrap();
        assert_ne!(first.generation(), second.generation());
        assert_eq!(second.block_on(async { 3 }), Ok(3));
    }

    #[test]
    fn each_thread_owns_its_scheduler() {
        let here = acquire_scheduler().unwrap().generation();
        let there = std::thread::spawn(|| acquire_scheduler().unwrap().generation())
            .join()
            .unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn run_blocking_returns_result() {
        let bridge = SchedulerBridge::default();
        let out = bridge
            .run_blocking(
                async {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    "done"
                },
                None,
            )
            .unwrap();
        assert_eq!(out, "done");
    }

    #[test]
    fn run_blocking_honors_timeout() {
        let bridge = SchedulerBridge::default();
        let err = bridge
            .run_blocking(
                async { tokio::time::sleep(Duration::from_secs(30)).await },
                Some(Duration::from_millis(20)),
            )
            .unwrap_err();
        assert_eq!(
            err,
            SchedulerError::TimedOut {
                after: Duration::from_millis(20)
            }
        );
    }

    #[test]
    fn run_blocking_can_offload_blocking_work() {
        let bridge = SchedulerBridge::new(SchedulerConfig {
            max_blocking_threads: 2,
            ..SchedulerConfig::default()
        });
        let out = bridge
            .run_blocking(
                async { offload_blocking(|| 6 * 7).unwrap().await },
                Some(Duration::from_secs(5)),
            )
            .unwrap();
        assert_eq!(out, Ok(42));
    }

    #[test]
    fn spawned_work_progresses_while_driven() {
        let handle = acquire_scheduler().unwrap();
        let task = handle.spawn(async { 5 }).unwrap();
        assert_eq!(handle.block_on(task).unwrap(), Ok(5));
    }

    #[tokio::test]
    async fn run_blocking_inside_scheduler_is_rejected() {
        let bridge = SchedulerBridge::default();
        assert_eq!(
            bridge.run_blocking(async { 1 }, None),
            Err(SchedulerError::NestedBlocking)
        );
    }
}
