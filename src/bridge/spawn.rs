//! # Opportunistic background tasks and blocking offload.
//!
//! - [`spawn_if_active`] enqueues a future on the scheduler currently driving the
//!   caller, or returns `None` when there is none.
//! - [`offload_blocking`] moves a blocking closure onto the scheduler's bounded
//!   worker pool so cooperative tasks keep making progress.
//!
//! Both hand back a [`TaskHandle`], a future resolving to the task's output.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinHandle};

use crate::error::{SchedulerError, panic_message};

/// Awaitable result of a background or offloaded task.
///
/// Resolves to `Err(SchedulerError::Join)` if the task panicked or was aborted.
/// Await it from the scheduler that spawned it.
#[derive(Debug)]
pub struct TaskHandle<T> {
    inner: JoinHandle<T>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(inner: JoinHandle<T>) -> Self {
        Self { inner }
    }

    /// Requests cancellation. Has no effect on blocking work that already started.
    pub fn abort(&self) {
        self.inner.abort();
    }

    /// `true` when the task has completed (including by panic or abort).
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, SchedulerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx).map(|res| res.map_err(join_error))
    }
}

fn join_error(err: JoinError) -> SchedulerError {
    let reason = if err.is_panic() {
        panic_message(err.into_panic().as_ref())
    } else {
        "task was cancelled".to_string()
    };
    SchedulerError::Join { reason }
}

/// Enqueues `op` as a background task if a scheduler is driving the caller.
///
/// Returns `None` (never fails) outside a scheduler; the caller picks another
/// execution strategy, e.g. [`SchedulerBridge::run_blocking`](crate::SchedulerBridge::run_blocking).
pub fn spawn_if_active<F>(op: F) -> Option<TaskHandle<F::Output>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => Some(TaskHandle::new(handle.spawn(op))),
        Err(_) => {
            tracing::debug!("no running scheduler; background task not spawned");
            None
        }
    }
}

/// Runs blocking `f` on the worker pool of the scheduler driving the caller.
///
/// Arguments are passed by capturing them in the closure.
pub fn offload_blocking<F, R>(f: F) -> Result<TaskHandle<R>, SchedulerError>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let handle = Handle::try_current().map_err(|_| SchedulerError::NoActiveScheduler)?;
    Ok(TaskHandle::new(handle.spawn_blocking(f)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn spawn_if_active_without_scheduler_returns_none() {
        assert!(spawn_if_active(async { 1 }).is_none());
    }

    #[tokio::test]
    async fn spawn_if_active_inside_scheduler_returns_awaitable_handle() {
        let handle = spawn_if_active(async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            "reading"
        })
        .expect("scheduler is active");
        assert_eq!(handle.await, Ok("reading"));
    }

    #[tokio::test]
    async fn aborted_task_reports_join_error() {
        let handle = spawn_if_active(tokio::time::sleep(Duration::from_secs(60))).unwrap();
        handle.abort();
        assert!(matches!(handle.await, Err(SchedulerError::Join { .. })));
    }

    #[test]
    fn offload_without_scheduler_fails() {
        assert!(matches!(
            offload_blocking(|| ()),
            Err(SchedulerError::NoActiveScheduler)
        ));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn offloaded_work_does_not_stall_the_scheduler() {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let blocked = offload_blocking(move || {
            // Blocks until the cooperative side sends.
            rx.recv().map(|_| "released")
        })
        .unwrap();

        let ticker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            tx.send(()).unwrap();
        });

        assert_eq!(blocked.await.unwrap(), Ok("released"));
        ticker.await.unwrap();
    }

    #[tokio::test]
    async fn offloaded_panic_becomes_join_error() {
        let handle = offload_blocking(|| -> u32 { panic!("relay stuck") }).unwrap();
        assert_eq!(
            handle.await,
            Err(SchedulerError::Join {
                reason: "relay stuck".to_string()
            })
        );
    }
}
