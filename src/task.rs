//! Result handles for submitted tasks.
//!
//! Submitting a value-producing task yields a [`TaskHandle`]; the job handed
//! to the engine is a [`FutureTask`] that fills the handle's slot when it
//! runs. A job that is dropped without running (cancelled, discarded by a
//! rejection policy, or returned by `shutdown_now` and dropped) resolves its
//! handle as [`TaskError::Cancelled`] so waiters never hang.
//!
//! Panics in the task body are caught and surface as
//! [`TaskError::Panicked`]; the worker thread survives.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::TaskError;

/// A boxed unit of work accepted by an engine.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

enum Slot<T> {
    Pending,
    Running,
    Done(Result<T, TaskError>),
    Cancelled,
    Taken,
}

impl<T> Slot<T> {
    fn is_finished(&self) -> bool {
        !matches!(self, Slot::Pending | Slot::Running)
    }
}

/// Shared state between a task handle and the job that completes it.
struct TaskState<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> TaskState<T> {
    fn finish(&self, outcome: Result<T, TaskError>) {
        let mut slot = self.slot.lock();
        *slot = Slot::Done(outcome);
        self.ready.notify_all();
    }

    /// Move a pending task to cancelled. Returns false once it has started.
    fn cancel(&self) -> bool {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Pending) {
            *slot = Slot::Cancelled;
            self.ready.notify_all();
            true
        } else {
            false
        }
    }
}

/// Handle to the eventual result of a submitted task.
pub struct TaskHandle<T> {
    state: Arc<TaskState<T>>,
}

impl<T> TaskHandle<T> {
    /// Cancel the task if it has not started yet.
    ///
    /// A running task is never interrupted; in that case this returns `false`.
    pub fn cancel(&self) -> bool {
        self.state.cancel()
    }

    /// Whether the task finished, failed or was cancelled.
    pub fn is_done(&self) -> bool {
        self.state.slot.lock().is_finished()
    }

    /// Whether the task was cancelled before it ran.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            *self.state.slot.lock(),
            Slot::Cancelled | Slot::Done(Err(TaskError::Cancelled))
        )
    }

    /// Block until the task is done.
    pub fn wait(&self) {
        let mut slot = self.state.slot.lock();
        while !slot.is_finished() {
            self.state.ready.wait(&mut slot);
        }
    }

    /// Block until the task is done or `timeout` elapses. Returns whether it is done.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let mut slot = self.state.slot.lock();
        while !slot.is_finished() {
            if self.state.ready.wait_until(&mut slot, deadline).timed_out() {
                return slot.is_finished();
            }
        }
        true
    }

    /// Block until the task is done and take its result.
    pub fn join(self) -> Result<T, TaskError> {
        let mut slot = self.state.slot.lock();
        while !slot.is_finished() {
            self.state.ready.wait(&mut slot);
        }
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Done(outcome) => outcome,
            _ => Err(TaskError::Cancelled),
        }
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match *self.state.slot.lock() {
            Slot::Pending => "pending",
            Slot::Running => "running",
            Slot::Done(Ok(_)) => "completed",
            Slot::Done(Err(_)) => "failed",
            Slot::Cancelled => "cancelled",
            Slot::Taken => "joined",
        };
        f.debug_struct("TaskHandle").field("state", &state).finish()
    }
}

/// The engine-side half of a [`TaskHandle`].
pub struct FutureTask<F, T> {
    body: Option<F>,
    state: Arc<TaskState<T>>,
}

impl<F, T> FutureTask<F, T>
where
    F: FnOnce() -> T,
{
    /// Create a task and the handle observing it.
    pub fn new(body: F) -> (Self, TaskHandle<T>) {
        let state = Arc::new(TaskState {
            slot: Mutex::new(Slot::Pending),
            ready: Condvar::new(),
        });
        (
            Self {
                body: Some(body),
                state: state.clone(),
            },
            TaskHandle { state },
        )
    }

    /// Run the body unless the handle was cancelled first.
    pub fn run(mut self) {
        {
            let mut slot = self.state.slot.lock();
            if !matches!(*slot, Slot::Pending) {
                return;
            }
            *slot = Slot::Running;
        }
        let Some(body) = self.body.take() else {
            return;
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(body))
            .map_err(|payload| TaskError::Panicked(panic_message(payload.as_ref())));
        self.state.finish(outcome);
    }
}

impl<F, T> Drop for FutureTask<F, T> {
    fn drop(&mut self) {
        if self.body.is_some() {
            self.state.cancel();
        }
    }
}

/// Build a boxed job and its handle from a value-producing closure.
pub fn future_job<F, T>(body: F) -> (Job, TaskHandle<T>)
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (task, handle) = FutureTask::new(body);
    (Box::new(move || task.run()), handle)
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}
