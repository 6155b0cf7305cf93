//! The executor-service contract.
//!
//! [`ExecutorService`] is the surface every engine in this crate implements,
//! and the surface [`InstrumentedExecutor`](crate::InstrumentedExecutor)
//! decorates. Only [`execute`](ExecutorService::execute) and the lifecycle
//! methods are required: the value-returning and bulk submission shapes have
//! default implementations built on `execute`, which engines may override.
//!
//! # Capabilities
//!
//! An engine describes what it can report through
//! [`introspect`](ExecutorService::introspect), a closed set of variants:
//!
//! | Variant | Engine shape | Telemetry |
//! |---------|--------------|-----------|
//! | [`Introspection::Bounded`] | queue + worker count | sizes, active/completed counts, queue depth, rejection policy |
//! | [`Introspection::WorkStealing`] | per-worker deques | steals, queued tasks, active/running threads |
//! | [`Introspection::None`] | anything else | none |

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;

use crate::bounded::BoundedPool;
use crate::error::{ExecutorError, TaskError};
use crate::task::{future_job, panic_message, Job, TaskHandle};

/// An engine that runs submitted work on its own threads.
pub trait ExecutorService: Send + Sync {
    /// Run `job` at some point in the future.
    ///
    /// # Errors
    ///
    /// Whatever the engine's admission policy reports, e.g. `Rejected` or `Shutdown`.
    fn execute(&self, job: Job) -> Result<(), ExecutorError>;

    /// Stop accepting work; already-queued jobs still run.
    fn shutdown(&self);

    /// Stop accepting work and return the jobs that never started.
    fn shutdown_now(&self) -> Vec<Job>;

    fn is_shutdown(&self) -> bool;

    /// Whether shutdown completed and every worker has exited.
    fn is_terminated(&self) -> bool;

    /// Block until terminated or `timeout` elapses. Returns `is_terminated()`.
    fn await_termination(&self, timeout: Duration) -> bool;

    /// Telemetry this engine exposes.
    fn introspect(&self) -> Introspection {
        Introspection::None
    }

    /// Submit a task and get a handle that completes when it has run.
    fn submit<F>(&self, task: F) -> Result<TaskHandle<()>, ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        let (job, handle) = future_job(task);
        self.execute(job)?;
        Ok(handle)
    }

    /// Submit a task whose handle yields `result` once the task has run.
    fn submit_with_result<F, T>(&self, task: F, result: T) -> Result<TaskHandle<T>, ExecutorError>
    where
        F: FnOnce() + Send + 'static,
        T: Send + 'static,
    {
        let (job, handle) = future_job(move || {
            task();
            result
        });
        self.execute(job)?;
        Ok(handle)
    }

    /// Submit a value-producing task.
    fn submit_callable<F, T>(&self, task: F) -> Result<TaskHandle<T>, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (job, handle) = future_job(task);
        self.execute(job)?;
        Ok(handle)
    }

    /// Run every task and block until all are done.
    ///
    /// Handles are returned in input order. If a task cannot be submitted,
    /// every handle created so far is cancelled and the error returned.
    fn invoke_all<F, T>(&self, tasks: Vec<F>) -> Result<Vec<TaskHandle<T>>, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let handles = submit_all(self, tasks)?;
        for handle in &handles {
            handle.wait();
        }
        Ok(handles)
    }

    /// Like [`invoke_all`](Self::invoke_all), but stops waiting at `timeout`
    /// and cancels every task that has not finished by then.
    fn invoke_all_timeout<F, T>(
        &self,
        tasks: Vec<F>,
        timeout: Duration,
    ) -> Result<Vec<TaskHandle<T>>, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let deadline = Instant::now().checked_add(timeout);
        let handles = submit_all(self, tasks)?;
        for (i, handle) in handles.iter().enumerate() {
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => Duration::MAX,
            };
            if !handle.wait_timeout(remaining) {
                for unfinished in &handles[i..] {
                    unfinished.cancel();
                }
                break;
            }
        }
        Ok(handles)
    }

    /// Run the tasks and return the value of the first one to finish
    /// without panicking. Tasks that have not started by then are skipped.
    ///
    /// # Errors
    ///
    /// `EmptyTaskList` for no tasks, `AllFailed` carrying the last failure
    /// when every task panicked or was dropped, or the submission error.
    fn invoke_any<F, T>(&self, tasks: Vec<F>) -> Result<T, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        invoke_first(self, tasks, None)
    }

    /// Like [`invoke_any`](Self::invoke_any), failing with `Timeout` when no
    /// task has succeeded within `timeout`.
    fn invoke_any_timeout<F, T>(&self, tasks: Vec<F>, timeout: Duration) -> Result<T, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        invoke_first(self, tasks, Instant::now().checked_add(timeout))
    }
}

fn submit_all<E, F, T>(executor: &E, tasks: Vec<F>) -> Result<Vec<TaskHandle<T>>, ExecutorError>
where
    E: ExecutorService + ?Sized,
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let mut handles = Vec::with_capacity(tasks.len());
    for task in tasks {
        let (job, handle) = future_job(task);
        handles.push(handle);
        if let Err(e) = executor.execute(job) {
            for handle in &handles {
                handle.cancel();
            }
            return Err(e);
        }
    }
    Ok(handles)
}

fn invoke_first<E, F, T>(
    executor: &E,
    tasks: Vec<F>,
    deadline: Option<Instant>,
) -> Result<T, ExecutorError>
where
    E: ExecutorService + ?Sized,
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    if tasks.is_empty() {
        return Err(ExecutorError::EmptyTaskList);
    }

    let (tx, rx) = crossbeam_channel::unbounded();
    let settled = Arc::new(AtomicBool::new(false));

    for task in tasks {
        let tx = tx.clone();
        let flag = settled.clone();
        let job: Job = Box::new(move || {
            if flag.load(Ordering::Acquire) {
                return;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(task))
                .map_err(|payload| TaskError::Panicked(panic_message(payload.as_ref())));
            let _ = tx.send(outcome);
        });
        if let Err(e) = executor.execute(job) {
            settled.store(true, Ordering::Release);
            return Err(e);
        }
    }
    drop(tx);

    let mut last_failure = TaskError::Cancelled;
    loop {
        let received = match deadline {
            Some(deadline) => rx.recv_deadline(deadline),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(Ok(value)) => {
                settled.store(true, Ordering::Release);
                return Ok(value);
            }
            Ok(Err(failure)) => last_failure = failure,
            Err(RecvTimeoutError::Timeout) => {
                settled.store(true, Ordering::Release);
                return Err(ExecutorError::Timeout);
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(ExecutorError::AllFailed(last_failure));
            }
        }
    }
}

/// What an engine can report about itself.
#[derive(Clone)]
pub enum Introspection {
    /// A queue-backed pool with a worker count and a rejection policy.
    Bounded(Arc<dyn BoundedPoolTelemetry>),
    /// A pool whose idle workers steal from each other's deques.
    WorkStealing(Arc<dyn WorkStealingTelemetry>),
    /// No telemetry.
    None,
}

impl Introspection {
    /// Short label for logging.
    pub fn shape(&self) -> &'static str {
        match self {
            Introspection::Bounded(_) => "bounded",
            Introspection::WorkStealing(_) => "work-stealing",
            Introspection::None => "opaque",
        }
    }
}

impl std::fmt::Debug for Introspection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Introspection").field(&self.shape()).finish()
    }
}

/// Live state of a bounded pool.
pub trait BoundedPoolTelemetry: Send + Sync {
    /// Current number of worker threads.
    fn pool_size(&self) -> usize;
    fn core_pool_size(&self) -> usize;
    fn max_pool_size(&self) -> usize;
    /// Workers currently running a job.
    fn active_count(&self) -> usize;
    /// Jobs that have finished running.
    fn completed_task_count(&self) -> u64;
    /// Jobs waiting in the queue.
    fn queue_size(&self) -> usize;
    /// Free queue slots; `usize::MAX` for an unbounded queue.
    fn queue_remaining_capacity(&self) -> usize;
    fn is_shutdown(&self) -> bool;
    /// The policy applied to refused jobs.
    fn rejection_policy(&self) -> Arc<dyn RejectionPolicy>;
    /// Replace the policy applied to refused jobs.
    fn set_rejection_policy(&self, policy: Arc<dyn RejectionPolicy>);
}

/// Live state of a work-stealing pool.
pub trait WorkStealingTelemetry: Send + Sync {
    /// Jobs taken by a worker from a queue it does not own.
    fn steal_count(&self) -> u64;
    /// Jobs waiting in any queue.
    fn queued_task_count(&self) -> usize;
    /// Workers scanning for or running jobs.
    fn active_thread_count(&self) -> usize;
    /// Workers running a job.
    fn running_thread_count(&self) -> usize;
}

/// What a bounded pool does with a job it cannot admit.
pub trait RejectionPolicy: Send + Sync {
    /// Handle `job`, refused by `pool` because it is saturated or shut down.
    ///
    /// Called on the submitting thread; the result is returned from `execute`.
    fn rejected(&self, job: Job, pool: &BoundedPool) -> Result<(), ExecutorError>;
}

/// Saturating conversion used by gauges.
pub(crate) fn gauge_value<T: TryInto<i64>>(value: T) -> i64 {
    value.try_into().unwrap_or(i64::MAX)
}
