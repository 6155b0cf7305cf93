//! Thread-local worker context.
//!
//! Each [`WorkStealingPool`](crate::WorkStealingPool) worker keeps its own
//! deque in thread-local storage. Jobs submitted from inside a running job
//! are pushed to the submitting worker's deque instead of the shared
//! injector, and idle siblings steal from there.
//!
//! # Example
//!
//! ```ignore
//! use pool_gauge::{ExecutorService, PoolBuilder};
//!
//! let pool = PoolBuilder::new().parallelism(4).build_work_stealing()?;
//!
//! let handle = pool.submit_callable(|| pool_gauge::current_worker_index())?;
//! assert!(handle.join()?.is_some());
//! assert!(pool_gauge::current_worker_index().is_none());
//! ```

use std::cell::RefCell;

use crossbeam_deque::Worker;

use crate::task::Job;

/// The deque and identity of the work-stealing worker running on this thread.
pub(crate) struct WorkerContext {
    pub(crate) pool_id: usize,
    pub(crate) index: usize,
    pub(crate) local: Worker<Job>,
}

thread_local! {
    static CURRENT_WORKER: RefCell<Option<WorkerContext>> = const { RefCell::new(None) };
}

/// Index of the work-stealing worker running on this thread.
///
/// Returns `None` when called from a thread that is not a
/// `WorkStealingPool` worker.
pub fn current_worker_index() -> Option<usize> {
    CURRENT_WORKER.with(|ctx| ctx.borrow().as_ref().map(|ctx| ctx.index))
}

/// Install the worker context for this thread.
///
/// This is called by each work-stealing worker when it starts.
pub(crate) fn set_current_worker(worker: WorkerContext) {
    CURRENT_WORKER.with(|ctx| {
        *ctx.borrow_mut() = Some(worker);
    });
}

/// Remove and return the worker context for this thread.
pub(crate) fn clear_current_worker() -> Option<WorkerContext> {
    CURRENT_WORKER.with(|ctx| ctx.borrow_mut().take())
}

/// Run `f` with this thread's worker context, if any.
///
/// The context is borrowed shared, so `f` may push to the local deque
/// but must not install or clear the context.
pub(crate) fn with_current_worker<R>(f: impl FnOnce(Option<&WorkerContext>) -> R) -> R {
    CURRENT_WORKER.with(|ctx| f(ctx.borrow().as_ref()))
}
