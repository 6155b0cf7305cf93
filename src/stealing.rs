//! Work-stealing thread pool.
//!
//! Each worker owns a FIFO deque. Jobs submitted from outside the pool go to
//! a shared injector; jobs submitted from a worker thread go to that
//! worker's own deque. An idle worker first drains its deque, then takes a
//! batch from the injector, then steals from its siblings. Every job taken
//! from a queue the worker does not own counts as a steal.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::context::{self, WorkerContext};
use crate::error::{Error, ExecutorError, Result};
use crate::executor::{ExecutorService, Introspection, WorkStealingTelemetry};
use crate::task::{panic_message, Job};

/// Upper bound on how long an idle worker sleeps before rescanning.
const PARK_TIMEOUT: Duration = Duration::from_millis(50);

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(0);

/// A fixed-size pool of work-stealing workers.
///
/// Cloning is cheap; clones share the same workers.
#[derive(Clone)]
pub struct WorkStealingPool {
    shared: Arc<Shared>,
}

struct Shared {
    id: usize,
    prefix: Arc<str>,
    parallelism: usize,
    injector: Injector<Job>,
    stealers: Vec<Stealer<Job>>,
    /// Admission gate; `false` once shut down
    accepting: RwLock<bool>,
    shutdown: AtomicBool,
    stopping: AtomicBool,
    steals: AtomicU64,
    active: AtomicUsize,
    running: AtomicUsize,
    sleep: Mutex<()>,
    wake: Condvar,
    live: Mutex<usize>,
    exited: Condvar,
}

impl WorkStealingPool {
    /// Create a pool and start its workers.
    ///
    /// This is typically called via `PoolBuilder::build_work_stealing()`.
    pub(crate) fn from_config(config: &PoolConfig) -> Result<Self> {
        let parallelism = config.effective_parallelism();
        if parallelism == 0 {
            return Err(Error::InvalidConfig("parallelism must be at least 1".into()));
        }

        let locals: Vec<Worker<Job>> = (0..parallelism).map(|_| Worker::new_fifo()).collect();
        let stealers = locals.iter().map(Worker::stealer).collect();

        info!(prefix = %config.prefix, parallelism, "building work-stealing pool");

        let shared = Arc::new(Shared {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            prefix: config.prefix.as_str().into(),
            parallelism,
            injector: Injector::new(),
            stealers,
            accepting: RwLock::new(true),
            shutdown: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            steals: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            sleep: Mutex::new(()),
            wake: Condvar::new(),
            live: Mutex::new(0),
            exited: Condvar::new(),
        });
        let pool = Self { shared };

        for (index, local) in locals.into_iter().enumerate() {
            *pool.shared.live.lock() += 1;
            let shared = pool.shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-worker-{:04}", pool.shared.prefix, index))
                .spawn(move || shared.run_worker(index, local));
            if let Err(e) = spawned {
                warn!(%e, prefix = %pool.shared.prefix, index, "failed to spawn work-stealing worker");
                pool.shared.worker_exited();
                pool.shutdown();
                return Err(Error::ThreadSpawn(e));
            }
        }

        Ok(pool)
    }

    pub fn prefix(&self) -> &str {
        &self.shared.prefix
    }

    /// Number of worker threads.
    pub fn parallelism(&self) -> usize {
        self.shared.parallelism
    }

    /// Jobs taken by a worker from the injector or a sibling's deque.
    pub fn steal_count(&self) -> u64 {
        self.shared.steals.load(Ordering::Relaxed)
    }

    /// Jobs waiting in the injector or any worker deque.
    pub fn queued_task_count(&self) -> usize {
        self.shared.queued()
    }

    /// Workers that are not parked.
    pub fn active_thread_count(&self) -> usize {
        self.shared.active.load(Ordering::Relaxed)
    }

    /// Workers running a job.
    pub fn running_thread_count(&self) -> usize {
        self.shared.running.load(Ordering::Relaxed)
    }
}

impl Shared {
    fn run_worker(&self, index: usize, local: Worker<Job>) {
        debug!(prefix = %self.prefix, index, "work-stealing worker starting");
        context::set_current_worker(WorkerContext {
            pool_id: self.id,
            index,
            local,
        });
        self.active.fetch_add(1, Ordering::Relaxed);

        loop {
            if self.stopping.load(Ordering::Acquire) {
                break;
            }
            match self.find_job(index) {
                Some(job) => self.run_job(job),
                None => {
                    if self.shutdown.load(Ordering::Acquire) && !self.has_work() {
                        break;
                    }
                    self.park();
                }
            }
        }

        self.active.fetch_sub(1, Ordering::Relaxed);
        drop(context::clear_current_worker());
        debug!(prefix = %self.prefix, index, "work-stealing worker exiting");
        self.worker_exited();
    }

    fn run_job(&self, job: Job) {
        self.running.fetch_add(1, Ordering::Relaxed);
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            warn!(
                prefix = %self.prefix,
                panic = %panic_message(payload.as_ref()),
                "job panicked on work-stealing worker"
            );
        }
        self.running.fetch_sub(1, Ordering::Relaxed);
    }

    fn find_job(&self, index: usize) -> Option<Job> {
        context::with_current_worker(|ctx| {
            let local = &ctx?.local;
            local.pop().or_else(|| self.steal(index, local))
        })
    }

    fn steal(&self, index: usize, local: &Worker<Job>) -> Option<Job> {
        loop {
            let stolen = self.injector.steal_batch_and_pop(local).or_else(|| {
                self.stealers
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != index)
                    .map(|(_, stealer)| stealer.steal())
                    .collect()
            });
            match stolen {
                Steal::Success(job) => {
                    self.steals.fetch_add(1, Ordering::Relaxed);
                    return Some(job);
                }
                Steal::Empty => return None,
                Steal::Retry => {}
            }
        }
    }

    fn has_work(&self) -> bool {
        !self.injector.is_empty() || self.stealers.iter().any(|s| !s.is_empty())
    }

    fn queued(&self) -> usize {
        self.injector.len() + self.stealers.iter().map(Stealer::len).sum::<usize>()
    }

    fn park(&self) {
        let mut guard = self.sleep.lock();
        if self.has_work() || self.shutdown.load(Ordering::Acquire) {
            return;
        }
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.wake.wait_for(&mut guard, PARK_TIMEOUT);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    fn notify_one(&self) {
        let _guard = self.sleep.lock();
        self.wake.notify_one();
    }

    fn notify_all(&self) {
        {
            let _guard = self.sleep.lock();
            self.wake.notify_all();
        }
        let _live = self.live.lock();
        self.exited.notify_all();
    }

    fn worker_exited(&self) {
        let mut live = self.live.lock();
        *live = live.saturating_sub(1);
        self.exited.notify_all();
    }

    fn is_terminated(&self, live: usize) -> bool {
        self.shutdown.load(Ordering::Acquire) && live == 0
    }
}

/// Pull every job out of one queue.
fn drain_into(pending: &mut Vec<Job>, steal: impl Fn() -> Steal<Job>) {
    loop {
        match steal() {
            Steal::Success(job) => pending.push(job),
            Steal::Empty => break,
            Steal::Retry => {}
        }
    }
}

impl ExecutorService for WorkStealingPool {
    fn execute(&self, job: Job) -> std::result::Result<(), ExecutorError> {
        let shared = &self.shared;
        {
            let accepting = shared.accepting.read();
            if !*accepting {
                return Err(ExecutorError::Shutdown);
            }
            let pool_id = shared.id;
            let overflow = context::with_current_worker(move |ctx| match ctx {
                Some(ctx) if ctx.pool_id == pool_id => {
                    ctx.local.push(job);
                    None
                }
                _ => Some(job),
            });
            if let Some(job) = overflow {
                shared.injector.push(job);
            }
        }
        shared.notify_one();
        Ok(())
    }

    fn shutdown(&self) {
        {
            let mut accepting = self.shared.accepting.write();
            if *accepting {
                *accepting = false;
                info!(prefix = %self.shared.prefix, "shutting down work-stealing pool");
            }
            self.shared.shutdown.store(true, Ordering::Release);
        }
        self.shared.notify_all();
    }

    fn shutdown_now(&self) -> Vec<Job> {
        self.shared.stopping.store(true, Ordering::Release);
        self.shutdown();

        let mut pending = Vec::new();
        drain_into(&mut pending, || self.shared.injector.steal());
        for stealer in &self.shared.stealers {
            drain_into(&mut pending, || stealer.steal());
        }
        debug!(
            prefix = %self.shared.prefix,
            pending = pending.len(),
            "drained work-stealing queues"
        );
        pending
    }

    fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    fn is_terminated(&self) -> bool {
        let live = self.shared.live.lock();
        self.shared.is_terminated(*live)
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut live = self.shared.live.lock();
        while !self.shared.is_terminated(*live) {
            match deadline {
                Some(deadline) => {
                    if self.shared.exited.wait_until(&mut live, deadline).timed_out() {
                        return self.shared.is_terminated(*live);
                    }
                }
                None => self.shared.exited.wait(&mut live),
            }
        }
        true
    }

    fn introspect(&self) -> Introspection {
        Introspection::WorkStealing(Arc::new(self.clone()))
    }
}

impl WorkStealingTelemetry for WorkStealingPool {
    fn steal_count(&self) -> u64 {
        WorkStealingPool::steal_count(self)
    }

    fn queued_task_count(&self) -> usize {
        WorkStealingPool::queued_task_count(self)
    }

    fn active_thread_count(&self) -> usize {
        WorkStealingPool::active_thread_count(self)
    }

    fn running_thread_count(&self) -> usize {
        WorkStealingPool::running_thread_count(self)
    }
}

impl std::fmt::Debug for WorkStealingPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkStealingPool")
            .field("prefix", &self.shared.prefix)
            .field("parallelism", &self.shared.parallelism)
            .field("steals", &self.steal_count())
            .field("queued", &self.queued_task_count())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for WorkStealingPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "WorkStealingPool[{}]: workers={} running={} queued={} steals={}",
            self.shared.prefix,
            self.shared.parallelism,
            self.running_thread_count(),
            self.queued_task_count(),
            self.steal_count(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::PoolBuilder;
    use crossbeam_channel::bounded;

    fn pool(parallelism: usize) -> WorkStealingPool {
        PoolBuilder::new()
            .prefix("steal")
            .parallelism(parallelism)
            .build_work_stealing()
            .unwrap()
    }

    fn finish(pool: &WorkStealingPool) {
        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert!(pool.is_terminated());
    }

    #[test]
    fn test_submit_and_join() {
        let pool = pool(2);
        let handle = pool.submit_callable(|| "hello").unwrap();
        assert_eq!(handle.join(), Ok("hello"));
        assert!(pool.steal_count() >= 1);
        finish(&pool);
    }

    #[test]
    fn test_runs_on_worker_thread() {
        let pool = pool(2);
        let handle = pool
            .submit_callable(|| {
                let name = thread::current().name().map(str::to_string);
                (context::current_worker_index(), name)
            })
            .unwrap();
        let (index, name) = handle.join().unwrap();
        assert!(index.is_some());
        assert!(name.unwrap().starts_with("steal-worker-"));
        finish(&pool);
    }

    #[test]
    fn test_nested_submit_pushes_locally() {
        let pool = pool(1);
        let inner = pool.clone();
        let handle = pool
            .submit_callable(move || {
                inner.execute(Box::new(|| {})).unwrap();
                inner.queued_task_count()
            })
            .unwrap();
        assert_eq!(handle.join(), Ok(1));
        finish(&pool);
    }

    #[test]
    fn test_invoke_all_many() {
        let pool = pool(4);
        let tasks: Vec<_> = (0..64u64).map(|i| move || i * 2).collect();
        let handles = pool.invoke_all(tasks).unwrap();
        let total: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 63 * 64);
        finish(&pool);
    }

    #[test]
    fn test_execute_after_shutdown() {
        let pool = pool(1);
        finish(&pool);
        let result = pool.execute(Box::new(|| {}));
        assert!(matches!(result, Err(ExecutorError::Shutdown)));
    }

    #[test]
    fn test_shutdown_runs_queued() {
        let pool = pool(1);
        let (release, wait) = bounded::<()>(0);
        pool.execute(Box::new(move || {
            let _ = wait.recv();
        }))
        .unwrap();
        let queued = pool.submit_callable(|| 3).unwrap();

        pool.shutdown();
        release.send(()).unwrap();
        assert_eq!(queued.join(), Ok(3));
        assert!(pool.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn test_shutdown_now_returns_pending() {
        let pool = pool(1);
        let (started_tx, started_rx) = bounded::<()>(1);
        let (release, wait) = bounded::<()>(0);
        pool.execute(Box::new(move || {
            started_tx.send(()).unwrap();
            let _ = wait.recv();
        }))
        .unwrap();
        started_rx.recv().unwrap();

        let queued: Vec<_> = (0..3).map(|i| pool.submit_callable(move || i).unwrap()).collect();
        assert_eq!(pool.queued_task_count(), 3);
        assert_eq!(pool.running_thread_count(), 1);

        let pending = pool.shutdown_now();
        assert_eq!(pending.len(), 3);
        drop(pending);
        assert!(queued.iter().all(|h| h.is_cancelled()));

        release.send(()).unwrap();
        assert!(pool.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn test_panicking_job_keeps_worker() {
        let pool = pool(1);
        pool.execute(Box::new(|| panic!("job failure"))).unwrap();
        assert_eq!(pool.submit_callable(|| 9).unwrap().join(), Ok(9));
        finish(&pool);
    }

    #[test]
    fn test_introspect_is_work_stealing() {
        let pool = pool(2);
        assert!(matches!(pool.introspect(), Introspection::WorkStealing(_)));
        finish(&pool);
    }
}
