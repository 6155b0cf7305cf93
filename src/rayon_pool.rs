//! [`ExecutorService`] adapter over a rayon thread pool.
//!
//! Rayon exposes neither a queue nor worker counts, so this engine reports
//! [`Introspection::None`](crate::Introspection::None). It still tracks jobs
//! in flight so shutdown can wait for them.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::{ExecutorError, Result};
use crate::executor::ExecutorService;
use crate::task::{panic_message, Job};

/// Runs jobs with `rayon::ThreadPool::spawn`.
#[derive(Clone)]
pub struct RayonExecutor {
    inner: Arc<Inner>,
}

struct Inner {
    pool: rayon::ThreadPool,
    prefix: Arc<str>,
    in_flight: Mutex<usize>,
    drained: Condvar,
    shutdown: AtomicBool,
    stopping: AtomicBool,
}

/// Counts a spawned job until it has run or been skipped.
struct InFlightGuard {
    inner: Arc<Inner>,
}

impl InFlightGuard {
    fn new(inner: &Arc<Inner>) -> Self {
        *inner.in_flight.lock() += 1;
        Self {
            inner: inner.clone(),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.inner.in_flight.lock();
        *in_flight -= 1;
        if *in_flight == 0 {
            self.inner.drained.notify_all();
        }
    }
}

impl RayonExecutor {
    /// Build the rayon pool.
    ///
    /// This is typically called via `PoolBuilder::build_rayon()`.
    pub(crate) fn from_config(config: &PoolConfig) -> Result<Self> {
        let num_threads = config.effective_parallelism();
        let name_prefix = config.prefix.clone();
        let start_prefix: Arc<str> = config.prefix.as_str().into();

        info!(prefix = %config.prefix, num_threads, "building rayon executor");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(move |i| format!("{}-rayon-{:04}", name_prefix, i))
            .start_handler(move |thread_index| {
                debug!(thread_index, prefix = %start_prefix, "rayon thread starting");
            })
            .build()?;

        Ok(Self::from_pool(pool, &config.prefix))
    }

    /// Wrap an existing rayon pool.
    pub fn from_pool(pool: rayon::ThreadPool, prefix: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                pool,
                prefix: prefix.into(),
                in_flight: Mutex::new(0),
                drained: Condvar::new(),
                shutdown: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
            }),
        }
    }

    /// The underlying rayon pool.
    ///
    /// Work spawned directly on it is not tracked.
    pub fn rayon_pool(&self) -> &rayon::ThreadPool {
        &self.inner.pool
    }

    /// Jobs spawned and not yet finished or skipped.
    pub fn in_flight(&self) -> usize {
        *self.inner.in_flight.lock()
    }
}

impl ExecutorService for RayonExecutor {
    fn execute(&self, job: Job) -> std::result::Result<(), ExecutorError> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(ExecutorError::Shutdown);
        }
        let guard = InFlightGuard::new(&self.inner);
        self.inner.pool.spawn(move || {
            let inner = &guard.inner;
            if inner.stopping.load(Ordering::Acquire) {
                return;
            }
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                warn!(
                    prefix = %inner.prefix,
                    panic = %panic_message(payload.as_ref()),
                    "job panicked on rayon thread"
                );
            }
        });
        Ok(())
    }

    fn shutdown(&self) {
        if !self.inner.shutdown.swap(true, Ordering::AcqRel) {
            info!(prefix = %self.inner.prefix, "shutting down rayon executor");
        }
    }

    /// Rayon does not hand back queued jobs: they are dropped unrun when a
    /// thread picks them up, and the returned list is always empty.
    fn shutdown_now(&self) -> Vec<Job> {
        self.inner.stopping.store(true, Ordering::Release);
        self.shutdown();
        Vec::new()
    }

    fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    fn is_terminated(&self) -> bool {
        self.is_shutdown() && self.in_flight() == 0
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        if !self.is_shutdown() {
            return false;
        }
        let deadline = Instant::now().checked_add(timeout);
        let mut in_flight = self.inner.in_flight.lock();
        while *in_flight > 0 {
            match deadline {
                Some(deadline) => {
                    if self
                        .inner
                        .drained
                        .wait_until(&mut in_flight, deadline)
                        .timed_out()
                    {
                        return *in_flight == 0;
                    }
                }
                None => self.inner.drained.wait(&mut in_flight),
            }
        }
        true
    }
}

impl std::fmt::Debug for RayonExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RayonExecutor")
            .field("prefix", &self.inner.prefix)
            .field("num_threads", &self.inner.pool.current_num_threads())
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::PoolBuilder;
    use crate::error::TaskError;
    use crate::executor::Introspection;
    use crossbeam_channel::bounded;

    fn executor(threads: usize) -> RayonExecutor {
        PoolBuilder::new()
            .prefix("rayon-test")
            .parallelism(threads)
            .build_rayon()
            .unwrap()
    }

    #[test]
    fn test_submit_and_join() {
        let exec = executor(2);
        let handle = exec.submit_callable(|| rayon::current_thread_index()).unwrap();
        assert!(handle.join().unwrap().is_some());

        exec.shutdown();
        assert!(exec.await_termination(Duration::from_secs(5)));
        assert!(exec.is_terminated());
    }

    #[test]
    fn test_no_introspection() {
        let exec = executor(1);
        assert!(matches!(exec.introspect(), Introspection::None));
    }

    #[test]
    fn test_rejects_after_shutdown() {
        let exec = executor(1);
        exec.shutdown();
        assert!(matches!(
            exec.execute(Box::new(|| {})),
            Err(ExecutorError::Shutdown)
        ));
    }

    #[test]
    fn test_await_termination_waits_for_in_flight() {
        let exec = executor(1);
        let (release, wait) = bounded::<()>(0);
        exec.execute(Box::new(move || {
            let _ = wait.recv();
        }))
        .unwrap();
        assert_eq!(exec.in_flight(), 1);

        assert!(!exec.await_termination(Duration::from_millis(10)));
        exec.shutdown();
        assert!(!exec.await_termination(Duration::from_millis(10)));

        release.send(()).unwrap();
        assert!(exec.await_termination(Duration::from_secs(5)));
        assert_eq!(exec.in_flight(), 0);
    }

    #[test]
    fn test_shutdown_now_skips_queued() {
        let exec = executor(1);
        let (started_tx, started_rx) = bounded::<()>(1);
        let (release, wait) = bounded::<()>(0);
        exec.execute(Box::new(move || {
            started_tx.send(()).unwrap();
            let _ = wait.recv();
        }))
        .unwrap();
        started_rx.recv().unwrap();
        let queued = exec.submit_callable(|| 1).unwrap();

        assert!(exec.shutdown_now().is_empty());
        release.send(()).unwrap();
        assert_eq!(queued.join(), Err(TaskError::Cancelled));
        assert!(exec.await_termination(Duration::from_secs(5)));
    }
}
