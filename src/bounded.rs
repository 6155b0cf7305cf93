//! Queue-backed thread pool with core and maximum worker counts.
//!
//! Admission follows the classic bounded-pool rules:
//!
//! 1. Fewer than `core_threads` workers: start a worker with the job.
//! 2. Otherwise offer the job to the queue.
//! 3. Queue full: start a non-core worker, up to `max_threads`.
//! 4. Otherwise hand the job to the [`RejectionPolicy`].
//!
//! A queue capacity of 0 is a direct hand-off: a job is only queued if an
//! idle worker is waiting for it. Non-core workers exit after `keep_alive`
//! without work.
//!
//! # Thread Naming
//!
//! Workers are named `{prefix}-worker-0000`, `{prefix}-worker-0001`, ...

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::{Error, ExecutorError, Result};
use crate::executor::{BoundedPoolTelemetry, ExecutorService, Introspection, RejectionPolicy};
use crate::task::{panic_message, Job};

/// A thread pool fed by a bounded queue.
///
/// Cloning is cheap; clones share the same workers and queue.
///
/// # Examples
///
/// ```ignore
/// use pool_gauge::{ExecutorService, PoolBuilder, RejectionPolicyKind};
///
/// let pool = PoolBuilder::new()
///     .prefix("ingest")
///     .core_threads(2)
///     .max_threads(4)
///     .queue_capacity(128)
///     .rejection_policy(RejectionPolicyKind::CallerRuns)
///     .build_bounded()?;
///
/// let handle = pool.submit_callable(|| 6 * 7)?;
/// assert_eq!(handle.join(), Ok(42));
///
/// pool.shutdown();
/// pool.await_termination(std::time::Duration::from_secs(1));
/// ```
#[derive(Clone)]
pub struct BoundedPool {
    shared: Arc<Shared>,
}

struct Shared {
    prefix: Arc<str>,
    core: usize,
    max: usize,
    keep_alive: Duration,
    capacity: Option<usize>,
    /// Dropped on shutdown so idle workers see a disconnected queue
    sender: RwLock<Option<Sender<Job>>>,
    receiver: Receiver<Job>,
    policy: RwLock<Arc<dyn RejectionPolicy>>,
    /// Live worker count; guards every change to it
    workers: Mutex<usize>,
    /// Notified when a worker exits or the pool shuts down
    exited: Condvar,
    pool_size: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicU64,
    shutdown: AtomicBool,
    stopping: AtomicBool,
    thread_counter: AtomicUsize,
}

impl BoundedPool {
    /// Create a pool from a configuration.
    ///
    /// This is typically called via `PoolBuilder::build_bounded()`.
    pub(crate) fn from_config(config: &PoolConfig) -> Result<Self> {
        let core = config.effective_core_threads();
        let max = config.effective_max_threads();
        if max == 0 {
            return Err(Error::InvalidConfig("max_threads must be at least 1".into()));
        }
        if core > max {
            return Err(Error::InvalidConfig(format!(
                "core_threads ({core}) exceeds max_threads ({max})"
            )));
        }

        let (sender, receiver) = match config.queue_capacity {
            Some(capacity) => crossbeam_channel::bounded(capacity),
            None => crossbeam_channel::unbounded(),
        };

        info!(
            prefix = %config.prefix,
            core,
            max,
            queue_capacity = ?config.queue_capacity,
            rejection_policy = ?config.rejection_policy,
            "building bounded pool"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                prefix: config.prefix.as_str().into(),
                core,
                max,
                keep_alive: config.keep_alive(),
                capacity: config.queue_capacity,
                sender: RwLock::new(Some(sender)),
                receiver,
                policy: RwLock::new(config.rejection_policy.into_policy()),
                workers: Mutex::new(0),
                exited: Condvar::new(),
                pool_size: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                shutdown: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                thread_counter: AtomicUsize::new(0),
            }),
        })
    }

    /// Thread name prefix.
    pub fn prefix(&self) -> &str {
        &self.shared.prefix
    }

    /// Current number of worker threads.
    #[inline]
    pub fn pool_size(&self) -> usize {
        self.shared.pool_size.load(Ordering::Acquire)
    }

    pub fn core_pool_size(&self) -> usize {
        self.shared.core
    }

    pub fn max_pool_size(&self) -> usize {
        self.shared.max
    }

    /// Workers currently running a job.
    #[inline]
    pub fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::Relaxed)
    }

    /// Jobs that have finished running on a worker, including those that panicked.
    #[inline]
    pub fn completed_task_count(&self) -> u64 {
        self.shared.completed.load(Ordering::Relaxed)
    }

    /// Jobs waiting in the queue.
    #[inline]
    pub fn queue_size(&self) -> usize {
        self.shared.receiver.len()
    }

    /// Free queue slots, or `usize::MAX` for an unbounded queue.
    pub fn queue_remaining_capacity(&self) -> usize {
        self.shared
            .capacity
            .map_or(usize::MAX, |capacity| capacity.saturating_sub(self.queue_size()))
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// The policy applied to refused jobs.
    pub fn rejection_policy(&self) -> Arc<dyn RejectionPolicy> {
        self.shared.policy.read().clone()
    }

    /// Replace the policy applied to refused jobs.
    pub fn set_rejection_policy(&self, policy: Arc<dyn RejectionPolicy>) {
        *self.shared.policy.write() = policy;
    }

    /// Remove and return the oldest queued job.
    pub fn poll_queued(&self) -> Option<Job> {
        self.shared.receiver.try_recv().ok()
    }

    fn reject(&self, job: Job) -> std::result::Result<(), ExecutorError> {
        debug!(
            prefix = %self.shared.prefix,
            workers = self.pool_size(),
            queued = self.queue_size(),
            "job refused by bounded pool"
        );
        let policy = self.rejection_policy();
        policy.rejected(job, self)
    }

    /// Claim a worker slot under the core or max limit.
    ///
    /// After shutdown a slot is only granted to drain a non-empty queue.
    fn reserve_worker(&self, core: bool, drain: bool) -> bool {
        let shared = &self.shared;
        let mut workers = shared.workers.lock();
        if shared.stopping.load(Ordering::Acquire) {
            return false;
        }
        if shared.shutdown.load(Ordering::Acquire) && !(drain && !shared.receiver.is_empty()) {
            return false;
        }
        let limit = if core { shared.core } else { shared.max };
        if *workers >= limit {
            return false;
        }
        *workers += 1;
        shared.pool_size.store(*workers, Ordering::Release);
        true
    }

    /// Start a thread for a reserved slot. On failure the slot is released
    /// and the first job handed back.
    fn spawn_worker(&self, first: Option<Job>) -> std::result::Result<(), Option<Job>> {
        let id = self.shared.thread_counter.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-worker-{:04}", self.shared.prefix, id);

        let handoff = Arc::new(Mutex::new(first));
        let worker_handoff = handoff.clone();
        let shared = self.shared.clone();

        let spawned = thread::Builder::new().name(name).spawn(move || {
            let first = worker_handoff.lock().take();
            shared.run_worker(first);
        });

        match spawned {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(%e, prefix = %self.shared.prefix, "failed to spawn pool worker");
                self.shared.worker_exited();
                let first = handoff.lock().take();
                Err(first)
            }
        }
    }

    fn offer(&self, job: Job) -> std::result::Result<(), Job> {
        match self.shared.sender.read().as_ref() {
            Some(sender) => sender.try_send(job).map_err(|e| e.into_inner()),
            None => Err(job),
        }
    }

    fn try_terminated(&self) -> bool {
        let workers = self.shared.workers.lock();
        self.shared.is_terminated(*workers)
    }
}

impl Shared {
    fn run_worker(&self, first: Option<Job>) {
        debug!(prefix = %self.prefix, "pool worker starting");
        let mut next = first;
        loop {
            let job = match next.take() {
                Some(job) => job,
                None => match self.next_job() {
                    Some(job) => job,
                    None => break,
                },
            };

            self.active.fetch_add(1, Ordering::Relaxed);
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                warn!(
                    prefix = %self.prefix,
                    panic = %panic_message(payload.as_ref()),
                    "job panicked on pool worker"
                );
            }
            self.active.fetch_sub(1, Ordering::Relaxed);
            self.completed.fetch_add(1, Ordering::Relaxed);
        }
        debug!(prefix = %self.prefix, "pool worker exiting");
    }

    /// Wait for the next queued job. `None` means this worker has been
    /// released and must exit.
    fn next_job(&self) -> Option<Job> {
        loop {
            if self.stopping.load(Ordering::Acquire) {
                self.worker_exited();
                return None;
            }

            let timed = self.pool_size.load(Ordering::Acquire) > self.core;
            let received = if timed {
                self.receiver.recv_timeout(self.keep_alive)
            } else {
                self.receiver
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected)
            };

            match received {
                Ok(job) => return Some(job),
                Err(RecvTimeoutError::Timeout) => {
                    if self.retire_idle() {
                        return None;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.worker_exited();
                    return None;
                }
            }
        }
    }

    /// Release a timed-out worker if the pool is above its core size.
    fn retire_idle(&self) -> bool {
        let mut workers = self.workers.lock();
        if *workers <= self.core {
            return false;
        }
        *workers -= 1;
        self.pool_size.store(*workers, Ordering::Release);
        self.exited.notify_all();
        debug!(prefix = %self.prefix, workers = *workers, "retiring idle pool worker");
        true
    }

    fn worker_exited(&self) {
        let mut workers = self.workers.lock();
        *workers = workers.saturating_sub(1);
        self.pool_size.store(*workers, Ordering::Release);
        self.exited.notify_all();
    }

    fn is_terminated(&self, workers: usize) -> bool {
        self.shutdown.load(Ordering::Acquire) && workers == 0 && self.receiver.is_empty()
    }
}

impl ExecutorService for BoundedPool {
    fn execute(&self, job: Job) -> std::result::Result<(), ExecutorError> {
        if self.is_shutdown() {
            return self.reject(job);
        }

        let mut job = job;
        if self.pool_size() < self.shared.core && self.reserve_worker(true, false) {
            match self.spawn_worker(Some(job)) {
                Ok(()) => return Ok(()),
                Err(Some(returned)) => job = returned,
                Err(None) => return Ok(()),
            }
        }

        let job = match self.offer(job) {
            Ok(()) => {
                if self.pool_size() == 0 && self.reserve_worker(false, true) {
                    let _ = self.spawn_worker(None);
                }
                return Ok(());
            }
            Err(job) => job,
        };

        if self.reserve_worker(false, false) {
            return match self.spawn_worker(Some(job)) {
                Ok(()) => Ok(()),
                Err(Some(job)) => self.reject(job),
                Err(None) => Ok(()),
            };
        }

        self.reject(job)
    }

    fn shutdown(&self) {
        if !self.shared.shutdown.swap(true, Ordering::AcqRel) {
            info!(prefix = %self.shared.prefix, "shutting down bounded pool");
        }
        self.shared.sender.write().take();
        let _workers = self.shared.workers.lock();
        self.shared.exited.notify_all();
    }

    fn shutdown_now(&self) -> Vec<Job> {
        self.shared.stopping.store(true, Ordering::Release);
        self.shutdown();
        let pending: Vec<Job> = self.shared.receiver.try_iter().collect();
        debug!(
            prefix = %self.shared.prefix,
            pending = pending.len(),
            "drained bounded pool queue"
        );
        pending
    }

    fn is_shutdown(&self) -> bool {
        BoundedPool::is_shutdown(self)
    }

    fn is_terminated(&self) -> bool {
        self.try_terminated()
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut workers = self.shared.workers.lock();
        while !self.shared.is_terminated(*workers) {
            match deadline {
                Some(deadline) => {
                    if self
                        .shared
                        .exited
                        .wait_until(&mut workers, deadline)
                        .timed_out()
                    {
                        return self.shared.is_terminated(*workers);
                    }
                }
                None => self.shared.exited.wait(&mut workers),
            }
        }
        true
    }

    fn introspect(&self) -> Introspection {
        Introspection::Bounded(Arc::new(self.clone()))
    }
}

impl BoundedPoolTelemetry for BoundedPool {
    fn pool_size(&self) -> usize {
        BoundedPool::pool_size(self)
    }

    fn core_pool_size(&self) -> usize {
        BoundedPool::core_pool_size(self)
    }

    fn max_pool_size(&self) -> usize {
        BoundedPool::max_pool_size(self)
    }

    fn active_count(&self) -> usize {
        BoundedPool::active_count(self)
    }

    fn completed_task_count(&self) -> u64 {
        BoundedPool::completed_task_count(self)
    }

    fn queue_size(&self) -> usize {
        BoundedPool::queue_size(self)
    }

    fn queue_remaining_capacity(&self) -> usize {
        BoundedPool::queue_remaining_capacity(self)
    }

    fn is_shutdown(&self) -> bool {
        BoundedPool::is_shutdown(self)
    }

    fn rejection_policy(&self) -> Arc<dyn RejectionPolicy> {
        BoundedPool::rejection_policy(self)
    }

    fn set_rejection_policy(&self, policy: Arc<dyn RejectionPolicy>) {
        BoundedPool::set_rejection_policy(self, policy)
    }
}

impl std::fmt::Debug for BoundedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedPool")
            .field("prefix", &self.shared.prefix)
            .field("pool_size", &self.pool_size())
            .field("active", &self.active_count())
            .field("queued", &self.queue_size())
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for BoundedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "BoundedPool[{}]: workers({}, core={}, max={}) queue({}, capacity={})",
            self.shared.prefix,
            self.pool_size(),
            self.shared.core,
            self.shared.max,
            self.queue_size(),
            self.shared
                .capacity
                .map_or_else(|| "unbounded".to_string(), |c| c.to_string()),
        )
    }
}
