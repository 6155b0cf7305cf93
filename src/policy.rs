//! Rejection policies for [`BoundedPool`].
//!
//! A bounded pool refuses a job when its queue is full and it already runs
//! `max_threads` workers, or when it has been shut down. The refused job is
//! handed to the pool's [`RejectionPolicy`] on the submitting thread.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bounded::BoundedPool;
use crate::error::ExecutorError;
use crate::executor::{ExecutorService, RejectionPolicy};
use crate::task::Job;

/// Fail the submission with `ExecutorError::Rejected`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbortPolicy;

impl RejectionPolicy for AbortPolicy {
    fn rejected(&self, _job: Job, pool: &BoundedPool) -> Result<(), ExecutorError> {
        Err(ExecutorError::Rejected(format!(
            "pool {} is {} (workers={}, queued={})",
            pool.prefix(),
            if pool.is_shutdown() {
                "shut down"
            } else {
                "saturated"
            },
            pool.pool_size(),
            pool.queue_size(),
        )))
    }
}

/// Run the job on the submitting thread, unless the pool is shut down, in
/// which case it is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct CallerRunsPolicy;

impl RejectionPolicy for CallerRunsPolicy {
    fn rejected(&self, job: Job, pool: &BoundedPool) -> Result<(), ExecutorError> {
        if !pool.is_shutdown() {
            job();
        }
        Ok(())
    }
}

/// Silently drop the job.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardPolicy;

impl RejectionPolicy for DiscardPolicy {
    fn rejected(&self, _job: Job, pool: &BoundedPool) -> Result<(), ExecutorError> {
        debug!(prefix = %pool.prefix(), "discarding rejected job");
        Ok(())
    }
}

/// Drop the oldest queued job and retry the submission.
///
/// The new job is dropped instead if the pool is shut down or nothing is
/// queued (as with a direct hand-off queue).
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardOldestPolicy;

impl RejectionPolicy for DiscardOldestPolicy {
    fn rejected(&self, job: Job, pool: &BoundedPool) -> Result<(), ExecutorError> {
        if pool.is_shutdown() {
            return Ok(());
        }
        match pool.poll_queued() {
            Some(oldest) => {
                drop(oldest);
                pool.execute(job)
            }
            None => {
                debug!(prefix = %pool.prefix(), "nothing queued to discard, dropping new job");
                Ok(())
            }
        }
    }
}

/// Serializable choice of a built-in rejection policy.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RejectionPolicyKind {
    #[default]
    Abort,
    CallerRuns,
    Discard,
    DiscardOldest,
}

impl RejectionPolicyKind {
    /// Instantiate the policy.
    pub fn into_policy(self) -> Arc<dyn RejectionPolicy> {
        match self {
            RejectionPolicyKind::Abort => Arc::new(AbortPolicy),
            RejectionPolicyKind::CallerRuns => Arc::new(CallerRunsPolicy),
            RejectionPolicyKind::Discard => Arc::new(DiscardPolicy),
            RejectionPolicyKind::DiscardOldest => Arc::new(DiscardOldestPolicy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::PoolBuilder;
    use crate::error::TaskError;
    use crossbeam_channel::bounded;
    use std::thread;
    use std::time::Duration;

    /// One worker, no queue; the returned sender releases the blocking job.
    fn saturated_pool(policy: RejectionPolicyKind) -> (BoundedPool, crossbeam_channel::Sender<()>) {
        let pool = PoolBuilder::new()
            .prefix("policy")
            .core_threads(1)
            .max_threads(1)
            .queue_capacity(0)
            .rejection_policy(policy)
            .build_bounded()
            .unwrap();
        let (release, wait) = bounded::<()>(0);
        pool.execute(Box::new(move || {
            let _ = wait.recv();
        }))
        .unwrap();
        (pool, release)
    }

    #[test]
    fn test_abort_policy_errors() {
        let (pool, release) = saturated_pool(RejectionPolicyKind::Abort);

        let result = pool.execute(Box::new(|| {}));
        assert!(matches!(result, Err(ExecutorError::Rejected(_))));

        release.send(()).unwrap();
        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn test_caller_runs_policy_runs_inline() {
        let (pool, release) = saturated_pool(RejectionPolicyKind::CallerRuns);

        let caller = thread::current().id();
        let handle = pool
            .submit_callable(move || thread::current().id() == caller)
            .unwrap();
        assert_eq!(handle.join(), Ok(true));

        release.send(()).unwrap();
        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn test_discard_policy_cancels_handle() {
        let (pool, release) = saturated_pool(RejectionPolicyKind::Discard);

        let handle = pool.submit_callable(|| 1).unwrap();
        assert_eq!(handle.join(), Err(TaskError::Cancelled));

        release.send(()).unwrap();
        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn test_discard_oldest_replaces_queued_job() {
        let pool = PoolBuilder::new()
            .prefix("policy")
            .core_threads(1)
            .max_threads(1)
            .queue_capacity(1)
            .rejection_policy(RejectionPolicyKind::DiscardOldest)
            .build_bounded()
            .unwrap();
        let (release, wait) = bounded::<()>(0);
        pool.execute(Box::new(move || {
            let _ = wait.recv();
        }))
        .unwrap();

        let oldest = pool.submit_callable(|| "oldest").unwrap();
        let newest = pool.submit_callable(|| "newest").unwrap();
        assert_eq!(oldest.join(), Err(TaskError::Cancelled));

        release.send(()).unwrap();
        assert_eq!(newest.join(), Ok("newest"));
        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn test_discard_oldest_without_queue_drops_new_job() {
        let (pool, release) = saturated_pool(RejectionPolicyKind::DiscardOldest);

        let handle = pool.submit_callable(|| 1).unwrap();
        assert_eq!(handle.join(), Err(TaskError::Cancelled));

        release.send(()).unwrap();
        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn test_kind_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: RejectionPolicyKind,
        }
        let parsed: Wrapper = toml::from_str(r#"policy = "caller_runs""#).unwrap();
        assert_eq!(parsed.policy, RejectionPolicyKind::CallerRuns);
    }
}
