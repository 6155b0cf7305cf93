//! Rejection counting for bounded pools.

use std::sync::Arc;

use crate::bounded::BoundedPool;
use crate::error::ExecutorError;
use crate::executor::RejectionPolicy;
use crate::metrics::Counter;
use crate::task::Job;

/// Counts rejections, then hands the job to the policy it replaced.
pub struct RejectionCounter {
    delegate: Arc<dyn RejectionPolicy>,
    rejected: Counter,
}

impl RejectionCounter {
    /// Wrap `delegate`, incrementing `rejected` on every rejection.
    pub fn new(delegate: Arc<dyn RejectionPolicy>, rejected: Counter) -> Self {
        Self { delegate, rejected }
    }

    /// The wrapped policy.
    pub fn delegate(&self) -> &Arc<dyn RejectionPolicy> {
        &self.delegate
    }
}

impl RejectionPolicy for RejectionCounter {
    fn rejected(&self, job: Job, pool: &BoundedPool) -> Result<(), ExecutorError> {
        self.rejected.inc();
        self.delegate.rejected(job, pool)
    }
}

impl std::fmt::Debug for RejectionCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RejectionCounter")
            .field("rejected", &self.rejected.count())
            .finish_non_exhaustive()
    }
}
