//! Error types for pool-gauge.

use thiserror::Error;

/// Errors that can occur when building pools or instrumenting them.
#[derive(Debug, Error)]
pub enum Error {
    /// Error extracting configuration from figment.
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// The extracted configuration is inconsistent.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// Error building the rayon thread pool.
    #[error("failed to build rayon thread pool: {0}")]
    RayonThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Error spawning a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),

    /// The metric sink refused a registration.
    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// Result type alias for pool construction.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures raised by a [`MetricSink`](crate::metrics::MetricSink).
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A metric with this name exists but is of another kind.
    #[error("metric {name} is a {found}, not a {expected}")]
    KindMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    /// A gauge registration collided with an existing metric.
    #[error("a metric named {0} already exists")]
    AlreadyExists(String),

    /// The prometheus backing metric could not be created.
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Errors surfaced by an [`ExecutorService`](crate::executor::ExecutorService).
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The admission policy refused the job.
    #[error("job rejected: {0}")]
    Rejected(String),

    /// The executor no longer accepts work.
    #[error("executor has been shut down")]
    Shutdown,

    /// A bulk call ran out of time.
    #[error("timed out waiting for tasks")]
    Timeout,

    /// No candidate of an `invoke_any` call completed successfully.
    #[error("no task completed successfully: {0}")]
    AllFailed(TaskError),

    /// `invoke_any` was called with no tasks.
    #[error("no tasks supplied")]
    EmptyTaskList,
}

/// Outcome of a task that did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task body panicked; the payload message is kept.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The task was cancelled or dropped before it ran.
    #[error("task was cancelled")]
    Cancelled,
}
