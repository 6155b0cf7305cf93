//! Metrics decorator for any [`ExecutorService`].
//!
//! [`InstrumentedExecutor`] forwards every call to the engine it wraps and
//! reports the following under `<name>.<suffix>`:
//!
//! | Suffix | Kind | Meaning |
//! |--------|------|---------|
//! | `submitted` | Meter | tasks handed to the executor |
//! | `running` | Counter | tasks executing right now |
//! | `completed` | Meter | tasks that finished, including by panic |
//! | `rejected` | Counter | tasks the engine's rejection policy received |
//! | `idle` | Timer | submission to start of execution |
//! | `duration` | Timer | start to end of execution |
//!
//! Depending on what the engine reports through
//! [`introspect`](ExecutorService::introspect), gauges are registered as well:
//!
//! - bounded pool: `pool.size`, `pool.core`, `pool.max`, `tasks.active`,
//!   `tasks.completed`, `tasks.queued`, `tasks.capacity`
//! - work-stealing pool: `tasks.stolen`, `tasks.queued`, `threads.active`,
//!   `threads.running`
//!
//! Gauges are removed from the sink when the executor is shut down.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pool_gauge::{ExecutorService, InstrumentedExecutor, MetricRegistry, PoolBuilder};
//!
//! let registry = Arc::new(MetricRegistry::new());
//! let pool = PoolBuilder::new().core_threads(4).build_bounded()?;
//! let executor = InstrumentedExecutor::with_name(pool, registry.clone(), "ingest")?;
//!
//! executor.submit(|| do_work())?.join()?;
//! assert_eq!(registry.meter("ingest.completed")?.count(), 1);
//! ```

mod gauges;
mod naming;
mod rejection;
mod task;

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{ExecutorError, MetricsError};
use crate::executor::{ExecutorService, Introspection};
use crate::metrics::{metric_name, Counter, Meter, MetricSink};
use crate::task::{Job, TaskHandle};

pub use self::naming::NameSequence;
pub use self::rejection::RejectionCounter;
pub use self::task::{InstrumentedTask, TaskMetrics};

/// An [`ExecutorService`] that records metrics about the tasks it runs.
pub struct InstrumentedExecutor<E> {
    delegate: E,
    sink: Arc<dyn MetricSink>,
    name: String,
    submitted: Meter,
    rejected: Counter,
    task_metrics: Arc<TaskMetrics>,
    gauges: Vec<String>,
}

impl<E: ExecutorService> InstrumentedExecutor<E> {
    /// Instrument `delegate` under a generated `instrumented-delegate-<n>` name.
    pub fn new(delegate: E, sink: Arc<dyn MetricSink>) -> Result<Self, MetricsError> {
        Self::with_name_sequence(delegate, sink, NameSequence::global())
    }

    /// Instrument `delegate` under the next name from `sequence`.
    pub fn with_name_sequence(
        delegate: E,
        sink: Arc<dyn MetricSink>,
        sequence: &NameSequence,
    ) -> Result<Self, MetricsError> {
        Self::with_name(delegate, sink, sequence.next_name())
    }

    /// Instrument `delegate` under `name`.
    ///
    /// Executors sharing a name share their counters, meters and timers.
    ///
    /// # Errors
    ///
    /// Fails if a metric name is already taken by a different kind, or if a
    /// gauge name is already registered (for instance by another bounded or
    /// work-stealing executor with the same name). On failure no gauge stays
    /// registered and the engine's rejection policy is untouched.
    pub fn with_name(
        delegate: E,
        sink: Arc<dyn MetricSink>,
        name: impl Into<String>,
    ) -> Result<Self, MetricsError> {
        let name = name.into();
        let submitted = sink.meter(&metric_name(&name, "submitted"))?;
        let rejected = sink.counter(&metric_name(&name, "rejected"))?;
        let task_metrics = Arc::new(TaskMetrics::new(sink.as_ref(), &name)?);

        let introspection = delegate.introspect();
        let gauges = gauges::register(sink.as_ref(), &name, &introspection)?;
        if let Introspection::Bounded(ref stats) = introspection {
            let current = stats.rejection_policy();
            stats.set_rejection_policy(Arc::new(RejectionCounter::new(current, rejected.clone())));
        }

        debug!(name = %name, shape = introspection.shape(), "instrumented executor");

        Ok(Self {
            delegate,
            sink,
            name,
            submitted,
            rejected,
            task_metrics,
            gauges,
        })
    }

    /// Prefix of every metric this executor reports.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The wrapped engine.
    pub fn delegate(&self) -> &E {
        &self.delegate
    }

    /// The sink the metrics are registered in.
    pub fn sink(&self) -> &Arc<dyn MetricSink> {
        &self.sink
    }

    /// Full names of the gauges registered for the wrapped engine.
    pub fn gauge_names(&self) -> &[String] {
        &self.gauges
    }

    fn instrument<F, T>(&self, task: F) -> impl FnOnce() -> T + Send + 'static
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let task = InstrumentedTask::new(task, self.task_metrics.clone());
        move || task.run()
    }

    fn instrument_all<F, T>(&self, tasks: Vec<F>) -> Vec<impl FnOnce() -> T + Send + 'static>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.submitted.mark_n(tasks.len() as u64);
        tasks.into_iter().map(|task| self.instrument(task)).collect()
    }

    fn remove_gauges(&self) {
        gauges::remove(self.sink.as_ref(), &self.gauges);
    }
}

impl<E: ExecutorService> ExecutorService for InstrumentedExecutor<E> {
    fn execute(&self, job: Job) -> Result<(), ExecutorError> {
        self.submitted.mark();
        self.delegate.execute(Box::new(self.instrument(job)))
    }

    fn shutdown(&self) {
        self.delegate.shutdown();
        self.remove_gauges();
    }

    fn shutdown_now(&self) -> Vec<Job> {
        let pending = self.delegate.shutdown_now();
        self.remove_gauges();
        pending
    }

    fn is_shutdown(&self) -> bool {
        self.delegate.is_shutdown()
    }

    fn is_terminated(&self) -> bool {
        self.delegate.is_terminated()
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        self.delegate.await_termination(timeout)
    }

    /// Always [`Introspection::None`]: wrapping an instrumented executor
    /// again registers no gauges and installs no second rejection counter.
    fn introspect(&self) -> Introspection {
        Introspection::None
    }

    fn submit<F>(&self, task: F) -> Result<TaskHandle<()>, ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submitted.mark();
        self.delegate.submit(self.instrument(task))
    }

    fn submit_with_result<F, T>(&self, task: F, result: T) -> Result<TaskHandle<T>, ExecutorError>
    where
        F: FnOnce() + Send + 'static,
        T: Send + 'static,
    {
        self.submitted.mark();
        self.delegate.submit_with_result(self.instrument(task), result)
    }

    fn submit_callable<F, T>(&self, task: F) -> Result<TaskHandle<T>, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.submitted.mark();
        self.delegate.submit_callable(self.instrument(task))
    }

    fn invoke_all<F, T>(&self, tasks: Vec<F>) -> Result<Vec<TaskHandle<T>>, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.delegate.invoke_all(self.instrument_all(tasks))
    }

    fn invoke_all_timeout<F, T>(
        &self,
        tasks: Vec<F>,
        timeout: Duration,
    ) -> Result<Vec<TaskHandle<T>>, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.delegate
            .invoke_all_timeout(self.instrument_all(tasks), timeout)
    }

    fn invoke_any<F, T>(&self, tasks: Vec<F>) -> Result<T, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.delegate.invoke_any(self.instrument_all(tasks))
    }

    fn invoke_any_timeout<F, T>(&self, tasks: Vec<F>, timeout: Duration) -> Result<T, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.delegate
            .invoke_any_timeout(self.instrument_all(tasks), timeout)
    }
}

impl<E: std::fmt::Debug> std::fmt::Debug for InstrumentedExecutor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentedExecutor")
            .field("name", &self.name)
            .field("delegate", &self.delegate)
            .field("submitted", &self.submitted.count())
            .field("rejected", &self.rejected.count())
            .field("gauges", &self.gauges)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricRegistry;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Runs jobs inline on the submitting thread.
    #[derive(Default)]
    struct Inline {
        shutdown: AtomicBool,
        last_timeout: Mutex<Option<Duration>>,
    }

    impl ExecutorService for Inline {
        fn execute(&self, job: Job) -> Result<(), ExecutorError> {
            if self.shutdown.load(Ordering::Acquire) {
                return Err(ExecutorError::Shutdown);
            }
            job();
            Ok(())
        }

        fn shutdown(&self) {
            self.shutdown.store(true, Ordering::Release);
        }

        fn shutdown_now(&self) -> Vec<Job> {
            self.shutdown();
            vec![Box::new(|| {})]
        }

        fn is_shutdown(&self) -> bool {
            self.shutdown.load(Ordering::Acquire)
        }

        fn is_terminated(&self) -> bool {
            self.is_shutdown()
        }

        fn await_termination(&self, timeout: Duration) -> bool {
            *self.last_timeout.lock() = Some(timeout);
            self.is_shutdown()
        }
    }

    fn setup(name: &str) -> (Arc<MetricRegistry>, InstrumentedExecutor<Inline>) {
        let registry = Arc::new(MetricRegistry::new());
        let executor = InstrumentedExecutor::with_name(Inline::default(), registry.clone(), name)
            .unwrap();
        (registry, executor)
    }

    #[test]
    fn test_registers_core_metrics() {
        let (registry, executor) = setup("svc");
        assert_eq!(executor.name(), "svc");
        assert_eq!(
            registry.names(),
            vec![
                "svc.completed",
                "svc.duration",
                "svc.idle",
                "svc.rejected",
                "svc.running",
                "svc.submitted"
            ]
        );
        assert!(executor.gauge_names().is_empty());
    }

    #[test]
    fn test_generated_names() {
        let registry = Arc::new(MetricRegistry::new());
        let sequence = NameSequence::new();
        let first =
            InstrumentedExecutor::with_name_sequence(Inline::default(), registry.clone(), &sequence)
                .unwrap();
        let second =
            InstrumentedExecutor::with_name_sequence(Inline::default(), registry.clone(), &sequence)
                .unwrap();
        assert_eq!(first.name(), "instrumented-delegate-1");
        assert_eq!(second.name(), "instrumented-delegate-2");

        let global = InstrumentedExecutor::new(Inline::default(), registry).unwrap();
        assert!(global.name().starts_with("instrumented-delegate-"));
    }

    #[test]
    fn test_submit_shapes_record() {
        let (registry, executor) = setup("svc");

        executor.execute(Box::new(|| {})).unwrap();
        assert_eq!(executor.submit(|| {}).unwrap().join(), Ok(()));
        assert_eq!(executor.submit_with_result(|| {}, 7).unwrap().join(), Ok(7));
        assert_eq!(executor.submit_callable(|| "v").unwrap().join(), Ok("v"));

        assert_eq!(registry.meter("svc.submitted").unwrap().count(), 4);
        assert_eq!(registry.meter("svc.completed").unwrap().count(), 4);
        assert_eq!(registry.timer("svc.duration").unwrap().count(), 4);
        assert_eq!(registry.timer("svc.idle").unwrap().count(), 4);
        assert_eq!(registry.counter("svc.running").unwrap().count(), 0);
    }

    #[test]
    fn test_bulk_marks_once_per_call() {
        let (registry, executor) = setup("svc");

        let tasks: Vec<_> = (1..=3).map(|i| move || i).collect();
        let handles = executor.invoke_all(tasks).unwrap();
        assert_eq!(handles.len(), 3);
        assert_eq!(registry.meter("svc.submitted").unwrap().count(), 3);

        let tasks: Vec<_> = [10, 20].into_iter().map(|i| move || i).collect();
        assert_eq!(executor.invoke_any(tasks).unwrap(), 10);
        assert_eq!(registry.meter("svc.submitted").unwrap().count(), 5);
        assert_eq!(registry.meter("svc.completed").unwrap().count(), 5);
    }

    #[test]
    fn test_errors_pass_through() {
        let (registry, executor) = setup("svc");
        executor.shutdown();

        let result = executor.submit_callable(|| 1);
        assert!(matches!(result, Err(ExecutorError::Shutdown)));
        assert_eq!(registry.meter("svc.submitted").unwrap().count(), 1);
        assert_eq!(registry.timer("svc.idle").unwrap().count(), 0);
        assert_eq!(registry.meter("svc.completed").unwrap().count(), 0);
    }

    #[test]
    fn test_lifecycle_pass_through() {
        let (_registry, executor) = setup("svc");
        assert!(!executor.is_shutdown());

        let pending = executor.shutdown_now();
        assert_eq!(pending.len(), 1);
        assert!(executor.is_shutdown());
        assert!(executor.is_terminated());
        assert!(executor.await_termination(Duration::from_millis(250)));
        assert_eq!(
            *executor.delegate().last_timeout.lock(),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_introspect_hides_delegate() {
        let (_registry, executor) = setup("svc");
        assert!(matches!(executor.introspect(), Introspection::None));
    }

    #[test]
    fn test_kind_conflict_fails_construction() {
        let registry = Arc::new(MetricRegistry::new());
        registry.counter("svc.submitted").unwrap();

        let result = InstrumentedExecutor::with_name(Inline::default(), registry, "svc");
        assert!(matches!(result, Err(MetricsError::KindMismatch { .. })));
    }
}
