//! Per-task timing.

use std::sync::Arc;

use crate::error::MetricsError;
use crate::metrics::{metric_name, Counter, Meter, MetricSink, Timer, TimerContext};

/// Metrics every [`InstrumentedTask`] of one executor reports into.
#[derive(Debug, Clone)]
pub struct TaskMetrics {
    /// Tasks currently executing
    pub running: Counter,
    /// Tasks that finished, successfully or not
    pub completed: Meter,
    /// Time from submission until a worker starts the task
    pub idle: Timer,
    /// Time spent executing the task
    pub duration: Timer,
}

impl TaskMetrics {
    /// Get or create `<name>.running`, `<name>.completed`, `<name>.idle`
    /// and `<name>.duration`.
    pub fn new(sink: &dyn MetricSink, name: &str) -> Result<Self, MetricsError> {
        Ok(Self {
            running: sink.counter(&metric_name(name, "running"))?,
            completed: sink.meter(&metric_name(name, "completed"))?,
            idle: sink.timer(&metric_name(name, "idle"))?,
            duration: sink.timer(&metric_name(name, "duration"))?,
        })
    }
}

/// A task body plus the idle clock started when it was submitted.
///
/// Dropping an instrumented task without running it records nothing.
pub struct InstrumentedTask<F> {
    body: F,
    metrics: Arc<TaskMetrics>,
    idle: TimerContext,
}

impl<F, T> InstrumentedTask<F>
where
    F: FnOnce() -> T,
{
    /// Wrap `body` and start its idle clock.
    pub fn new(body: F, metrics: Arc<TaskMetrics>) -> Self {
        let idle = metrics.idle.time();
        Self {
            body,
            metrics,
            idle,
        }
    }

    /// Run the body on the current thread.
    ///
    /// The duration sample, the `running` decrement and the `completed`
    /// mark happen even if the body panics; the panic continues unwinding.
    pub fn run(self) -> T {
        let Self {
            body,
            metrics,
            idle,
        } = self;
        idle.stop();
        metrics.running.inc();
        let _finish = Finish {
            metrics: &metrics,
            duration: Some(metrics.duration.time()),
        };
        body()
    }
}

impl<F> std::fmt::Debug for InstrumentedTask<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentedTask")
            .field("idle", &self.idle.elapsed())
            .finish_non_exhaustive()
    }
}

/// Closes out a running task on every exit path.
struct Finish<'a> {
    metrics: &'a TaskMetrics,
    duration: Option<TimerContext>,
}

impl Drop for Finish<'_> {
    fn drop(&mut self) {
        if let Some(duration) = self.duration.take() {
            duration.stop();
        }
        self.metrics.running.dec();
        self.metrics.completed.mark();
    }
}
