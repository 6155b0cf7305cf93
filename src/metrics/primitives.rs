//! Counter, meter, timer and gauge handles.
//!
//! Each push-based primitive is backed by a prometheus collector so it can be
//! exposed without copying; updates are single atomic operations.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use prometheus::core::Collector;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts};

use super::prometheus::{sanitize_metric_name, GaugeCollector};
use crate::error::MetricsError;

/// A signed value adjusted by increment and decrement.
#[derive(Clone)]
pub struct Counter {
    value: IntGauge,
}

impl Counter {
    /// Create a counter named `name` (dotted form).
    pub fn new(name: &str) -> Result<Self, MetricsError> {
        let value = IntGauge::with_opts(Opts::new(sanitize_metric_name(name), name))?;
        Ok(Self { value })
    }

    #[inline]
    pub fn inc(&self) {
        self.value.inc();
    }

    #[inline]
    pub fn dec(&self) {
        self.value.dec();
    }

    #[inline]
    pub fn inc_by(&self, n: i64) {
        self.value.add(n);
    }

    #[inline]
    pub fn dec_by(&self, n: i64) {
        self.value.sub(n);
    }

    /// Current value.
    #[inline]
    pub fn count(&self) -> i64 {
        self.value.get()
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counter")
            .field("count", &self.count())
            .finish()
    }
}

/// Cumulative occurrence count with a mean rate since creation.
#[derive(Clone)]
pub struct Meter {
    total: IntCounter,
    created: Instant,
}

impl Meter {
    /// Create a meter named `name` (dotted form).
    pub fn new(name: &str) -> Result<Self, MetricsError> {
        let total = IntCounter::with_opts(Opts::new(sanitize_metric_name(name), name))?;
        Ok(Self {
            total,
            created: Instant::now(),
        })
    }

    /// Record one occurrence.
    #[inline]
    pub fn mark(&self) {
        self.total.inc();
    }

    /// Record `n` occurrences in a single update.
    #[inline]
    pub fn mark_n(&self, n: u64) {
        self.total.inc_by(n);
    }

    /// Total occurrences recorded.
    #[inline]
    pub fn count(&self) -> u64 {
        self.total.get()
    }

    /// Occurrences per second since the meter was created.
    pub fn mean_rate(&self) -> f64 {
        let elapsed = self.created.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.count() as f64 / elapsed
    }
}

impl fmt::Debug for Meter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Meter")
            .field("count", &self.count())
            .finish()
    }
}

/// Duration samples, recorded in seconds.
#[derive(Clone)]
pub struct Timer {
    samples: Histogram,
}

impl Timer {
    /// Create a timer named `name` (dotted form).
    pub fn new(name: &str) -> Result<Self, MetricsError> {
        let samples =
            Histogram::with_opts(HistogramOpts::new(sanitize_metric_name(name), name))?;
        Ok(Self { samples })
    }

    /// Start a measurement. Nothing is recorded until [`TimerContext::stop`].
    #[inline]
    pub fn time(&self) -> TimerContext {
        TimerContext {
            timer: self.clone(),
            started: Instant::now(),
        }
    }

    /// Record one sample directly.
    #[inline]
    pub fn update(&self, elapsed: Duration) {
        self.samples.observe(elapsed.as_secs_f64());
    }

    /// Number of samples recorded.
    #[inline]
    pub fn count(&self) -> u64 {
        self.samples.get_sample_count()
    }

    /// Sum of all recorded samples.
    pub fn total(&self) -> Duration {
        Duration::from_secs_f64(self.samples.get_sample_sum().max(0.0))
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("count", &self.count())
            .field("total", &self.total())
            .finish()
    }
}

/// A started measurement.
///
/// Stopping records exactly one sample. Dropping an unstopped context records
/// nothing; it holds no resource beyond the timer handle.
#[must_use = "a timer context records nothing unless stopped"]
#[derive(Debug)]
pub struct TimerContext {
    timer: Timer,
    started: Instant,
}

impl TimerContext {
    /// Record the elapsed time and return it.
    pub fn stop(self) -> Duration {
        let elapsed = self.started.elapsed();
        self.timer.update(elapsed);
        elapsed
    }

    /// Time since the context was started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// A pull-based value computed by an accessor on every read.
#[derive(Clone)]
pub struct Gauge {
    read: Arc<dyn Fn() -> i64 + Send + Sync>,
}

impl Gauge {
    pub fn new<F>(read: F) -> Self
    where
        F: Fn() -> i64 + Send + Sync + 'static,
    {
        Self {
            read: Arc::new(read),
        }
    }

    /// Evaluate the accessor.
    #[inline]
    pub fn value(&self) -> i64 {
        (self.read)()
    }
}

impl fmt::Debug for Gauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gauge")
            .field("value", &self.value())
            .finish()
    }
}

/// Any primitive held by a sink.
#[derive(Debug, Clone)]
pub enum Metric {
    Counter(Counter),
    Meter(Meter),
    Timer(Timer),
    Gauge(Gauge),
}

impl Metric {
    /// Short name of the primitive kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Metric::Counter(_) => "counter",
            Metric::Meter(_) => "meter",
            Metric::Timer(_) => "timer",
            Metric::Gauge(_) => "gauge",
        }
    }

    /// Build the prometheus collector exposing this metric under `name`.
    pub(crate) fn collector(&self, name: &str) -> Result<Box<dyn Collector>, MetricsError> {
        Ok(match self {
            Metric::Counter(c) => Box::new(c.value.clone()),
            Metric::Meter(m) => Box::new(m.total.clone()),
            Metric::Timer(t) => Box::new(t.samples.clone()),
            Metric::Gauge(g) => Box::new(GaugeCollector::new(name, g.clone())?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[test]
    fn test_counter_inc_dec() {
        let counter = Counter::new("pool.running").unwrap();
        counter.inc();
        counter.inc();
        counter.dec();
        assert_eq!(counter.count(), 1);

        counter.dec_by(3);
        assert_eq!(counter.count(), -2);
    }

    #[test]
    fn test_meter_mark_n() {
        let meter = Meter::new("pool.submitted").unwrap();
        meter.mark();
        meter.mark_n(4);
        assert_eq!(meter.count(), 5);
        assert!(meter.mean_rate() >= 0.0);
    }

    #[test]
    fn test_timer_context_records_once() {
        let timer = Timer::new("pool.duration").unwrap();
        let ctx = timer.time();
        ctx.stop();
        assert_eq!(timer.count(), 1);
    }

    #[test]
    fn test_dropped_context_records_nothing() {
        let timer = Timer::new("pool.idle").unwrap();
        {
            let _ctx = timer.time();
        }
        assert_eq!(timer.count(), 0);
    }

    #[test]
    fn test_gauge_is_pulled() {
        let source = Arc::new(AtomicI64::new(3));
        let read = source.clone();
        let gauge = Gauge::new(move || read.load(Ordering::Relaxed));
        assert_eq!(gauge.value(), 3);

        source.store(7, Ordering::Relaxed);
        assert_eq!(gauge.value(), 7);
    }

    #[test]
    fn test_clones_share_state() {
        let counter = Counter::new("pool.rejected").unwrap();
        let cloned = counter.clone();
        cloned.inc();
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn test_metric_kind() {
        let metric = Metric::Gauge(Gauge::new(|| 0));
        assert_eq!(metric.kind(), "gauge");
    }
}
