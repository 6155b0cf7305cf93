//! Metric primitives and sinks.
//!
//! Executors are observed through four primitives, all cheap to clone and safe
//! to update from any thread:
//!
//! - [`Counter`] - signed value adjusted by increment/decrement (running tasks, rejections)
//! - [`Meter`] - cumulative occurrences plus mean rate (submitted, completed)
//! - [`Timer`] - duration samples; [`Timer::time`] starts a [`TimerContext`]
//! - [`Gauge`] - pull-based value re-evaluated on every read
//!
//! A [`MetricSink`] hands out primitives by dotted name
//! (`"my-pool.tasks.queued"`). [`MetricRegistry`] is the in-process sink; it
//! can also expose every primitive through a prometheus `Registry`.
//!
//! # Example
//!
//! ```ignore
//! use pool_gauge::metrics::{MetricRegistry, MetricSink};
//!
//! let registry = MetricRegistry::new();
//! let submitted = registry.meter("workers.submitted")?;
//! submitted.mark();
//! assert_eq!(registry.meter("workers.submitted")?.count(), 1);
//! ```

mod primitives;
mod prometheus;
mod registry;

pub use self::primitives::{Counter, Gauge, Meter, Metric, Timer, TimerContext};
pub use self::prometheus::sanitize_metric_name;
pub use self::registry::{MetricRegistry, MetricSink};

/// Join a base name and a suffix with a dot.
///
/// An empty base yields the suffix alone.
pub fn metric_name(base: &str, suffix: &str) -> String {
    if base.is_empty() {
        suffix.to_string()
    } else {
        format!("{base}.{suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_name() {
        assert_eq!(metric_name("pool", "tasks.queued"), "pool.tasks.queued");
        assert_eq!(metric_name("", "idle"), "idle");
    }
}
