//! Prometheus exposition for pool-gauge metrics.
//!
//! Push-based primitives are prometheus collectors already; gauges are pulled,
//! so they are exported through [`GaugeCollector`], which evaluates the
//! accessor at scrape time.
//!
//! Dotted metric names are not valid prometheus names, so every name passes
//! through [`sanitize_metric_name`] before it reaches a `Registry`:
//!
//! | Metric name | Exposed as |
//! |-------------|------------|
//! | `api-pool.tasks.queued` | `api_pool_tasks_queued` |
//! | `instrumented-delegate-1.idle` | `instrumented_delegate_1_idle` |

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{IntGauge, Opts};

use super::primitives::Gauge;
use crate::error::MetricsError;

/// Rewrite a dotted metric name into a valid prometheus metric name.
///
/// Valid chars are `[a-zA-Z_:]` for the first char and `[a-zA-Z0-9_:]` for
/// the rest; anything else becomes an underscore.
///
/// # Example
///
/// ```
/// use pool_gauge::metrics::sanitize_metric_name;
///
/// assert_eq!(sanitize_metric_name("my-pool.pool.size"), "my_pool_pool_size");
/// assert_eq!(sanitize_metric_name("7workers"), "_workers");
/// ```
pub fn sanitize_metric_name(name: &str) -> String {
    name.chars()
        .enumerate()
        .map(|(i, c)| {
            if i == 0 {
                if c.is_ascii_alphabetic() || c == '_' || c == ':' {
                    c
                } else {
                    '_'
                }
            } else if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Exposes a [`Gauge`] by evaluating it on every collection.
pub(crate) struct GaugeCollector {
    exposed: IntGauge,
    gauge: Gauge,
}

impl GaugeCollector {
    pub(crate) fn new(name: &str, gauge: Gauge) -> Result<Self, MetricsError> {
        let exposed = IntGauge::with_opts(Opts::new(sanitize_metric_name(name), name))?;
        Ok(Self { exposed, gauge })
    }
}

impl Collector for GaugeCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.exposed.desc()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.exposed.set(self.gauge.value());
        self.exposed.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_sanitize_dotted_name() {
        assert_eq!(
            sanitize_metric_name("instrumented-delegate-3.tasks.capacity"),
            "instrumented_delegate_3_tasks_capacity"
        );
    }

    #[test]
    fn test_sanitize_leading_digit() {
        assert_eq!(sanitize_metric_name("3pool"), "_pool");
        assert_eq!(sanitize_metric_name("ns:pool_size"), "ns:pool_size");
    }

    #[test]
    fn test_gauge_collector_reads_on_gather() {
        let source = Arc::new(AtomicI64::new(0));
        let read = source.clone();
        let gauge = Gauge::new(move || read.load(Ordering::Relaxed));

        let registry = Registry::new();
        registry
            .register(Box::new(
                GaugeCollector::new("pool.tasks.queued", gauge).unwrap(),
            ))
            .expect("registration should succeed");

        source.store(12, Ordering::Relaxed);

        let families = registry.gather();
        let queued = families
            .iter()
            .find(|f| f.get_name() == "pool_tasks_queued")
            .expect("gauge should be exposed");
        assert_eq!(queued.get_metric()[0].get_gauge().get_value(), 12.0);
    }
}
