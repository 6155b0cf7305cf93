//! Named metric storage.
//!
//! [`MetricSink`] is the contract executors are instrumented against;
//! [`MetricRegistry`] is the in-process implementation. Lookups take the read
//! lock only; creation takes the write lock and re-checks, so concurrent
//! get-or-create calls for one name always return the same handle.

use std::collections::HashMap;

use parking_lot::RwLock;
use prometheus::Registry;
use tracing::{debug, warn};

use super::primitives::{Counter, Gauge, Meter, Metric, Timer};
use crate::error::MetricsError;

type Result<T> = std::result::Result<T, MetricsError>;

/// Source of named metric primitives.
///
/// Implementations must be safe to call from any thread.
pub trait MetricSink: Send + Sync {
    /// Get or create the counter called `name`.
    fn counter(&self, name: &str) -> Result<Counter>;

    /// Get or create the meter called `name`.
    fn meter(&self, name: &str) -> Result<Meter>;

    /// Get or create the timer called `name`.
    fn timer(&self, name: &str) -> Result<Timer>;

    /// Register a gauge under `name`.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::AlreadyExists` if any metric already uses the name.
    fn register_gauge(&self, name: &str, gauge: Gauge) -> Result<()>;

    /// Remove the metric called `name`. Returns `false` if there was none.
    fn remove(&self, name: &str) -> bool;
}

/// In-process [`MetricSink`] keyed by dotted name.
///
/// When built with [`MetricRegistry::with_prometheus`], every metric is also
/// registered with the prometheus `Registry` (under its sanitized name) and
/// unregistered on removal.
#[derive(Default)]
pub struct MetricRegistry {
    metrics: RwLock<HashMap<String, Metric>>,
    exposition: Option<Registry>,
}

impl MetricRegistry {
    /// Create an empty registry without exposition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry that mirrors into a prometheus `Registry`.
    pub fn with_prometheus(registry: Registry) -> Self {
        Self {
            metrics: RwLock::new(HashMap::new()),
            exposition: Some(registry),
        }
    }

    /// Look up any metric by name.
    pub fn get(&self, name: &str) -> Option<Metric> {
        self.metrics.read().get(name).cloned()
    }

    /// Look up a gauge by name.
    pub fn gauge(&self, name: &str) -> Option<Gauge> {
        match self.get(name) {
            Some(Metric::Gauge(gauge)) => Some(gauge),
            _ => None,
        }
    }

    /// Whether a metric called `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.metrics.read().contains_key(name)
    }

    /// All metric names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.metrics.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.metrics.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.read().is_empty()
    }

    /// The prometheus registry metrics are mirrored into, if any.
    pub fn prometheus_registry(&self) -> Option<&Registry> {
        self.exposition.as_ref()
    }

    fn get_or_create<T>(
        &self,
        name: &str,
        expected: &'static str,
        extract: fn(&Metric) -> Option<T>,
        create: fn(&str) -> Result<T>,
        wrap: fn(T) -> Metric,
    ) -> Result<T>
    where
        T: Clone,
    {
        let mismatch = |found: &Metric| MetricsError::KindMismatch {
            name: name.to_string(),
            expected,
            found: found.kind(),
        };

        // Fast path: read lock
        {
            let metrics = self.metrics.read();
            if let Some(existing) = metrics.get(name) {
                return extract(existing).ok_or_else(|| mismatch(existing));
            }
        }

        // Slow path: write lock, create metric
        let mut metrics = self.metrics.write();

        // Double-check after acquiring write lock
        if let Some(existing) = metrics.get(name) {
            return extract(existing).ok_or_else(|| mismatch(existing));
        }

        let handle = create(name)?;
        let metric = wrap(handle.clone());
        self.expose(name, &metric);
        metrics.insert(name.to_string(), metric);
        Ok(handle)
    }

    fn expose(&self, name: &str, metric: &Metric) {
        let Some(ref registry) = self.exposition else {
            return;
        };
        let registered = metric
            .collector(name)
            .and_then(|collector| registry.register(collector).map_err(MetricsError::from));
        if let Err(e) = registered {
            warn!(%e, name, "failed to register prometheus metric");
        }
    }

    fn unexpose(&self, name: &str, metric: &Metric) {
        let Some(ref registry) = self.exposition else {
            return;
        };
        let unregistered = metric
            .collector(name)
            .and_then(|collector| registry.unregister(collector).map_err(MetricsError::from));
        if let Err(e) = unregistered {
            debug!(%e, name, "prometheus metric was not registered");
        }
    }
}

impl MetricSink for MetricRegistry {
    fn counter(&self, name: &str) -> Result<Counter> {
        self.get_or_create(
            name,
            "counter",
            |m| match m {
                Metric::Counter(c) => Some(c.clone()),
                _ => None,
            },
            Counter::new,
            Metric::Counter,
        )
    }

    fn meter(&self, name: &str) -> Result<Meter> {
        self.get_or_create(
            name,
            "meter",
            |m| match m {
                Metric::Meter(meter) => Some(meter.clone()),
                _ => None,
            },
            Meter::new,
            Metric::Meter,
        )
    }

    fn timer(&self, name: &str) -> Result<Timer> {
        self.get_or_create(
            name,
            "timer",
            |m| match m {
                Metric::Timer(t) => Some(t.clone()),
                _ => None,
            },
            Timer::new,
            Metric::Timer,
        )
    }

    fn register_gauge(&self, name: &str, gauge: Gauge) -> Result<()> {
        let mut metrics = self.metrics.write();
        if metrics.contains_key(name) {
            return Err(MetricsError::AlreadyExists(name.to_string()));
        }
        let metric = Metric::Gauge(gauge);
        self.expose(name, &metric);
        metrics.insert(name.to_string(), metric);
        Ok(())
    }

    fn remove(&self, name: &str) -> bool {
        let removed = self.metrics.write().remove(name);
        match removed {
            Some(metric) => {
                self.unexpose(name, &metric);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricRegistry")
            .field("metrics", &self.names())
            .field(
                "exposition",
                &self.exposition.as_ref().map(|_| "<Registry>"),
            )
            .finish()
    }
}
