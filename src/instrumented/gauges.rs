//! Gauges over an engine's live telemetry.

use std::sync::Arc;

use tracing::debug;

use crate::error::MetricsError;
use crate::executor::{gauge_value, BoundedPoolTelemetry, Introspection, WorkStealingTelemetry};
use crate::metrics::{metric_name, Gauge, MetricSink};

/// A gauge reading one value from shared telemetry.
fn probe<S>(stats: &Arc<S>, read: fn(&S) -> i64) -> Gauge
where
    S: ?Sized + Send + Sync + 'static,
{
    let stats = stats.clone();
    Gauge::new(move || read(&stats))
}

fn bounded_gauges(stats: &Arc<dyn BoundedPoolTelemetry>) -> Vec<(&'static str, Gauge)> {
    vec![
        ("pool.size", probe(stats, |s| gauge_value(s.pool_size()))),
        ("pool.core", probe(stats, |s| gauge_value(s.core_pool_size()))),
        ("pool.max", probe(stats, |s| gauge_value(s.max_pool_size()))),
        ("tasks.active", probe(stats, |s| gauge_value(s.active_count()))),
        ("tasks.completed", probe(stats, |s| gauge_value(s.completed_task_count()))),
        ("tasks.queued", probe(stats, |s| gauge_value(s.queue_size()))),
        ("tasks.capacity", probe(stats, |s| gauge_value(s.queue_remaining_capacity()))),
    ]
}

fn work_stealing_gauges(stats: &Arc<dyn WorkStealingTelemetry>) -> Vec<(&'static str, Gauge)> {
    vec![
        ("tasks.stolen", probe(stats, |s| gauge_value(s.steal_count()))),
        ("tasks.queued", probe(stats, |s| gauge_value(s.queued_task_count()))),
        ("threads.active", probe(stats, |s| gauge_value(s.active_thread_count()))),
        ("threads.running", probe(stats, |s| gauge_value(s.running_thread_count()))),
    ]
}

/// Register the gauges `introspection` supports under `name`.
///
/// Returns the full names registered. On failure, gauges registered so far
/// are removed again.
pub(crate) fn register(
    sink: &dyn MetricSink,
    name: &str,
    introspection: &Introspection,
) -> Result<Vec<String>, MetricsError> {
    let gauges = match introspection {
        Introspection::Bounded(stats) => bounded_gauges(stats),
        Introspection::WorkStealing(stats) => work_stealing_gauges(stats),
        Introspection::None => Vec::new(),
    };

    let mut registered = Vec::with_capacity(gauges.len());
    for (suffix, gauge) in gauges {
        let full = metric_name(name, suffix);
        if let Err(e) = sink.register_gauge(&full, gauge) {
            remove(sink, &registered);
            return Err(e);
        }
        registered.push(full);
    }

    debug!(
        name,
        shape = introspection.shape(),
        gauges = registered.len(),
        "registered executor gauges"
    );
    Ok(registered)
}

/// Remove previously registered gauges. Absent names are skipped.
pub(crate) fn remove(sink: &dyn MetricSink, names: &[String]) {
    let removed = names.iter().filter(|name| sink.remove(name)).count();
    if removed > 0 {
        debug!(removed, "removed executor gauges");
    }
}
