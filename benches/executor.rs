//! Benchmarks for instrumentation overhead.
//!
//! Run with: cargo bench
//!
//! Compares submitting to a bare engine against the same engine wrapped in
//! an `InstrumentedExecutor`, and measures the metric primitives on their own.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pool_gauge::{
    ExecutorService, InstrumentedExecutor, MetricRegistry, MetricSink, PoolBuilder,
};

/// Small compute work (~100ns).
#[inline(never)]
fn small_work() -> u64 {
    let mut sum = 0u64;
    for i in 0..100 {
        sum = sum.wrapping_add(black_box(i));
    }
    sum
}

fn submit_and_join<E: ExecutorService>(executor: &E) -> u64 {
    executor
        .submit_callable(small_work)
        .expect("submission failed")
        .join()
        .expect("task failed")
}

/// Benchmark a single submit + join round trip.
fn bench_submit(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_and_join");

    let bare = PoolBuilder::new()
        .prefix("bench-bare")
        .core_threads(2)
        .build_bounded()
        .expect("failed to create pool");
    group.bench_function("bounded_bare", |b| b.iter(|| submit_and_join(&bare)));

    let instrumented = PoolBuilder::new()
        .prefix("bench-inst")
        .core_threads(2)
        .service_name("bench-inst")
        .build_bounded_instrumented(Arc::new(MetricRegistry::new()))
        .expect("failed to create pool");
    group.bench_function("bounded_instrumented", |b| {
        b.iter(|| submit_and_join(&instrumented))
    });

    let stealing = PoolBuilder::new()
        .prefix("bench-steal")
        .parallelism(2)
        .service_name("bench-steal")
        .build_work_stealing_instrumented(Arc::new(MetricRegistry::new()))
        .expect("failed to create pool");
    group.bench_function("work_stealing_instrumented", |b| {
        b.iter(|| submit_and_join(&stealing))
    });

    group.finish();

    bare.shutdown();
    instrumented.shutdown();
    stealing.shutdown();
}

/// Benchmark invoke_all with varying batch sizes.
fn bench_invoke_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("invoke_all");
    let executor = InstrumentedExecutor::with_name(
        PoolBuilder::new()
            .prefix("bench-batch")
            .core_threads(4)
            .build_bounded()
            .expect("failed to create pool"),
        Arc::new(MetricRegistry::new()),
        "bench-batch",
    )
    .expect("failed to instrument");

    for size in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let tasks = vec![small_work as fn() -> u64; size];
                let handles = executor.invoke_all(tasks).expect("invoke_all failed");
                black_box(handles.len())
            })
        });
    }

    group.finish();
    executor.shutdown();
}

/// Benchmark the metric primitives used on every task.
fn bench_primitives(c: &mut Criterion) {
    let mut group = c.benchmark_group("primitives");
    let registry = MetricRegistry::new();
    let counter = registry.counter("bench.running").expect("counter");
    let meter = registry.meter("bench.completed").expect("meter");
    let timer = registry.timer("bench.duration").expect("timer");

    group.bench_function("counter_inc_dec", |b| {
        b.iter(|| {
            counter.inc();
            counter.dec();
        })
    });
    group.bench_function("meter_mark", |b| b.iter(|| meter.mark()));
    group.bench_function("timer_context", |b| b.iter(|| black_box(timer.time().stop())));
    group.bench_function("registry_lookup", |b| {
        b.iter(|| black_box(registry.meter("bench.completed").expect("meter")))
    });

    group.finish();
}

criterion_group!(benches, bench_submit, bench_invoke_all, bench_primitives);
criterion_main!(benches);
