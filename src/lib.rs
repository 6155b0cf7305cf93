//! # pool-gauge
//!
//! **Metrics for the thread pools you already have**
//!
//! A decorator that wraps any [`ExecutorService`] and records how work flows
//! through it: submission and completion rates, tasks in flight, rejections,
//! time spent queued and time spent running. The wrapped engine's behavior
//! is unchanged; results, panics, rejections and timeouts pass through as-is.
//!
//! ## Features
//!
//! - **Instrumentation**: [`InstrumentedExecutor`] over any engine, with per-task idle and run timers
//! - **Live Gauges**: pool size, queue depth, steals and more, read from the engine on demand
//! - **Rejection Counting**: bounded pools get their rejection policy wrapped with a counter
//! - **Engines Included**: a [`BoundedPool`], a [`WorkStealingPool`] and a rayon adapter
//! - **Prometheus Exposition**: [`MetricRegistry::with_prometheus`] mirrors every metric
//! - **Flexible Configuration**: Configure via files (TOML/YAML/JSON), environment variables, or code
//! - **CLI Integration**: Built-in clap support for command-line overrides
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use pool_gauge::{ExecutorService, MetricRegistry, MetricSink, PoolBuilder};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(MetricRegistry::new());
//!
//!     let executor = PoolBuilder::new()
//!         .prefix("ingest")
//!         .core_threads(2)
//!         .max_threads(8)
//!         .queue_capacity(256)
//!         .service_name("ingest")
//!         .build_bounded_instrumented(registry.clone())?;
//!
//!     let handle = executor.submit_callable(|| (0..1_000_000).sum::<i64>())?;
//!     println!("result: {}", handle.join()?);
//!
//!     println!("queued: {}", registry.gauge("ingest.tasks.queued").unwrap().value());
//!     println!("completed: {}", registry.meter("ingest.completed")?.count());
//!
//!     executor.shutdown();
//!     executor.await_termination(std::time::Duration::from_secs(5));
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Configuration sources are merged in order (later sources override earlier):
//!
//! 1. Default values
//! 2. Config files (via `.file()`)
//! 3. Environment variables (via `.env_prefix()`)
//! 4. Programmatic overrides
//! 5. CLI arguments (via `.with_cli_args()`)
//!
//! ### Config File Example (TOML)
//!
//! ```toml
//! prefix = "ingest"
//! core_threads = 2
//! max_threads = 8
//! queue_capacity = 256
//! keep_alive_ms = 30000
//! rejection_policy = "caller_runs"
//! service_name = "ingest"
//! ```
//!
//! ### Environment Variables
//!
//! With `.env_prefix("POOL")`:
//! - `POOL_PREFIX=ingest`
//! - `POOL_CORE_THREADS=2`
//! - `POOL_REJECTION_POLICY=discard`
//!
//! ## Thread Naming
//!
//! Threads are named with the configured prefix:
//! - Bounded and work-stealing workers: `{prefix}-worker-0000`, `{prefix}-worker-0001`, ...
//! - Rayon threads: `{prefix}-rayon-0000`, `{prefix}-rayon-0001`, ...

pub mod bounded;
pub mod builder;
pub mod config;
pub(crate) mod context;
pub mod error;
pub mod executor;
pub mod instrumented;
pub mod metrics;
pub mod policy;
pub mod rayon_pool;
pub mod stealing;
pub mod task;

pub use bounded::BoundedPool;
pub use builder::{PoolArgs, PoolBuilder};
pub use config::PoolConfig;
pub use context::current_worker_index;
pub use error::{Error, ExecutorError, MetricsError, Result, TaskError};
pub use executor::{
    BoundedPoolTelemetry, ExecutorService, Introspection, RejectionPolicy, WorkStealingTelemetry,
};
pub use instrumented::{InstrumentedExecutor, InstrumentedTask, NameSequence, RejectionCounter};
pub use metrics::{Counter, Gauge, Meter, MetricRegistry, MetricSink, Timer, TimerContext};
pub use policy::{
    AbortPolicy, CallerRunsPolicy, DiscardOldestPolicy, DiscardPolicy, RejectionPolicyKind,
};
pub use rayon_pool::RayonExecutor;
pub use stealing::WorkStealingPool;
pub use task::{Job, TaskHandle};
