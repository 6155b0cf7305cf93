//! Builder pattern for constructing engines.
//!
//! The builder supports multiple configuration sources using figment:
//! - Default values
//! - Config files (TOML, YAML, JSON)
//! - Environment variables
//! - Programmatic overrides
//! - CLI arguments via clap

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use tracing::warn;

use crate::bounded::BoundedPool;
use crate::config::PoolConfig;
use crate::error::Result;
use crate::executor::ExecutorService;
use crate::instrumented::InstrumentedExecutor;
use crate::metrics::MetricSink;
use crate::policy::RejectionPolicyKind;
use crate::rayon_pool::RayonExecutor;
use crate::stealing::WorkStealingPool;

/// Builder for bounded, work-stealing and rayon engines.
///
/// Configuration sources are merged in the following order (later sources override earlier):
/// 1. Default values
/// 2. Config files (in order added)
/// 3. Environment variables
/// 4. Programmatic overrides
///
/// # Examples
///
/// ```ignore
/// use std::sync::Arc;
/// use pool_gauge::{MetricRegistry, PoolBuilder};
///
/// let registry = Arc::new(MetricRegistry::new());
/// let executor = PoolBuilder::new()
///     .file("pool.toml")
///     .env_prefix("POOL")
///     .prefix("ingest")
///     .core_threads(2)
///     .max_threads(8)
///     .service_name("ingest")
///     .build_bounded_instrumented(registry)?;
/// ```
#[derive(Debug)]
pub struct PoolBuilder {
    figment: Figment,
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            figment: Figment::from(Serialized::defaults(PoolConfig::default())),
        }
    }

    /// Add a configuration file.
    ///
    /// Supports TOML, YAML, and JSON formats (detected by extension).
    /// Files are merged in the order they are added.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        self.figment = match extension.to_lowercase().as_str() {
            "yaml" | "yml" => self.figment.merge(Yaml::file(path)),
            "json" => self.figment.merge(Json::file(path)),
            _ => self.figment.merge(Toml::file(path)),
        };
        self
    }

    /// Add environment variables with a prefix.
    ///
    /// Environment variables are expected in the format `{PREFIX}_{KEY}`,
    /// e.g., `POOL_CORE_THREADS`, `POOL_REJECTION_POLICY`.
    pub fn env_prefix(mut self, prefix: &str) -> Self {
        self.figment = self
            .figment
            .merge(Env::prefixed(&format!("{prefix}_")));
        self
    }

    /// Set the thread name prefix.
    ///
    /// Thread names will be formatted as `{prefix}-worker-{NNNN}` or
    /// `{prefix}-rayon-{NNNN}`.
    pub fn prefix(self, prefix: impl Into<String>) -> Self {
        self.set("prefix", prefix.into())
    }

    /// Set the number of workers a bounded pool keeps alive.
    pub fn core_threads(self, n: usize) -> Self {
        self.set("core_threads", n)
    }

    /// Set the maximum number of bounded-pool workers.
    pub fn max_threads(self, n: usize) -> Self {
        self.set("max_threads", n)
    }

    /// Bound the bounded-pool queue. A capacity of 0 hands jobs directly to
    /// idle workers.
    ///
    /// Default is unbounded.
    pub fn queue_capacity(self, capacity: usize) -> Self {
        self.set("queue_capacity", capacity)
    }

    /// Set how long a non-core worker waits for work before exiting.
    pub fn keep_alive(self, keep_alive: Duration) -> Self {
        let ms = u64::try_from(keep_alive.as_millis()).unwrap_or(u64::MAX);
        self.set("keep_alive_ms", ms)
    }

    pub fn rejection_policy(self, policy: RejectionPolicyKind) -> Self {
        self.set("rejection_policy", policy)
    }

    /// Set the worker count of work-stealing and rayon engines.
    pub fn parallelism(self, n: usize) -> Self {
        self.set("parallelism", n)
    }

    /// Set the metric name prefix used by the `build_*_instrumented` methods.
    pub fn service_name(self, name: impl Into<String>) -> Self {
        self.set("service_name", name.into())
    }

    fn set<V: serde::Serialize>(mut self, key: &str, value: V) -> Self {
        self.figment = self.figment.merge(Serialized::default(key, value));
        self
    }

    /// Apply CLI argument overrides.
    ///
    /// This method applies any non-None values from the `PoolArgs` struct.
    pub fn with_cli_args(mut self, args: &PoolArgs) -> Self {
        if let Some(ref prefix) = args.pool_prefix {
            self = self.prefix(prefix.clone());
        }
        if let Some(n) = args.pool_core_threads {
            self = self.core_threads(n);
        }
        if let Some(n) = args.pool_max_threads {
            self = self.max_threads(n);
        }
        if let Some(capacity) = args.pool_queue_capacity {
            self = self.queue_capacity(capacity);
        }
        if let Some(ms) = args.pool_keep_alive_ms {
            self = self.set("keep_alive_ms", ms);
        }
        if let Some(policy) = args.pool_rejection_policy {
            self = self.rejection_policy(policy);
        }
        if let Some(n) = args.pool_parallelism {
            self = self.parallelism(n);
        }
        if let Some(ref name) = args.pool_service_name {
            self = self.service_name(name.clone());
        }
        self
    }

    /// Extract the merged configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or a value has the wrong type.
    pub fn config(&self) -> Result<PoolConfig> {
        let config: PoolConfig = self.figment.extract().map_err(Box::new)?;
        Ok(config)
    }

    /// Build a queue-backed pool with core and maximum worker counts.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration extraction fails
    /// - `core_threads` exceeds `max_threads`, or `max_threads` is 0
    pub fn build_bounded(self) -> Result<BoundedPool> {
        BoundedPool::from_config(&self.config()?)
    }

    /// Build a work-stealing pool with `parallelism` workers.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration extraction fails, `parallelism`
    /// is 0, or a worker thread cannot be spawned.
    pub fn build_work_stealing(self) -> Result<WorkStealingPool> {
        WorkStealingPool::from_config(&self.config()?)
    }

    /// Build a rayon-backed executor with `parallelism` threads.
    pub fn build_rayon(self) -> Result<RayonExecutor> {
        RayonExecutor::from_config(&self.config()?)
    }

    /// Build a bounded pool wrapped in an [`InstrumentedExecutor`].
    ///
    /// Metrics are named after `service_name`, or a generated name if unset.
    /// The pool is shut down again if instrumenting it fails.
    pub fn build_bounded_instrumented(
        self,
        sink: Arc<dyn MetricSink>,
    ) -> Result<InstrumentedExecutor<BoundedPool>> {
        let config = self.config()?;
        instrument(BoundedPool::from_config(&config)?, sink, config.service_name)
    }

    /// Build a work-stealing pool wrapped in an [`InstrumentedExecutor`].
    pub fn build_work_stealing_instrumented(
        self,
        sink: Arc<dyn MetricSink>,
    ) -> Result<InstrumentedExecutor<WorkStealingPool>> {
        let config = self.config()?;
        instrument(WorkStealingPool::from_config(&config)?, sink, config.service_name)
    }

    /// Build a rayon executor wrapped in an [`InstrumentedExecutor`].
    pub fn build_rayon_instrumented(
        self,
        sink: Arc<dyn MetricSink>,
    ) -> Result<InstrumentedExecutor<RayonExecutor>> {
        let config = self.config()?;
        instrument(RayonExecutor::from_config(&config)?, sink, config.service_name)
    }
}

fn instrument<E>(
    engine: E,
    sink: Arc<dyn MetricSink>,
    name: Option<String>,
) -> Result<InstrumentedExecutor<E>>
where
    E: ExecutorService + Clone,
{
    let handle = engine.clone();
    let instrumented = match name {
        Some(name) => InstrumentedExecutor::with_name(engine, sink, name),
        None => InstrumentedExecutor::new(engine, sink),
    };
    instrumented.map_err(|e| {
        warn!(%e, "failed to instrument executor, shutting it down");
        handle.shutdown();
        e.into()
    })
}

/// CLI arguments for pool configuration.
///
/// Use with clap's `Parser` derive macro. These arguments can be applied
/// to a `PoolBuilder` using `with_cli_args`.
///
/// # Examples
///
/// ```ignore
/// use clap::Parser;
/// use pool_gauge::{PoolBuilder, PoolArgs};
///
/// #[derive(Parser)]
/// struct MyArgs {
///     #[command(flatten)]
///     pool: PoolArgs,
///     // ... other args
/// }
///
/// let args = MyArgs::parse();
/// let pool = PoolBuilder::new()
///     .with_cli_args(&args.pool)
///     .build_bounded()?;
/// ```
#[derive(Debug, Default, Clone, clap::Args)]
pub struct PoolArgs {
    /// Thread name prefix
    #[arg(long)]
    pub pool_prefix: Option<String>,

    /// Workers a bounded pool keeps alive
    #[arg(long)]
    pub pool_core_threads: Option<usize>,

    /// Maximum bounded-pool workers
    #[arg(long)]
    pub pool_max_threads: Option<usize>,

    /// Bounded-pool queue capacity (0 for direct hand-off)
    #[arg(long)]
    pub pool_queue_capacity: Option<usize>,

    /// Idle time before a non-core worker exits, in milliseconds
    #[arg(long)]
    pub pool_keep_alive_ms: Option<u64>,

    /// What a saturated bounded pool does with new jobs
    #[arg(long, value_enum)]
    pub pool_rejection_policy: Option<RejectionPolicyKind>,

    /// Worker count for work-stealing and rayon engines
    #[arg(long)]
    pub pool_parallelism: Option<usize>,

    /// Metric name prefix
    #[arg(long)]
    pub pool_service_name: Option<String>,
}
