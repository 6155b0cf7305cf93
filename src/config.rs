//! Configuration types for pool-gauge engines.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policy::RejectionPolicyKind;

/// Configuration shared by every engine the builder produces.
///
/// This struct can be deserialized from TOML, YAML, JSON, or environment variables
/// using figment. Fields an engine does not use are ignored by it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Thread name prefix (default: "pool")
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Workers a bounded pool keeps alive (default: available CPUs)
    #[serde(default)]
    pub core_threads: Option<usize>,

    /// Upper bound on bounded-pool workers (default: `core_threads`)
    #[serde(default)]
    pub max_threads: Option<usize>,

    /// Bounded-pool queue capacity; `None` is unbounded, 0 is direct hand-off
    #[serde(default)]
    pub queue_capacity: Option<usize>,

    /// How long a non-core worker waits for work before exiting (default: 60s)
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_ms: u64,

    /// What a bounded pool does with jobs it cannot admit (default: abort)
    #[serde(default)]
    pub rejection_policy: RejectionPolicyKind,

    /// Worker count for work-stealing and rayon engines (default: available CPUs)
    #[serde(default)]
    pub parallelism: Option<usize>,

    /// Metric name prefix for instrumented engines.
    /// If None, a name is generated.
    #[serde(default)]
    pub service_name: Option<String>,
}

fn default_prefix() -> String {
    "pool".to_string()
}

fn default_keep_alive_ms() -> u64 {
    60_000
}

fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            core_threads: None,
            max_threads: None,
            queue_capacity: None,
            keep_alive_ms: default_keep_alive_ms(),
            rejection_policy: RejectionPolicyKind::default(),
            parallelism: None,
            service_name: None,
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the effective number of core threads.
    ///
    /// Returns the configured value or the number of available CPUs.
    pub fn effective_core_threads(&self) -> usize {
        self.core_threads.unwrap_or_else(available_cpus)
    }

    /// Get the effective maximum number of threads.
    ///
    /// Returns the configured value, otherwise the core count (at least 1).
    pub fn effective_max_threads(&self) -> usize {
        self.max_threads
            .unwrap_or_else(|| self.effective_core_threads().max(1))
    }

    /// Get the effective worker count for work-stealing and rayon engines.
    pub fn effective_parallelism(&self) -> usize {
        self.parallelism.unwrap_or_else(available_cpus)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.prefix, "pool");
        assert!(config.core_threads.is_none());
        assert!(config.max_threads.is_none());
        assert!(config.queue_capacity.is_none());
        assert_eq!(config.keep_alive(), Duration::from_secs(60));
        assert_eq!(config.rejection_policy, RejectionPolicyKind::Abort);
        assert!(config.service_name.is_none());
    }

    #[test]
    fn test_effective_threads() {
        let mut config = PoolConfig::default();
        assert!(config.effective_core_threads() >= 1);
        assert_eq!(config.effective_max_threads(), config.effective_core_threads());

        config.core_threads = Some(0);
        assert_eq!(config.effective_max_threads(), 1);

        config.core_threads = Some(2);
        config.max_threads = Some(8);
        assert_eq!(config.effective_core_threads(), 2);
        assert_eq!(config.effective_max_threads(), 8);
    }

    #[test]
    fn test_effective_parallelism() {
        let mut config = PoolConfig::default();
        assert!(config.effective_parallelism() >= 1);

        config.parallelism = Some(3);
        assert_eq!(config.effective_parallelism(), 3);
    }

    #[test]
    fn test_deserialize_config() {
        let toml = r#"
            prefix = "ingest"
            core_threads = 2
            max_threads = 6
            queue_capacity = 0
            keep_alive_ms = 500
            rejection_policy = "discard_oldest"
            service_name = "ingest-pool"
        "#;

        let config: PoolConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.prefix, "ingest");
        assert_eq!(config.core_threads, Some(2));
        assert_eq!(config.max_threads, Some(6));
        assert_eq!(config.queue_capacity, Some(0));
        assert_eq!(config.keep_alive(), Duration::from_millis(500));
        assert_eq!(config.rejection_policy, RejectionPolicyKind::DiscardOldest);
        assert_eq!(config.service_name.as_deref(), Some("ingest-pool"));
    }
}
