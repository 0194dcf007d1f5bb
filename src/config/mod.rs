//! # Engine Configuration
//!
//! Every tunable of the engine lives in [`EngineConfig`]. Each section carries
//! serde defaults equal to the reference values in [`crate::constants`], so an
//! empty configuration file yields a working 16-shard deployment.
//!
//! Files are loaded by [`ConfigManager`]: `config/daily-income.toml`, then
//! `config/environments/{env}.toml`, then `DAILY_INCOME__SECTION__KEY`
//! environment variables.

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{batch, system, tables, workers};
use crate::execution::ExecutorSettings;
use crate::models::ShardLayout;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sharding: ShardingConfig,
    pub executor: ExecutorConfig,
    pub pipeline: PipelineConfig,
    pub batch: BatchSizingConfig,
    pub aggregation: AggregationConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardingConfig {
    pub shard_count: u32,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            shard_count: system::DEFAULT_SHARD_COUNT,
        }
    }
}

/// Sizing of the computation executor; unset values are derived from the shard
/// count and the host's available parallelism
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub core_parallelism: Option<usize>,
    pub max_parallelism: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub shutdown_grace_seconds: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            core_parallelism: None,
            max_parallelism: None,
            queue_capacity: None,
            shutdown_grace_seconds: system::DEFAULT_SHUTDOWN_GRACE_SECONDS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub pipeline_timeout_seconds: u64,
    pub per_shard_transaction_timeout_seconds: u64,
    pub failure_abort_threshold: usize,
    pub summary_timeout_seconds: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipeline_timeout_seconds: system::DEFAULT_PIPELINE_TIMEOUT_SECONDS,
            per_shard_transaction_timeout_seconds: system::DEFAULT_SHARD_TRANSACTION_TIMEOUT_SECONDS,
            failure_abort_threshold: system::DEFAULT_FAILURE_ABORT_THRESHOLD,
            summary_timeout_seconds: system::DEFAULT_SUMMARY_TIMEOUT_SECONDS,
        }
    }
}

impl PipelineConfig {
    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline_timeout_seconds)
    }

    pub fn per_shard_transaction_timeout(&self) -> Duration {
        Duration::from_secs(self.per_shard_transaction_timeout_seconds)
    }

    pub fn summary_timeout(&self) -> Duration {
        Duration::from_secs(self.summary_timeout_seconds)
    }
}

/// Thresholds of the consolidation batch-size staircase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSizingConfig {
    pub min_size: usize,
    pub default_size: usize,
    pub max_size: usize,
    pub small: usize,
    pub medium: usize,
    pub large: usize,
    pub medium_batch_size: usize,
    pub large_batch_size: usize,
}

impl Default for BatchSizingConfig {
    fn default() -> Self {
        Self {
            min_size: batch::MIN_SIZE,
            default_size: batch::DEFAULT_SIZE,
            max_size: batch::MAX_SIZE,
            small: batch::SMALL_THRESHOLD,
            medium: batch::MEDIUM_THRESHOLD,
            large: batch::LARGE_THRESHOLD,
            medium_batch_size: batch::MEDIUM_BATCH_SIZE,
            large_batch_size: batch::LARGE_BATCH_SIZE,
        }
    }
}

impl BatchSizingConfig {
    /// Reject tables whose steps are not ordered
    pub fn validate(&self) -> ConfigResult<()> {
        for (field, value) in [
            ("batch.min_size", self.min_size),
            ("batch.default_size", self.default_size),
            ("batch.max_size", self.max_size),
            ("batch.medium_batch_size", self.medium_batch_size),
            ("batch.large_batch_size", self.large_batch_size),
        ] {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    value,
                    "batch sizes must be greater than 0",
                ));
            }
        }

        if !(self.min_size <= self.default_size && self.default_size <= self.max_size) {
            return Err(ConfigurationError::validation_error(format!(
                "batch sizes must satisfy min_size <= default_size <= max_size (got {} / {} / {})",
                self.min_size, self.default_size, self.max_size
            )));
        }

        if !(self.small <= self.medium && self.medium <= self.large) {
            return Err(ConfigurationError::validation_error(format!(
                "batch thresholds must satisfy small <= medium <= large (got {} / {} / {})",
                self.small, self.medium, self.large
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub progress_log_interval: usize,
    pub chunk_pause_ms: u64,
    /// Clear consolidated rows for the run key before copying
    pub replace_existing: bool,
    pub shutdown_grace_seconds: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            progress_log_interval: system::DEFAULT_PROGRESS_LOG_INTERVAL,
            chunk_pause_ms: system::DEFAULT_CHUNK_PAUSE_MS,
            replace_existing: true,
            shutdown_grace_seconds: system::DEFAULT_SUMMARY_SHUTDOWN_GRACE_SECONDS,
        }
    }
}

impl AggregationConfig {
    pub fn chunk_pause(&self) -> Duration {
        Duration::from_millis(self.chunk_pause_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub shard_table_prefix: String,
    pub staging_table_prefix: String,
    pub consolidated_table: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: system::DEFAULT_SHARD_COUNT + 4,
            acquire_timeout_seconds: 30,
            shard_table_prefix: tables::SHARD_TABLE_PREFIX.to_string(),
            staging_table_prefix: tables::STAGING_TABLE_PREFIX.to_string(),
            consolidated_table: tables::CONSOLIDATED_TABLE.to_string(),
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }

    /// Connection string, falling back to `DATABASE_URL`
    pub fn database_url(&self) -> ConfigResult<String> {
        match &self.url {
            Some(url) if !url.is_empty() => Ok(url.clone()),
            _ => std::env::var("DATABASE_URL").map_err(|_| {
                ConfigurationError::missing_required_field(
                    "database.url",
                    "database configuration (or DATABASE_URL)",
                )
            }),
        }
    }
}

impl EngineConfig {
    pub fn shard_layout(&self) -> ShardLayout {
        ShardLayout::new(self.sharding.shard_count)
    }

    /// Settings of the computation executor
    ///
    /// `core = min(N, 2 x CPU)`, `max = N`, `queue = max(10, N - core)` unless
    /// overridden.
    pub fn calculation_executor_settings(&self) -> ExecutorSettings {
        let shard_count = self.sharding.shard_count as usize;
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let max_parallelism = self.executor.max_parallelism.unwrap_or(shard_count);
        let core_parallelism = self
            .executor
            .core_parallelism
            .unwrap_or_else(|| max_parallelism.min(cpus * 2));
        let queue_capacity = self.executor.queue_capacity.unwrap_or_else(|| {
            system::MIN_QUEUE_CAPACITY.max(shard_count.saturating_sub(core_parallelism))
        });

        ExecutorSettings {
            name: workers::CALCULATION_WORKER_PREFIX.to_string(),
            core_parallelism,
            max_parallelism,
            queue_capacity,
            shutdown_grace: Duration::from_secs(self.executor.shutdown_grace_seconds),
        }
    }

    /// Settings of the summarization executor, sized exactly to the shard count
    pub fn summary_executor_settings(&self) -> ExecutorSettings {
        let shard_count = self.sharding.shard_count as usize;
        ExecutorSettings {
            name: workers::SUMMARY_WORKER_PREFIX.to_string(),
            core_parallelism: shard_count,
            max_parallelism: shard_count,
            queue_capacity: system::MIN_QUEUE_CAPACITY,
            shutdown_grace: Duration::from_secs(self.aggregation.shutdown_grace_seconds),
        }
    }

    /// Validate the loaded configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.sharding.shard_count == 0 {
            return Err(ConfigurationError::invalid_value(
                "sharding.shard_count",
                "0",
                "shard count must be greater than 0",
            ));
        }

        if self.pipeline.pipeline_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "pipeline.pipeline_timeout_seconds",
                "0",
                "pipeline timeout must be greater than 0",
            ));
        }

        if self.pipeline.summary_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "pipeline.summary_timeout_seconds",
                "0",
                "summary timeout must be greater than 0",
            ));
        }

        if self.executor.max_parallelism == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "executor.max_parallelism",
                "0",
                "max parallelism must be greater than 0",
            ));
        }

        let shard_count = self.sharding.shard_count as usize;
        for (field, value) in [
            ("executor.core_parallelism", self.executor.core_parallelism),
            ("executor.max_parallelism", self.executor.max_parallelism),
        ] {
            if let Some(value) = value.filter(|&v| v > shard_count) {
                return Err(ConfigurationError::invalid_value(
                    field,
                    value,
                    format!("parallelism cannot exceed the shard count ({shard_count})"),
                ));
            }
        }

        if let (Some(core), Some(max)) = (
            self.executor.core_parallelism,
            self.executor.max_parallelism,
        ) {
            if core > max {
                return Err(ConfigurationError::validation_error(format!(
                    "executor.core_parallelism ({core}) exceeds executor.max_parallelism ({max})"
                )));
            }
        }

        // Every shard task must fit into running plus queued slots
        let settings = self.calculation_executor_settings();
        if settings.capacity() < self.sharding.shard_count as usize {
            return Err(ConfigurationError::validation_error(format!(
                "executor capacity {} cannot hold {} shard tasks",
                settings.capacity(),
                self.sharding.shard_count
            )));
        }

        if self.aggregation.progress_log_interval == 0 {
            return Err(ConfigurationError::invalid_value(
                "aggregation.progress_log_interval",
                "0",
                "progress log interval must be greater than 0",
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                "0",
                "pool size must be greater than 0",
            ));
        }

        for (field, value) in [
            ("database.shard_table_prefix", &self.database.shard_table_prefix),
            (
                "database.staging_table_prefix",
                &self.database.staging_table_prefix,
            ),
            ("database.consolidated_table", &self.database.consolidated_table),
        ] {
            if value.is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    field,
                    "database configuration",
                ));
            }
        }

        self.batch.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let config = EngineConfig::default();
        assert_eq!(config.sharding.shard_count, 16);
        assert_eq!(config.pipeline.failure_abort_threshold, 3);
        assert_eq!(config.pipeline.pipeline_timeout(), Duration::from_secs(1800));
        assert_eq!(config.pipeline.summary_timeout(), Duration::from_secs(300));
        assert_eq!(config.aggregation.chunk_pause(), Duration::from_millis(10));
        assert!(config.aggregation.replace_existing);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn calculation_executor_is_bounded_by_shard_count() {
        let config = EngineConfig::default();
        let settings = config.calculation_executor_settings();
        assert_eq!(settings.max_parallelism, 16);
        assert!(settings.core_parallelism <= 16);
        assert!(settings.queue_capacity >= 10);
        assert_eq!(
            settings.queue_capacity,
            10usize.max(16 - settings.core_parallelism)
        );
        assert_eq!(settings.name, "daily-income-worker");
    }

    #[test]
    fn explicit_executor_overrides_win() {
        let mut config = EngineConfig::default();
        config.executor.core_parallelism = Some(2);
        config.executor.max_parallelism = Some(4);
        config.executor.queue_capacity = Some(12);
        let settings = config.calculation_executor_settings();
        assert_eq!(settings.core_parallelism, 2);
        assert_eq!(settings.max_parallelism, 4);
        assert_eq!(settings.queue_capacity, 12);
        assert_eq!(settings.capacity(), 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn summary_executor_is_sized_to_shard_count() {
        let mut config = EngineConfig::default();
        config.sharding.shard_count = 4;
        let settings = config.summary_executor_settings();
        assert_eq!(settings.max_parallelism, 4);
        assert_eq!(settings.core_parallelism, 4);
        assert_eq!(settings.shutdown_grace, Duration::from_secs(30));
        assert_eq!(settings.name, "summary-worker");
    }

    #[test]
    fn undersized_executor_is_rejected() {
        let mut config = EngineConfig::default();
        config.executor.max_parallelism = Some(2);
        config.executor.core_parallelism = Some(2);
        config.executor.queue_capacity = Some(3);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cannot hold 16 shard tasks"));
    }

    #[test]
    fn parallelism_above_shard_count_is_rejected() {
        let mut config = EngineConfig::default();
        config.executor.max_parallelism = Some(64);
        config.executor.core_parallelism = Some(64);
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::InvalidValue { ref field, .. } if field == "executor.core_parallelism"
        ));

        config.executor.core_parallelism = Some(8);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("executor.max_parallelism"));
        assert!(err.to_string().contains("shard count (16)"));

        config.executor.max_parallelism = Some(16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_shard_count_is_rejected() {
        let mut config = EngineConfig::default();
        config.sharding.shard_count = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn unordered_batch_table_is_rejected() {
        let mut sizing = BatchSizingConfig::default();
        sizing.default_size = 50;
        assert!(sizing.validate().is_err());

        let mut sizing = BatchSizingConfig::default();
        sizing.medium = 200_000;
        assert!(sizing.validate().is_err());

        let mut sizing = BatchSizingConfig::default();
        sizing.large_batch_size = 0;
        assert!(matches!(
            sizing.validate(),
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn explicit_database_url_wins() {
        let database = DatabaseConfig {
            url: Some("postgres://localhost/income".to_string()),
            ..DatabaseConfig::default()
        };
        assert_eq!(
            database.database_url().unwrap(),
            "postgres://localhost/income"
        );
    }
}
