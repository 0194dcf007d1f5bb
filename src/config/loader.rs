//! Configuration Loader
//!
//! Environment-aware loading: a base TOML file, an optional per-environment
//! override file, then `DAILY_INCOME__*` environment variables, merged with the
//! `config` crate and deserialized into [`EngineConfig`].

use super::error::{ConfigResult, ConfigurationError};
use super::EngineConfig;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_CONFIG_FILE: &str = "daily-income.toml";
const ENVIRONMENTS_DIR: &str = "environments";
const ENV_PREFIX: &str = "DAILY_INCOME";
const ENV_SEPARATOR: &str = "__";

/// Loaded configuration plus the context it was loaded from
#[derive(Debug)]
pub struct ConfigManager {
    config: EngineConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    ///
    /// Useful for testing without modifying global environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::load_and_merge_config(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = %environment,
            shard_count = config.sharding.shard_count,
            failure_abort_threshold = config.pipeline.failure_abort_threshold,
            pipeline_timeout_seconds = config.pipeline.pipeline_timeout_seconds,
            "⚙️ CONFIG: Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Load a single file, with environment variable overrides but no
    /// environment-specific merge
    pub fn load_file(path: &Path) -> ConfigResult<EngineConfig> {
        if !path.is_file() {
            return Err(ConfigurationError::file_read_error(
                path.display().to_string(),
                "not a regular file",
            ));
        }

        let config: EngineConfig = config::Config::builder()
            .add_source(config::File::from(path).required(true))
            .add_source(Self::environment_source())
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;

        config.validate()?;
        Ok(config)
    }

    /// Wrap an in-memory configuration, validating it first
    pub fn from_config(config: EngineConfig, environment: &str) -> ConfigResult<ConfigManager> {
        config.validate()?;
        Ok(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from("config"),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Configuration as JSON with the database URL masked
    pub fn debug_config(&self) -> serde_json::Value {
        let mut value = serde_json::json!(self.config);
        if let Some(url) = value
            .get_mut("database")
            .and_then(|db| db.get_mut("url"))
            .filter(|url| !url.is_null())
        {
            *url = serde_json::Value::String("[MASKED]".to_string());
        }
        value
    }

    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
    ) -> ConfigResult<EngineConfig> {
        let base_path = config_directory.join(BASE_CONFIG_FILE);
        let env_path = config_directory
            .join(ENVIRONMENTS_DIR)
            .join(format!("{environment}.toml"));

        debug!(
            base = %base_path.display(),
            base_exists = base_path.exists(),
            overrides = %env_path.display(),
            overrides_exist = env_path.exists(),
            "Resolving configuration sources"
        );

        config::Config::builder()
            .add_source(config::File::from(base_path).required(false))
            .add_source(config::File::from(env_path).required(false))
            .add_source(Self::environment_source())
            .build()
            .and_then(|c| c.try_deserialize::<EngineConfig>())
            .map_err(|e| ConfigurationError::environment_config_error(environment, e))
    }

    fn environment_source() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
    }

    /// Detect environment from environment variables
    pub fn detect_environment() -> String {
        env::var("DAILY_INCOME_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }
}
