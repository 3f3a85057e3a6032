//! Configuration loader with layered sources.

use crate::{AppConfig, ConfigValidator};
use conductor_core::ConductorError;
use config::{Config, ConfigError, Environment, File};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "CONDUCTOR";

/// Configuration loader with runtime refresh support.
#[derive(Clone)]
pub struct ConfigLoader {
    config: Arc<RwLock<AppConfig>>,
    config_dir: String,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `config/default.toml` - Default values
    /// 2. `config/{environment}.toml` - Environment-specific overrides
    /// 3. `config/local.toml` - Local overrides
    /// 4. Environment variables with `CONDUCTOR_` prefix and `__` separator
    pub fn new(config_dir: impl Into<String>) -> Result<Self, ConductorError> {
        let config_dir = config_dir.into();
        let config = Self::load_config(&config_dir)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_dir,
        })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> Result<Self, ConductorError> {
        Self::new("./config")
    }

    /// Returns the current configuration.
    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Reloads the configuration from disk.
    pub async fn reload(&self) -> Result<(), ConductorError> {
        let new_config = Self::load_config(&self.config_dir)?;
        let mut config = self.config.write().await;
        *config = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Loads configuration from the specified directory.
    fn load_config(config_dir: &str) -> Result<AppConfig, ConductorError> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let environment = std::env::var(format!("{ENV_PREFIX}_ENVIRONMENT"))
            .unwrap_or_else(|_| "development".to_string());

        info!("Loading configuration for environment: {}", environment);

        let mut builder = Config::builder();

        for name in ["default", environment.as_str(), "local"] {
            let path = format!("{config_dir}/{name}.toml");
            if Path::new(&path).exists() {
                debug!("Loading config from: {}", path);
                builder = builder.add_source(File::with_name(&path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let mut app_config: AppConfig = builder
            .build()
            .and_then(|config| config.try_deserialize::<AppConfig>())
            .map_err(config_error_to_conductor_error)?;
        app_config.app.environment = environment;

        Self::validate_config(&app_config)?;

        Ok(app_config)
    }

    /// Validates the configuration.
    fn validate_config(config: &AppConfig) -> Result<(), ConductorError> {
        ConfigValidator::validate(config).map_err(|errors| {
            let message = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            ConductorError::Configuration(message)
        })
    }
}

fn config_error_to_conductor_error(err: ConfigError) -> ConductorError {
    ConductorError::Configuration(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeRole;
    use conductor_core::telemetry::LogFormat;
    use std::fs;

    #[tokio::test]
    async fn test_missing_directory_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path().join("absent").to_string_lossy()).unwrap();
        let config = loader.get().await;
        assert_eq!(config.worker.concurrency, 3);
        assert_eq!(config.lock.ttl_secs, 660);
    }

    #[tokio::test]
    async fn test_default_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            r#"
role = "worker"

[worker]
id = "worker-a"
concurrency = 5
job_timeout_secs = 60

[lock]
ttl_secs = 90

[observability]
log_format = "json"
"#,
        )
        .unwrap();

        let loader = ConfigLoader::new(dir.path().to_string_lossy()).unwrap();
        let config = loader.get().await;
        assert_eq!(config.role, NodeRole::Worker);
        assert_eq!(config.worker.id, "worker-a");
        assert_eq!(config.worker.concurrency, 5);
        assert_eq!(config.worker.heartbeat_ttl_secs, 30);
        assert_eq!(config.lock.ttl_secs, 90);
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }

    #[tokio::test]
    async fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[lock]\nttl_secs = 10\n",
        )
        .unwrap();

        let err = ConfigLoader::new(dir.path().to_string_lossy())
            .err()
            .expect("validation should fail");
        assert!(matches!(err, ConductorError::Configuration(ref msg) if msg.contains("lock.ttl_secs")));
    }

    #[tokio::test]
    async fn test_reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("default.toml");
        fs::write(&file, "[scheduler]\ninterval_ms = 1000\n").unwrap();

        let loader = ConfigLoader::new(dir.path().to_string_lossy()).unwrap();
        assert_eq!(loader.get().await.scheduler.interval_ms, 1000);

        fs::write(&file, "[scheduler]\ninterval_ms = 2000\n").unwrap();
        loader.reload().await.unwrap();
        assert_eq!(loader.get().await.scheduler.interval_ms, 2000);
    }
}
