//! Configuration management for the Redlog host
//!
//! Values are layered, lowest priority first: `conf/redlog.yml`, environment
//! variables (`REDLOG__DB__URL` sets `db.url`), then command line overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use config::{Config, ConfigError, Environment};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};

use redlog_core::{IngestConfig, RateLimitConfig};
use redlog_persistence::StorageMode;

use crate::startup::LoggingConfig;

pub const DEFAULT_CONFIG_FILE: &str = "conf/redlog.yml";

pub const ENV_PREFIX: &str = "REDLOG";

pub const STORAGE_MODE_PROPERTY: &str = "storage.mode";
pub const STORAGE_DATA_DIR_PROPERTY: &str = "storage.data_dir";
pub const DB_URL_PROPERTY: &str = "db.url";
pub const DB_MAX_CONNECTIONS_PROPERTY: &str = "db.max_connections";

const DEFAULT_DATA_DIR: &str = "data/redlog";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

/// Values given on the command line, applied over every other source
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub db_url: Option<String>,
    pub storage_mode: Option<String>,
    pub data_dir: Option<PathBuf>,
}

/// Application configuration loaded from the config file and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Load from the default config file location
    pub fn new(overrides: &ConfigOverrides) -> anyhow::Result<Self> {
        Self::load(Path::new(DEFAULT_CONFIG_FILE), overrides)
    }

    /// Load from `file` (optional on disk), the environment and `overrides`
    pub fn load(file: &Path, overrides: &ConfigOverrides) -> anyhow::Result<Self> {
        let mut config_builder = Config::builder()
            .add_source(config::File::from(file).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            );

        if let Some(v) = &overrides.db_url {
            config_builder = config_builder
                .set_override(DB_URL_PROPERTY, v.as_str())
                .context("failed to set database URL override")?;
        }
        if let Some(v) = &overrides.storage_mode {
            config_builder = config_builder
                .set_override(STORAGE_MODE_PROPERTY, v.as_str())
                .context("failed to set storage mode override")?;
        }
        if let Some(v) = &overrides.data_dir {
            config_builder = config_builder
                .set_override(STORAGE_DATA_DIR_PROPERTY, v.to_string_lossy().into_owned())
                .context("failed to set data directory override")?;
        }

        let config = config_builder
            .build()
            .with_context(|| format!("failed to build configuration from {}", file.display()))?;

        Ok(Configuration { config })
    }

    /// Non-negative integer setting. A missing key yields `default`; a
    /// negative, oversized or non-numeric value is an error naming the key.
    fn get_unsigned<T>(&self, key: &str, default: T) -> anyhow::Result<T>
    where
        T: TryFrom<i64>,
    {
        match self.config.get_int(key) {
            Ok(value) => T::try_from(value).map_err(|_| {
                anyhow::anyhow!("{} must be a non-negative integer, got {}", key, value)
            }),
            Err(ConfigError::NotFound(_)) => Ok(default),
            Err(e) => Err(e).with_context(|| format!("invalid value for {}", key)),
        }
    }

    // ========================================================================
    // Storage Configuration
    // ========================================================================

    pub fn storage_mode(&self) -> anyhow::Result<StorageMode> {
        self.config
            .get_string(STORAGE_MODE_PROPERTY)
            .unwrap_or(StorageMode::StandaloneEmbedded.to_string())
            .parse::<StorageMode>()
            .map_err(anyhow::Error::msg)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.config
            .get_string(STORAGE_DATA_DIR_PROPERTY)
            .map(PathBuf::from)
            .unwrap_or(PathBuf::from(DEFAULT_DATA_DIR))
    }

    // ========================================================================
    // Database Configuration
    // ========================================================================

    pub fn db_url(&self) -> Option<String> {
        self.config
            .get_string(DB_URL_PROPERTY)
            .ok()
            .filter(|url| !url.is_empty())
    }

    pub fn db_max_connections(&self) -> anyhow::Result<u32> {
        self.get_unsigned(DB_MAX_CONNECTIONS_PROPERTY, DEFAULT_DB_MAX_CONNECTIONS)
    }

    pub async fn database_connection(&self) -> anyhow::Result<DatabaseConnection> {
        let url = self
            .db_url()
            .context("db.url is required when storage.mode is external_db")?;
        let max_connections = self.db_max_connections()?;
        let connect_timeout: u64 = self.get_unsigned("db.connect_timeout_seconds", 30)?;
        let sqlx_logging = self.config.get_bool("db.sqlx_logging").unwrap_or(false);

        let mut opt = ConnectOptions::new(url);
        opt.max_connections(max_connections)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(connect_timeout))
            .sqlx_logging(sqlx_logging);

        tracing::info!(
            max_connections,
            connect_timeout,
            sqlx_logging,
            "Database connection pool configured"
        );

        Ok(Database::connect(opt).await?)
    }

    // ========================================================================
    // Ingestion Configuration
    // ========================================================================

    pub fn ingest_enabled(&self) -> bool {
        self.config.get_bool("ingest.enabled").unwrap_or(true)
    }

    pub fn ratelimit_enabled(&self) -> bool {
        self.config
            .get_bool("ingest.rate_limit_enabled")
            .unwrap_or(true)
    }

    pub fn ratelimit_max_requests(&self) -> anyhow::Result<u32> {
        self.get_unsigned("ingest.max_requests", 60)
    }

    pub fn ratelimit_window_seconds(&self) -> anyhow::Result<u64> {
        self.get_unsigned("ingest.window_seconds", 60)
    }

    pub fn ingest_config(&self) -> anyhow::Result<IngestConfig> {
        Ok(IngestConfig {
            enabled: self.ingest_enabled(),
            rate_limit: RateLimitConfig {
                max_requests: self.ratelimit_max_requests()?,
                window: Duration::from_secs(self.ratelimit_window_seconds()?),
                enabled: self.ratelimit_enabled(),
            },
        })
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::from_config(
            self.config.get_string("log.dir").ok(),
            self.config.get_bool("log.console_enabled").unwrap_or(true),
            self.config.get_bool("log.file_enabled").unwrap_or(false),
            self.config
                .get_string("log.level")
                .unwrap_or("info".to_string()),
        )
    }
}
