//! Process-wide configuration for the store, the engine and the pipeline

use std::time::Duration;

use core_config::{ConfigError, FromEnv, env_or_default, env_parse};

/// Pipeline tuning shared by every request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorDbConfig {
    /// Maximum number of vectors read to train an index
    pub training_sample_cap: usize,
    /// Number of vectors encoded per reindex page
    pub reindex_page_size: usize,
    pub default_k: u32,
    pub default_n_probe: u32,
}

impl VectorDbConfig {
    pub fn with_training_sample_cap(mut self, cap: usize) -> Self {
        self.training_sample_cap = cap;
        self
    }

    pub fn with_reindex_page_size(mut self, page_size: usize) -> Self {
        self.reindex_page_size = page_size;
        self
    }
}

impl Default for VectorDbConfig {
    fn default() -> Self {
        Self {
            training_sample_cap: 100_000,
            reindex_page_size: 10_000,
            default_k: 100,
            default_n_probe: 4,
        }
    }
}

impl FromEnv for VectorDbConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            training_sample_cap: env_parse(
                "TARANIS_TRAINING_SAMPLE_CAP",
                defaults.training_sample_cap,
            )?,
            reindex_page_size: env_parse("TARANIS_REINDEX_PAGE_SIZE", defaults.reindex_page_size)?,
            default_k: env_parse("TARANIS_DEFAULT_K", defaults.default_k)?,
            default_n_probe: env_parse("TARANIS_DEFAULT_N_PROBE", defaults.default_n_probe)?,
        };

        if config.training_sample_cap == 0 || config.reindex_page_size == 0 {
            return Err(ConfigError::ParseError {
                key: "TARANIS_TRAINING_SAMPLE_CAP/TARANIS_REINDEX_PAGE_SIZE".to_string(),
                details: "must be greater than zero".to_string(),
            });
        }
        Ok(config)
    }
}

/// Connection settings for the index engine's Redis cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound for a single engine call
    pub timeout_ms: u64,
    pub max_reconnects: u32,
    pub reconnect_interval_ms: u64,
    /// Namespace for every key the engine writes
    pub key_prefix: String,
}

impl EngineConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            timeout_ms: 3000,
            max_reconnects: 10,
            reconnect_interval_ms: 1000,
            key_prefix: "taranis".to_string(),
        }
    }
}

impl FromEnv for EngineConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            host: env_or_default("ENGINE_HOST", &defaults.host),
            port: env_parse("ENGINE_PORT", defaults.port)?,
            timeout_ms: env_parse("ENGINE_TIMEOUT_MS", defaults.timeout_ms)?,
            max_reconnects: env_parse("ENGINE_MAX_RECONNECTS", defaults.max_reconnects)?,
            reconnect_interval_ms: env_parse(
                "ENGINE_RECONNECT_INTERVAL_MS",
                defaults.reconnect_interval_ms,
            )?,
            key_prefix: env_or_default("ENGINE_KEY_PREFIX", &defaults.key_prefix),
        })
    }
}

/// MongoDB document store settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MongoStoreConfig {
    /// Format: mongodb://[username:password@]host[:port][/database][?options]
    pub url: String,
    pub database: String,
    /// Optional application name for server logs
    pub app_name: Option<String>,
    pub max_pool_size: u32,
    pub min_pool_size: u32,
    pub connect_timeout_secs: u64,
    pub server_selection_timeout_secs: u64,
}

impl MongoStoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }
}

impl Default for MongoStoreConfig {
    fn default() -> Self {
        Self {
            url: "mongodb://localhost:27017".to_string(),
            database: "taranis".to_string(),
            app_name: None,
            max_pool_size: 100,
            min_pool_size: 5,
            connect_timeout_secs: 10,
            server_selection_timeout_secs: 30,
        }
    }
}

/// Environment variables:
/// - `MONGODB_URL` or `MONGO_URL` (required)
/// - `MONGODB_DATABASE` (default: `taranis`)
/// - `MONGODB_APP_NAME` (optional)
/// - `MONGODB_MAX_POOL_SIZE`, `MONGODB_MIN_POOL_SIZE`
/// - `MONGODB_CONNECT_TIMEOUT_SECS`, `MONGODB_SERVER_SELECTION_TIMEOUT_SECS`
impl FromEnv for MongoStoreConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var("MONGODB_URL")
            .or_else(|_| std::env::var("MONGO_URL"))
            .map_err(|_| ConfigError::MissingEnvVar("MONGODB_URL or MONGO_URL".to_string()))?;

        let defaults = Self::default();
        Ok(Self {
            url,
            database: env_or_default("MONGODB_DATABASE", &defaults.database),
            app_name: std::env::var("MONGODB_APP_NAME").ok(),
            max_pool_size: env_parse("MONGODB_MAX_POOL_SIZE", defaults.max_pool_size)?,
            min_pool_size: env_parse("MONGODB_MIN_POOL_SIZE", defaults.min_pool_size)?,
            connect_timeout_secs: env_parse(
                "MONGODB_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout_secs,
            )?,
            server_selection_timeout_secs: env_parse(
                "MONGODB_SERVER_SELECTION_TIMEOUT_SECS",
                defaults.server_selection_timeout_secs,
            )?,
        })
    }
}
