//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration files (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AppError;
use crate::sync::SyncConfig;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub remote: RemoteConfig,
    pub sync: SyncSettings,
    pub connectivity: ConnectivityConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Remote API the queue drains into
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the collection API (e.g., "https://api.example.com/v1")
    pub base_url: String,
    /// Per-request timeout in seconds (default: 30)
    pub timeout_seconds: u64,
    /// Optional bearer token
    pub auth_token: Option<String>,
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Sync cycle tuning
#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    /// Attempts before an item is marked failed (default: 3)
    pub max_retries: u32,
    /// Base retry backoff in milliseconds (default: 5000)
    pub retry_delay_ms: u64,
    /// Periodic sync interval while online; 0 disables (default: 1800)
    pub auto_sync_interval_seconds: u64,
    /// Pull remote state after reconnecting (default: true)
    pub pull_on_reconnect: bool,
}

impl SyncSettings {
    pub fn to_sync_config(&self) -> SyncConfig {
        SyncConfig {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn auto_sync_interval(&self) -> Option<Duration> {
        (self.auto_sync_interval_seconds > 0)
            .then(|| Duration::from_secs(self.auto_sync_interval_seconds))
    }
}

/// Reachability probing
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectivityConfig {
    /// Path probed on the remote (default: "/health")
    pub probe_path: String,
    /// Seconds between probes (default: 15)
    pub probe_interval_seconds: u64,
}

impl ConnectivityConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_seconds)
    }
}

/// Cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Default TTL for cache entries; unset never expires
    pub default_ttl_seconds: Option<u64>,
    /// Media TTL in seconds (default: 604800 = 7 days)
    pub media_ttl_seconds: u64,
    /// Expiry sweep interval in seconds (default: 3600)
    pub sweep_interval_seconds: u64,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_seconds.map(Duration::from_secs)
    }

    pub fn media_ttl(&self) -> Duration {
        Duration::from_secs(self.media_ttl_seconds)
    }
}

/// Logging configuration
///
/// Applied by the binary when it installs the tracing subscriber.
/// `RUST_LOG`, when set, replaces the level filter.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub fn default_filter(&self) -> String {
        format!("teasync={}", self.level)
    }

    pub fn is_json(&self) -> bool {
        self.format == "json"
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (TEASYNC_*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, AppError> {
        Self::load_from(Path::new("config"))
    }

    /// Load configuration with `default` and `local` files read from `dir`
    pub fn load_from(dir: &Path) -> Result<Self, AppError> {
        use config::{Config, Environment, File};

        let default_file = dir.join("default");
        let local_file = dir.join("local");

        let config = Config::builder()
            // Start with default values
            .set_default("database.path", "data/teasync.db")?
            .set_default("remote.timeout_seconds", 30)?
            .set_default("sync.max_retries", 3)?
            .set_default("sync.retry_delay_ms", 5000)?
            .set_default("sync.auto_sync_interval_seconds", 1800)?
            .set_default("sync.pull_on_reconnect", true)?
            .set_default("connectivity.probe_path", "/health")?
            .set_default("connectivity.probe_interval_seconds", 15)?
            .set_default("cache.media_ttl_seconds", 604800)?
            .set_default("cache.sweep_interval_seconds", 3600)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name(&default_file.to_string_lossy()).required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name(&local_file.to_string_lossy()).required(false))
            // Load from environment variables (TEASYNC_*)
            .add_source(
                Environment::with_prefix("TEASYNC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), AppError> {
        let base_url = url::Url::parse(&self.remote.base_url).map_err(|e| {
            AppError::Config(format!("remote.base_url is not a valid URL: {}", e))
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(AppError::Config(
                "remote.base_url must use http or https".to_string(),
            ));
        }

        if self.remote.timeout_seconds == 0 {
            return Err(AppError::Config(
                "remote.timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.sync.max_retries == 0 {
            return Err(AppError::Config(
                "sync.max_retries must be greater than 0".to_string(),
            ));
        }

        if self.connectivity.probe_interval_seconds == 0 {
            return Err(AppError::Config(
                "connectivity.probe_interval_seconds must be greater than 0".to_string(),
            ));
        }

        if self.cache.sweep_interval_seconds == 0 {
            return Err(AppError::Config(
                "cache.sweep_interval_seconds must be greater than 0".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(AppError::Config(
                "logging.format must be \"pretty\" or \"json\"".to_string(),
            ));
        }
        if !matches!(
            self.logging.level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(AppError::Config(format!(
                "logging.level is not a known level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }
}
