//! Teasync - offline write journal and synchronizer for a tea garden journal
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Connectivity Monitor                        │
//! │  - Online/offline tracking (watch channel)                  │
//! │  - Reconnect and periodic sync triggers                     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Synchronizer                            │
//! │  - Drains the mutation queue into the remote API            │
//! │  - Retry with linear backoff                                │
//! │  - Last-writer-wins pull                                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx): entities, sync queue, cache, media        │
//! │  - Backup export/import                                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `data`: Entity store, mutation queue and expiring cache
//! - `storage`: Media blob cache and backup
//! - `sync`: Remote client, synchronizer and connectivity monitor
//! - `config`: Configuration management
//! - `metrics`: Prometheus instruments
//! - `error`: Error types

pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod storage;
pub mod sync;

use serde::Serialize;
use std::sync::Arc;

/// Application state shared by the background tasks
///
/// Cheap to clone; every component is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Local store
    pub db: Arc<data::Database>,

    /// Media blob cache
    pub media: Arc<storage::MediaCache>,

    /// Backup export/import
    pub backup: Arc<storage::BackupService>,

    /// Queue drainer and puller
    pub sync: Arc<sync::Synchronizer<sync::HttpRemote>>,

    /// Connectivity tracking
    pub monitor: Arc<sync::ConnectivityMonitor<sync::HttpRemote, sync::HttpProbe>>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Recover queue items left mid-sync and sweep expired cache rows
    /// 3. Build the remote client and synchronizer
    /// 4. Build the connectivity monitor
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Connect to SQLite database
        let db = Arc::new(data::Database::connect(&config.database.path).await?);
        tracing::info!(path = %config.database.path.display(), "Database connected");

        // 2. Startup maintenance
        db.recover_interrupted().await?;
        let swept = db.expire_sweep().await?;
        tracing::info!(
            cache_entries = swept.cache_entries,
            media_entries = swept.media_entries,
            "Startup expiry sweep completed"
        );

        let media = storage::MediaCache::with_ttl(db.clone(), config.cache.media_ttl());
        let backup = storage::BackupService::new(db.clone());

        // 3. Remote client and synchronizer
        let remote = sync::HttpRemote::new(
            &config.remote.base_url,
            config.remote.timeout(),
            config.remote.auth_token.clone(),
        )?;
        let synchronizer = Arc::new(sync::Synchronizer::new(
            db.clone(),
            Arc::new(remote),
            config.sync.to_sync_config(),
        ));
        if remote_is_plain_http(&config.remote.base_url) {
            tracing::warn!(
                base_url = %config.remote.base_url,
                "Remote base URL is not using https"
            );
        }
        tracing::info!(base_url = %config.remote.base_url, "Synchronizer initialized");

        // 4. Connectivity monitor
        let probe = sync::HttpProbe::new(
            &config.remote.base_url,
            &config.connectivity.probe_path,
            config.remote.timeout(),
        )?;
        let monitor = sync::ConnectivityMonitor::new(
            synchronizer.clone(),
            probe,
            sync::MonitorConfig {
                probe_interval: config.connectivity.probe_interval(),
                auto_sync_interval: config.sync.auto_sync_interval(),
                pull_on_reconnect: config.sync.pull_on_reconnect,
            },
        );

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            db,
            media: Arc::new(media),
            backup: Arc::new(backup),
            sync: synchronizer,
            monitor: Arc::new(monitor),
        })
    }

    /// Cache a value with the configured default TTL
    pub async fn cache_put<T: Serialize>(&self, key: &str, data: &T) -> Result<(), error::AppError> {
        self.db
            .cache_set(key, data, self.config.cache.default_ttl())
            .await
    }
}

fn remote_is_plain_http(base_url: &str) -> bool {
    url::Url::parse(base_url).is_ok_and(|url| url.scheme() == "http")
}
