//! Teasync binary entry point

use teasync::{AppState, config};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Load configuration from file and environment
/// 2. Initialize tracing/logging from the `logging` section
/// 3. Initialize metrics and AppState
/// 4. Start background tasks (connectivity monitor, expiry sweep)
/// 5. Wait for Ctrl-C and stop the monitor
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration
    let config = config::AppConfig::load()?;

    // 2. Initialize tracing/logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.default_filter().into());
    if config.logging.is_json() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting Teasync...");
    tracing::info!(
        database = %config.database.path.display(),
        remote = %config.remote.base_url,
        log_level = %config.logging.level,
        "Configuration loaded"
    );

    // 3. Initialize metrics and application state
    teasync::metrics::init_metrics();
    let state = AppState::new(config).await?;

    // 4. Start background tasks
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_task = spawn_monitor_task(state.clone(), shutdown_rx);
    spawn_sweep_task(state.clone());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    shutdown_tx.send(true)?;
    monitor_task.await?;

    let pending = state.db.pending_count().await?;
    tracing::info!(pending, "Teasync stopped");

    Ok(())
}

/// Spawn the connectivity monitor loop
fn spawn_monitor_task(
    state: AppState,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let handle = tokio::spawn(async move {
        state.monitor.initialize().await;
        state.monitor.run(shutdown).await;
    });

    tracing::info!("Connectivity monitor task spawned");
    handle
}

/// Spawn background expiry sweep task
fn spawn_sweep_task(state: AppState) {
    tokio::spawn(async move {
        let interval_secs = state.config.cache.sweep_interval_seconds;
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));

        // The startup sweep already ran in AppState::new
        interval.tick().await;

        loop {
            interval.tick().await;

            match state.db.expire_sweep().await {
                Ok(report) => {
                    teasync::metrics::CACHE_SWEPT_LAST
                        .with_label_values(&["cache"])
                        .set(report.cache_entries as i64);
                    teasync::metrics::CACHE_SWEPT_LAST
                        .with_label_values(&["media"])
                        .set(report.media_entries as i64);
                    tracing::info!(
                        cache_entries = report.cache_entries,
                        media_entries = report.media_entries,
                        "Expiry sweep completed"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "Expiry sweep failed");
                }
            }
        }
    });

    tracing::info!("Expiry sweep task spawned");
}
