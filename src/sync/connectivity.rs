//! Connectivity monitoring
//!
//! Tracks whether the remote is reachable and drives the synchronizer:
//! regaining connectivity runs one auto cycle (and optionally a pull), and
//! a periodic timer runs further auto cycles while online. State changes
//! are published on a `watch` channel.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};
use url::Url;

use super::remote::RemoteService;
use super::synchronizer::{SyncTrigger, Synchronizer};
use crate::error::{AppError, Result};
use crate::metrics::{CONNECTIVITY_ONLINE, CONNECTIVITY_TRANSITIONS_TOTAL};

/// Reachability of the remote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Online,
    Offline,
}

impl ConnectivityState {
    pub fn from_reachable(reachable: bool) -> Self {
        if reachable { Self::Online } else { Self::Offline }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

/// Source of the current connectivity signal
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Probe that issues a GET against the remote's health endpoint
pub struct HttpProbe {
    http_client: reqwest::Client,
    url: Url,
}

impl HttpProbe {
    /// # Arguments
    /// * `base_url` - Remote API root
    /// * `probe_path` - Path under the root, e.g. "/health"
    /// * `timeout` - Per-probe timeout
    pub fn new(base_url: &str, probe_path: &str, timeout: Duration) -> Result<Self> {
        let mut url = Url::parse(base_url)
            .map_err(|e| AppError::Config(format!("invalid remote base url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config(format!("remote base url {} cannot be a base", base_url)))?
            .pop_if_empty()
            .extend(probe_path.split('/').filter(|segment| !segment.is_empty()));

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http_client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn is_reachable(&self) -> bool {
        match self.http_client.get(self.url.clone()).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "Connectivity probe failed");
                false
            }
        }
    }
}

/// Monitor timing
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub probe_interval: Duration,
    /// Periodic auto cycle while online; `None` disables
    pub auto_sync_interval: Option<Duration>,
    /// Pull remote state after the reconnect cycle
    pub pull_on_reconnect: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(15),
            auto_sync_interval: Some(Duration::from_secs(30 * 60)),
            pull_on_reconnect: true,
        }
    }
}

/// Watches connectivity and triggers sync cycles
pub struct ConnectivityMonitor<R: RemoteService, P: ConnectivityProbe> {
    sync: Arc<Synchronizer<R>>,
    probe: P,
    config: MonitorConfig,
    state: watch::Sender<ConnectivityState>,
}

impl<R: RemoteService + 'static, P: ConnectivityProbe> ConnectivityMonitor<R, P> {
    /// Create a monitor; it reports offline until the first probe
    pub fn new(sync: Arc<Synchronizer<R>>, probe: P, config: MonitorConfig) -> Self {
        let (state, _) = watch::channel(ConnectivityState::Offline);
        sync.set_online(false);
        CONNECTIVITY_ONLINE.set(0);

        Self {
            sync,
            probe,
            config,
            state,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    /// Receive every state change
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }

    /// Read the initial state from the probe without triggering a cycle
    pub async fn initialize(&self) -> ConnectivityState {
        let state = ConnectivityState::from_reachable(self.probe.is_reachable().await);
        self.publish(state);
        tracing::info!(state = state.as_str(), "Initial connectivity state");
        state
    }

    /// Probe once and apply the result
    ///
    /// # Returns
    /// The new state if it changed
    pub async fn check(&self) -> Option<ConnectivityState> {
        let reachable = self.probe.is_reachable().await;
        self.report(reachable).await
    }

    /// Apply an externally observed connectivity signal
    ///
    /// Going online starts one auto cycle (plus a pull if configured) in
    /// the background; going offline only updates state, which stops a
    /// running cycle before its next item.
    pub async fn report(&self, reachable: bool) -> Option<ConnectivityState> {
        let next = ConnectivityState::from_reachable(reachable);
        let previous = self.state();
        if previous == next {
            return None;
        }

        self.publish(next);
        CONNECTIVITY_TRANSITIONS_TOTAL
            .with_label_values(&[next.as_str()])
            .inc();
        tracing::info!(
            from = previous.as_str(),
            to = next.as_str(),
            "Connectivity changed"
        );

        if next == ConnectivityState::Online {
            self.on_reconnect();
        }

        Some(next)
    }

    fn publish(&self, state: ConnectivityState) {
        self.sync.set_online(state == ConnectivityState::Online);
        CONNECTIVITY_ONLINE.set(i64::from(state == ConnectivityState::Online));
        self.state.send_replace(state);
    }

    fn on_reconnect(&self) {
        let sync = self.sync.clone();
        let pull = self.config.pull_on_reconnect;

        tokio::spawn(async move {
            let result = sync.sync_pending(SyncTrigger::Auto).await;
            if result.success {
                tracing::info!(synced = result.synced_count, "Reconnect sync completed");
            } else {
                tracing::warn!(
                    synced = result.synced_count,
                    failed = result.failed_count,
                    errors = ?result.errors,
                    "Reconnect sync completed with errors"
                );
            }

            if pull {
                let summary = sync.fetch_from_server().await;
                if !summary.errors.is_empty() {
                    tracing::warn!(errors = ?summary.errors, "Reconnect pull completed with errors");
                }
            }
        });
    }

    fn periodic_sync(&self) {
        if self.state() != ConnectivityState::Online {
            return;
        }

        let sync = self.sync.clone();
        tokio::spawn(async move {
            let result = sync.sync_pending(SyncTrigger::Auto).await;
            if result.success {
                tracing::debug!(synced = result.synced_count, "Periodic sync completed");
            } else if result.synced_count == 0 && result.failed_count == 0 {
                tracing::debug!(errors = ?result.errors, "Periodic sync skipped");
            } else {
                tracing::warn!(
                    synced = result.synced_count,
                    failed = result.failed_count,
                    "Periodic sync completed with errors"
                );
            }
        });
    }

    /// Run the monitor event loop until `shutdown` turns true or closes
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut probe_timer = tokio::time::interval(self.config.probe_interval);
        probe_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut auto_timer = self.config.auto_sync_interval.map(|period| {
            let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });

        tracing::info!(
            probe_interval_secs = self.config.probe_interval.as_secs(),
            auto_sync_interval_secs = self.config.auto_sync_interval.map(|d| d.as_secs()),
            "Connectivity monitor started"
        );

        loop {
            tokio::select! {
                _ = probe_timer.tick() => {
                    self.check().await;
                }
                _ = next_tick(&mut auto_timer) => {
                    self.periodic_sync();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Connectivity monitor stopped");
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Database, Tea};
    use crate::sync::remote::MockRemoteService;
    use crate::sync::synchronizer::SyncConfig;

    fn quiet_config() -> MonitorConfig {
        MonitorConfig {
            probe_interval: Duration::from_millis(10),
            auto_sync_interval: None,
            pull_on_reconnect: false,
        }
    }

    async fn synchronizer(remote: MockRemoteService) -> (Arc<Synchronizer<MockRemoteService>>, Arc<Database>) {
        let db = Arc::new(Database::connect_in_memory().await.unwrap());
        let config = SyncConfig {
            max_retries: 3,
            retry_delay: Duration::from_millis(1),
        };
        (Arc::new(Synchronizer::new(db.clone(), Arc::new(remote), config)), db)
    }

    async fn wait_for_drain(db: &Database) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while db.pending_count().await.unwrap() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    fn probe(reachable: bool) -> MockConnectivityProbe {
        let mut probe = MockConnectivityProbe::new();
        probe.expect_is_reachable().returning(move || reachable);
        probe
    }

    #[tokio::test]
    async fn reconnect_runs_exactly_one_cycle() {
        let mut remote = MockRemoteService::new();
        remote.expect_update().times(1).returning(|_| Ok(()));
        let (sync, db) = synchronizer(remote).await;

        let mut tea = Tea::new("Sencha");
        tea.id = "tea_1".to_string();
        db.put(tea).await.unwrap();

        let monitor = ConnectivityMonitor::new(sync.clone(), probe(true), quiet_config());
        assert_eq!(monitor.state(), ConnectivityState::Offline);
        assert!(!sync.is_online());

        assert_eq!(monitor.report(true).await, Some(ConnectivityState::Online));
        assert!(sync.is_online());
        wait_for_drain(&db).await;

        // Already online: no transition, no second cycle
        assert_eq!(monitor.report(true).await, None);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn report_returns_before_the_reconnect_cycle_finishes() {
        let mut remote = MockRemoteService::new();
        remote.expect_update().returning(|_| {
            Err(AppError::Network("update teas failed: HTTP 503".to_string()))
        });
        let db = Arc::new(Database::connect_in_memory().await.unwrap());
        let config = SyncConfig {
            max_retries: 3,
            retry_delay: Duration::from_secs(3),
        };
        let sync = Arc::new(Synchronizer::new(db.clone(), Arc::new(remote), config));

        let mut tea = Tea::new("Sencha");
        tea.id = "tea_1".to_string();
        db.put(tea).await.unwrap();

        let monitor = ConnectivityMonitor::new(sync.clone(), probe(true), quiet_config());
        tokio::time::timeout(Duration::from_millis(500), monitor.report(true))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sync.is_syncing());

        // Losing connectivity is still seen while the cycle backs off
        assert_eq!(
            tokio::time::timeout(Duration::from_millis(500), monitor.report(false))
                .await
                .unwrap(),
            Some(ConnectivityState::Offline)
        );
        assert!(!sync.is_online());
    }

    #[tokio::test]
    async fn going_offline_only_updates_state() {
        let (sync, _db) = synchronizer(MockRemoteService::new()).await;
        let monitor = ConnectivityMonitor::new(sync.clone(), probe(true), quiet_config());
        monitor.initialize().await;
        let mut changes = monitor.subscribe();

        assert_eq!(monitor.report(false).await, Some(ConnectivityState::Offline));
        assert!(!sync.is_online());
        assert!(changes.has_changed().unwrap());
        assert_eq!(*changes.borrow_and_update(), ConnectivityState::Offline);
    }

    #[tokio::test]
    async fn initialize_does_not_trigger_a_cycle() {
        let (sync, _db) = synchronizer(MockRemoteService::new()).await;
        let monitor = ConnectivityMonitor::new(sync.clone(), probe(true), quiet_config());

        assert_eq!(monitor.initialize().await, ConnectivityState::Online);
        assert!(sync.is_online());
    }

    #[tokio::test]
    async fn reconnect_pulls_when_configured() {
        let (listed_tx, mut listed_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut remote = MockRemoteService::new();
        remote.expect_list().times(3).returning(move |resource| {
            let _ = listed_tx.send(resource);
            Ok(Vec::new())
        });
        let (sync, _db) = synchronizer(remote).await;

        let config = MonitorConfig {
            pull_on_reconnect: true,
            ..quiet_config()
        };
        let monitor = ConnectivityMonitor::new(sync, probe(true), config);
        monitor.report(true).await;

        for _ in 0..3 {
            tokio::time::timeout(Duration::from_secs(5), listed_rx.recv())
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn run_loop_probes_and_stops_on_shutdown() {
        let (sync, _db) = synchronizer(MockRemoteService::new()).await;
        let monitor = Arc::new(ConnectivityMonitor::new(sync, probe(true), quiet_config()));
        let mut changes = monitor.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn({
            let monitor = monitor.clone();
            async move { monitor.run(shutdown_rx).await }
        });

        tokio::time::timeout(Duration::from_secs(5), changes.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(monitor.state(), ConnectivityState::Online);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
