//! Queue draining and remote pull
//!
//! A sync cycle drains a snapshot of the pending queue into the remote,
//! one item at a time. At most one cycle runs at once; a trigger that
//! arrives while a cycle is active, or while offline, is rejected rather
//! than queued.
//!
//! Pulling remote state ([`Synchronizer::fetch_from_server`]) is separate
//! from the cycle and does not take its guard.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::remote::RemoteService;
use crate::data::{Database, Entity, QueueStatus, Resource, SyncOperation, SyncQueueItem};
use crate::error::{AppError, Result};
use crate::metrics::{
    PULLED_ENTITIES_TOTAL, SYNC_CYCLE_DURATION_SECONDS, SYNC_CYCLES_TOTAL, SYNC_ITEMS_TOTAL,
    SYNC_QUEUE_PENDING,
};

/// Attempts before a queue item is marked failed
pub const MAX_RETRIES: u32 = 3;

/// Base backoff after a failed attempt; multiplied by the attempt number
pub const RETRY_DELAY: Duration = Duration::from_millis(5000);

/// Retry policy for sync cycles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            retry_delay: RETRY_DELAY,
        }
    }
}

impl SyncConfig {
    /// Wait after the `attempts`-th consecutive failure of an item
    pub fn backoff(&self, attempts: u32) -> Duration {
        self.retry_delay.saturating_mul(attempts)
    }
}

/// What started a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Explicit user or operator request
    Manual,
    /// Reconnect or periodic timer
    Auto,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
        }
    }
}

/// Summary of one sync cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    /// No item failed and the cycle was not rejected
    pub success: bool,
    pub synced_count: usize,
    /// Items whose attempt failed this cycle, retried or not
    pub failed_count: usize,
    pub errors: Vec<String>,
}

impl SyncResult {
    fn rejected(reason: &str) -> Self {
        Self {
            success: false,
            synced_count: 0,
            failed_count: 0,
            errors: vec![reason.to_string()],
        }
    }
}

/// Summary of one pull
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullSummary {
    /// Remote copies written locally
    pub applied: usize,
    /// Remote copies not newer than the local one
    pub skipped: usize,
    /// Remote objects that did not decode as the resource's entity
    pub invalid: usize,
    pub errors: Vec<String>,
}

/// Extension point for conflict handling beyond last-writer-wins
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    /// # Returns
    /// Number of conflicts resolved
    async fn resolve(&self, db: &Database) -> Result<usize>;
}

/// Resolver that leaves every conflict to last-writer-wins
pub struct NoopConflictResolver;

#[async_trait]
impl ConflictResolver for NoopConflictResolver {
    async fn resolve(&self, _db: &Database) -> Result<usize> {
        tracing::info!("Conflict resolution requested; no resolver configured");
        Ok(0)
    }
}

/// Clears the in-progress flag when dropped
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum ItemOutcome {
    Synced,
    Retrying(String),
    Failed(String),
    Skipped,
}

/// Drains the local queue into a [`RemoteService`] and pulls remote state
pub struct Synchronizer<R: RemoteService> {
    db: Arc<Database>,
    remote: Arc<R>,
    config: SyncConfig,
    syncing: AtomicBool,
    online: AtomicBool,
    resolver: Box<dyn ConflictResolver>,
}

impl<R: RemoteService> Synchronizer<R> {
    /// Create a synchronizer; it starts online until told otherwise
    pub fn new(db: Arc<Database>, remote: Arc<R>, config: SyncConfig) -> Self {
        Self {
            db,
            remote,
            config,
            syncing: AtomicBool::new(false),
            online: AtomicBool::new(true),
            resolver: Box::new(NoopConflictResolver),
        }
    }

    pub fn with_conflict_resolver(mut self, resolver: Box<dyn ConflictResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    /// Run one sync cycle over the current pending snapshot
    ///
    /// Never returns an error: every failure is counted in the summary.
    /// Items of one entity are sent oldest first; once an entity's item
    /// fails, its later items wait for a later cycle. A permanently failed
    /// item holds back its entity until it is retried or discarded.
    pub async fn sync_pending(&self, trigger: SyncTrigger) -> SyncResult {
        if !self.is_online() {
            tracing::debug!(trigger = trigger.as_str(), "Sync rejected: offline");
            SYNC_CYCLES_TOTAL
                .with_label_values(&[trigger.as_str(), "rejected"])
                .inc();
            return SyncResult::rejected("sync skipped: offline");
        }

        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(trigger = trigger.as_str(), "Sync rejected: already running");
            SYNC_CYCLES_TOTAL
                .with_label_values(&[trigger.as_str(), "rejected"])
                .inc();
            return SyncResult::rejected("sync skipped: a sync cycle is already in progress");
        }
        let _guard = CycleGuard(&self.syncing);

        let timer = SYNC_CYCLE_DURATION_SECONDS
            .with_label_values(&[trigger.as_str()])
            .start_timer();
        let result = self.run_cycle(trigger).await;
        timer.observe_duration();

        let outcome = if result.success { "success" } else { "partial" };
        SYNC_CYCLES_TOTAL
            .with_label_values(&[trigger.as_str(), outcome])
            .inc();

        if let Ok(pending) = self.db.pending_count().await {
            SYNC_QUEUE_PENDING.set(pending);
        }

        result
    }

    async fn run_cycle(&self, trigger: SyncTrigger) -> SyncResult {
        let mut result = SyncResult::default();

        let items = match self.db.list_pending().await {
            Ok(items) => items,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read sync queue");
                result.errors.push(format!("failed to read sync queue: {}", e));
                return result;
            }
        };

        tracing::info!(
            trigger = trigger.as_str(),
            pending = items.len(),
            "Sync cycle started"
        );

        // Failed and in-flight rows still hold their place in entity order
        let outstanding = match self.db.queue_items().await {
            Ok(outstanding) => outstanding,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read sync queue");
                result.errors.push(format!("failed to read sync queue: {}", e));
                return result;
            }
        };
        let mut heads = entity_order(&outstanding);
        let mut blocked: HashSet<(Resource, String)> = HashSet::new();

        for item in &items {
            if !self.is_online() {
                tracing::info!(trigger = trigger.as_str(), "Went offline; stopping sync cycle");
                result.errors.push("sync interrupted: offline".to_string());
                break;
            }

            let key = entity_key(item);

            if blocked.contains(&key) {
                tracing::debug!(item_id = %item.id, "Entity has a failed item this cycle; deferring");
                continue;
            }
            if heads
                .get(&key)
                .and_then(VecDeque::front)
                .is_some_and(|head| head != &item.id)
            {
                tracing::debug!(item_id = %item.id, "Older item for entity still outstanding; deferring");
                continue;
            }

            let outcome = self.process_item(item).await;
            SYNC_ITEMS_TOTAL
                .with_label_values(&[
                    item.resource.as_str(),
                    item.op_type.as_str(),
                    outcome_label(&outcome),
                ])
                .inc();

            match outcome {
                ItemOutcome::Synced => {
                    result.synced_count += 1;
                    if let Some(queue) = heads.get_mut(&key) {
                        queue.pop_front();
                    }
                }
                ItemOutcome::Retrying(error) => {
                    result.failed_count += 1;
                    result.errors.push(error);
                    blocked.insert(key);
                }
                ItemOutcome::Failed(error) => {
                    result.failed_count += 1;
                    result.errors.push(error);
                    blocked.insert(key);
                }
                ItemOutcome::Skipped => {}
            }
        }

        result.success = result.failed_count == 0 && result.errors.is_empty();

        tracing::info!(
            trigger = trigger.as_str(),
            synced = result.synced_count,
            failed = result.failed_count,
            "Sync cycle finished"
        );

        result
    }

    async fn process_item(&self, item: &SyncQueueItem) -> ItemOutcome {
        match self.db.mark_status(&item.id, QueueStatus::Syncing).await {
            Ok(true) => {}
            Ok(false) => {
                // Discarded by an operator after the snapshot was taken
                return ItemOutcome::Skipped;
            }
            Err(e) => {
                tracing::error!(item_id = %item.id, error = %e, "Failed to mark queue item syncing");
                return ItemOutcome::Failed(format!("{}: {}", item.id, e));
            }
        }

        let operation = match item.operation() {
            Ok(operation) => operation,
            Err(e) => {
                tracing::warn!(
                    item_id = %item.id,
                    resource = %item.resource,
                    operation = %item.op_type,
                    error = %e,
                    "Malformed queue item marked failed"
                );
                let message = format!(
                    "{} {} {}: {}",
                    item.op_type, item.resource, item.id, e
                );
                self.store_failure(item, item.retries, &message).await;
                return ItemOutcome::Failed(message);
            }
        };

        match self.dispatch(&operation).await {
            Ok(()) => self.complete(item, &operation).await,
            Err(e) if e.is_retryable() => self.retry_or_fail(item, e).await,
            Err(e) => {
                tracing::warn!(item_id = %item.id, error = %e, "Queue item rejected permanently");
                let message = format!("{} {} {}: {}", item.op_type, item.resource, item.id, e);
                self.store_failure(item, item.retries + 1, &message).await;
                ItemOutcome::Failed(message)
            }
        }
    }

    async fn dispatch(&self, operation: &SyncOperation) -> Result<()> {
        match operation {
            SyncOperation::Create(entity) => self.remote.create(entity).await,
            SyncOperation::Update(entity) => self.remote.update(entity).await,
            SyncOperation::Delete(target) => self.remote.delete(target).await,
        }
    }

    async fn complete(&self, item: &SyncQueueItem, operation: &SyncOperation) -> ItemOutcome {
        if let SyncOperation::Create(entity) = operation {
            if let Err(e) = self.db.mark_confirmed(entity.resource(), entity.id()).await {
                tracing::warn!(item_id = %item.id, error = %e, "Failed to mark entity confirmed");
            }
        }

        match self.db.complete_item(&item.id).await {
            Ok(()) => {
                tracing::debug!(
                    item_id = %item.id,
                    resource = %item.resource,
                    operation = %item.op_type,
                    "Queue item synced"
                );
                ItemOutcome::Synced
            }
            Err(e) => {
                tracing::error!(item_id = %item.id, error = %e, "Failed to remove synced queue item");
                ItemOutcome::Failed(format!("{}: synced but not removed: {}", item.id, e))
            }
        }
    }

    async fn retry_or_fail(&self, item: &SyncQueueItem, error: AppError) -> ItemOutcome {
        let attempts = item.retries + 1;
        let message = format!(
            "{} {} {} (attempt {}/{}): {}",
            item.op_type, item.resource, item.id, attempts, self.config.max_retries, error
        );

        if attempts >= self.config.max_retries {
            tracing::warn!(
                item_id = %item.id,
                resource = %item.resource,
                operation = %item.op_type,
                retries = attempts,
                error = %error,
                "Queue item exhausted retries"
            );
            self.store_failure(item, attempts, &message).await;
            return ItemOutcome::Failed(message);
        }

        tracing::warn!(
            item_id = %item.id,
            resource = %item.resource,
            operation = %item.op_type,
            retries = attempts,
            error = %error,
            "Queue item failed; will retry"
        );

        if let Err(e) = self.db.record_retry(&item.id, attempts, &error.to_string()).await {
            tracing::error!(item_id = %item.id, error = %e, "Failed to record retry");
            return ItemOutcome::Failed(format!("{}: {}", item.id, e));
        }

        tokio::time::sleep(self.config.backoff(attempts)).await;
        ItemOutcome::Retrying(message)
    }

    async fn store_failure(&self, item: &SyncQueueItem, retries: u32, message: &str) {
        if let Err(e) = self.db.mark_failed(&item.id, retries, message).await {
            tracing::error!(item_id = %item.id, error = %e, "Failed to mark queue item failed");
        }
    }

    /// Pull every resource from the remote and merge by `lastModified`
    ///
    /// A remote copy is applied when the entity is absent locally or the
    /// remote `lastModified` is strictly greater; otherwise the local copy
    /// wins. Failures are collected per resource, never returned.
    pub async fn fetch_from_server(&self) -> PullSummary {
        let mut summary = PullSummary::default();

        for resource in Resource::ALL {
            let values = match self.remote.list(resource).await {
                Ok(values) => values,
                Err(e) => {
                    tracing::warn!(%resource, error = %e, "Pull failed");
                    summary.errors.push(format!("pull {}: {}", resource, e));
                    continue;
                }
            };

            for value in values {
                let entity = match Entity::from_value(resource, value) {
                    Ok(entity) => entity,
                    Err(e) => {
                        tracing::warn!(%resource, error = %e, "Ignoring undecodable remote entity");
                        PULLED_ENTITIES_TOTAL
                            .with_label_values(&[resource.as_str(), "invalid"])
                            .inc();
                        summary.invalid += 1;
                        continue;
                    }
                };

                match self.merge_remote(&entity).await {
                    Ok(true) => {
                        PULLED_ENTITIES_TOTAL
                            .with_label_values(&[resource.as_str(), "applied"])
                            .inc();
                        summary.applied += 1;
                    }
                    Ok(false) => {
                        PULLED_ENTITIES_TOTAL
                            .with_label_values(&[resource.as_str(), "skipped"])
                            .inc();
                        summary.skipped += 1;
                    }
                    Err(e) => {
                        tracing::warn!(%resource, id = %entity.id(), error = %e, "Failed to merge remote entity");
                        summary
                            .errors
                            .push(format!("merge {} {}: {}", resource, entity.id(), e));
                    }
                }
            }
        }

        tracing::info!(
            applied = summary.applied,
            skipped = summary.skipped,
            invalid = summary.invalid,
            errors = summary.errors.len(),
            "Pull finished"
        );

        summary
    }

    async fn merge_remote(&self, remote: &Entity) -> Result<bool> {
        let local = self.db.get_entity(remote.resource(), remote.id()).await?;

        match local {
            Some(local) if remote.last_modified() <= local.last_modified() => Ok(false),
            _ => {
                self.db.apply_remote(remote).await?;
                Ok(true)
            }
        }
    }

    /// Operator hook for conflicts last-writer-wins does not settle
    pub async fn resolve_conflicts(&self) -> Result<usize> {
        self.resolver.resolve(&self.db).await
    }
}

fn entity_key(item: &SyncQueueItem) -> (Resource, String) {
    (
        item.resource,
        item.entity_id().unwrap_or_default().to_string(),
    )
}

/// Outstanding item ids per entity, oldest first
fn entity_order(items: &[SyncQueueItem]) -> HashMap<(Resource, String), VecDeque<String>> {
    let mut by_age: Vec<&SyncQueueItem> = items.iter().collect();
    by_age.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

    let mut heads: HashMap<(Resource, String), VecDeque<String>> = HashMap::new();
    for item in by_age {
        heads.entry(entity_key(item)).or_default().push_back(item.id.clone());
    }
    heads
}

fn outcome_label(outcome: &ItemOutcome) -> &'static str {
    match outcome {
        ItemOutcome::Synced => "synced",
        ItemOutcome::Retrying(_) => "retry",
        ItemOutcome::Failed(_) => "failed",
        ItemOutcome::Skipped => "skipped",
    }
}
