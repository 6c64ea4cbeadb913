//! Sync queue operations
//!
//! Items are appended by [`Database::put`] and [`Database::remove`]; this
//! module covers reading them back in drain order and moving them through
//! their lifecycle. Every status change is a single-row update keyed by id.

use super::database::Database;
use super::models::{QueueStatus, SyncQueueItem};
use crate::error::{AppError, Result};

const QUEUE_COLUMNS: &str =
    "id, type, resource, data, timestamp, retries, status, last_error";

impl Database {
    /// Pending items in drain order
    ///
    /// Fewer retries first, then oldest first, so fresh work is attempted
    /// before an item that keeps failing.
    pub async fn list_pending(&self) -> Result<Vec<SyncQueueItem>> {
        let items = sqlx::query_as::<_, SyncQueueItem>(&format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE status = ? \
             ORDER BY retries ASC, timestamp ASC, id ASC"
        ))
        .bind(QueueStatus::Pending)
        .fetch_all(self.pool())
        .await?;

        Ok(items)
    }

    /// Every queue row regardless of status, oldest first
    pub async fn queue_items(&self) -> Result<Vec<SyncQueueItem>> {
        let items = sqlx::query_as::<_, SyncQueueItem>(&format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue ORDER BY timestamp ASC, id ASC"
        ))
        .fetch_all(self.pool())
        .await?;

        Ok(items)
    }

    /// Items that exhausted their retry budget or failed validation
    pub async fn failed_items(&self) -> Result<Vec<SyncQueueItem>> {
        let items = sqlx::query_as::<_, SyncQueueItem>(&format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE status = ? \
             ORDER BY timestamp ASC, id ASC"
        ))
        .bind(QueueStatus::Failed)
        .fetch_all(self.pool())
        .await?;

        Ok(items)
    }

    pub async fn get_queue_item(&self, id: &str) -> Result<Option<SyncQueueItem>> {
        let item = sqlx::query_as::<_, SyncQueueItem>(&format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(item)
    }

    /// Number of items still waiting to be sent
    pub async fn pending_count(&self) -> Result<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sync_queue WHERE status = ?")
                .bind(QueueStatus::Pending)
                .fetch_one(self.pool())
                .await?;

        Ok(count)
    }

    /// Set an item's status
    ///
    /// # Returns
    /// `true` if updated, `false` if no item has this id.
    pub async fn mark_status(&self, id: &str, status: QueueStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE sync_queue SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Put an item back to pending after a failed attempt
    pub async fn record_retry(&self, id: &str, retries: u32, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE sync_queue SET status = ?, retries = ?, last_error = ? WHERE id = ?",
        )
        .bind(QueueStatus::Pending)
        .bind(i64::from(retries))
        .bind(error)
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Mark an item permanently failed; it is never drained again on its own
    pub async fn mark_failed(&self, id: &str, retries: u32, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE sync_queue SET status = ?, retries = ?, last_error = ? WHERE id = ?",
        )
        .bind(QueueStatus::Failed)
        .bind(i64::from(retries))
        .bind(error)
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Remove an item the remote has applied
    pub async fn complete_item(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sync_queue WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Operator action: give a failed item a fresh retry budget
    ///
    /// # Errors
    /// Validation error if the item does not exist or is not failed
    pub async fn retry_failed(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE sync_queue SET status = ?, retries = 0, last_error = NULL \
             WHERE id = ? AND status = ?",
        )
        .bind(QueueStatus::Pending)
        .bind(id)
        .bind(QueueStatus::Failed)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Validation(format!(
                "queue item {} is not in failed state",
                id
            )));
        }

        tracing::info!(item_id = %id, "Failed queue item re-queued");
        Ok(())
    }

    /// Operator action: re-queue every failed item
    ///
    /// # Returns
    /// Number of items re-queued
    pub async fn retry_all_failed(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE sync_queue SET status = ?, retries = 0, last_error = NULL WHERE status = ?",
        )
        .bind(QueueStatus::Pending)
        .bind(QueueStatus::Failed)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Operator action: drop a queue item without sending it
    ///
    /// # Returns
    /// `true` if an item was deleted
    pub async fn discard_item(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() > 0 {
            tracing::warn!(item_id = %id, "Queue item discarded by operator");
        }

        Ok(result.rows_affected() > 0)
    }

    /// Reset items a crashed cycle left in `syncing`
    ///
    /// Call once at startup, before the first cycle.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE sync_queue SET status = ? WHERE status = ?")
            .bind(QueueStatus::Pending)
            .bind(QueueStatus::Syncing)
            .execute(self.pool())
            .await?;

        if result.rows_affected() > 0 {
            tracing::warn!(
                count = result.rows_affected(),
                "Recovered queue items interrupted mid-sync"
            );
        }

        Ok(result.rows_affected())
    }
}
