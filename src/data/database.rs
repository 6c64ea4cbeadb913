//! SQLite database operations
//!
//! All entity access goes through this module. Every local write stamps
//! `lastModified` and appends a sync queue item inside the same
//! transaction, so a reader never sees one without the other.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, SqliteConnection, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::models::*;
use crate::error::{AppError, Result};

/// Database connection pool wrapper.
///
/// The single owner of the entity, cache, media and queue tables. Construct
/// one per process (or per test) and share it behind an `Arc`.
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&connection_string)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        Self::migrate(pool).await
    }

    /// Open a private in-memory database
    ///
    /// Limited to one connection: every pooled connection to `:memory:`
    /// would otherwise see its own empty database.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
            tracing::error!("Migration failed: {}", e);
            AppError::Migration(e)
        })?;

        tracing::info!("Database connected and migrated successfully");

        Ok(Self { pool })
    }

    pub(crate) fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    // =========================================================================
    // Entities
    // =========================================================================

    /// Write an entity locally and queue it for the remote
    ///
    /// Stamps `lastModified` (never moving it backwards), upserts the row
    /// and appends a `create` item when the id is temporary and the remote
    /// has not confirmed it yet, otherwise an `update` item.
    ///
    /// # Returns
    /// The entity as stored, with its new `lastModified`
    ///
    /// # Errors
    /// Validation error for a missing key field; database error if either
    /// write fails, in which case neither is kept.
    pub async fn put<T: Record>(&self, mut entity: T) -> Result<T> {
        entity.validate()?;
        entity.set_last_modified(now_millis().max(entity.last_modified()));

        let resource = T::RESOURCE;
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result: Result<(OperationType, SyncQueueItem)> = async {
            let confirmed = sqlx::query_scalar::<_, bool>(&format!(
                "SELECT confirmed FROM {} WHERE id = ?",
                resource.table()
            ))
            .bind(entity.id())
            .fetch_optional(&mut *conn)
            .await?
            .unwrap_or(false);

            upsert_row(&mut *conn, &entity, false).await?;

            let op_type = if is_temp_id(entity.id()) && !confirmed {
                OperationType::Create
            } else {
                OperationType::Update
            };
            let item = SyncQueueItem::new(
                op_type,
                resource,
                entity.id(),
                serde_json::to_value(&entity)?,
            );
            insert_queue_item(&mut *conn, &item).await?;

            Ok((op_type, item))
        }
        .await;
        let (op_type, item) = finish_immediate(&mut *conn, result).await?;

        tracing::debug!(
            %resource,
            id = %entity.id(),
            operation = %op_type,
            item_id = %item.id,
            "Entity written and queued"
        );

        Ok(entity)
    }

    /// Get entity by ID
    pub async fn get<T: Record>(&self, id: &str) -> Result<Option<T>> {
        let data = sqlx::query_scalar::<_, String>(&format!(
            "SELECT data FROM {} WHERE id = ?",
            T::RESOURCE.table()
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        data.map(|raw| decode_row::<T>(&raw)).transpose()
    }

    /// List every entity of a kind (unordered)
    pub async fn list<T: Record>(&self) -> Result<Vec<T>> {
        let rows = sqlx::query_scalar::<_, String>(&format!(
            "SELECT data FROM {}",
            T::RESOURCE.table()
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|raw| decode_row::<T>(raw)).collect()
    }

    /// List records belonging to one tea, oldest date first
    ///
    /// # Errors
    /// Validation error for kinds that are not per-tea records
    pub async fn list_for_tea<T: Record>(&self, tea_id: &str) -> Result<Vec<T>> {
        if T::RESOURCE == Resource::Teas {
            return Err(AppError::Validation(
                "teas are not indexed by tea id".to_string(),
            ));
        }

        let rows = sqlx::query_scalar::<_, String>(&format!(
            "SELECT data FROM {} WHERE tea_id = ? ORDER BY date ASC, id ASC",
            T::RESOURCE.table()
        ))
        .bind(tea_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|raw| decode_row::<T>(raw)).collect()
    }

    /// Delete an entity locally and queue the delete for the remote
    ///
    /// The row disappears from local reads immediately. The delete is queued
    /// even when no local row exists, since the remote may still hold it.
    pub async fn remove<T: Record>(&self, id: &str) -> Result<()> {
        if id.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "{} delete is missing an id",
                T::RESOURCE
            )));
        }

        let resource = T::RESOURCE;
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result: Result<(sqlx::sqlite::SqliteQueryResult, SyncQueueItem)> = async {
            let deleted = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", resource.table()))
                .bind(id)
                .execute(&mut *conn)
                .await?;

            let item = SyncQueueItem::new(
                OperationType::Delete,
                resource,
                id,
                serde_json::json!({ "id": id }),
            );
            insert_queue_item(&mut *conn, &item).await?;

            Ok((deleted, item))
        }
        .await;
        let (deleted, item) = finish_immediate(&mut *conn, result).await?;

        tracing::debug!(
            %resource,
            id,
            existed = deleted.rows_affected() > 0,
            item_id = %item.id,
            "Entity removed and delete queued"
        );

        Ok(())
    }

    /// Get any entity kind by resource and id
    pub async fn get_entity(&self, resource: Resource, id: &str) -> Result<Option<Entity>> {
        let entity = match resource {
            Resource::Teas => self.get::<Tea>(id).await?.map(Entity::Tea),
            Resource::GrowthRecords => self
                .get::<GrowthRecord>(id)
                .await?
                .map(Entity::GrowthRecord),
            Resource::HealthRecords => self
                .get::<HealthRecord>(id)
                .await?
                .map(Entity::HealthRecord),
        };
        Ok(entity)
    }

    /// Store an entity pulled from the remote
    ///
    /// Keeps the remote `lastModified`, marks the row confirmed and does not
    /// queue anything, so pulled state is never echoed back.
    pub async fn apply_remote(&self, entity: &Entity) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        match entity {
            Entity::Tea(tea) => {
                tea.validate()?;
                upsert_row(&mut *conn, tea, true).await
            }
            Entity::GrowthRecord(record) => {
                record.validate()?;
                upsert_row(&mut *conn, record, true).await
            }
            Entity::HealthRecord(record) => {
                record.validate()?;
                upsert_row(&mut *conn, record, true).await
            }
        }
    }

    /// Whether the remote is known to hold this entity
    pub async fn is_confirmed(&self, resource: Resource, id: &str) -> Result<bool> {
        let confirmed = sqlx::query_scalar::<_, bool>(&format!(
            "SELECT confirmed FROM {} WHERE id = ?",
            resource.table()
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(confirmed.unwrap_or(false))
    }

    /// Record that the remote accepted a create for this entity
    ///
    /// Later writes to the same id then queue `update` items even though the
    /// id keeps its temporary prefix.
    pub async fn mark_confirmed(&self, resource: Resource, id: &str) -> Result<()> {
        sqlx::query(&format!(
            "UPDATE {} SET confirmed = 1 WHERE id = ?",
            resource.table()
        ))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Row counts per table
    pub async fn stats(&self) -> Result<StoreStats> {
        let count = |sql: &'static str| {
            let pool = &self.pool;
            async move { sqlx::query_scalar::<_, i64>(sql).fetch_one(pool).await }
        };

        Ok(StoreStats {
            teas: count("SELECT COUNT(*) FROM teas").await?,
            growth_records: count("SELECT COUNT(*) FROM growth_records").await?,
            health_records: count("SELECT COUNT(*) FROM health_records").await?,
            cache_entries: count("SELECT COUNT(*) FROM cache").await?,
            media_entries: count("SELECT COUNT(*) FROM media").await?,
            pending_items: count("SELECT COUNT(*) FROM sync_queue WHERE status = 'pending'")
                .await?,
            failed_items: count("SELECT COUNT(*) FROM sync_queue WHERE status = 'failed'")
                .await?,
        })
    }

    /// Delete every row in every table
    pub async fn clear_all(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in [
            "teas",
            "growth_records",
            "health_records",
            "cache",
            "media",
            "sync_queue",
        ] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        tracing::info!("Local store cleared");
        Ok(())
    }
}

/// Commit a `BEGIN IMMEDIATE` transaction on success, roll it back otherwise
async fn finish_immediate<T>(conn: &mut SqliteConnection, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            Ok(value)
        }
        Err(error) => {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            Err(error)
        }
    }
}

fn decode_row<T: Record>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        AppError::Storage(format!(
            "corrupt {} row in local store: {}",
            T::RESOURCE,
            e
        ))
    })
}

/// Insert or replace an entity row.
///
/// `confirm` sets the confirmed flag; otherwise an existing flag is kept.
pub(crate) async fn upsert_row<T: Record>(
    conn: &mut SqliteConnection,
    entity: &T,
    confirm: bool,
) -> Result<()> {
    let table = T::RESOURCE.table();
    let data = serde_json::to_string(entity)?;
    let confirmed_update = if confirm {
        "confirmed = 1"
    } else {
        "confirmed = confirmed"
    };

    match (entity.tea_id(), entity.date()) {
        (Some(tea_id), Some(date)) => {
            sqlx::query(&format!(
                r#"
                INSERT INTO {table} (id, tea_id, date, data, last_modified, confirmed)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    tea_id = excluded.tea_id,
                    date = excluded.date,
                    data = excluded.data,
                    last_modified = excluded.last_modified,
                    {confirmed_update}
                "#
            ))
            .bind(entity.id())
            .bind(tea_id)
            .bind(date)
            .bind(&data)
            .bind(entity.last_modified())
            .bind(confirm)
            .execute(&mut *conn)
            .await?;
        }
        _ => {
            sqlx::query(&format!(
                r#"
                INSERT INTO {table} (id, data, last_modified, confirmed)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    data = excluded.data,
                    last_modified = excluded.last_modified,
                    {confirmed_update}
                "#
            ))
            .bind(entity.id())
            .bind(&data)
            .bind(entity.last_modified())
            .bind(confirm)
            .execute(&mut *conn)
            .await?;
        }
    }

    Ok(())
}

pub(crate) async fn insert_queue_item(
    conn: &mut SqliteConnection,
    item: &SyncQueueItem,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sync_queue (
            id, type, resource, entity_id, data, timestamp, retries, status, last_error
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&item.id)
    .bind(item.op_type)
    .bind(item.resource)
    .bind(item.entity_id().unwrap_or_default())
    .bind(serde_json::to_string(&item.data)?)
    .bind(item.timestamp)
    .bind(i64::from(item.retries))
    .bind(item.status)
    .bind(&item.last_error)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
