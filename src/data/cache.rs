//! Persistent expiring cache
//!
//! A generic key/value table stored next to the entities. Entries carry an
//! optional expiry and the schema version they were written with; a read of
//! an expired or outdated entry returns nothing and deletes the row.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::database::Database;
use super::models::{CacheEntry, expires_after, now_millis};
use crate::error::Result;
use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};

/// Version tag written with every entry. Bump when cached payload shapes
/// change so stale rows are dropped on read.
pub const CACHE_VERSION: i64 = 1;

/// Rows removed by an expiry sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub cache_entries: u64,
    pub media_entries: u64,
}

#[derive(sqlx::FromRow)]
struct CacheRow {
    data: String,
    timestamp: i64,
    expires_at: Option<i64>,
    version: i64,
}

impl Database {
    /// Store a value under `key`, replacing any previous entry
    ///
    /// # Arguments
    /// * `ttl` - Lifetime of the entry; `None` never expires
    pub async fn cache_set<T: Serialize>(
        &self,
        key: &str,
        data: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let now = now_millis();
        let expires_at = ttl.map(|ttl| expires_after(now, ttl));

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO cache (key, data, timestamp, expires_at, version)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(key)
        .bind(serde_json::to_string(data)?)
        .bind(now)
        .bind(expires_at)
        .bind(CACHE_VERSION)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Read a value, treating expired or outdated entries as absent
    pub async fn cache_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        Ok(self.cache_entry(key).await?.map(|entry| entry.data))
    }

    /// Read an entry with its metadata
    ///
    /// An expired entry, or one written under another cache version, is
    /// deleted as a side effect and reported as a miss.
    pub async fn cache_entry<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<CacheEntry<T>>> {
        let row = sqlx::query_as::<_, CacheRow>(
            "SELECT data, timestamp, expires_at, version FROM cache WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(self.pool())
        .await?;

        let Some(row) = row else {
            CACHE_MISSES_TOTAL.with_label_values(&["cache"]).inc();
            return Ok(None);
        };

        let entry = CacheEntry {
            data: row.data,
            timestamp: row.timestamp,
            expires_at: row.expires_at,
            version: row.version,
        };

        if entry.is_expired(now_millis()) || entry.version != CACHE_VERSION {
            tracing::debug!(key, "Purging stale cache entry on read");
            self.cache_remove(key).await?;
            CACHE_MISSES_TOTAL.with_label_values(&["cache"]).inc();
            return Ok(None);
        }

        let data = match serde_json::from_str::<T>(&entry.data) {
            Ok(data) => data,
            Err(error) => {
                // The stored shape no longer matches what the caller expects.
                tracing::warn!(key, %error, "Dropping undecodable cache entry");
                self.cache_remove(key).await?;
                CACHE_MISSES_TOTAL.with_label_values(&["cache"]).inc();
                return Ok(None);
            }
        };

        CACHE_HITS_TOTAL.with_label_values(&["cache"]).inc();
        Ok(Some(CacheEntry {
            data,
            timestamp: entry.timestamp,
            expires_at: entry.expires_at,
            version: entry.version,
        }))
    }

    /// Delete one entry; missing keys are not an error
    pub async fn cache_remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM cache WHERE key = ?")
            .bind(key)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Delete every cache entry
    pub async fn cache_clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM cache").execute(self.pool()).await?;
        Ok(())
    }

    /// Purge every cache and media entry whose expiry has passed
    ///
    /// Both deletes go through the expiry indexes.
    pub async fn expire_sweep(&self) -> Result<SweepReport> {
        let now = now_millis();

        let cache = sqlx::query("DELETE FROM cache WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now)
            .execute(self.pool())
            .await?;
        let media = sqlx::query("DELETE FROM media WHERE expires_at <= ?")
            .bind(now)
            .execute(self.pool())
            .await?;

        let report = SweepReport {
            cache_entries: cache.rows_affected(),
            media_entries: media.rows_affected(),
        };

        tracing::debug!(
            cache_entries = report.cache_entries,
            media_entries = report.media_entries,
            "Expired entries swept"
        );

        Ok(report)
    }
}
