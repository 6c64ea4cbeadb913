//! Media blob cache
//!
//! Keeps downloaded images and other blobs in the local database keyed by
//! their source URL, so they stay viewable offline. Entries expire after
//! the configured TTL (7 days by default) and are purged by
//! [`Database::expire_sweep`] or on read.

use std::sync::Arc;
use std::time::Duration;

use crate::data::{Database, MediaEntry, expires_after, now_millis};
use crate::error::{AppError, Result};
use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};

/// Default lifetime of a cached blob
pub const DEFAULT_MEDIA_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// URL-keyed blob cache backed by the local store
#[derive(Clone)]
pub struct MediaCache {
    db: Arc<Database>,
    ttl: Duration,
}

impl MediaCache {
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_ttl(db, DEFAULT_MEDIA_TTL)
    }

    pub fn with_ttl(db: Arc<Database>, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    /// Store a blob
    ///
    /// # Arguments
    /// * `url` - Source URL, used as the key
    /// * `data` - Blob contents
    /// * `content_type` - MIME type, if known
    pub async fn put(&self, url: &str, data: &[u8], content_type: Option<&str>) -> Result<()> {
        if url.trim().is_empty() {
            return Err(AppError::Validation("media url must not be empty".to_string()));
        }

        let now = now_millis();
        let expires_at = expires_after(now, self.ttl);

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO media (url, data, content_type, timestamp, expires_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(url)
        .bind(data)
        .bind(content_type)
        .bind(now)
        .bind(expires_at)
        .execute(self.db.pool())
        .await?;

        tracing::debug!(url, size = data.len(), "Media cached");
        Ok(())
    }

    /// Fetch a blob; expired entries are deleted and reported as absent
    pub async fn get(&self, url: &str) -> Result<Option<MediaEntry>> {
        let entry = sqlx::query_as::<_, MediaEntry>(
            "SELECT url, data, content_type, timestamp, expires_at FROM media WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(self.db.pool())
        .await?;

        match entry {
            Some(entry) if entry.expires_at > now_millis() => {
                CACHE_HITS_TOTAL.with_label_values(&["media"]).inc();
                Ok(Some(entry))
            }
            Some(_) => {
                self.remove(url).await?;
                CACHE_MISSES_TOTAL.with_label_values(&["media"]).inc();
                Ok(None)
            }
            None => {
                CACHE_MISSES_TOTAL.with_label_values(&["media"]).inc();
                Ok(None)
            }
        }
    }

    pub async fn remove(&self, url: &str) -> Result<()> {
        sqlx::query("DELETE FROM media WHERE url = ?")
            .bind(url)
            .execute(self.db.pool())
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_cache(ttl: Duration) -> (MediaCache, Arc<Database>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(
            Database::connect(&temp_dir.path().join("test.db"))
                .await
                .unwrap(),
        );
        (MediaCache::with_ttl(db.clone(), ttl), db, temp_dir)
    }

    #[tokio::test]
    async fn test_media_put_and_get() {
        let (media, _db, _temp_dir) = create_test_cache(DEFAULT_MEDIA_TTL).await;

        media
            .put("https://cdn.example.com/sencha.jpg", b"jpeg-bytes", Some("image/jpeg"))
            .await
            .unwrap();

        let entry = media
            .get("https://cdn.example.com/sencha.jpg")
            .await
            .unwrap()
            .expect("entry should be cached");
        assert_eq!(entry.data, b"jpeg-bytes");
        assert_eq!(entry.content_type.as_deref(), Some("image/jpeg"));
        assert!(entry.expires_at - entry.timestamp >= DEFAULT_MEDIA_TTL.as_millis() as i64);
    }

    #[tokio::test]
    async fn test_media_expired_entry_is_purged() {
        let (media, db, _temp_dir) = create_test_cache(Duration::from_millis(1)).await;

        media
            .put("https://cdn.example.com/old.png", b"png", None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(media.get("https://cdn.example.com/old.png").await.unwrap().is_none());
        assert_eq!(db.stats().await.unwrap().media_entries, 0);
    }

    #[tokio::test]
    async fn test_media_huge_ttl_does_not_wrap() {
        let (media, _db, _temp_dir) = create_test_cache(Duration::MAX).await;

        media
            .put("https://cdn.example.com/keep.png", b"png", None)
            .await
            .unwrap();

        let entry = media.get("https://cdn.example.com/keep.png").await.unwrap().unwrap();
        assert_eq!(entry.expires_at, i64::MAX);
    }

    #[tokio::test]
    async fn test_media_rejects_empty_url() {
        let (media, _db, _temp_dir) = create_test_cache(DEFAULT_MEDIA_TTL).await;

        let error = media.put("  ", b"data", None).await.unwrap_err();
        assert!(matches!(error, AppError::Validation(_)));
    }
}
