//! Metadata store trait and the SQLite implementation.

use crate::error::MetadataResult;
use crate::repos::ImageRepo;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// SQLite schema (embedded).
const SQLITE_SCHEMA: &str = include_str!("sqlite_schema.sql");

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: ImageRepo + Send + Sync {
    /// Apply the embedded schema.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store, applying the schema.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| crate::MetadataError::Internal(e.to_string()))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        // SQLite permits limited write concurrency; a single connection avoids
        // persistent "database is locked" failures under concurrent sweeps.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SQLITE_SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ImageRepo for SqliteStore {
    async fn insert_pending(&self, row: &crate::models::ImageRow) -> MetadataResult<bool> {
        let result = sqlx::query(
            "INSERT INTO images (image_key, checksum, size_bytes, format, status, created_at, committed_at, deleted_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (image_key) DO NOTHING",
        )
        .bind(&row.image_key)
        .bind(&row.checksum)
        .bind(row.size_bytes)
        .bind(&row.format)
        .bind(&row.status)
        .bind(row.created_at)
        .bind(row.committed_at)
        .bind(row.deleted_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_image(&self, image_key: &str) -> MetadataResult<Option<crate::models::ImageRow>> {
        let row = sqlx::query_as::<_, crate::models::ImageRow>(
            "SELECT * FROM images WHERE image_key = ?",
        )
        .bind(image_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn mark_committed(
        &self,
        image_key: &str,
        committed_at: time::OffsetDateTime,
    ) -> MetadataResult<bool> {
        let result = sqlx::query(
            "UPDATE images SET status = 'committed', committed_at = ? \
             WHERE image_key = ? AND status = 'pending'",
        )
        .bind(committed_at)
        .bind(image_key)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_orphaned(&self, image_key: &str) -> MetadataResult<bool> {
        let result = sqlx::query(
            "UPDATE images SET status = 'orphaned' \
             WHERE image_key = ? AND status = 'pending'",
        )
        .bind(image_key)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_deleted(
        &self,
        image_key: &str,
        deleted_at: time::OffsetDateTime,
    ) -> MetadataResult<bool> {
        let result = sqlx::query(
            "UPDATE images SET status = 'deleted', deleted_at = ? \
             WHERE image_key = ? AND status = 'committed'",
        )
        .bind(deleted_at)
        .bind(image_key)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_pending_older_than(
        &self,
        cutoff: time::OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<crate::models::ImageRow>> {
        let rows = sqlx::query_as::<_, crate::models::ImageRow>(
            "SELECT * FROM images WHERE status = 'pending' AND created_at <= ? \
             ORDER BY created_at ASC LIMIT ?",
        )
        .bind(cutoff)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_orphaned(&self, limit: u32) -> MetadataResult<Vec<crate::models::ImageRow>> {
        let rows = sqlx::query_as::<_, crate::models::ImageRow>(
            "SELECT * FROM images WHERE status = 'orphaned' ORDER BY created_at ASC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_deleted(&self, limit: u32) -> MetadataResult<Vec<crate::models::ImageRow>> {
        let rows = sqlx::query_as::<_, crate::models::ImageRow>(
            "SELECT * FROM images WHERE status = 'deleted' ORDER BY deleted_at ASC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_committed_after(
        &self,
        after_key: Option<&str>,
        limit: u32,
    ) -> MetadataResult<Vec<crate::models::ImageRow>> {
        let rows = sqlx::query_as::<_, crate::models::ImageRow>(
            "SELECT * FROM images WHERE status = 'committed' AND image_key > ? \
             ORDER BY image_key ASC LIMIT ?",
        )
        .bind(after_key.unwrap_or(""))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_image(&self, image_key: &str, expect_status: &str) -> MetadataResult<bool> {
        let result = sqlx::query("DELETE FROM images WHERE image_key = ? AND status = ?")
            .bind(image_key)
            .bind(expect_status)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_by_status(&self, status: &str) -> MetadataResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images WHERE status = ?")
            .bind(status)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ImageRow;
    use time::{Duration, OffsetDateTime};

    async fn store() -> (tempfile::TempDir, SqliteStore) {
        let temp = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(temp.path().join("metadata.db"))
            .await
            .unwrap();
        (temp, store)
    }

    fn row(key_seed: &str, status: &str, created_at: OffsetDateTime) -> ImageRow {
        // 64-char hex key derived from the seed for uniqueness.
        let mut key = format!("{:x>64}", key_seed);
        key = key.to_lowercase();
        key.truncate(64);
        ImageRow {
            image_key: key.clone(),
            checksum: key,
            size_bytes: 42,
            format: "png".to_string(),
            status: status.to_string(),
            created_at,
            committed_at: None,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn insert_is_conditional() {
        let (_temp, store) = store().await;
        let now = OffsetDateTime::now_utc();
        let record = row("a1", "pending", now);

        assert!(store.insert_pending(&record).await.unwrap());
        assert!(!store.insert_pending(&record).await.unwrap());

        let fetched = store.get_image(&record.image_key).await.unwrap().unwrap();
        assert_eq!(fetched.status, "pending");
        assert_eq!(fetched.size_bytes, 42);
    }

    #[tokio::test]
    async fn commit_cas_requires_pending() {
        let (_temp, store) = store().await;
        let now = OffsetDateTime::now_utc();
        let record = row("b2", "pending", now);
        store.insert_pending(&record).await.unwrap();

        assert!(store.mark_committed(&record.image_key, now).await.unwrap());
        // Second commit loses the CAS.
        assert!(!store.mark_committed(&record.image_key, now).await.unwrap());

        let fetched = store.get_image(&record.image_key).await.unwrap().unwrap();
        assert_eq!(fetched.status, "committed");
        assert!(fetched.committed_at.is_some());
    }

    #[tokio::test]
    async fn delete_transition_requires_committed() {
        let (_temp, store) = store().await;
        let now = OffsetDateTime::now_utc();
        let record = row("c3", "pending", now);
        store.insert_pending(&record).await.unwrap();

        // Pending records cannot be tombstoned.
        assert!(!store.mark_deleted(&record.image_key, now).await.unwrap());

        store.mark_committed(&record.image_key, now).await.unwrap();
        assert!(store.mark_deleted(&record.image_key, now).await.unwrap());

        let fetched = store.get_image(&record.image_key).await.unwrap().unwrap();
        assert_eq!(fetched.status, "deleted");
        assert!(fetched.deleted_at.is_some());
    }

    #[tokio::test]
    async fn orphan_cas_requires_pending() {
        let (_temp, store) = store().await;
        let now = OffsetDateTime::now_utc();
        let record = row("d4", "pending", now);
        store.insert_pending(&record).await.unwrap();

        assert!(store.mark_orphaned(&record.image_key).await.unwrap());
        assert!(!store.mark_orphaned(&record.image_key).await.unwrap());

        let fetched = store.get_image(&record.image_key).await.unwrap().unwrap();
        assert_eq!(fetched.status, "orphaned");
    }

    #[tokio::test]
    async fn committed_pages_are_key_ordered() {
        let (_temp, store) = store().await;
        let now = OffsetDateTime::now_utc();

        for seed in ["a1", "b2", "c3"] {
            let record = row(seed, "pending", now);
            store.insert_pending(&record).await.unwrap();
            store.mark_committed(&record.image_key, now).await.unwrap();
        }
        // A pending row must not show up in the committed pages.
        store.insert_pending(&row("d4", "pending", now)).await.unwrap();

        let first = store.list_committed_after(None, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first[0].image_key < first[1].image_key);

        let rest = store
            .list_committed_after(Some(&first[1].image_key), 2)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert!(rest[0].image_key > first[1].image_key);
    }

    #[tokio::test]
    async fn pending_query_respects_cutoff() {
        let (_temp, store) = store().await;
        let now = OffsetDateTime::now_utc();

        let old = row("e5", "pending", now - Duration::hours(2));
        let fresh = row("f6", "pending", now);
        store.insert_pending(&old).await.unwrap();
        store.insert_pending(&fresh).await.unwrap();

        let cutoff = now - Duration::hours(1);
        let rows = store.list_pending_older_than(cutoff, 100).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].image_key, old.image_key);
    }

    #[tokio::test]
    async fn conditional_row_delete() {
        let (_temp, store) = store().await;
        let now = OffsetDateTime::now_utc();
        let record = row("a7", "pending", now);
        store.insert_pending(&record).await.unwrap();

        // Wrong expected status leaves the row alone.
        assert!(!store.delete_image(&record.image_key, "deleted").await.unwrap());
        assert!(store.delete_image(&record.image_key, "pending").await.unwrap());
        assert!(store.get_image(&record.image_key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_and_count_by_status() {
        let (_temp, store) = store().await;
        let now = OffsetDateTime::now_utc();

        let committed = row("b8", "pending", now);
        store.insert_pending(&committed).await.unwrap();
        store.mark_committed(&committed.image_key, now).await.unwrap();
        store.mark_deleted(&committed.image_key, now).await.unwrap();

        let tombstones = store.list_deleted(10).await.unwrap();
        assert_eq!(tombstones.len(), 1);
        assert_eq!(store.count_by_status("deleted").await.unwrap(), 1);
        assert_eq!(store.count_by_status("pending").await.unwrap(), 0);
    }
}
