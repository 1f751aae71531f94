//! PostgreSQL-based metadata store implementation.

use crate::error::MetadataResult;
use crate::models::ImageRow;
use crate::repos::ImageRepo;
use crate::store::MetadataStore;
use async_trait::async_trait;
use darkroom_core::config::PgSslMode;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use time::OffsetDateTime;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

/// Split the schema into individual statements; PostgreSQL doesn't allow
/// multiple statements in a single prepared statement.
fn schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// This allows credentials to be passed separately, enabling better
    /// secret management (e.g., passwords via environment variables).
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }
        if let Some(pass) = password {
            opts = opts.password(pass);
        }
        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        // Bound metadata I/O so a hung database cannot stall uploads.
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        for statement in schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ImageRepo for PostgresStore {
    async fn insert_pending(&self, row: &ImageRow) -> MetadataResult<bool> {
        let result = sqlx::query(
            "INSERT INTO images (image_key, checksum, size_bytes, format, status, created_at, committed_at, deleted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
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

    async fn get_image(&self, image_key: &str) -> MetadataResult<Option<ImageRow>> {
        let row =
            sqlx::query_as::<_, ImageRow>("SELECT * FROM images WHERE image_key = $1")
                .bind(image_key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn mark_committed(
        &self,
        image_key: &str,
        committed_at: OffsetDateTime,
    ) -> MetadataResult<bool> {
        let result = sqlx::query(
            "UPDATE images SET status = 'committed', committed_at = $1 \
             WHERE image_key = $2 AND status = 'pending'",
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
             WHERE image_key = $1 AND status = 'pending'",
        )
        .bind(image_key)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_deleted(
        &self,
        image_key: &str,
        deleted_at: OffsetDateTime,
    ) -> MetadataResult<bool> {
        let result = sqlx::query(
            "UPDATE images SET status = 'deleted', deleted_at = $1 \
             WHERE image_key = $2 AND status = 'committed'",
        )
        .bind(deleted_at)
        .bind(image_key)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_pending_older_than(
        &self,
        cutoff: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<ImageRow>> {
        let rows = sqlx::query_as::<_, ImageRow>(
            "SELECT * FROM images WHERE status = 'pending' AND created_at <= $1 \
             ORDER BY created_at ASC LIMIT $2",
        )
        .bind(cutoff)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_orphaned(&self, limit: u32) -> MetadataResult<Vec<ImageRow>> {
        let rows = sqlx::query_as::<_, ImageRow>(
            "SELECT * FROM images WHERE status = 'orphaned' ORDER BY created_at ASC LIMIT $1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_deleted(&self, limit: u32) -> MetadataResult<Vec<ImageRow>> {
        let rows = sqlx::query_as::<_, ImageRow>(
            "SELECT * FROM images WHERE status = 'deleted' ORDER BY deleted_at ASC LIMIT $1",
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
    ) -> MetadataResult<Vec<ImageRow>> {
        let rows = sqlx::query_as::<_, ImageRow>(
            "SELECT * FROM images WHERE status = 'committed' AND image_key > $1 \
             ORDER BY image_key ASC LIMIT $2",
        )
        .bind(after_key.unwrap_or(""))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_image(&self, image_key: &str, expect_status: &str) -> MetadataResult<bool> {
        let result = sqlx::query("DELETE FROM images WHERE image_key = $1 AND status = $2")
            .bind(image_key)
            .bind(expect_status)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_by_status(&self, status: &str) -> MetadataResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images WHERE status = $1")
            .bind(status)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
