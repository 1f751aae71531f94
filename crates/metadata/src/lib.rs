//! Relational metadata store for darkroom.
//!
//! Tracks one row per stored image and exposes the conditional status
//! transitions the upload coordinator and reconciler rely on. Backed by
//! SQLite for single-node deployments or PostgreSQL for shared ones.

pub mod error;
pub mod models;
pub mod postgres;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::ImageRow;
pub use postgres::PostgresStore;
pub use repos::ImageRepo;
pub use store::{MetadataStore, SqliteStore};

use darkroom_core::config::MetadataConfig;
use std::sync::Arc;

/// Build a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite { path } => {
            tracing::info!(path = %path.display(), "Using SQLite metadata store");
            let store = SqliteStore::new(path).await?;
            Ok(Arc::new(store))
        }
        MetadataConfig::Postgres {
            url,
            host,
            port,
            username,
            password,
            database,
            ssl_mode,
            max_connections,
            statement_timeout_ms,
        } => {
            let store = if let Some(url) = url {
                PostgresStore::from_url(url, *max_connections, *statement_timeout_ms).await?
            } else {
                let host = host.as_deref().ok_or_else(|| {
                    MetadataError::Config(
                        "postgres metadata store requires either `url` or `host`".to_string(),
                    )
                })?;
                let database = database.as_deref().ok_or_else(|| {
                    MetadataError::Config(
                        "postgres metadata store requires `database` when `url` is unset"
                            .to_string(),
                    )
                })?;
                PostgresStore::from_params(
                    host,
                    port.unwrap_or(5432),
                    username.as_deref(),
                    password.as_deref(),
                    database,
                    *ssl_mode,
                    *max_connections,
                    *statement_timeout_ms,
                )
                .await?
            };
            Ok(Arc::new(store))
        }
    }
}
