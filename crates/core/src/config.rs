//! Configuration types shared across crates.

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
}

impl AppConfig {
    /// Load configuration from an optional TOML file merged with
    /// `DARKROOM_`-prefixed environment variables (`__` as separator).
    ///
    /// Environment variables override file values.
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Env::prefixed("DARKROOM_").split("__"))
            .extract()
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for blobs.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to the ambient credential chain if unset.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to the ambient credential chain if unset.
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key`). Required for MinIO.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/blobs"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                access_key_id,
                secret_access_key,
                ..
            } => match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                (Some(_), Some(_)) | (None, None) => Ok(()),
                _ => Err(
                    "s3 config requires both access_key_id and secret_access_key when either is set"
                        .to_string(),
                ),
            },
            _ => Ok(()),
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (recommended for testing and single-node deployments).
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over individual fields.
        url: Option<String>,
        /// Database host.
        host: Option<String>,
        /// Database port (default: 5432).
        port: Option<u16>,
        /// Database user.
        username: Option<String>,
        /// Database password.
        password: Option<String>,
        /// Database name.
        database: Option<String>,
        /// SSL mode.
        ssl_mode: Option<PgSslMode>,
        /// Maximum pool connections.
        #[serde(default = "default_pg_max_connections")]
        max_connections: u32,
        /// Per-statement timeout in milliseconds. Bounds metadata I/O so a
        /// hung database cannot stall uploads indefinitely.
        statement_timeout_ms: Option<u64>,
    },
}

fn default_pg_max_connections() -> u32 {
    10
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
        }
    }
}

/// Bounded exponential backoff policy for transient store errors.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first (minimum 1).
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_retry_attempts() -> u32 {
    4
}

fn default_retry_base_delay_ms() -> u64 {
    50
}

fn default_retry_max_delay_ms() -> u64 {
    2_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay_ms: default_retry_base_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries. Useful in tests.
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay before the given retry (1-based), doubling up to the cap.
    pub fn delay_for(&self, attempt: u32) -> std::time::Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        std::time::Duration::from_millis(delay)
    }
}

/// Upload coordinator configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Maximum accepted payload size in bytes.
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,
    /// Backoff policy for the metadata commit after a durable blob write.
    #[serde(default)]
    pub commit_retry: RetryPolicy,
    /// Backoff policy for physical blob deletion.
    #[serde(default)]
    pub delete_retry: RetryPolicy,
}

fn default_max_image_bytes() -> u64 {
    crate::DEFAULT_MAX_IMAGE_BYTES
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: default_max_image_bytes(),
            commit_retry: RetryPolicy::default(),
            delete_retry: RetryPolicy::default(),
        }
    }
}

/// Reconciler sweep configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Seconds between background sweeps.
    #[serde(default = "default_reconcile_interval_secs")]
    pub interval_secs: u64,
    /// Grace period in seconds before a pending record is eligible for
    /// repair. Must comfortably exceed the longest expected upload.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    /// Maximum records processed per category per sweep.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: u32,
}

fn default_reconcile_interval_secs() -> u64 {
    300
}

fn default_grace_secs() -> u64 {
    900
}

fn default_batch_limit() -> u32 {
    500
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reconcile_interval_secs(),
            grace_secs: default_grace_secs(),
            batch_limit: default_batch_limit(),
        }
    }
}

impl ReconcilerConfig {
    /// Sweep interval as a std Duration.
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    /// Grace period as a time Duration.
    pub fn grace(&self) -> time::Duration {
        let secs = i64::try_from(self.grace_secs).unwrap_or(i64::MAX);
        time::Duration::seconds(secs)
    }
}
