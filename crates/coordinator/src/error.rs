//! Coordinator error types.

use darkroom_metadata::MetadataError;
use darkroom_storage::StorageError;
use thiserror::Error;

/// Errors surfaced by upload, fetch, delete, and reconcile operations.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The payload was rejected before any write (empty, oversized).
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The payload is not a recognized image format.
    #[error("unsupported image format")]
    UnsupportedFormat,

    /// A caller-declared checksum did not match the computed one.
    #[error("checksum mismatch: declared {declared}, computed {computed}")]
    ChecksumMismatch { declared: String, computed: String },

    /// The blob write did not complete durably.
    #[error("upload failed: {0}")]
    UploadFailed(String),

    /// The blob is durable but the metadata commit failed after retries.
    /// The record stays pending and the reconciler will repair it.
    #[error("commit failed for {key}")]
    CommitFailed {
        key: String,
        #[source]
        source: MetadataError,
    },

    /// No committed image under this key.
    #[error("image not found: {0}")]
    NotFound(String),

    /// A record changed state underneath the reconciler or coordinator.
    #[error("reconcile conflict: {0}")]
    ReconcileConflict(String),

    /// A committed record points at a missing or corrupt blob.
    #[error("integrity violation for {key}: {detail}")]
    Integrity { key: String, detail: String },

    /// Object storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Metadata store error.
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// Core domain error (bad key or hash supplied by the caller).
    #[error(transparent)]
    Core(#[from] darkroom_core::Error),
}

/// Result type alias for coordinator operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
