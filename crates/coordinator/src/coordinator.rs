//! Upload coordination between blob storage and the metadata store.

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::retry::with_backoff;
use bytes::Bytes;
use darkroom_core::config::CoordinatorConfig;
use darkroom_core::{ContentHash, ImageFormat, ImageKey, ImageRecord, ImageStatus};
use darkroom_metadata::{ImageRow, MetadataStore};
use darkroom_storage::ObjectStore;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::instrument;

/// Convert a stored row into the domain record.
pub(crate) fn row_to_record(row: &ImageRow) -> CoordinatorResult<ImageRecord> {
    Ok(ImageRecord {
        key: ImageKey::parse(&row.image_key)?,
        checksum: ContentHash::from_hex(&row.checksum)?,
        size_bytes: u64::try_from(row.size_bytes).unwrap_or(0),
        format: ImageFormat::parse(&row.format)?,
        status: ImageStatus::parse(&row.status)?,
        created_at: row.created_at,
        committed_at: row.committed_at,
        deleted_at: row.deleted_at,
    })
}

/// Coordinates the dual write of an image upload.
///
/// Writes go metadata-first (a pending row), then the blob, then a
/// conditional commit of the row. A crash between any two steps leaves the
/// record in a state the reconciler can repair; readers never observe a
/// record whose blob is not durable.
pub struct UploadCoordinator {
    storage: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    config: CoordinatorConfig,
}

impl UploadCoordinator {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            storage,
            metadata,
            config,
        }
    }

    /// Store an image payload and return the committed record.
    ///
    /// The key is derived from the payload's SHA-256 checksum, so uploading
    /// the same bytes twice is an idempotent success. If `declared` is
    /// given, it must match the computed checksum.
    #[instrument(skip_all, fields(size = payload.len()))]
    pub async fn upload(
        &self,
        payload: Bytes,
        declared: Option<ContentHash>,
    ) -> CoordinatorResult<ImageRecord> {
        if payload.is_empty() {
            return Err(CoordinatorError::InvalidPayload(
                "empty payload".to_string(),
            ));
        }
        if payload.len() as u64 > self.config.max_image_bytes {
            return Err(CoordinatorError::InvalidPayload(format!(
                "payload of {} bytes exceeds limit of {}",
                payload.len(),
                self.config.max_image_bytes
            )));
        }
        let format = ImageFormat::detect(&payload).ok_or(CoordinatorError::UnsupportedFormat)?;

        let checksum = ContentHash::compute(&payload);
        if let Some(declared) = declared {
            if declared != checksum {
                return Err(CoordinatorError::ChecksumMismatch {
                    declared: declared.to_hex(),
                    computed: checksum.to_hex(),
                });
            }
        }

        let record = ImageRecord::new_pending(checksum, payload.len() as u64, format);
        let row = ImageRow {
            image_key: record.key.as_str().to_string(),
            checksum: record.checksum.to_hex(),
            size_bytes: record.size_bytes as i64,
            format: record.format.as_str().to_string(),
            status: record.status.as_str().to_string(),
            created_at: record.created_at,
            committed_at: None,
            deleted_at: None,
        };

        // Step 1: pending row first, so an interrupted upload is always
        // discoverable by the reconciler.
        let inserted = self.metadata.insert_pending(&row).await?;
        if !inserted {
            if let Some(outcome) = self.resolve_existing(&record).await? {
                return Ok(outcome);
            }
        }

        // Step 2: durable blob write. Content-addressed, so a concurrent
        // writer racing us stores identical bytes.
        let object_key = record.key.object_key();
        self.storage
            .put_if_not_exists(&object_key, payload)
            .await
            .map_err(|err| CoordinatorError::UploadFailed(err.to_string()))?;

        // Step 3: conditional commit. On persistent failure the row stays
        // pending and invisible until the reconciler recovers it.
        let committed_at = OffsetDateTime::now_utc();
        let committed = with_backoff(&self.config.commit_retry, "mark_committed", || {
            let metadata = Arc::clone(&self.metadata);
            let key = record.key.as_str().to_string();
            async move { metadata.mark_committed(&key, committed_at).await }
        })
        .await
        .map_err(|source| CoordinatorError::CommitFailed {
            key: record.key.as_str().to_string(),
            source,
        })?;

        if committed {
            tracing::info!(key = %record.key, size = record.size_bytes, "Image committed");
            return Ok(ImageRecord {
                status: ImageStatus::Committed,
                committed_at: Some(committed_at),
                ..record
            });
        }

        // CAS lost: someone else moved the row. Committed by a concurrent
        // identical upload is still a success.
        let current = self
            .metadata
            .get_image(record.key.as_str())
            .await?
            .ok_or_else(|| CoordinatorError::ReconcileConflict(format!(
                "record for {} vanished during commit",
                record.key
            )))?;
        let current = row_to_record(&current)?;
        if current.status == ImageStatus::Committed {
            return Ok(current);
        }
        Err(CoordinatorError::ReconcileConflict(format!(
            "record for {} moved to {} during commit",
            record.key,
            current.status.as_str()
        )))
    }

    /// Decide what to do when a row for this key already exists.
    ///
    /// Returns Some(record) when the upload is already complete, None when
    /// the caller should proceed with the blob write and commit.
    async fn resolve_existing(
        &self,
        record: &ImageRecord,
    ) -> CoordinatorResult<Option<ImageRecord>> {
        let existing = self
            .metadata
            .get_image(record.key.as_str())
            .await?
            .ok_or_else(|| {
                CoordinatorError::ReconcileConflict(format!(
                    "insert for {} conflicted but the row is gone",
                    record.key
                ))
            })?;
        let existing = row_to_record(&existing)?;

        match existing.status {
            // Identical content is already stored.
            ImageStatus::Committed => {
                tracing::debug!(key = %record.key, "Duplicate upload, already committed");
                Ok(Some(existing))
            }
            // A crashed or in-flight attempt. Proceeding is safe: the blob
            // write is idempotent and the commit is a CAS.
            ImageStatus::Pending => Ok(None),
            // Terminal states cannot be re-entered while the reconciler may
            // still be purging their blob: reviving here could commit a
            // record whose blob a concurrent sweep just removed. The caller
            // retries once the purge has freed the key.
            ImageStatus::Orphaned => Err(CoordinatorError::UploadFailed(format!(
                "key {} is orphaned, awaiting cleanup",
                record.key
            ))),
            ImageStatus::Deleted => Err(CoordinatorError::UploadFailed(format!(
                "key {} is tombstoned, awaiting cleanup",
                record.key
            ))),
        }
    }

    /// Look up a committed image record.
    ///
    /// Records in any other state are reported as not found: pending and
    /// orphaned uploads never became visible, and deleted ones no longer
    /// are.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn lookup(&self, key: &ImageKey) -> CoordinatorResult<ImageRecord> {
        let row = self
            .metadata
            .get_image(key.as_str())
            .await?
            .ok_or_else(|| CoordinatorError::NotFound(key.as_str().to_string()))?;
        let record = row_to_record(&row)?;
        if !record.status.is_visible() {
            return Err(CoordinatorError::NotFound(key.as_str().to_string()));
        }
        Ok(record)
    }

    /// Fetch a committed image's bytes, verifying content integrity.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn fetch(&self, key: &ImageKey) -> CoordinatorResult<Bytes> {
        let record = self.lookup(key).await?;
        let data = match self.storage.get(&key.object_key()).await {
            Ok(data) => data,
            Err(darkroom_storage::StorageError::NotFound(_)) => {
                tracing::error!(key = %key, "Committed record has no blob");
                return Err(CoordinatorError::Integrity {
                    key: key.as_str().to_string(),
                    detail: "committed record has no blob".to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };
        let computed = ContentHash::compute(&data);
        if computed != record.checksum {
            tracing::error!(key = %key, computed = %computed, "Blob checksum mismatch");
            return Err(CoordinatorError::Integrity {
                key: key.as_str().to_string(),
                detail: format!(
                    "blob checksum {} does not match record {}",
                    computed, record.checksum
                ),
            });
        }
        Ok(data)
    }

    /// Delete an image: tombstone first, physical cleanup after.
    ///
    /// The tombstone makes the record invisible immediately. If the blob
    /// delete then fails, the call still succeeds and the reconciler
    /// finishes the cleanup; readers cannot observe the difference.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn delete(&self, key: &ImageKey) -> CoordinatorResult<()> {
        let row = self
            .metadata
            .get_image(key.as_str())
            .await?
            .ok_or_else(|| CoordinatorError::NotFound(key.as_str().to_string()))?;
        let record = row_to_record(&row)?;

        match record.status {
            ImageStatus::Committed => {}
            // Repeating a delete is not an error.
            ImageStatus::Deleted => return Ok(()),
            // Never visible, so there is nothing to delete.
            ImageStatus::Pending | ImageStatus::Orphaned => {
                return Err(CoordinatorError::NotFound(key.as_str().to_string()));
            }
        }

        let deleted_at = OffsetDateTime::now_utc();
        let tombstoned = self.metadata.mark_deleted(key.as_str(), deleted_at).await?;
        if !tombstoned {
            // CAS lost: re-read and treat a concurrent delete as success.
            let current = self.metadata.get_image(key.as_str()).await?;
            match current {
                Some(row) if row.status == ImageStatus::Deleted.as_str() => return Ok(()),
                _ => {
                    return Err(CoordinatorError::ReconcileConflict(format!(
                        "record for {key} changed during delete"
                    )));
                }
            }
        }
        tracing::info!(key = %key, "Image tombstoned");

        // Physical cleanup. Failure leaves the tombstone for the reconciler.
        let object_key = key.object_key();
        let removed = with_backoff(&self.config.delete_retry, "delete_blob", || {
            let storage = Arc::clone(&self.storage);
            let object_key = object_key.clone();
            async move { storage.delete(&object_key).await }
        })
        .await;

        match removed {
            Ok(()) => {
                self.metadata
                    .delete_image(key.as_str(), ImageStatus::Deleted.as_str())
                    .await?;
                tracing::info!(key = %key, "Image purged");
            }
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "Blob delete failed, tombstone retained");
            }
        }
        Ok(())
    }

    /// Count records currently in a given status.
    pub async fn count_by_status(&self, status: ImageStatus) -> CoordinatorResult<u64> {
        Ok(self.metadata.count_by_status(status.as_str()).await?)
    }
}
