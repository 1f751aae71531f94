//! Image record repository.

use crate::error::MetadataResult;
use crate::models::ImageRow;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for image record operations.
///
/// All status transitions are conditional updates (compare-and-swap on
/// `status`), so a record raced between an uploader and the reconciler
/// converges to a single consistent state without double-processing.
#[async_trait]
pub trait ImageRepo: Send + Sync {
    /// Conditionally insert a pending record.
    ///
    /// Returns true if the row was inserted, false if a row with the same
    /// key already exists (the caller inspects the existing row).
    async fn insert_pending(&self, row: &ImageRow) -> MetadataResult<bool>;

    /// Get an image record by key.
    async fn get_image(&self, image_key: &str) -> MetadataResult<Option<ImageRow>>;

    /// CAS `pending -> committed`, setting `committed_at`.
    /// Returns false if the record was not in `pending`.
    async fn mark_committed(
        &self,
        image_key: &str,
        committed_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// CAS `pending -> orphaned`.
    /// Returns false if the record was not in `pending`.
    async fn mark_orphaned(&self, image_key: &str) -> MetadataResult<bool>;

    /// CAS `committed -> deleted`, setting `deleted_at` (tombstone).
    /// Returns false if the record was not in `committed`.
    async fn mark_deleted(
        &self,
        image_key: &str,
        deleted_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Pending records created at or before `cutoff`, oldest first.
    async fn list_pending_older_than(
        &self,
        cutoff: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<ImageRow>>;

    /// Orphaned records awaiting purge.
    async fn list_orphaned(&self, limit: u32) -> MetadataResult<Vec<ImageRow>>;

    /// Deleted tombstones awaiting physical cleanup.
    async fn list_deleted(&self, limit: u32) -> MetadataResult<Vec<ImageRow>>;

    /// A page of committed records with keys greater than `after_key`,
    /// key-ordered. Drives the integrity verification cursor.
    async fn list_committed_after(
        &self,
        after_key: Option<&str>,
        limit: u32,
    ) -> MetadataResult<Vec<ImageRow>>;

    /// Delete a row, conditional on its current status.
    /// Returns false if the row was missing or in a different status.
    async fn delete_image(&self, image_key: &str, expect_status: &str) -> MetadataResult<bool>;

    /// Count records in a given status.
    async fn count_by_status(&self, status: &str) -> MetadataResult<u64>;
}
