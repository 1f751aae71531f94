//! Periodic repair of half-finished dual writes.

use crate::coordinator::row_to_record;
use crate::error::CoordinatorResult;
use darkroom_core::{ContentHash, ImageStatus};
use darkroom_metadata::{ImageRow, MetadataStore};
use darkroom_storage::{ObjectStore, StorageError};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::instrument;

/// Outcome of a single reconciliation sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records examined across all passes.
    pub scanned: u64,
    /// Stale pending records promoted to committed (blob was durable).
    pub recovered: u64,
    /// Stale pending records demoted to orphaned (blob missing).
    pub orphaned: u64,
    /// Orphans and tombstones fully cleaned up.
    pub purged: u64,
    /// Records whose status moved underneath the sweep; retried next time.
    pub skipped: u64,
    /// Committed records found with a missing or corrupt blob.
    pub violations: u64,
    /// Records that could not be processed this sweep.
    pub errors: u64,
}

impl ReconcileReport {
    /// Whether the sweep changed or failed anything.
    pub fn is_quiet(&self) -> bool {
        self.recovered == 0
            && self.orphaned == 0
            && self.purged == 0
            && self.skipped == 0
            && self.violations == 0
            && self.errors == 0
    }
}

/// Repairs records left behind by interrupted uploads and deletes.
///
/// Four passes per sweep: stale pending records are resolved against the
/// blob store, orphans are purged, tombstones get their physical cleanup
/// finished, and a batch of committed records is verified against their
/// recorded checksums. Every transition is a conditional update, so the
/// reconciler can run concurrently with live uploads without clobbering
/// them.
pub struct Reconciler {
    storage: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    batch_limit: u32,
    // Keyset cursor into the committed rows, wrapping at the end, so every
    // record is eventually verified even when one sweep covers only a batch.
    verify_cursor: tokio::sync::Mutex<Option<String>>,
}

impl Reconciler {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        batch_limit: u32,
    ) -> Self {
        Self {
            storage,
            metadata,
            batch_limit,
            verify_cursor: tokio::sync::Mutex::new(None),
        }
    }

    /// Run one full sweep.
    ///
    /// `grace` is how long a pending record is left alone before the sweep
    /// assumes its upload is dead. It must comfortably exceed the longest
    /// expected upload, or the sweep would commit blobs whose writer might
    /// still fail and roll back nothing.
    #[instrument(skip(self))]
    pub async fn sweep(&self, grace: time::Duration) -> CoordinatorResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let cutoff = OffsetDateTime::now_utc() - grace;
        let stale = self
            .metadata
            .list_pending_older_than(cutoff, self.batch_limit)
            .await?;
        for row in &stale {
            report.scanned += 1;
            self.resolve_pending(row, &mut report).await;
        }

        let orphans = self.metadata.list_orphaned(self.batch_limit).await?;
        for row in &orphans {
            report.scanned += 1;
            self.purge(row, ImageStatus::Orphaned, &mut report).await;
        }

        let tombstones = self.metadata.list_deleted(self.batch_limit).await?;
        for row in &tombstones {
            report.scanned += 1;
            self.purge(row, ImageStatus::Deleted, &mut report).await;
        }

        // Committed records are verified a batch at a time, so a corrupt or
        // vanished blob is caught even for records nothing ever reads.
        let cursor = self.verify_cursor.lock().await.clone();
        let committed = self
            .metadata
            .list_committed_after(cursor.as_deref(), self.batch_limit)
            .await?;
        for row in &committed {
            report.scanned += 1;
            self.verify_committed(row, &mut report).await;
        }
        let next_cursor = if committed.len() < self.batch_limit as usize {
            None
        } else {
            committed.last().map(|row| row.image_key.clone())
        };
        *self.verify_cursor.lock().await = next_cursor;

        if report.is_quiet() {
            tracing::debug!(scanned = report.scanned, "Reconcile sweep clean");
        } else {
            tracing::info!(
                scanned = report.scanned,
                recovered = report.recovered,
                orphaned = report.orphaned,
                purged = report.purged,
                skipped = report.skipped,
                violations = report.violations,
                errors = report.errors,
                "Reconcile sweep repaired records"
            );
        }
        Ok(report)
    }

    /// Resolve one stale pending record against the blob store.
    async fn resolve_pending(&self, row: &ImageRow, report: &mut ReconcileReport) {
        let record = match row_to_record(row) {
            Ok(record) => record,
            Err(err) => {
                tracing::error!(key = %row.image_key, error = %err, "Unreadable pending record");
                report.errors += 1;
                return;
            }
        };
        let object_key = record.key.object_key();

        // Presence alone is not enough: a commit must only ever point at a
        // blob whose content matches the recorded checksum.
        let blob_durable = match self.storage.get(&object_key).await {
            Ok(data) => {
                let computed = ContentHash::compute(&data);
                if computed != record.checksum {
                    tracing::warn!(key = %record.key, computed = %computed, "Pending blob is corrupt");
                }
                computed == record.checksum
            }
            Err(StorageError::NotFound(_)) => false,
            Err(err) => {
                tracing::warn!(key = %record.key, error = %err, "Blob read failed, deferring");
                report.errors += 1;
                return;
            }
        };

        let outcome = if blob_durable {
            // The upload's blob landed but its commit never did. Finish it.
            self.metadata
                .mark_committed(record.key.as_str(), OffsetDateTime::now_utc())
                .await
        } else {
            // No blob after the grace window: the upload is dead.
            self.metadata.mark_orphaned(record.key.as_str()).await
        };

        match outcome {
            Ok(true) if blob_durable => {
                tracing::info!(key = %record.key, "Recovered stale pending record");
                report.recovered += 1;
            }
            Ok(true) => {
                tracing::info!(key = %record.key, "Orphaned stale pending record");
                report.orphaned += 1;
            }
            // CAS lost to a live uploader; leave it alone.
            Ok(false) => report.skipped += 1,
            Err(err) => {
                tracing::warn!(key = %record.key, error = %err, "Pending repair failed");
                report.errors += 1;
            }
        }
    }

    /// Verify one committed record's blob against its recorded checksum.
    ///
    /// A violation here is the fatal invariant: a committed record whose
    /// blob is missing or corrupt. It is surfaced loudly but not repaired;
    /// the content cannot be reconstructed from metadata.
    async fn verify_committed(&self, row: &ImageRow, report: &mut ReconcileReport) {
        let record = match row_to_record(row) {
            Ok(record) => record,
            Err(err) => {
                tracing::error!(key = %row.image_key, error = %err, "Unreadable committed record");
                report.errors += 1;
                return;
            }
        };

        let intact = match self.storage.get(&record.key.object_key()).await {
            Ok(data) => ContentHash::compute(&data) == record.checksum,
            Err(StorageError::NotFound(_)) => false,
            Err(err) => {
                tracing::warn!(key = %record.key, error = %err, "Blob read failed, deferring");
                report.errors += 1;
                return;
            }
        };
        if intact {
            return;
        }

        // The record may have been tombstoned between the page query and
        // the blob read; only a still-committed record is a violation.
        match self.metadata.get_image(record.key.as_str()).await {
            Ok(Some(current)) if current.status == ImageStatus::Committed.as_str() => {
                tracing::error!(key = %record.key, "Committed record has missing or corrupt blob");
                report.violations += 1;
            }
            Ok(_) => report.skipped += 1,
            Err(err) => {
                tracing::warn!(key = %record.key, error = %err, "Record re-read failed");
                report.errors += 1;
            }
        }
    }

    /// Remove a terminal record's blob, then its row.
    ///
    /// Blob first: if the row delete then fails, the next sweep simply
    /// deletes a missing blob again, which is a no-op.
    async fn purge(&self, row: &ImageRow, expect: ImageStatus, report: &mut ReconcileReport) {
        let record = match row_to_record(row) {
            Ok(record) => record,
            Err(err) => {
                tracing::error!(key = %row.image_key, error = %err, "Unreadable terminal record");
                report.errors += 1;
                return;
            }
        };

        if let Err(err) = self.storage.delete(&record.key.object_key()).await {
            tracing::warn!(key = %record.key, error = %err, "Blob purge failed, deferring");
            report.errors += 1;
            return;
        }

        match self
            .metadata
            .delete_image(record.key.as_str(), expect.as_str())
            .await
        {
            Ok(true) => {
                tracing::info!(key = %record.key, status = expect.as_str(), "Purged record");
                report.purged += 1;
            }
            // Already purged by a concurrent sweep.
            Ok(false) => report.skipped += 1,
            Err(err) => {
                tracing::warn!(key = %record.key, error = %err, "Row purge failed");
                report.errors += 1;
            }
        }
    }

    /// Run sweeps forever on a fixed interval.
    ///
    /// Errors are logged and the loop continues; a broken store on one
    /// sweep must not stop future repairs.
    pub fn spawn(self: Arc<Self>, interval: std::time::Duration, grace: time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a fresh process
            // does not sweep before uploads in flight at startup settle.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = self.sweep(grace).await {
                    tracing::error!(error = %err, "Reconcile sweep failed");
                }
            }
        })
    }
}
