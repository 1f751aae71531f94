mod common;

use common::{MemoryBackend, coordinator, png_payload, sqlite_store};
use darkroom_core::ContentHash;
use darkroom_coordinator::CoordinatorError;
use darkroom_metadata::{ImageRepo, MetadataStore};
use darkroom_storage::ObjectStore;
use std::sync::Arc;

#[tokio::test]
async fn delete_removes_blob_and_record() {
    let dir = tempfile::tempdir().unwrap();
    let storage = MemoryBackend::new();
    let metadata: Arc<dyn MetadataStore> = Arc::new(sqlite_store(&dir).await);
    let coord = coordinator(storage.clone(), metadata.clone());

    let record = coord.upload(png_payload(1), None).await.unwrap();
    coord.delete(&record.key).await.unwrap();

    assert!(!storage.exists(&record.key.object_key()).await.unwrap());
    assert!(
        metadata
            .get_image(record.key.as_str())
            .await
            .unwrap()
            .is_none()
    );
    let err = coord.lookup(&record.key).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::NotFound(_)));
    assert_eq!(
        coord
            .count_by_status(darkroom_core::ImageStatus::Committed)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn delete_of_unknown_key_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let storage = MemoryBackend::new();
    let metadata: Arc<dyn MetadataStore> = Arc::new(sqlite_store(&dir).await);
    let coord = coordinator(storage, metadata);

    let key = darkroom_core::ImageKey::from_hash(&ContentHash::compute(b"missing"));
    let err = coord.delete(&key).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::NotFound(_)));
}

#[tokio::test]
async fn delete_of_invisible_record_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let storage = MemoryBackend::new();
    let metadata: Arc<dyn MetadataStore> = Arc::new(sqlite_store(&dir).await);
    let coord = coordinator(storage.clone(), metadata);

    // Failed blob write leaves a pending row; it was never visible, so it
    // cannot be deleted.
    let payload = png_payload(2);
    let key = darkroom_core::ImageKey::from_hash(&ContentHash::compute(&payload));
    storage.fail_next_puts(1);
    coord.upload(payload, None).await.unwrap_err();

    let err = coord.delete(&key).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::NotFound(_)));
}

#[tokio::test]
async fn failed_blob_delete_keeps_tombstone_and_hides_record() {
    let dir = tempfile::tempdir().unwrap();
    let storage = MemoryBackend::new();
    let metadata: Arc<dyn MetadataStore> = Arc::new(sqlite_store(&dir).await);
    let coord = coordinator(storage.clone(), metadata.clone());

    let record = coord.upload(png_payload(3), None).await.unwrap();

    // Exhaust all three delete attempts.
    storage.fail_next_deletes(3);
    coord.delete(&record.key).await.unwrap();

    // Blob still present, but the tombstone hides the record.
    assert!(storage.exists(&record.key.object_key()).await.unwrap());
    let row = metadata
        .get_image(record.key.as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "deleted");
    assert!(row.deleted_at.is_some());
    let err = coord.lookup(&record.key).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::NotFound(_)));

    // Repeating the delete against the tombstone is a no-op success.
    coord.delete(&record.key).await.unwrap();
}

#[tokio::test]
async fn transient_blob_delete_failure_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let storage = MemoryBackend::new();
    let metadata: Arc<dyn MetadataStore> = Arc::new(sqlite_store(&dir).await);
    let coord = coordinator(storage.clone(), metadata.clone());

    let record = coord.upload(png_payload(4), None).await.unwrap();

    // Two failures fit inside the three-attempt budget, so the cleanup
    // still completes inline.
    storage.fail_next_deletes(2);
    coord.delete(&record.key).await.unwrap();

    assert!(!storage.exists(&record.key.object_key()).await.unwrap());
    assert!(
        metadata
            .get_image(record.key.as_str())
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn tombstoned_key_blocks_reupload_until_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    let storage = MemoryBackend::new();
    let metadata: Arc<dyn MetadataStore> = Arc::new(sqlite_store(&dir).await);
    let coord = coordinator(storage.clone(), metadata);

    let payload = png_payload(5);
    let record = coord.upload(payload.clone(), None).await.unwrap();

    storage.fail_next_deletes(3);
    coord.delete(&record.key).await.unwrap();

    let err = coord.upload(payload, None).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::UploadFailed(_)));
}
