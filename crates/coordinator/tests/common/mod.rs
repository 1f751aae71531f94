#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use darkroom_core::config::{CoordinatorConfig, RetryPolicy};
use darkroom_coordinator::UploadCoordinator;
use darkroom_metadata::{ImageRepo, ImageRow, MetadataResult, MetadataStore, SqliteStore};
use darkroom_storage::{ObjectMeta, ObjectStore, StorageError, StorageResult};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;

/// In-memory object store with fault injection.
#[derive(Default)]
pub struct MemoryBackend {
    objects: Mutex<HashMap<String, Bytes>>,
    /// Number of puts actually performed (put_if_not_exists short-circuits
    /// count as well; see `puts()`).
    put_calls: AtomicU32,
    fail_puts: AtomicU32,
    fail_deletes: AtomicU32,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `n` put operations fail.
    pub fn fail_next_puts(&self, n: u32) {
        self.fail_puts.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` delete operations fail.
    pub fn fail_next_deletes(&self, n: u32) {
        self.fail_deletes.store(n, Ordering::SeqCst);
    }

    /// How many put operations have been attempted.
    pub fn puts(&self) -> u32 {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Remove an object out-of-band, simulating external blob loss.
    pub fn corrupt_remove(&self, key: &str) {
        self.objects.lock().unwrap().remove(key);
    }

    /// Overwrite an object's bytes out-of-band.
    pub fn corrupt_replace(&self, key: &str, data: Bytes) {
        self.objects.lock().unwrap().insert(key.to_string(), data);
    }

    fn take_fault(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let objects = self.objects.lock().unwrap();
        let data = objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(ObjectMeta {
            size: data.len() as u64,
            last_modified: None,
            content_type: None,
        })
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_fault(&self.fail_puts) {
            return Err(StorageError::Io(std::io::Error::other("injected put failure")));
        }
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn put_if_not_exists(&self, key: &str, data: Bytes) -> StorageResult<bool> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_fault(&self.fail_puts) {
            return Err(StorageError::Io(std::io::Error::other("injected put failure")));
        }
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(key) {
            return Ok(false);
        }
        objects.insert(key.to_string(), data);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        if Self::take_fault(&self.fail_deletes) {
            return Err(StorageError::Io(std::io::Error::other(
                "injected delete failure",
            )));
        }
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// SQLite-backed metadata store that fails `mark_committed` a set number
/// of times before delegating.
pub struct FlakyMetadata {
    inner: SqliteStore,
    fail_commits: AtomicU32,
}

impl FlakyMetadata {
    pub fn new(inner: SqliteStore) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_commits: AtomicU32::new(0),
        })
    }

    /// Make the next `n` commit transitions fail.
    pub fn fail_next_commits(&self, n: u32) {
        self.fail_commits.store(n, Ordering::SeqCst);
    }

    fn take_fault(&self) -> bool {
        self.fail_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl MetadataStore for FlakyMetadata {
    async fn migrate(&self) -> MetadataResult<()> {
        self.inner.migrate().await
    }

    async fn health_check(&self) -> MetadataResult<()> {
        self.inner.health_check().await
    }
}

#[async_trait]
impl ImageRepo for FlakyMetadata {
    async fn insert_pending(&self, row: &ImageRow) -> MetadataResult<bool> {
        self.inner.insert_pending(row).await
    }

    async fn get_image(&self, image_key: &str) -> MetadataResult<Option<ImageRow>> {
        self.inner.get_image(image_key).await
    }

    async fn mark_committed(
        &self,
        image_key: &str,
        committed_at: OffsetDateTime,
    ) -> MetadataResult<bool> {
        if self.take_fault() {
            return Err(darkroom_metadata::MetadataError::Internal(
                "injected commit failure".to_string(),
            ));
        }
        self.inner.mark_committed(image_key, committed_at).await
    }

    async fn mark_orphaned(&self, image_key: &str) -> MetadataResult<bool> {
        self.inner.mark_orphaned(image_key).await
    }

    async fn mark_deleted(
        &self,
        image_key: &str,
        deleted_at: OffsetDateTime,
    ) -> MetadataResult<bool> {
        self.inner.mark_deleted(image_key, deleted_at).await
    }

    async fn list_pending_older_than(
        &self,
        cutoff: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<ImageRow>> {
        self.inner.list_pending_older_than(cutoff, limit).await
    }

    async fn list_orphaned(&self, limit: u32) -> MetadataResult<Vec<ImageRow>> {
        self.inner.list_orphaned(limit).await
    }

    async fn list_deleted(&self, limit: u32) -> MetadataResult<Vec<ImageRow>> {
        self.inner.list_deleted(limit).await
    }

    async fn list_committed_after(
        &self,
        after_key: Option<&str>,
        limit: u32,
    ) -> MetadataResult<Vec<ImageRow>> {
        self.inner.list_committed_after(after_key, limit).await
    }

    async fn delete_image(&self, image_key: &str, expect_status: &str) -> MetadataResult<bool> {
        self.inner.delete_image(image_key, expect_status).await
    }

    async fn count_by_status(&self, status: &str) -> MetadataResult<u64> {
        self.inner.count_by_status(status).await
    }
}

/// Fresh SQLite store in a temp directory. The TempDir must outlive the
/// store.
pub async fn sqlite_store(dir: &tempfile::TempDir) -> SqliteStore {
    SqliteStore::new(dir.path().join("meta.db")).await.unwrap()
}

/// A syntactically valid PNG payload whose content varies by seed.
pub fn png_payload(seed: u8) -> Bytes {
    let mut data = vec![0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
    data.extend_from_slice(&[seed; 32]);
    Bytes::from(data)
}

/// A syntactically valid JPEG payload whose content varies by seed.
pub fn jpeg_payload(seed: u8) -> Bytes {
    let mut data = vec![0xff, 0xd8, 0xff, 0xe0];
    data.extend_from_slice(&[seed; 32]);
    Bytes::from(data)
}

/// Coordinator config with zero-delay retries so tests run fast.
pub fn fast_config() -> CoordinatorConfig {
    let retry = RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 0,
        max_delay_ms: 0,
    };
    CoordinatorConfig {
        max_image_bytes: 1024 * 1024,
        commit_retry: retry,
        delete_retry: retry,
    }
}

/// Coordinator over the given stores with fast retries.
pub fn coordinator(
    storage: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
) -> UploadCoordinator {
    UploadCoordinator::new(storage, metadata, fast_config())
}
