//! Storage seams: persisted results, processed-file markers, raw files.
//!
//! The pipeline treats storage as an external collaborator behind three
//! deliberately narrow traits — narrow enough that the idempotency guard's
//! ordering rules ("marker strictly after batch") are visible in the call
//! sequence, and that tests can swap in doubles which count calls or fail
//! on command. The in-memory implementations back the tests and local
//! development; a real deployment implements the same traits over its
//! database and object store.

use crate::model::{LabResult, ProcessedFileMarker};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;

/// Failure inside a storage backend.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StoreError(pub String);

/// Persistence for normalized results.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert a batch atomically: either every result lands or none do.
    async fn insert_batch(&self, results: &[LabResult]) -> Result<(), StoreError>;

    /// Number of persisted results for one `(owner, file hash)` pair. The
    /// idempotency guard uses this to tell a completed document from an
    /// orphaned marker.
    async fn count_by_hash(&self, owner_id: &str, file_hash: &str) -> Result<usize, StoreError>;
}

/// Persistence for processed-file markers.
#[async_trait]
pub trait MarkerStore: Send + Sync {
    async fn get(
        &self,
        owner_id: &str,
        file_hash: &str,
    ) -> Result<Option<ProcessedFileMarker>, StoreError>;

    async fn put(&self, marker: ProcessedFileMarker) -> Result<(), StoreError>;

    /// Remove a marker. Deleting a missing marker is not an error.
    async fn delete(&self, owner_id: &str, file_hash: &str) -> Result<(), StoreError>;
}

/// Where the original upload ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub key: String,
    /// Public or signed URL, when the backend has one.
    pub url: Option<String>,
}

/// Object storage for the uploaded PDF itself.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn put(
        &self,
        owner_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, StoreError>;
}

// ── In-memory implementations ────────────────────────────────────────────

/// Result store over a `Vec` behind a tokio mutex.
#[derive(Default)]
pub struct MemoryResultStore {
    rows: Mutex<Vec<LabResult>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All rows, for assertions in tests.
    pub async fn dump(&self) -> Vec<LabResult> {
        self.rows.lock().await.clone()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn insert_batch(&self, results: &[LabResult]) -> Result<(), StoreError> {
        self.rows.lock().await.extend_from_slice(results);
        Ok(())
    }

    async fn count_by_hash(&self, owner_id: &str, file_hash: &str) -> Result<usize, StoreError> {
        Ok(self
            .rows
            .lock()
            .await
            .iter()
            .filter(|r| r.owner_id == owner_id && r.source_file_hash == file_hash)
            .count())
    }
}

/// Marker store over a `HashMap` keyed by `(owner, hash)`.
#[derive(Default)]
pub struct MemoryMarkerStore {
    markers: Mutex<HashMap<(String, String), ProcessedFileMarker>>,
}

impl MemoryMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MarkerStore for MemoryMarkerStore {
    async fn get(
        &self,
        owner_id: &str,
        file_hash: &str,
    ) -> Result<Option<ProcessedFileMarker>, StoreError> {
        Ok(self
            .markers
            .lock()
            .await
            .get(&(owner_id.to_string(), file_hash.to_string()))
            .cloned())
    }

    async fn put(&self, marker: ProcessedFileMarker) -> Result<(), StoreError> {
        self.markers.lock().await.insert(
            (marker.owner_id.clone(), marker.source_file_hash.clone()),
            marker,
        );
        Ok(())
    }

    async fn delete(&self, owner_id: &str, file_hash: &str) -> Result<(), StoreError> {
        self.markers
            .lock()
            .await
            .remove(&(owner_id.to_string(), file_hash.to_string()));
        Ok(())
    }
}

/// File store over a `HashMap`; keys look like real object-store keys so
/// callers exercise the same shapes they would in production.
#[derive(Default)]
pub struct MemoryFileStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.lock().await.is_empty()
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn put(
        &self,
        owner_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, StoreError> {
        let key = format!("{owner_id}/{}-{file_name}", Utc::now().timestamp_millis());
        self.objects
            .lock()
            .await
            .insert(key.clone(), bytes.to_vec());
        Ok(StoredFile { key, url: None })
    }
}
