//! Ingest service: the duplicate guard wrapped around extraction and
//! persistence, in a fixed order.
//!
//! ## Why the ordering matters
//!
//! For each document the sequence is: hash → guard → extract → persist
//! batch → write marker. The marker is written **strictly after** the batch
//! persists, never before. A failure anywhere in the middle leaves either
//! no trace (safe to retry) or a marker with zero results (an orphan the
//! guard heals on the next attempt by deleting the stale marker). The
//! guard runs before any rasterization or model call, so a duplicate
//! upload costs one hash and two store lookups, not a model bill.
//!
//! Two truly concurrent uploads of the same file by the same owner would
//! both pass a bare check-then-act guard. This service closes that race
//! in-process with a per-`(owner, hash)` async lock: the second upload
//! waits, then sees `Completed` and is refused. The lock table is never
//! evicted — entries are two small strings and a mutex, bounded by the
//! number of distinct documents a process sees in its lifetime.

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::extract::extract_document;
use crate::hash::content_hash;
use crate::model::{IngestOutput, ProcessedFileMarker};
use crate::pipeline::normalize::NormalizeContext;
use crate::pipeline::raster::PageRasterizer;
use crate::pipeline::vision::VisionModel;
use crate::store::{MarkerStore, ResultStore, StoreError};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Drives one document at a time through guard, extraction, and
/// persistence. Cheap to share: clone the `Arc` it lives in.
pub struct Ingestor {
    raster: Arc<dyn PageRasterizer>,
    vision: Arc<dyn VisionModel>,
    results: Arc<dyn ResultStore>,
    markers: Arc<dyn MarkerStore>,
    locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(
        raster: Arc<dyn PageRasterizer>,
        vision: Arc<dyn VisionModel>,
        results: Arc<dyn ResultStore>,
        markers: Arc<dyn MarkerStore>,
        config: IngestConfig,
    ) -> Self {
        Self {
            raster,
            vision,
            results,
            markers,
            locks: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Ingest one PDF for one owner.
    ///
    /// # Errors
    /// - [`IngestError::Duplicate`] when this exact file already has
    ///   persisted results for this owner
    /// - extraction errors from [`extract_document`]
    /// - [`IngestError::Persistence`] when the batch or marker write fails
    pub async fn ingest(
        &self,
        owner_id: &str,
        file_name: &str,
        pdf_bytes: &[u8],
    ) -> Result<IngestOutput, IngestError> {
        let file_hash = content_hash(pdf_bytes);
        info!(
            owner = %owner_id,
            file = %file_name,
            hash = %&file_hash[..12],
            size = pdf_bytes.len(),
            "Ingest requested"
        );

        // Serialize everything below per (owner, hash). Distinct documents
        // never contend.
        let key_lock = self.lock_for(owner_id, &file_hash).await;
        let _guard = key_lock.lock().await;

        self.check_duplicate(owner_id, &file_hash).await?;

        let ctx = NormalizeContext {
            source_file_hash: &file_hash,
            owner_id,
        };
        let output = extract_document(&self.raster, &self.vision, pdf_bytes, &ctx).await?;

        if output.results.is_empty() {
            // Nothing persisted, so no marker either: the document stays
            // effectively unseen and a later upload will reprocess it.
            info!(
                owner = %owner_id,
                file = %file_name,
                "Extraction kept zero records; leaving document unmarked"
            );
            return Ok(output);
        }

        self.results
            .insert_batch(&output.results)
            .await
            .map_err(persistence)?;

        self.markers
            .put(ProcessedFileMarker {
                source_file_hash: file_hash.clone(),
                owner_id: owner_id.to_string(),
                file_name: file_name.to_string(),
                processed_at: Utc::now(),
            })
            .await
            .map_err(persistence)?;

        info!(
            owner = %owner_id,
            file = %file_name,
            records = output.results.len(),
            "Ingest complete"
        );
        Ok(output)
    }

    /// Decide whether processing may proceed for this `(owner, hash)`.
    ///
    /// Three states, resolved from the marker and result stores:
    /// - no marker: unseen, proceed
    /// - marker and at least one result: completed, refuse as duplicate
    /// - marker and zero results: orphaned, delete the marker and proceed
    async fn check_duplicate(&self, owner_id: &str, file_hash: &str) -> Result<(), IngestError> {
        let marker = self
            .markers
            .get(owner_id, file_hash)
            .await
            .map_err(persistence)?;

        let Some(marker) = marker else {
            return Ok(());
        };

        let count = self
            .results
            .count_by_hash(owner_id, file_hash)
            .await
            .map_err(persistence)?;

        if count > 0 {
            info!(
                owner = %owner_id,
                hash = %&file_hash[..12],
                existing = count,
                "Refusing duplicate document"
            );
            return Err(IngestError::Duplicate {
                file_hash: file_hash.to_string(),
            });
        }

        info!(
            owner = %owner_id,
            hash = %&file_hash[..12],
            prior_file = %marker.file_name,
            "Healing orphaned marker; reprocessing"
        );
        self.markers
            .delete(owner_id, file_hash)
            .await
            .map_err(persistence)?;
        Ok(())
    }

    async fn lock_for(&self, owner_id: &str, file_hash: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry((owner_id.to_string(), file_hash.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn persistence(e: StoreError) -> IngestError {
    IngestError::Persistence {
        detail: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LabResult, LabStatus};
    use crate::pipeline::encode::EncodedPage;
    use crate::pipeline::raster::PageImage;
    use crate::pipeline::vision::VisionCallError;
    use crate::store::{MemoryMarkerStore, MemoryResultStore};
    use async_trait::async_trait;
    use image::DynamicImage;
    use uuid::Uuid;

    const PDF_STUB: &[u8] = b"%PDF-1.4 stub";

    struct OnePageRaster;

    #[async_trait]
    impl PageRasterizer for OnePageRaster {
        async fn rasterize(&self, _pdf_bytes: &[u8]) -> Result<Vec<PageImage>, IngestError> {
            Ok(vec![PageImage {
                page: 1,
                image: DynamicImage::new_rgb8(1, 1),
            }])
        }
    }

    struct FixedVision(&'static str);

    #[async_trait]
    impl VisionModel for FixedVision {
        async fn extract_page(
            &self,
            _system_prompt: &str,
            _instruction: &str,
            _page: &EncodedPage,
        ) -> Result<String, VisionCallError> {
            Ok(self.0.to_string())
        }
    }

    fn ingestor(reply: &'static str) -> (Ingestor, Arc<MemoryResultStore>, Arc<MemoryMarkerStore>) {
        let results = Arc::new(MemoryResultStore::new());
        let markers = Arc::new(MemoryMarkerStore::new());
        let ing = Ingestor::new(
            Arc::new(OnePageRaster),
            Arc::new(FixedVision(reply)),
            results.clone(),
            markers.clone(),
            IngestConfig::default(),
        );
        (ing, results, markers)
    }

    fn persisted(owner: &str, hash: &str) -> LabResult {
        LabResult {
            id: Uuid::new_v4(),
            test_name: "HDL".into(),
            category: None,
            result_value: 52.0,
            unit: None,
            reference_min: None,
            reference_max: None,
            status: LabStatus::Normal,
            test_date: None,
            source_file_hash: hash.into(),
            owner_id: owner.into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn successful_ingest_persists_batch_then_marker() {
        let (ing, results, markers) = ingestor(r#"[{"test": "HDL", "value": "52"}]"#);
        let output = ing.ingest("user-1", "report.pdf", PDF_STUB).await.unwrap();

        assert_eq!(output.results.len(), 1);
        let hash = content_hash(PDF_STUB);
        assert_eq!(results.count_by_hash("user-1", &hash).await.unwrap(), 1);
        let marker = markers.get("user-1", &hash).await.unwrap().unwrap();
        assert_eq!(marker.file_name, "report.pdf");
    }

    #[tokio::test]
    async fn empty_extraction_leaves_no_marker() {
        let (ing, results, markers) = ingestor("[]");
        let output = ing.ingest("user-1", "blank.pdf", PDF_STUB).await.unwrap();

        assert!(output.results.is_empty());
        let hash = content_hash(PDF_STUB);
        assert_eq!(results.count_by_hash("user-1", &hash).await.unwrap(), 0);
        assert!(markers.get("user-1", &hash).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn completed_state_is_refused_as_duplicate() {
        let (ing, results, markers) = ingestor("[]");
        results.insert_batch(&[persisted("user-1", "h1")]).await.unwrap();
        markers
            .put(ProcessedFileMarker {
                source_file_hash: "h1".into(),
                owner_id: "user-1".into(),
                file_name: "old.pdf".into(),
                processed_at: Utc::now(),
            })
            .await
            .unwrap();

        let err = ing.check_duplicate("user-1", "h1").await.unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn orphaned_marker_is_deleted_and_processing_proceeds() {
        let (ing, _results, markers) = ingestor("[]");
        markers
            .put(ProcessedFileMarker {
                source_file_hash: "h1".into(),
                owner_id: "user-1".into(),
                file_name: "old.pdf".into(),
                processed_at: Utc::now(),
            })
            .await
            .unwrap();

        ing.check_duplicate("user-1", "h1").await.unwrap();
        assert!(markers.get("user-1", "h1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unseen_state_proceeds() {
        let (ing, _results, _markers) = ingestor("[]");
        ing.check_duplicate("user-1", "h1").await.unwrap();
    }

    #[tokio::test]
    async fn same_owner_is_scoped_per_hash_and_per_owner() {
        let (ing, results, markers) = ingestor("[]");
        results.insert_batch(&[persisted("user-1", "h1")]).await.unwrap();
        markers
            .put(ProcessedFileMarker {
                source_file_hash: "h1".into(),
                owner_id: "user-1".into(),
                file_name: "old.pdf".into(),
                processed_at: Utc::now(),
            })
            .await
            .unwrap();

        // Same hash, different owner: unseen for them.
        ing.check_duplicate("user-2", "h1").await.unwrap();
        // Same owner, different hash: unseen too.
        ing.check_duplicate("user-1", "h2").await.unwrap();
    }

    #[tokio::test]
    async fn lock_table_hands_out_one_lock_per_key() {
        let (ing, _, _) = ingestor("[]");
        let a1 = ing.lock_for("user-1", "h1").await;
        let a2 = ing.lock_for("user-1", "h1").await;
        let b = ing.lock_for("user-1", "h2").await;
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
    }
}
