//! Document extraction driver: PDF bytes in, normalized results out.
//!
//! ## Why a single eager driver?
//!
//! A lab report is small (pages, not hundreds of pages) and its value is
//! additive: every page may contribute results, and one bad page must not
//! cost the others. The driver therefore walks pages **sequentially**,
//! absorbing per-page failures into [`PageOutcome`]s, and aborts only for
//! document-level conditions: not a PDF, rasterization failure, or every
//! single page failing at the model-call layer. Concurrency lives one
//! level up, across files, where requests are independent.
//!
//! This function knows nothing about persistence or duplicates; that is
//! [`crate::ingest::Ingestor`]'s job.

use crate::error::IngestError;
use crate::model::{FileInfo, IngestOutput, IngestStats, PageOutcome};
use crate::pipeline::encode::encode_page;
use crate::pipeline::normalize::{normalize_records, NormalizeContext};
use crate::pipeline::parse::extract_records;
use crate::pipeline::raster::PageRasterizer;
use crate::pipeline::vision::{call_page, VisionModel};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Run the full extraction pipeline over one PDF.
///
/// # Returns
/// `Ok(IngestOutput)` on success, even if some pages failed (check
/// `output.stats.failed_pages` and the per-page outcomes).
///
/// # Errors
/// Fatal only:
/// - [`IngestError::NotAPdf`] — the bytes are not a PDF
/// - rasterization errors, including timeout and password protection
/// - [`IngestError::AllPagesFailed`] — every page failed its model call
pub async fn extract_document(
    raster: &Arc<dyn PageRasterizer>,
    vision: &Arc<dyn VisionModel>,
    pdf_bytes: &[u8],
    ctx: &NormalizeContext<'_>,
) -> Result<IngestOutput, IngestError> {
    let total_start = Instant::now();

    // ── Step 1: Validate input ───────────────────────────────────────────
    validate_pdf_magic(pdf_bytes)?;

    // ── Step 2: Rasterize pages ──────────────────────────────────────────
    let raster_start = Instant::now();
    let page_images = raster.rasterize(pdf_bytes).await?;
    let raster_duration_ms = raster_start.elapsed().as_millis() as u64;
    let total_pages = page_images.len();
    info!(
        pages = total_pages,
        ms = raster_duration_ms,
        "Rasterized document"
    );

    let file = FileInfo {
        size: pdf_bytes.len() as u64,
        pages: total_pages as u32,
    };

    // ── Step 3: Extract each page, in order ──────────────────────────────
    //
    // One model call per page. No retries: a failed page is recorded and
    // the document moves on; re-running the file is the user's decision.
    let model_start = Instant::now();
    let mut pages: Vec<PageOutcome> = Vec::with_capacity(total_pages);
    let mut raw_records = Vec::new();

    for page_image in &page_images {
        let page_start = Instant::now();
        let page_num = page_image.page;

        let (error, records) = match encode_page(page_image) {
            Err(e) => {
                warn!(page = page_num, "Image encoding failed: {e}");
                let err = crate::error::PageError::Extraction {
                    page: page_num,
                    detail: format!("image encoding failed: {e}"),
                };
                (Some(err), 0)
            }
            Ok(encoded) => match call_page(vision, &encoded).await {
                Err(e) => (Some(e), 0),
                Ok(text) => match extract_records(&text) {
                    Ok(records) => {
                        debug!(page = page_num, records = records.len(), "Page parsed");
                        let count = records.len();
                        raw_records.extend(records);
                        (None, count)
                    }
                    Err(failure) => (Some(failure.into_page_error(page_num)), 0),
                },
            },
        };

        pages.push(PageOutcome {
            page: page_num,
            records,
            error,
            duration_ms: page_start.elapsed().as_millis() as u64,
        });
    }
    let model_duration_ms = model_start.elapsed().as_millis() as u64;

    // ── Step 4: Abort if no page produced a usable model response ────────
    let all_calls_failed = !pages.is_empty()
        && pages
            .iter()
            .all(|p| p.error.as_ref().is_some_and(|e| e.is_extraction_failure()));
    if all_calls_failed {
        let first_error = pages
            .iter()
            .find_map(|p| p.error.as_ref())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(IngestError::AllPagesFailed {
            total: pages.len(),
            first_error,
        });
    }

    // ── Step 5: Normalize ─────────────────────────────────────────────────
    let raw_count = raw_records.len();
    let results = normalize_records(raw_records, ctx);

    // ── Step 6: Compute stats ─────────────────────────────────────────────
    let parsed_pages = pages.iter().filter(|p| p.succeeded()).count();
    let stats = IngestStats {
        total_pages,
        parsed_pages,
        failed_pages: total_pages - parsed_pages,
        raw_records: raw_count,
        kept_records: results.len(),
        raster_duration_ms,
        model_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        pages = format!("{parsed_pages}/{total_pages}"),
        kept = stats.kept_records,
        dropped = raw_count - stats.kept_records,
        ms = stats.total_duration_ms,
        "Extraction complete"
    );

    Ok(IngestOutput {
        results,
        pages,
        file,
        stats,
    })
}

/// Reject anything that does not start with the `%PDF` magic, before any
/// temp file or pdfium work happens.
fn validate_pdf_magic(bytes: &[u8]) -> Result<(), IngestError> {
    let mut magic = [0u8; 4];
    let n = bytes.len().min(4);
    magic[..n].copy_from_slice(&bytes[..n]);
    if &magic != b"%PDF" {
        return Err(IngestError::NotAPdf { magic });
    }
    Ok(())
}
