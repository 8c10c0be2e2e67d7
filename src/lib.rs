//! # bloodwork
//!
//! Extract structured lab results from blood-test PDFs using Vision
//! Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! Lab reports are the worst case for text-based PDF extraction: dense
//! multi-column tables, superscript flags, reference ranges squeezed into
//! narrow cells, and hundreds of lab-specific layouts. Text extractors
//! (pdftotext, pdf-extract) garble the column alignment that carries all
//! the meaning. Instead this crate rasterises each page into an image and
//! lets a VLM read it as a clinician would, returning one JSON record per
//! analyte which is then strictly normalized, deduplicated per owner, and
//! persisted.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF upload
//!  │
//!  ├─ 1. Hash       SHA-256 of the raw bytes (idempotency key)
//!  ├─ 2. Guard      refuse documents already processed for this owner
//!  ├─ 3. Raster     render pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 4. Encode     PNG → base64 data URI per page
//!  ├─ 5. Vision     one model call per page, sequential within a document
//!  ├─ 6. Parse      tolerant JSON recovery from the model's free text
//!  ├─ 7. Normalize  strings → typed values, ranges, ISO dates, status
//!  └─ 8. Persist    result batch first, processed-marker strictly after
//! ```
//!
//! Per-page failures are non-fatal: a ten-page report with one unreadable
//! page still yields nine pages of results, with the failure recorded in
//! the per-page outcomes. The whole document fails only when every model
//! call fails, or on fatal conditions (not a PDF, rasterisation error,
//! duplicate, persistence refusal).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bloodwork::pipeline::raster::PdfiumRasterizer;
//! use bloodwork::pipeline::vision::OpenAiVisionClient;
//! use bloodwork::store::{MemoryMarkerStore, MemoryResultStore};
//! use bloodwork::{IngestConfig, Ingestor};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IngestConfig::builder()
//!         .api_key(std::env::var("OPENAI_API_KEY")?)
//!         .build()?;
//!
//!     let ingestor = Ingestor::new(
//!         Arc::new(PdfiumRasterizer::new(&config)),
//!         Arc::new(OpenAiVisionClient::new(&config)?),
//!         Arc::new(MemoryResultStore::new()),
//!         Arc::new(MemoryMarkerStore::new()),
//!         config,
//!     );
//!
//!     let pdf = std::fs::read("lab-report.pdf")?;
//!     let output = ingestor.ingest("user-42", "lab-report.pdf", &pdf).await?;
//!     for r in &output.results {
//!         println!("{}: {} {}", r.test_name, r.result_value, r.unit.as_deref().unwrap_or(""));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on      | Enables the HTTP API and the `bloodworkd` binary (axum + clap + anyhow + tracing-subscriber) |
//!
//! Disable `server` when embedding only the library:
//! ```toml
//! bloodwork = { version = "0.4", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod hash;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod prompts;
pub mod store;
pub mod uploads;

#[cfg(feature = "server")]
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{IngestConfig, IngestConfigBuilder};
pub use error::{IngestError, PageError};
pub use extract::extract_document;
pub use hash::content_hash;
pub use ingest::Ingestor;
pub use model::{
    FileInfo, IngestOutput, IngestStats, LabResult, LabStatus, PageOutcome, ProcessedFileMarker,
    RawLabRecord,
};
pub use uploads::{UploadManager, UploadObserver, UploadObserverHandle, UploadStatus, UploadTask};
