//! Error types for the bloodwork library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`IngestError`] — **Fatal**: the request cannot proceed at all (not a
//!   PDF, rasterization produced nothing, duplicate document, persistence
//!   refused the batch). Returned as `Err(IngestError)` from the top-level
//!   ingest functions.
//!
//! * [`PageError`] — **Non-fatal**: a single page failed (model call error,
//!   no JSON in the response, JSON that would not parse) but the other pages
//!   are fine. Stored inside [`crate::model::PageOutcome`] so callers can
//!   inspect partial success rather than losing the whole document to one
//!   bad page.
//!
//! The separation is load-bearing: a multi-page lab report's value is
//! additive, so per-page parse failures are absorbed and logged while fatal
//! conditions abort before any work is wasted.

use thiserror::Error;

/// All fatal errors returned by the bloodwork library.
///
/// Page-level failures use [`PageError`] and are stored in
/// [`crate::model::PageOutcome`] rather than propagated here.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The uploaded bytes are not a PDF.
    #[error("Uploaded file is not a valid PDF.\nFirst bytes: {magic:?}")]
    NotAPdf { magic: [u8; 4] },

    /// The PDF is encrypted; the pipeline does not accept passwords.
    #[error("PDF is password-protected and cannot be processed.\nRemove the password (e.g. qpdf --decrypt in.pdf out.pdf) and re-upload.")]
    PasswordProtected,

    // ── Rasterization errors ──────────────────────────────────────────────
    /// pdfium could not produce any page image (corrupt file, zero pages).
    #[error("Could not read PDF: {detail}")]
    Rasterization { detail: String },

    /// Rasterization exceeded the configured timeout.
    #[error("PDF rasterization timed out after {secs}s\nIncrease raster_timeout_secs for very large documents.")]
    RasterTimeout { secs: u64 },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium, place the library next to the\n\
executable, or install pdfium system-wide."
    )]
    PdfiumBinding(String),

    // ── Extraction errors ─────────────────────────────────────────────────
    /// Every page failed at the model-call layer; there is nothing to keep.
    #[error("All {total} pages failed extraction.\nFirst error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    // ── Idempotency ───────────────────────────────────────────────────────
    /// Results for this file hash already exist for this owner.
    ///
    /// User-facing as a distinct "duplicate" outcome, not a generic error:
    /// the upload UI renders it with its own terminal state and offers no
    /// retry (re-running would refuse again).
    #[error("This file has already been processed (hash {file_hash})")]
    Duplicate { file_hash: String },

    // ── Collaborator errors ───────────────────────────────────────────────
    /// The normalized batch could not be written to the result store.
    ///
    /// Must never be followed by a marker write (ordering invariant): a
    /// crash here leaves the document orphaned and safely retryable.
    #[error("Failed to persist extracted results: {detail}")]
    Persistence { detail: String },

    /// The original file could not be uploaded to the object store.
    #[error("Failed to store uploaded file '{file_name}': {detail}")]
    Storage { file_name: String, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    /// True when the error is the duplicate outcome, which the upload UI
    /// treats as its own terminal state rather than a failure.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, IngestError::Duplicate { .. })
    }
}

/// A non-fatal error for a single page.
///
/// Stored in [`crate::model::PageOutcome`] when a page fails. The overall
/// ingest continues unless ALL pages fail at the model-call layer.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The vision model call failed (network, HTTP status, malformed reply).
    #[error("Page {page}: extraction call failed: {detail}")]
    Extraction { page: u32, detail: String },

    /// The vision model call timed out.
    #[error("Page {page}: extraction call timed out after {secs}s")]
    Timeout { page: u32, secs: u64 },

    /// The response contained no bracketed JSON array at all.
    #[error("Page {page}: no JSON array found in model response")]
    NoJsonFound { page: u32 },

    /// A candidate JSON slice was found but strict parsing rejected it.
    #[error("Page {page}: model response JSON did not parse: {detail}")]
    JsonParse {
        page: u32,
        detail: String,
        /// The offending substring, truncated, for diagnostics.
        snippet: String,
    },
}

impl PageError {
    /// 1-based page number the error belongs to.
    pub fn page(&self) -> u32 {
        match self {
            PageError::Extraction { page, .. }
            | PageError::Timeout { page, .. }
            | PageError::NoJsonFound { page }
            | PageError::JsonParse { page, .. } => *page,
        }
    }

    /// True for failures of the model call itself (as opposed to failures
    /// interpreting a response that did arrive). Used to decide whether a
    /// fully-failed document aborts with
    /// [`IngestError::AllPagesFailed`].
    pub fn is_extraction_failure(&self) -> bool {
        matches!(
            self,
            PageError::Extraction { .. } | PageError::Timeout { .. }
        )
    }
}
