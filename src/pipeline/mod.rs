//! Pipeline stages for lab-report extraction.
//!
//! Each submodule implements exactly one transformation step. Keeping stages
//! separate makes each independently testable and lets us swap an
//! implementation (e.g. a different rasterisation backend, a different model
//! vendor) without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! raster ──▶ encode ──▶ vision ──▶ parse ──▶ normalize
//! (pdfium)   (base64)   (VLM)      (tolerant  (strict
//!                                   JSON)      records)
//! ```
//!
//! 1. [`raster`]    — stage the PDF bytes to a scratch file and rasterise
//!    every page; runs in `spawn_blocking` because pdfium is not async-safe
//! 2. [`encode`]    — PNG-encode and base64-wrap each page image for the
//!    multimodal API request body
//! 3. [`vision`]    — one model call per page; the only stage with network
//!    I/O, and the seam faked in tests
//! 4. [`parse`]     — recover a JSON array from the model's free-text reply;
//!    typed failure, never a panic
//! 5. [`normalize`] — coerce loose string records into persisted
//!    [`crate::model::LabResult`]s

pub mod encode;
pub mod normalize;
pub mod parse;
pub mod raster;
pub mod vision;
