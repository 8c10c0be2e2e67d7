//! Data model: raw model output, normalized results, markers, and per-request
//! reporting types.
//!
//! Two record shapes exist on purpose. [`RawLabRecord`] is what the vision
//! model claims it saw — every field optional, every field a string, unknown
//! fields ignored — because model output has no enforced schema and must
//! never be trusted as typed. [`LabResult`] is what the application persists:
//! strictly typed, validated, and carrying the provenance fields (content
//! hash, owner) the idempotency guard depends on. The only path from one to
//! the other is [`crate::pipeline::normalize`].

use crate::error::PageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One lab result as emitted by the vision model, before any validation.
///
/// Lenient by construction: the model may omit fields, invent extra ones, or
/// put garbage in `value`. Deserialization therefore accepts anything
/// object-shaped; the normalizer decides what survives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawLabRecord {
    #[serde(default)]
    pub test: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// Numeric value as a string, e.g. `"52"` or `"52.3"`.
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    /// Free-form range verbatim from the report, e.g. `"40-60"`, `"< 5"`.
    #[serde(default)]
    pub reference_range: Option<String>,
    /// Model-claimed status string (`normal`/`high`/`low`), fallback only.
    #[serde(default)]
    pub status: Option<String>,
    /// Per-test date, or the document-level date when the report prints none.
    #[serde(default)]
    pub date: Option<String>,
}

/// Interpretation of a result value against its reference bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabStatus {
    #[default]
    Normal,
    High,
    Low,
}

impl LabStatus {
    /// Parse the model-provided status string. Anything unrecognised reads
    /// as [`LabStatus::Normal`]; bounds-based recomputation dominates
    /// whenever bounds are usable, so this is only the fallback path.
    pub fn from_model_str(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("high") | Some("h") => LabStatus::High,
            Some("low") | Some("l") => LabStatus::Low,
            _ => LabStatus::Normal,
        }
    }
}

/// One strictly-typed, persisted blood-test result.
///
/// Invariants (enforced by the normalizer, assumed everywhere else):
/// `result_value` is finite; `reference_min <= reference_max` when both are
/// present; `source_file_hash` is the content hash of the originating PDF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabResult {
    pub id: Uuid,
    pub test_name: String,
    pub category: Option<String>,
    pub result_value: f64,
    pub unit: Option<String>,
    pub reference_min: Option<f64>,
    pub reference_max: Option<f64>,
    pub status: LabStatus,
    /// Canonical `YYYY-MM-DD` when the source date parsed; the original
    /// string verbatim when it did not; `None` when the model attributed no
    /// date at all. Best effort, never a drop reason.
    pub test_date: Option<String>,
    pub source_file_hash: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

/// Marker asserting "this file's extraction pipeline has completed" for one
/// `(hash, owner)` pair.
///
/// Written strictly after the result batch persists. A marker found with
/// zero corresponding results is orphaned (a prior partial run) and is
/// deleted by the guard on the next attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedFileMarker {
    pub source_file_hash: String,
    pub owner_id: String,
    pub file_name: String,
    pub processed_at: DateTime<Utc>,
}

/// Size and page count of the ingested document, echoed back to the caller
/// for debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub size: u64,
    pub pages: u32,
}

/// What happened to one page of the document.
///
/// A page either contributed `records` raw records or carries the
/// [`PageError`] that explains why it contributed none. Per-page failures
/// are non-fatal; callers inspect these to report partial success.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageOutcome {
    /// 1-based page number.
    pub page: u32,
    /// Raw records recovered from this page before normalization.
    pub records: usize,
    pub error: Option<PageError>,
    pub duration_ms: u64,
}

impl PageOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate counters for one ingest request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStats {
    pub total_pages: usize,
    /// Pages whose response parsed into records (possibly zero records).
    pub parsed_pages: usize,
    pub failed_pages: usize,
    /// Raw records across all pages, before normalization drops.
    pub raw_records: usize,
    /// Records that survived normalization and were persisted.
    pub kept_records: usize,
    pub raster_duration_ms: u64,
    pub model_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Full result of one successful ingest: the persisted records plus the
/// per-page breakdown and counters the caller may want to surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestOutput {
    pub results: Vec<LabResult>,
    pub pages: Vec<PageOutcome>,
    pub file: FileInfo,
    pub stats: IngestStats,
}
