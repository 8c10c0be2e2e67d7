//! Normalization: turn tolerant [`RawLabRecord`]s into typed [`LabResult`]s.
//!
//! ## Why normalize?
//!
//! The vision model reports everything as strings — values like `"52"` or
//! `"52.3 mg/dL"`, ranges like `"40-60"` or `"< 5"`, dates in whatever
//! format the lab printed. The application needs finite floats, independent
//! numeric bounds, and canonical dates. Each rule here is a pure function
//! over one field:
//!
//! - values parse to `f64` or the record is silently dropped
//! - ranges split into independent optional min/max bounds
//! - dates canonicalize to `YYYY-MM-DD`, keeping the original on failure
//! - status is recomputed from the bounds when they are usable, falling
//!   back to the model's claim when they are not
//!
//! A record missing its test name or a parseable value adds no information,
//! so it is dropped with a debug log rather than failing the document.

use crate::model::{LabResult, LabStatus, RawLabRecord};
use chrono::{NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use uuid::Uuid;

/// Provenance attached to every normalized record.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeContext<'a> {
    /// Content hash of the originating PDF.
    pub source_file_hash: &'a str,
    pub owner_id: &'a str,
}

/// Normalize a batch of raw records, dropping the unusable ones.
///
/// Never fails: the worst case is an empty vector. Drops are logged at
/// debug level with the reason so a curious operator can see what the
/// model produced.
pub fn normalize_records(raw: Vec<RawLabRecord>, ctx: &NormalizeContext<'_>) -> Vec<LabResult> {
    let mut results = Vec::with_capacity(raw.len());

    for record in raw {
        let test_name = match record.test.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                debug!(?record, "Dropping record without a test name");
                continue;
            }
        };

        let result_value = match record.value.as_deref().and_then(parse_value) {
            Some(v) => v,
            None => {
                debug!(
                    test = %test_name,
                    value = record.value.as_deref().unwrap_or("<missing>"),
                    "Dropping record with unparsable value"
                );
                continue;
            }
        };

        let (reference_min, reference_max) = record
            .reference_range
            .as_deref()
            .map(parse_reference_range)
            .unwrap_or((None, None));

        let status = resolve_status(
            result_value,
            reference_min,
            reference_max,
            record.status.as_deref(),
        );

        let test_date = record
            .date
            .map(|original| normalize_date(&original).unwrap_or(original));

        results.push(LabResult {
            id: Uuid::new_v4(),
            test_name,
            category: record.category.filter(|c| !c.trim().is_empty()),
            result_value,
            unit: record.unit.filter(|u| !u.trim().is_empty()),
            reference_min,
            reference_max,
            status,
            test_date,
            source_file_hash: ctx.source_file_hash.to_string(),
            owner_id: ctx.owner_id.to_string(),
            created_at: Utc::now(),
        });
    }

    results
}

// ── Value parsing ────────────────────────────────────────────────────────

static RE_FLOAT_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?").unwrap());

/// Parse a value string to a finite float.
///
/// Accepts a full numeric string or a numeric prefix followed by junk
/// (`"52.3 mg/dL"` parses as `52.3`). Anything without a leading number,
/// including inequality forms like `"<5"`, yields `None`.
pub fn parse_value(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        return Some(v).filter(|v| v.is_finite());
    }
    RE_FLOAT_PREFIX
        .find(trimmed)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

// ── Reference ranges ─────────────────────────────────────────────────────

static RE_RANGE_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([+-]?\d+(?:\.\d+)?)\s*(?:-|–|—|to)\s*([+-]?\d+(?:\.\d+)?)(?:\s.*)?$")
        .unwrap()
});
static RE_RANGE_MAX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:<=|<|≤)\s*([+-]?\d+(?:\.\d+)?)(?:\s.*)?$").unwrap());
static RE_RANGE_MIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:>=|>|≥)\s*([+-]?\d+(?:\.\d+)?)(?:\s.*)?$").unwrap());

/// Split a verbatim reference range into independent optional bounds.
///
/// Recognized shapes, with an optional trailing unit after whitespace:
///
/// - `"40-60"`, `"3.5 – 5.0"`, `"10 to 20"` → both bounds
/// - `"< 5"`, `"<= 5"`, `"≤ 5"` → upper bound only
/// - `"> 100"`, `">= 100"`, `"≥ 100"` → lower bound only
///
/// An inverted pair (min greater than max) is treated as unparsable — a
/// range the source contradicts is not worth trusting half of. Unparsable
/// input yields `(None, None)`, never an error.
pub fn parse_reference_range(raw: &str) -> (Option<f64>, Option<f64>) {
    if let Some(caps) = RE_RANGE_PAIR.captures(raw) {
        let min = caps[1].parse::<f64>().ok();
        let max = caps[2].parse::<f64>().ok();
        return match (min, max) {
            (Some(lo), Some(hi)) if lo > hi => (None, None),
            _ => (min, max),
        };
    }
    if let Some(caps) = RE_RANGE_MAX.captures(raw) {
        return (None, caps[1].parse::<f64>().ok());
    }
    if let Some(caps) = RE_RANGE_MIN.captures(raw) {
        return (caps[1].parse::<f64>().ok(), None);
    }
    (None, None)
}

// ── Dates ────────────────────────────────────────────────────────────────

/// Accepted input formats, tried in order. ISO first; ambiguous numeric
/// dates read as US month-first before day-first, matching the reports
/// this pipeline was built against.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%m-%d-%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];

/// Canonicalize a date string to `YYYY-MM-DD`, or `None` if no known
/// format matches. Callers keep the original string on `None` — a weird
/// date is still better provenance than no date.
pub fn normalize_date(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(trimmed, fmt)
            .ok()
            .map(|d| d.format("%Y-%m-%d").to_string())
    })
}

// ── Status ───────────────────────────────────────────────────────────────

/// Decide a result's status.
///
/// When both bounds are present and consistent, the status is recomputed
/// from them and the model's claim is ignored. With one bound, no bounds,
/// or inverted bounds, the model's string is the only signal left.
pub fn resolve_status(
    value: f64,
    min: Option<f64>,
    max: Option<f64>,
    model_status: Option<&str>,
) -> LabStatus {
    if let (Some(lo), Some(hi)) = (min, max) {
        if lo <= hi {
            return if value < lo {
                LabStatus::Low
            } else if value > hi {
                LabStatus::High
            } else {
                LabStatus::Normal
            };
        }
    }
    LabStatus::from_model_str(model_status)
}

// ── Tests ────────────────────────────────────────────────────────────────
