//! Tolerant extraction of the JSON records array from model output.
//!
//! ## Why tolerance?
//!
//! Vision models are asked for a bare JSON array but routinely wrap it in
//! prose ("Here are the results I found: ...") or markdown code fences.
//! Rather than fail the page, we first try the whole trimmed reply as JSON
//! and then fall back to the widest bracketed window: the substring from
//! the first `[` to the last `]`. Anything that still fails becomes a typed
//! per-page failure — this module never panics and never aborts a document.

use crate::error::PageError;
use crate::model::RawLabRecord;
use thiserror::Error;

/// Longest slice of offending text carried in a parse failure. Enough to
/// diagnose the model's formatting without dumping whole replies into logs.
const SNIPPET_MAX: usize = 160;

/// Why a model reply yielded no records.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseFailure {
    #[error("no JSON array found in model reply")]
    NoJsonFound,
    #[error("JSON array failed to parse: {detail}")]
    Invalid { detail: String, snippet: String },
}

impl ParseFailure {
    /// Attribute this failure to a page, producing the non-fatal error the
    /// pipeline records in that page's outcome.
    pub fn into_page_error(self, page: u32) -> PageError {
        match self {
            ParseFailure::NoJsonFound => PageError::NoJsonFound { page },
            ParseFailure::Invalid { detail, snippet } => PageError::JsonParse {
                page,
                detail,
                snippet,
            },
        }
    }
}

/// Pull the records array out of a raw model reply.
///
/// Strategy, in order:
/// 1. Parse the trimmed reply directly — the happy path when the model
///    obeyed the output-format instruction.
/// 2. Scan for the window from the first `[` to the last `]` (inclusive)
///    and parse that slice. This strips leading prose, trailing sign-offs,
///    and markdown fences in one move.
///
/// Unknown JSON fields are ignored; missing fields default to `None` and
/// are dealt with downstream by the normalizer.
pub fn extract_records(text: &str) -> Result<Vec<RawLabRecord>, ParseFailure> {
    let trimmed = text.trim();
    if let Ok(records) = serde_json::from_str::<Vec<RawLabRecord>>(trimmed) {
        return Ok(records);
    }

    let start = match trimmed.find('[') {
        Some(i) => i,
        None => return Err(ParseFailure::NoJsonFound),
    };
    let end = match trimmed.rfind(']') {
        Some(i) if i > start => i,
        _ => return Err(ParseFailure::NoJsonFound),
    };

    let window = &trimmed[start..=end];
    serde_json::from_str::<Vec<RawLabRecord>>(window).map_err(|e| ParseFailure::Invalid {
        detail: e.to_string(),
        snippet: snippet_of(window),
    })
}

fn snippet_of(s: &str) -> String {
    if s.len() <= SNIPPET_MAX {
        return s.to_string();
    }
    let mut end = SNIPPET_MAX;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}
