//! Fixed prompts for vision-model lab-report extraction.
//!
//! Centralising the prompts here serves two purposes:
//!
//! 1. **Single source of truth** — the JSON keys the instruction demands must
//!    match the fields [`crate::model::RawLabRecord`] deserializes; keeping
//!    both ends of that contract in one crate makes drift visible in review.
//!
//! 2. **Testability** — unit tests can inspect the prompts directly without
//!    calling a real model, so a regression that drops a required field from
//!    the instruction is caught immediately.
//!
//! The prompts are deliberately not configurable: the tolerant extractor and
//! the normalizer are built against exactly this output shape.

/// System prompt sent with every page request.
pub const SYSTEM_PROMPT: &str = r#"You are a medical lab-report extraction engine. You read one page of a blood-test report and return the test results printed on it as structured JSON.

Follow these rules precisely:

1. SCOPE
   - Extract ONLY laboratory test results (analyte name, measured value).
   - Ignore patient demographics, addresses, signatures, and boilerplate.
   - Never invent a result that is not printed on the page.

2. FIELDS
   - "test": the test name exactly as printed (e.g. "HDL Cholesterol")
   - "category": the report's panel/section heading (e.g. "Lipids"), or ""
   - "value": the measured value as a string, digits only where possible
   - "unit": the printed unit (e.g. "mg/dL"), or ""
   - "reference_range": the printed range VERBATIM (e.g. "40-60", "< 5")
   - "status": "normal", "high", or "low" as printed or implied by flags
   - "date": the collection or report date in YYYY-MM-DD form

3. DATES
   - Prefer a per-test collection date when one is printed.
   - Otherwise use the document-level collection/report date for every
     result on the page.

4. OUTPUT FORMAT
   - Output ONLY a JSON array of result objects, nothing else.
   - Do NOT wrap the array in markdown fences.
   - Do NOT add commentary, headings, or explanations.
   - An empty page yields []"#;

/// User instruction accompanying each page image.
///
/// Repeats the output contract next to the image because multimodal models
/// weight the final user turn heavily; the system prompt alone is routinely
/// ignored when the page itself contains instructions-like text.
pub const PAGE_INSTRUCTION: &str = r#"Extract every blood-test result visible on this page as a JSON array with this exact shape:

[{"test": "HDL", "category": "Lipids", "value": "52", "unit": "mg/dL", "reference_range": "40-60", "status": "normal", "date": "2023-03-15"}]

Return the JSON array only."#;
