//! HTTP ingestion surface.
//!
//! A small axum app exposing the one operation the upload client needs:
//! `POST /ingest` accepts a multipart PDF and answers with the persisted
//! records plus per-page debug information, or a JSON error body on
//! failure. `GET /healthz` reports liveness.
//!
//! ## Why errors split into `error` + `details`
//!
//! [`IngestError`] messages carry actionable hints on their second line
//! (what to re-run, which knob to raise). The upload UI wants a one-line
//! headline; support wants the hint. Splitting the display string at the
//! first newline serves both without maintaining two message catalogues.
//! Internal faults (store failures, binding failures) expose no detail at
//! all; they are logged server-side and reported as a generic 500.

use crate::error::IngestError;
use crate::ingest::Ingestor;
use crate::model::{FileInfo, IngestStats, LabResult, PageOutcome};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    ingestor: Arc<Ingestor>,
}

/// Build the ingestion router.
///
/// The request body limit comes from the ingestor's configuration so the
/// HTTP surface and the pipeline agree on the maximum accepted upload.
pub fn router(ingestor: Arc<Ingestor>) -> Router {
    let body_limit = ingestor.config().max_upload_bytes;
    let state = AppState { ingestor };
    Router::new()
        .route("/ingest", post(ingest))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `POST /ingest`: multipart upload of one PDF.
///
/// Expects the PDF in a multipart field named `file` and the owner in the
/// `x-owner-id` header. Success returns the normalized records under
/// `data` and file/page diagnostics under `debug`.
async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<IngestResponse>, ApiError> {
    let owner_id = owner_from_headers(&headers)?;
    let (file_name, pdf_bytes) = pdf_from_multipart(multipart).await?;

    let output = state.ingestor.ingest(&owner_id, &file_name, &pdf_bytes).await?;

    Ok(Json(IngestResponse {
        data: output.results,
        debug: DebugInfo {
            file_info: output.file,
            pages: output.pages,
            stats: output.stats,
        },
    }))
}

fn owner_from_headers(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-owner-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(ApiError::MissingOwner)
}

async fn pdf_from_multipart(mut multipart: Multipart) -> Result<(String, Vec<u8>), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadMultipart(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .filter(|n| !n.is_empty())
            .unwrap_or("upload.pdf")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadMultipart(e.to_string()))?;
        return Ok((file_name, bytes.to_vec()));
    }
    Err(ApiError::MissingFile)
}

// ── Response bodies ───────────────────────────────────────────────────────

/// Success body for `POST /ingest`.
#[derive(Debug, Serialize)]
struct IngestResponse {
    data: Vec<LabResult>,
    debug: DebugInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DebugInfo {
    file_info: FileInfo,
    pages: Vec<PageOutcome>,
    stats: IngestStats,
}

/// Error body for every non-2xx response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

// ── Error mapping ─────────────────────────────────────────────────────────

/// Request-level failures, each mapped to a status and an [`ErrorBody`].
#[derive(Debug)]
pub enum ApiError {
    /// The `x-owner-id` header was absent or blank.
    MissingOwner,
    /// No multipart field named `file` was present.
    MissingFile,
    /// The multipart body itself could not be read.
    BadMultipart(String),
    /// The pipeline refused or failed the document.
    Ingest(IngestError),
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        ApiError::Ingest(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, details) = match self {
            ApiError::MissingOwner => (
                StatusCode::BAD_REQUEST,
                "Missing x-owner-id header".to_string(),
                None,
            ),
            ApiError::MissingFile => (
                StatusCode::BAD_REQUEST,
                "Multipart field 'file' with a PDF is required".to_string(),
                None,
            ),
            ApiError::BadMultipart(detail) => (
                StatusCode::BAD_REQUEST,
                "Malformed multipart request".to_string(),
                Some(detail),
            ),
            ApiError::Ingest(e) => {
                let status = match &e {
                    IngestError::NotAPdf { .. } | IngestError::PasswordProtected => {
                        StatusCode::BAD_REQUEST
                    }
                    IngestError::Duplicate { .. } => StatusCode::CONFLICT,
                    IngestError::Rasterization { .. } | IngestError::RasterTimeout { .. } => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    IngestError::AllPagesFailed { .. } => StatusCode::BAD_GATEWAY,
                    IngestError::PdfiumBinding(_)
                    | IngestError::Persistence { .. }
                    | IngestError::Storage { .. }
                    | IngestError::InvalidConfig(_)
                    | IngestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    error!(error = %e, "Ingest request failed");
                    (status, "Internal server error".to_string(), None)
                } else {
                    let (headline, hint) = split_message(&e);
                    (status, headline, hint)
                }
            }
        };
        (status, Json(ErrorBody { error, details })).into_response()
    }
}

/// First display line as the headline, the rest (the hint) as details.
fn split_message(e: &IngestError) -> (String, Option<String>) {
    let full = e.to_string();
    match full.split_once('\n') {
        Some((headline, hint)) => (headline.to_string(), Some(hint.trim().to_string())),
        None => (full, None),
    }
}
