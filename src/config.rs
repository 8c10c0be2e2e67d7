//! Configuration for lab-report ingestion.
//!
//! All pipeline behaviour is controlled through [`IngestConfig`], built via
//! its [`IngestConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share the config across tasks, log it for support, and diff
//! two runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A ten-field constructor is unreadable and breaks on every new field. The
//! builder lets callers set only what they care about and rely on documented
//! defaults for the rest.

use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Configuration for the ingestion pipeline.
///
/// Built via [`IngestConfig::builder()`] or [`IngestConfig::default()`].
///
/// # Example
/// ```rust
/// use bloodwork::IngestConfig;
///
/// let config = IngestConfig::builder()
///     .dpi(200)
///     .model("gpt-4o")
///     .upload_concurrency(2)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–400. Default: 150.
    ///
    /// 150 DPI keeps lab-report tables sharp enough for a vision model to
    /// read the small reference-range column reliably while image payloads
    /// stay well below API upload limits. Raise to 200–300 for reports with
    /// very small print.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    ///
    /// A safety cap independent of DPI: a high-DPI render of an oversized
    /// page could exhaust memory. pdfium scales the other dimension
    /// proportionally, so no render allocates more than roughly
    /// `max_rendered_pixels²` pixels.
    pub max_rendered_pixels: u32,

    /// Number of files the orchestrator processes concurrently. Default: 4.
    ///
    /// Pages within one document are always sequential (each request stands
    /// alone); concurrency exists only across files. Lab uploads arrive in
    /// small batches, so a small bound avoids rate-limit churn without
    /// serialising the whole session.
    pub upload_concurrency: usize,

    /// Vision model identifier, e.g. "gpt-4o-mini". Default: "gpt-4o-mini".
    pub model: String,

    /// Base URL of the OpenAI-compatible chat-completions API.
    /// Default: "https://api.openai.com/v1".
    pub api_base_url: String,

    /// API key for the model collaborator. Usually injected from the
    /// environment by the binary; tests use fakes and leave it unset.
    pub api_key: Option<String>,

    /// Sampling temperature. Default: 0.0.
    ///
    /// Extraction is transcription, not generation: zero temperature keeps
    /// the model deterministic and faithful to what is printed on the page.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 4096.
    ///
    /// A dense multi-panel report page can list dozens of analytes; 4096
    /// covers the worst observed pages without letting a runaway response
    /// block the pipeline.
    pub max_response_tokens: usize,

    /// Per-model-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Rasterisation timeout in seconds. Default: 30.
    ///
    /// pdfium handles pathological PDFs poorly; a bound turns a hung render
    /// into an ordinary request failure instead of a stuck worker.
    pub raster_timeout_secs: u64,

    /// Maximum accepted upload size in bytes. Default: 32 MiB.
    pub max_upload_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            upload_concurrency: 4,
            model: "gpt-4o-mini".to_string(),
            api_base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            temperature: 0.0,
            max_response_tokens: 4096,
            api_timeout_secs: 60,
            raster_timeout_secs: 30,
            max_upload_bytes: 32 * 1024 * 1024,
        }
    }
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("upload_concurrency", &self.upload_concurrency)
            .field("model", &self.model)
            .field("api_base_url", &self.api_base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .field("max_response_tokens", &self.max_response_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("raster_timeout_secs", &self.raster_timeout_secs)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish()
    }
}

impl IngestConfig {
    /// Create a new builder for `IngestConfig`.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`IngestConfig`].
#[derive(Debug)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn upload_concurrency(mut self, n: usize) -> Self {
        self.config.upload_concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_response_tokens(mut self, n: usize) -> Self {
        self.config.max_response_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn raster_timeout_secs(mut self, secs: u64) -> Self {
        self.config.raster_timeout_secs = secs;
        self
    }

    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(IngestError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.upload_concurrency == 0 {
            return Err(IngestError::InvalidConfig(
                "upload_concurrency must be ≥ 1".into(),
            ));
        }
        if c.model.is_empty() {
            return Err(IngestError::InvalidConfig("model must not be empty".into()));
        }
        if c.api_base_url.is_empty() {
            return Err(IngestError::InvalidConfig(
                "api_base_url must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}
