//! HTTP server binary for bloodwork.
//!
//! A thin shim over the library crate: maps CLI flags to `IngestConfig`,
//! wires the production collaborators, and serves the axum router.

use anyhow::{Context, Result};
use bloodwork::pipeline::raster::PdfiumRasterizer;
use bloodwork::pipeline::vision::OpenAiVisionClient;
use bloodwork::server::router;
use bloodwork::store::{MemoryMarkerStore, MemoryResultStore};
use bloodwork::{IngestConfig, Ingestor};
use clap::Parser;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve on the default address with OpenAI
  export OPENAI_API_KEY=sk-...
  bloodworkd

  # Bind publicly, higher DPI for reports with small print
  bloodworkd --bind 0.0.0.0:8080 --dpi 200

  # Point at a local OpenAI-compatible endpoint (Ollama, vLLM, LiteLLM)
  bloodworkd --api-base-url http://localhost:11434/v1 --model llama3.2-vision

  # Upload a report
  curl -X POST http://localhost:8080/ingest \
       -H 'x-owner-id: user-42' \
       -F file=@lab-report.pdf

ENDPOINTS:
  POST /ingest    multipart PDF in field 'file', owner in the x-owner-id header
  GET  /healthz   liveness probe

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY     API key (fallback when --api-key is not given)
  PDFIUM_LIB_PATH    Path to an existing libpdfium library file
  RUST_LOG           Tracing filter; overrides --verbose

SETUP:
  1. Install pdfium:  place libpdfium next to the binary, or set PDFIUM_LIB_PATH
  2. Set API key:     export OPENAI_API_KEY=sk-...
  3. Serve:           bloodworkd --bind 0.0.0.0:8080
"#;

/// Serve the blood-test PDF ingestion API.
#[derive(Parser, Debug)]
#[command(
    name = "bloodworkd",
    version,
    about = "HTTP API that extracts structured lab results from blood-test PDFs",
    long_about = "Serve an HTTP API that accepts blood-test PDF uploads, reads each page with a \
Vision Language Model, normalizes the extracted analytes, and persists them keyed by document \
hash and owner. Works with OpenAI or any OpenAI-compatible endpoint (Ollama, vLLM, LiteLLM).",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Socket address to listen on.
    #[arg(long, env = "BLOODWORK_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Vision model ID (e.g. gpt-4o-mini, gpt-4o).
    #[arg(long, env = "BLOODWORK_MODEL", default_value = "gpt-4o-mini")]
    model: String,

    /// Base URL of the OpenAI-compatible chat-completions API.
    #[arg(
        long,
        env = "BLOODWORK_API_BASE_URL",
        default_value = "https://api.openai.com/v1"
    )]
    api_base_url: String,

    /// API key for the model endpoint. Falls back to OPENAI_API_KEY.
    #[arg(long, env = "BLOODWORK_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Rendering DPI (72–400).
    #[arg(long, env = "BLOODWORK_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Number of documents processed concurrently.
    #[arg(short, long, env = "BLOODWORK_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "BLOODWORK_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Per-page model call timeout in seconds.
    #[arg(long, env = "BLOODWORK_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// PDF rasterisation timeout in seconds.
    #[arg(long, env = "BLOODWORK_RASTER_TIMEOUT", default_value_t = 30)]
    raster_timeout: u64,

    /// Maximum accepted upload size in bytes.
    #[arg(long, env = "BLOODWORK_MAX_UPLOAD_BYTES", default_value_t = 32 * 1024 * 1024)]
    max_upload_bytes: usize,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "BLOODWORK_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;
    tracing::info!(config = ?config, "Starting bloodworkd");
    if config.api_key.is_none() {
        tracing::warn!(
            "No API key configured; model calls will fail unless the endpoint accepts \
             unauthenticated requests (e.g. a local Ollama)"
        );
    }

    // ── Wire collaborators ───────────────────────────────────────────────
    let vision =
        OpenAiVisionClient::new(&config).context("Failed to build the vision model client")?;
    let ingestor = Arc::new(Ingestor::new(
        Arc::new(PdfiumRasterizer::new(&config)),
        Arc::new(vision),
        Arc::new(MemoryResultStore::new()),
        Arc::new(MemoryMarkerStore::new()),
        config,
    ));

    // ── Serve ────────────────────────────────────────────────────────────
    let app = router(ingestor);
    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;
    tracing::info!(addr = %cli.bind, "Listening");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

/// Map CLI args to `IngestConfig`.
fn build_config(cli: &Cli) -> Result<IngestConfig> {
    let mut builder = IngestConfig::builder()
        .dpi(cli.dpi)
        .upload_concurrency(cli.concurrency)
        .model(cli.model.clone())
        .api_base_url(cli.api_base_url.clone())
        .temperature(cli.temperature)
        .api_timeout_secs(cli.api_timeout)
        .raster_timeout_secs(cli.raster_timeout)
        .max_upload_bytes(cli.max_upload_bytes);

    let api_key = cli
        .api_key
        .clone()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok());
    if let Some(key) = api_key {
        builder = builder.api_key(key);
    }

    builder.build().context("Invalid configuration")
}
