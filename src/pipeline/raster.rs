//! PDF rasterisation: stage uploaded bytes to a scratch file and render every
//! page to a `DynamicImage` via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto the blocking thread
//! pool, keeping the Tokio workers free while a page renders.
//!
//! ## Why a scratch file?
//!
//! Uploads arrive as in-memory byte buffers. pdfium's file-backed loader is
//! the battle-tested path (memory mapping, incremental xref reads), so the
//! bytes are staged to a [`tempfile::NamedTempFile`] first. The temp file is
//! removed when the handle drops, which covers every exit path — success,
//! error return, timeout, or panic in the blocking task.
//!
//! ## Why a trait seam?
//!
//! Rasterisation is an opaque awaited suspension as far as the rest of the
//! pipeline is concerned. [`PageRasterizer`] keeps it that way: the ingest
//! flow is unit-tested with a fake that fabricates page images, no pdfium
//! library required.

use crate::config::IngestConfig;
use crate::error::IngestError;
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Write;
use std::path::Path;
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

/// One rasterised page, in document order.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 1-based page number.
    pub page: u32,
    pub image: DynamicImage,
}

/// Narrow async seam over PDF rasterisation: bytes in, ordered page images
/// out. Object-safe so the ingest service can hold `Arc<dyn PageRasterizer>`
/// and tests can substitute fakes.
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    /// Rasterise every page of `pdf_bytes`, in page order.
    ///
    /// Fails with [`IngestError::Rasterization`] when no page image can be
    /// produced. No retry at this layer; the caller decides whether the
    /// whole request is retried.
    async fn rasterize(&self, pdf_bytes: &[u8]) -> Result<Vec<PageImage>, IngestError>;
}

/// Production rasterizer backed by pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    dpi: u32,
    max_rendered_pixels: u32,
    timeout_secs: u64,
}

impl PdfiumRasterizer {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            dpi: config.dpi,
            max_rendered_pixels: config.max_rendered_pixels,
            timeout_secs: config.raster_timeout_secs,
        }
    }
}

#[async_trait]
impl PageRasterizer for PdfiumRasterizer {
    async fn rasterize(&self, pdf_bytes: &[u8]) -> Result<Vec<PageImage>, IngestError> {
        // Stage the upload to a scratch file; removed when `tmp` drops.
        let mut tmp = tempfile::NamedTempFile::new()
            .map_err(|e| IngestError::Internal(format!("tempfile: {e}")))?;
        tmp.write_all(pdf_bytes)
            .map_err(|e| IngestError::Internal(format!("tempfile write: {e}")))?;

        let path = tmp.path().to_path_buf();
        let dpi = self.dpi;
        let max_pixels = self.max_rendered_pixels;

        let task =
            tokio::task::spawn_blocking(move || rasterize_blocking(&path, dpi, max_pixels));

        let result = match timeout(Duration::from_secs(self.timeout_secs), task).await {
            Ok(joined) => joined
                .map_err(|e| IngestError::Internal(format!("Render task panicked: {e}")))?,
            Err(_) => {
                return Err(IngestError::RasterTimeout {
                    secs: self.timeout_secs,
                })
            }
        };

        // `tmp` is still alive here, so the scratch file outlived the render.
        drop(tmp);
        result
    }
}

/// Blocking implementation of page rendering.
fn rasterize_blocking(
    pdf_path: &Path,
    dpi: u32,
    max_pixels: u32,
) -> Result<Vec<PageImage>, IngestError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium.load_pdf_from_file(pdf_path, None).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            IngestError::PasswordProtected
        } else {
            IngestError::Rasterization { detail: err_str }
        }
    })?;

    let pages = document.pages();
    let total = pages.len() as usize;
    if total == 0 {
        return Err(IngestError::Rasterization {
            detail: "document has zero pages".into(),
        });
    }
    info!(pages = total, "PDF loaded");

    let (target_width, max_height) = render_bounds(dpi, max_pixels);
    let render_config = PdfRenderConfig::new()
        .set_target_width(target_width)
        .set_maximum_height(max_height);

    let mut images = Vec::with_capacity(total);
    for (idx, page) in pages.iter().enumerate() {
        let page_num = (idx + 1) as u32;
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| IngestError::Rasterization {
                detail: format!("page {page_num}: {:?}", e),
            })?;
        let image = bitmap.as_image();
        debug!(
            page = page_num,
            width = image.width(),
            height = image.height(),
            "Rendered page"
        );
        images.push(PageImage {
            page: page_num,
            image,
        });
    }

    Ok(images)
}

/// Compute pdfium render bounds from DPI and the pixel cap.
///
/// Lab reports are letter/A4 portrait; width drives legibility, so the
/// target width is `dpi × 8.5in` capped at `max_pixels`, and the height cap
/// stops a rotated or poster-sized page from exhausting memory.
fn render_bounds(dpi: u32, max_pixels: u32) -> (i32, i32) {
    let width = ((dpi as f32) * 8.5) as u32;
    (width.min(max_pixels) as i32, max_pixels as i32)
}

/// Load the pdfium dynamic library.
///
/// Discovery order:
/// 1. `PDFIUM_LIB_PATH` env var (explicit path to the library file)
/// 2. Alongside the running executable
/// 3. System library search paths
fn bind_pdfium() -> Result<Pdfium, IngestError> {
    if let Ok(path) = std::env::var("PDFIUM_LIB_PATH") {
        debug!(path = %path, "Binding pdfium from PDFIUM_LIB_PATH");
        let bindings = Pdfium::bind_to_library(&path)
            .map_err(|e| IngestError::PdfiumBinding(format!("{path}: {e}")))?;
        return Ok(Pdfium::new(bindings));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            let lib_path =
                Pdfium::pdfium_platform_library_name_at_path(exe_dir.to_string_lossy().as_ref());
            if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
                debug!(dir = %exe_dir.display(), "Bound pdfium next to executable");
                return Ok(Pdfium::new(bindings));
            }
        }
    }

    let bindings = Pdfium::bind_to_system_library()
        .map_err(|e| IngestError::PdfiumBinding(format!("{e}")))?;
    Ok(Pdfium::new(bindings))
}
