//! Image encoding: rasterised page → base64 PNG data URI.
//!
//! OpenAI-compatible vision APIs accept images as data URIs embedded in the
//! JSON request body. PNG is chosen over JPEG because it is lossless — the
//! legibility of small reference-range print matters far more than payload
//! size for extraction accuracy.

use crate::pipeline::raster::PageImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::io::Cursor;
use tracing::debug;

/// One page ready for the vision API.
#[derive(Debug, Clone)]
pub struct EncodedPage {
    /// 1-based page number.
    pub page: u32,
    /// `data:image/png;base64,…` URI for the request body.
    pub data_uri: String,
}

/// Encode a rasterised page as a base64 PNG data URI.
pub fn encode_page(page: &PageImage) -> Result<EncodedPage, image::ImageError> {
    let mut buf = Vec::new();
    page.image
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(page = page.page, bytes = b64.len(), "Encoded page image");

    Ok(EncodedPage {
        page: page.page,
        data_uri: format!("data:image/png;base64,{b64}"),
    })
}
