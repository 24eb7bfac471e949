//! Image encoding: page renders → base64 PNG for the detector, question
//! images → PNG bytes for the archive.
//!
//! PNG is chosen over JPEG because it is lossless — thin rule lines and small
//! subscripts are exactly what box detection and edge peeling look at.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::{DynamicImage, RgbaImage};
use std::io::Cursor;
use tracing::debug;

/// Encode a rendered page as a base64 PNG ready for the VLM API.
///
/// `detail: "high"` keeps fine print visible to GPT-4-class models; at
/// `"low"` a dense exam page collapses into one 512 px tile.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded page image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Encode an RGBA image as PNG bytes.
pub fn png_bytes(img: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}
