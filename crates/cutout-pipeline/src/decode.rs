//! Image decoding for hosts.
//!
//! Accepts raw image bytes (PNG, JPEG, BMP, WebP) and produces the RGBA
//! buffer every pipeline stage operates on. Hosts that already hold
//! decoded pixels can skip this and use
//! [`rgba_from_raw`](crate::types::rgba_from_raw) instead.

use crate::types::{PipelineError, RgbaImage, ensure_non_empty};

/// Decode raw image bytes into an RGBA buffer.
///
/// Supports whatever formats the `image` crate is built with (PNG,
/// JPEG, BMP and WebP here). Images without alpha decode as opaque.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty,
/// [`PipelineError::ImageDecode`] if the format is unrecognized or the
/// data is corrupt, and [`PipelineError::InvalidDimensions`] for a
/// zero-sized image.
pub fn decode_rgba(bytes: &[u8]) -> Result<RgbaImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let rgba = image::load_from_memory(bytes)?.to_rgba8();
    ensure_non_empty(&rgba)?;
    tracing::debug!(
        width = rgba.width(),
        height = rgba.height(),
        input_bytes = bytes.len(),
        "image decoded",
    );
    Ok(rgba)
}
