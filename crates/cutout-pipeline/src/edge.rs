//! Per-pixel edge strength.
//!
//! The edge value at a pixel is the sum of the Manhattan color
//! differences between its left/right and top/bottom neighbors,
//! normalized by [`EDGE_NORMALIZER`] and capped at 1. Neighbor lookups
//! clamp at the image border.
//!
//! Used by the edge-based and blended segmenters.

use image::{ImageBuffer, Luma};

use crate::color::Color;
use crate::types::RgbaImage;

/// Single-channel floating-point image holding edge strengths in `[0, 1]`.
pub type EdgeMap = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Divisor turning a summed Manhattan gradient into `[0, 1]`
/// (three channels of 255).
pub const EDGE_NORMALIZER: f32 = 765.0;

/// Edge strength at a single pixel.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn edge_strength(image: &RgbaImage, x: u32, y: u32) -> f32 {
    let (w, h) = image.dimensions();
    let at = |px: u32, py: u32| Color::from_rgba(image.get_pixel(px, py));

    let gx = at(x.saturating_sub(1), y).manhattan(at((x + 1).min(w - 1), y));
    let gy = at(x, y.saturating_sub(1)).manhattan(at(x, (y + 1).min(h - 1)));
    ((gx + gy) as f32 / EDGE_NORMALIZER).min(1.0)
}

/// Compute the edge map for the whole image.
#[must_use = "returns the edge map"]
pub fn edge_map(image: &RgbaImage) -> EdgeMap {
    EdgeMap::from_fn(image.width(), image.height(), |x, y| {
        Luma([edge_strength(image, x, y)])
    })
}
