//! Trimap segmentation with a simplified alpha-matting solve.
//!
//! A trimap labels each pixel as definite background (0), definite
//! foreground (1) or unknown (0.5). The border band is always
//! background; interior pixels are definite only when their color is
//! close to one of the estimated background/foreground colors.
//!
//! Unknown pixels are then solved in three passes:
//!
//! 1. initialize from definite pixels in a 5x5 window, weighted by
//!    color similarity (falling back to the relative distance to the
//!    two reference colors when the window has no definite pixels),
//! 2. run a few Jacobi iterations of a color-weighted 3x3 average,
//! 3. sharpen with a logistic curve centered at 0.5.
//!
//! Definite pixels keep their trimap value throughout.

use crate::background::{border_width, in_border};
use crate::color::{self, Color};
use crate::types::{Dimensions, Mask, RgbaImage};

/// Interior pixels closer than this to a reference color are definite.
pub const CONFIDENCE_DISTANCE: f32 = 20.0;

/// Trimap value for unknown pixels.
pub const UNKNOWN: f32 = 0.5;

/// Radius of the initialization window (5x5).
pub const INIT_RADIUS: i64 = 2;

/// Number of smoothing iterations over unknown pixels.
pub const SMOOTHING_ITERATIONS: usize = 3;

/// Color distance scale of the smoothing weight `exp(-d / scale)`.
pub const WEIGHT_SCALE: f32 = 30.0;

/// Slope of the final sharpening curve.
pub const SHARPEN_SLOPE: f32 = 12.0;

/// Build the trimap as row-major values.
fn build_trimap(image: &RgbaImage, background: Color, foreground: Color) -> Vec<f32> {
    let dims = Dimensions::of(image);
    let band = border_width(dims);
    image
        .enumerate_pixels()
        .map(|(x, y, p)| {
            if in_border(dims, band, x, y) {
                return 0.0;
            }
            let c = Color::from_rgba(p);
            let d_fg = color::distance(c, foreground);
            let d_bg = color::distance(c, background);
            if d_fg < CONFIDENCE_DISTANCE && d_fg <= d_bg {
                1.0
            } else if d_bg < CONFIDENCE_DISTANCE {
                0.0
            } else {
                UNKNOWN
            }
        })
        .collect()
}

fn similarity(a: Color, b: Color) -> f32 {
    (-color::distance(a, b) / WEIGHT_SCALE).exp()
}

fn sharpen(v: f32) -> f32 {
    1.0 / (1.0 + (-SHARPEN_SLOPE * (v - 0.5)).exp())
}

/// Run trimap segmentation.
///
/// The returned mask holds 0 or 1 at definite pixels and a sharpened
/// estimate in `(0, 1)` at unknown ones.
#[must_use]
#[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn segment_trimap(image: &RgbaImage, background: Color, foreground: Color) -> Mask {
    let dims = Dimensions::of(image);
    let width = dims.width as usize;
    let colors: Vec<Color> = image.pixels().map(Color::from_rgba).collect();
    let trimap = build_trimap(image, background, foreground);
    let unknown: Vec<usize> = trimap
        .iter()
        .enumerate()
        .filter(|&(_, &v)| v == UNKNOWN)
        .map(|(i, _)| i)
        .collect();

    let window = |i: usize, radius: i64| {
        let (x, y) = ((i % width) as i64, (i / width) as i64);
        (-radius..=radius).flat_map(move |dy| {
            (-radius..=radius).filter_map(move |dx| {
                let (nx, ny) = (x + dx, y + dy);
                dims.contains(nx, ny)
                    .then(|| ny as usize * width + nx as usize)
            })
        })
    };

    let mut alpha = trimap.clone();
    for &i in &unknown {
        let (mut sum, mut weight) = (0.0f32, 0.0f32);
        for n in window(i, INIT_RADIUS) {
            if trimap[n] != UNKNOWN {
                let w = similarity(colors[i], colors[n]);
                sum += w * trimap[n];
                weight += w;
            }
        }
        alpha[i] = if weight > f32::EPSILON {
            sum / weight
        } else {
            let d_bg = color::distance(colors[i], background);
            let d_fg = color::distance(colors[i], foreground);
            let total = d_bg + d_fg;
            if total > 0.0 { d_bg / total } else { UNKNOWN }
        };
    }

    for _ in 0..SMOOTHING_ITERATIONS {
        let previous = alpha.clone();
        for &i in &unknown {
            let (mut sum, mut weight) = (0.0f32, 0.0f32);
            for n in window(i, 1) {
                let w = similarity(colors[i], colors[n]);
                sum += w * previous[n];
                weight += w;
            }
            // The window always contains `i` itself, so `weight >= 1`.
            alpha[i] = sum / weight;
        }
    }

    for &i in &unknown {
        alpha[i] = sharpen(alpha[i]);
    }

    tracing::trace!(unknown = unknown.len(), "trimap solved");
    Mask::from_fn(dims, |x, y| alpha[y as usize * width + x as usize])
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: image::Rgba<u8> = image::Rgba([255, 0, 0, 255]);
    const WHITE: image::Rgba<u8> = image::Rgba([255, 255, 255, 255]);

    fn two_color_image() -> RgbaImage {
        RgbaImage::from_fn(30, 30, |x, y| {
            if (8..22).contains(&x) && (8..22).contains(&y) {
                RED
            } else {
                WHITE
            }
        })
    }

    #[test]
    fn trimap_labels_border_and_reference_colors() {
        let img = two_color_image();
        let trimap = build_trimap(&img, Color::WHITE, Color::new(255, 0, 0));
        let at = |x: usize, y: usize| trimap[y * 30 + x];
        assert!(at(0, 0).abs() < f32::EPSILON);
        assert!(at(5, 5).abs() < f32::EPSILON);
        assert!((at(15, 15) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn border_is_background_even_if_foreground_colored() {
        let img = RgbaImage::from_pixel(10, 10, RED);
        let trimap = build_trimap(&img, Color::WHITE, Color::new(255, 0, 0));
        assert!(trimap[0].abs() < f32::EPSILON);
        assert!((trimap[5 * 10 + 5] - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn mid_colors_are_unknown() {
        let img = RgbaImage::from_pixel(10, 10, image::Rgba([128, 128, 128, 255]));
        let trimap = build_trimap(&img, Color::WHITE, Color::BLACK);
        assert!((trimap[5 * 10 + 5] - UNKNOWN).abs() < f32::EPSILON);
    }

    #[test]
    fn two_color_image_has_no_ambiguous_cells() {
        let img = two_color_image();
        let mask = segment_trimap(&img, Color::WHITE, Color::new(255, 0, 0));
        assert!(
            mask.values().iter().all(|&v| (v - 0.5).abs() > 0.1),
            "ambiguous value present",
        );
        assert!((mask.get(15, 15) - 1.0).abs() < f32::EPSILON);
        assert!(mask.get(2, 2).abs() < f32::EPSILON);
    }

    #[test]
    fn unknown_pixels_lean_toward_similar_neighbors() {
        // A near-red ring around a red core, on white. The ring is unknown
        // but its neighbors are overwhelmingly red.
        let img = RgbaImage::from_fn(30, 30, |x, y| {
            let inside = |lo, hi| (lo..hi).contains(&x) && (lo..hi).contains(&y);
            if inside(10, 20) {
                RED
            } else if inside(9, 21) {
                image::Rgba([225, 0, 30, 255])
            } else {
                WHITE
            }
        });
        let mask = segment_trimap(&img, Color::WHITE, Color::new(255, 0, 0));
        assert!(mask.get(9, 15) > 0.9, "ring = {}", mask.get(9, 15));
    }

    #[test]
    fn isolated_unknown_uses_reference_distances() {
        // Uniform mid-gray interior with no definite pixels nearby except
        // the border band: far-from-border pixels fall back to
        // d_bg / (d_bg + d_fg), which is 0.5 for the exact midpoint and
        // gets smoothed then sharpened without leaving [0, 1].
        let img = RgbaImage::from_pixel(20, 20, image::Rgba([128, 128, 128, 255]));
        let mask = segment_trimap(&img, Color::WHITE, Color::BLACK);
        assert!(mask.values().iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(mask.get(0, 0).abs() < f32::EPSILON);
    }

    #[test]
    fn sharpen_is_centered() {
        assert!((sharpen(0.5) - 0.5).abs() < 1e-6);
        assert!(sharpen(1.0) > 0.99);
        assert!(sharpen(0.0) < 0.01);
    }
}
