//! Manual mask editing: brush/eraser strokes and the magic wand.
//!
//! A stroke accumulates onto a temporary coverage overlay while the
//! pointer moves ([`StrokeOverlay::add_point`]) and is merged into the
//! mask only when it finishes ([`StrokeOverlay::finish`]). Overlapping
//! stamps within one stroke therefore do not compound.
//!
//! The magic wand flood-fills over the source image colors (never the
//! mask) and toggles the reached region.

use std::collections::VecDeque;

use image::{GrayImage, Luma};
use imageproc::drawing::draw_filled_circle_mut;
use serde::{Deserialize, Serialize};

use crate::color::{self, Color};
use crate::types::{Dimensions, Mask, PipelineError, RgbaImage};

/// Fraction of opacity removed at full softness.
pub const SOFTNESS_FALLOFF: f32 = 0.8;

/// Overlay value marking a covered pixel.
const COVERED: Luma<u8> = Luma([u8::MAX]);

/// Which direction a stroke pushes the mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    /// Toward foreground (1).
    Brush,
    /// Toward background (0).
    Eraser,
}

/// Stroke opacity for a softness in `0..=100`.
#[must_use]
pub fn stroke_opacity(softness: f32) -> f32 {
    1.0 - softness / 100.0 * SOFTNESS_FALLOFF
}

/// Largest coordinate magnitude a stroke works with.
const MAX_REACH: i32 = i32::MAX / 8;

/// Whole-pixel stamp radius, capped at the image's width plus height.
/// A disk that large already covers the whole image from any point
/// inside it.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn stamp_radius(dimensions: Dimensions, radius: f32) -> i32 {
    let span = u64::from(dimensions.width) + u64::from(dimensions.height);
    let cap = i32::try_from(span).unwrap_or(MAX_REACH).clamp(1, MAX_REACH);
    radius.round().clamp(1.0, cap as f32) as i32
}

/// An in-progress brush or eraser stroke.
#[derive(Debug, Clone)]
pub struct StrokeOverlay {
    tool: Tool,
    radius: f32,
    softness: f32,
    /// Stamp radius in whole pixels.
    stamp_radius: i32,
    coverage: GrayImage,
    last: Option<(i32, i32)>,
}

impl StrokeOverlay {
    /// Start a stroke over an image of the given dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidParameter`] if `radius` is not a
    /// positive finite number or `softness` is outside `0..=100`.
    pub fn begin(
        dimensions: Dimensions,
        tool: Tool,
        radius: f32,
        softness: f32,
    ) -> Result<Self, PipelineError> {
        if !radius.is_finite() || radius <= 0.0 {
            return Err(PipelineError::InvalidParameter(format!(
                "brush radius must be positive, got {radius}"
            )));
        }
        if !softness.is_finite() || !(0.0..=100.0).contains(&softness) {
            return Err(PipelineError::InvalidParameter(format!(
                "brush softness must be within 0..=100, got {softness}"
            )));
        }
        Ok(Self {
            tool,
            radius,
            softness,
            stamp_radius: stamp_radius(dimensions, radius),
            coverage: GrayImage::new(dimensions.width, dimensions.height),
            last: None,
        })
    }

    /// The stroke's tool.
    #[must_use]
    pub const fn tool(&self) -> Tool {
        self.tool
    }

    /// Extend the stroke to `(x, y)`.
    ///
    /// The segment from the previous point is filled with circles spaced
    /// half a radius apart. Points outside the image are allowed; only
    /// the in-bounds part of each circle is drawn. Points further out
    /// than one stamp radius are pulled in to just past the edge, where
    /// a stamp no longer reaches the image.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn add_point(&mut self, x: i32, y: i32) {
        let (x, y) = self.pull_in(x, y);
        let Some((px, py)) = self.last.replace((x, y)) else {
            self.stamp(x, y);
            return;
        };
        let dx = f64::from(x) - f64::from(px);
        let dy = f64::from(y) - f64::from(py);
        let spacing = f64::from(self.radius / 2.0).max(1.0);
        let steps = (dx.hypot(dy) / spacing).ceil().max(1.0) as u64;
        for i in 1..=steps {
            let t = i as f64 / steps as f64;
            self.stamp(
                dx.mul_add(t, f64::from(px)).round() as i32,
                dy.mul_add(t, f64::from(py)).round() as i32,
            );
        }
    }

    /// Clamp a point into the image rectangle grown by one stamp radius
    /// plus a pixel.
    fn pull_in(&self, x: i32, y: i32) -> (i32, i32) {
        let margin = self.stamp_radius + 1;
        let limit = |extent: u32| i32::try_from(extent).unwrap_or(MAX_REACH).saturating_add(margin);
        (
            x.clamp(-margin, limit(self.coverage.width())),
            y.clamp(-margin, limit(self.coverage.height())),
        )
    }

    fn stamp(&mut self, x: i32, y: i32) {
        draw_filled_circle_mut(&mut self.coverage, (x, y), self.stamp_radius, COVERED);
    }

    /// Number of pixels the stroke covers so far.
    #[must_use]
    pub fn covered_pixels(&self) -> usize {
        self.coverage.pixels().filter(|p| **p == COVERED).count()
    }

    /// Merge the stroke into `mask` and return how many pixels changed
    /// coverage.
    ///
    /// Brush: `m += (1 - m) * opacity`. Eraser: `m *= 1 - opacity`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DimensionMismatch`] if the mask does not
    /// match the dimensions the stroke was started with.
    pub fn finish(self, mask: &mut Mask) -> Result<usize, PipelineError> {
        let dims = Dimensions::new(self.coverage.width(), self.coverage.height());
        if mask.dimensions() != dims {
            return Err(PipelineError::DimensionMismatch {
                expected: dims,
                actual_len: mask.values().len(),
            });
        }
        let opacity = stroke_opacity(self.softness);
        let mut touched = 0;
        for (x, y, p) in self.coverage.enumerate_pixels() {
            if *p != COVERED {
                continue;
            }
            let m = mask.get(x, y);
            let next = match self.tool {
                Tool::Brush => (1.0 - m).mul_add(opacity, m),
                Tool::Eraser => m * (1.0 - opacity),
            };
            mask.set(x, y, next);
            touched += 1;
        }
        tracing::debug!(tool = ?self.tool, touched, opacity, "stroke merged");
        Ok(touched)
    }
}

/// Toggle the region connected to `(x, y)` whose source color lies within
/// `tolerance` of the clicked color.
///
/// The fill is 4-connected and compares each candidate against the
/// clicked pixel's color. If the clicked pixel is currently foreground
/// (mask > 0.5) the region becomes background, otherwise foreground.
/// Returns the number of pixels filled; a start outside the image fills
/// nothing.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidParameter`] if `tolerance` is negative
/// or not finite, and [`PipelineError::MaskSizeMismatch`] if the mask does
/// not match the image.
pub fn magic_wand(
    image: &RgbaImage,
    mask: &mut Mask,
    x: i64,
    y: i64,
    tolerance: f32,
) -> Result<usize, PipelineError> {
    if !tolerance.is_finite() || tolerance < 0.0 {
        return Err(PipelineError::InvalidParameter(format!(
            "wand tolerance must be non-negative, got {tolerance}"
        )));
    }
    mask.ensure_matches(image)?;

    let dims = Dimensions::of(image);
    let (Ok(sx), Ok(sy)) = (u32::try_from(x), u32::try_from(y)) else {
        return Ok(0);
    };
    if !dims.contains(x, y) {
        return Ok(0);
    }

    let target = Color::from_rgba(image.get_pixel(sx, sy));
    let fill = if mask.get(sx, sy) > 0.5 { 0.0 } else { 1.0 };
    let width = dims.width as usize;

    let mut visited = vec![false; dims.pixel_count()];
    let mut queue = VecDeque::from([(sx, sy)]);
    visited[sy as usize * width + sx as usize] = true;
    let mut filled = 0;

    while let Some((cx, cy)) = queue.pop_front() {
        mask.set(cx, cy, fill);
        filled += 1;

        let neighbors = [
            (cx.checked_sub(1), Some(cy)),
            (cx.checked_add(1), Some(cy)),
            (Some(cx), cy.checked_sub(1)),
            (Some(cx), cy.checked_add(1)),
        ];
        for (nx, ny) in neighbors {
            let (Some(nx), Some(ny)) = (nx, ny) else {
                continue;
            };
            if nx >= dims.width || ny >= dims.height {
                continue;
            }
            let i = ny as usize * width + nx as usize;
            if visited[i] {
                continue;
            }
            visited[i] = true;
            let c = Color::from_rgba(image.get_pixel(nx, ny));
            if color::distance(c, target) <= tolerance {
                queue.push_back((nx, ny));
            }
        }
    }

    tracing::debug!(x, y, tolerance, filled, value = fill, "magic wand");
    Ok(filled)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const RED: image::Rgba<u8> = image::Rgba([255, 0, 0, 255]);
    const WHITE: image::Rgba<u8> = image::Rgba([255, 255, 255, 255]);

    fn red_square_on_white() -> RgbaImage {
        RgbaImage::from_fn(100, 100, |x, y| {
            if (20..80).contains(&x) && (20..80).contains(&y) {
                RED
            } else {
                WHITE
            }
        })
    }

    #[test]
    fn invalid_brush_parameters_are_rejected() {
        let dims = Dimensions::new(10, 10);
        for radius in [0.0, -3.0, f32::NAN, f32::INFINITY] {
            assert!(matches!(
                StrokeOverlay::begin(dims, Tool::Brush, radius, 0.0),
                Err(PipelineError::InvalidParameter(_))
            ));
        }
        for softness in [-1.0, 100.5, f32::NAN] {
            assert!(matches!(
                StrokeOverlay::begin(dims, Tool::Brush, 3.0, softness),
                Err(PipelineError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn opacity_follows_softness() {
        assert!((stroke_opacity(0.0) - 1.0).abs() < f32::EPSILON);
        assert!((stroke_opacity(50.0) - 0.6).abs() < 1e-6);
        assert!((stroke_opacity(100.0) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn brush_raises_covered_pixels() {
        let mut mask = Mask::new(Dimensions::new(40, 40));
        let mut stroke = StrokeOverlay::begin(mask.dimensions(), Tool::Brush, 5.0, 50.0).unwrap();
        stroke.add_point(20, 20);
        let touched = stroke.finish(&mut mask).unwrap();
        assert!(touched > 0);
        assert!((mask.get(20, 20) - 0.6).abs() < 1e-6);
        assert!((mask.get(23, 20) - 0.6).abs() < 1e-6);
        assert!(mask.get(0, 0).abs() < f32::EPSILON);
    }

    #[test]
    fn eraser_lowers_covered_pixels() {
        let mut mask = Mask::filled(Dimensions::new(40, 40), 1.0);
        let mut stroke = StrokeOverlay::begin(mask.dimensions(), Tool::Eraser, 4.0, 0.0).unwrap();
        stroke.add_point(10, 10);
        stroke.finish(&mut mask).unwrap();
        assert!(mask.get(10, 10).abs() < f32::EPSILON);
        assert!((mask.get(30, 30) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn overlapping_stamps_do_not_compound() {
        let mut mask = Mask::new(Dimensions::new(40, 40));
        let mut stroke = StrokeOverlay::begin(mask.dimensions(), Tool::Brush, 6.0, 50.0).unwrap();
        stroke.add_point(20, 20);
        stroke.add_point(21, 20);
        stroke.add_point(20, 20);
        stroke.finish(&mut mask).unwrap();
        assert!((mask.get(20, 20) - 0.6).abs() < 1e-6);
    }

    #[test]
    fn segments_are_filled_between_points() {
        let dims = Dimensions::new(100, 20);
        let mut stroke = StrokeOverlay::begin(dims, Tool::Brush, 3.0, 0.0).unwrap();
        stroke.add_point(5, 10);
        stroke.add_point(90, 10);
        let mut mask = Mask::new(dims);
        stroke.finish(&mut mask).unwrap();
        for x in 5..=90 {
            assert!((mask.get(x, 10) - 1.0).abs() < f32::EPSILON, "gap at x={x}");
        }
    }

    #[test]
    fn stroke_outside_image_is_clipped() {
        let dims = Dimensions::new(10, 10);
        let mut stroke = StrokeOverlay::begin(dims, Tool::Brush, 3.0, 0.0).unwrap();
        stroke.add_point(-50, -50);
        assert_eq!(stroke.covered_pixels(), 0);
        stroke.add_point(0, 0);
        assert!(stroke.covered_pixels() > 0);
    }

    #[test]
    fn extreme_stroke_points_do_not_overflow() {
        let dims = Dimensions::new(10, 10);
        let mut stroke = StrokeOverlay::begin(dims, Tool::Brush, 3.0, 0.0).unwrap();
        stroke.add_point(i32::MAX - 1, 5);
        stroke.add_point(i32::MAX, i32::MAX);
        assert_eq!(stroke.covered_pixels(), 0);

        let mut stroke = StrokeOverlay::begin(dims, Tool::Brush, 3.0, 0.0).unwrap();
        stroke.add_point(i32::MIN, 5);
        stroke.add_point(5, 5);
        stroke.add_point(i32::MIN, i32::MIN);
        let mut mask = Mask::new(dims);
        stroke.finish(&mut mask).unwrap();
        // The row from the left edge to (5, 5) is swept.
        for x in 0..=5 {
            assert!((mask.get(x, 5) - 1.0).abs() < f32::EPSILON, "gap at x={x}");
        }
    }

    #[test]
    fn huge_radius_covers_image_without_overflow() {
        let dims = Dimensions::new(8, 6);
        let mut stroke = StrokeOverlay::begin(dims, Tool::Brush, 1e12, 0.0).unwrap();
        stroke.add_point(4, 3);
        stroke.add_point(i32::MAX, i32::MIN);
        assert_eq!(stroke.covered_pixels(), dims.pixel_count());
    }

    #[test]
    fn finish_rejects_mismatched_mask() {
        let stroke = StrokeOverlay::begin(Dimensions::new(10, 10), Tool::Brush, 2.0, 0.0).unwrap();
        let mut mask = Mask::new(Dimensions::new(5, 5));
        assert!(matches!(
            stroke.finish(&mut mask),
            Err(PipelineError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn wand_fills_exact_rectangle() {
        let img = red_square_on_white();
        let mut mask = Mask::new(Dimensions::of(&img));
        let filled = magic_wand(&img, &mut mask, 50, 50, 0.0).unwrap();
        assert_eq!(filled, 3600);
        for (x, y, _) in img.enumerate_pixels() {
            let inside = (20..80).contains(&x) && (20..80).contains(&y);
            let expected = if inside { 1.0 } else { 0.0 };
            assert!((mask.get(x, y) - expected).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn wand_toggles_back() {
        let img = red_square_on_white();
        let mut mask = Mask::new(Dimensions::of(&img));
        let before = mask.clone();
        magic_wand(&img, &mut mask, 50, 50, 10.0).unwrap();
        assert_ne!(mask, before);
        magic_wand(&img, &mut mask, 50, 50, 10.0).unwrap();
        assert_eq!(mask, before);
    }

    #[test]
    fn wand_outside_image_is_noop() {
        let img = red_square_on_white();
        let mut mask = Mask::new(Dimensions::of(&img));
        for (x, y) in [(-1, 5), (100, 5), (5, i64::MAX)] {
            assert_eq!(magic_wand(&img, &mut mask, x, y, 10.0).unwrap(), 0, "({x},{y})");
        }
        assert!(mask.values().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn wand_rejects_bad_tolerance() {
        let img = red_square_on_white();
        let mut mask = Mask::new(Dimensions::of(&img));
        for tolerance in [-1.0, f32::NAN] {
            assert!(matches!(
                magic_wand(&img, &mut mask, 50, 50, tolerance),
                Err(PipelineError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn wand_tolerance_spans_similar_colors() {
        // Two nearly-equal reds side by side, distance 5.
        let img = RgbaImage::from_fn(10, 1, |x, _| {
            if x < 5 {
                RED
            } else {
                image::Rgba([250, 0, 0, 255])
            }
        });
        let mut mask = Mask::new(Dimensions::of(&img));
        assert_eq!(magic_wand(&img, &mut mask, 0, 0, 4.0).unwrap(), 5);
        let mut mask = Mask::new(Dimensions::of(&img));
        assert_eq!(magic_wand(&img, &mut mask, 0, 0, 5.0).unwrap(), 10);
    }
}
