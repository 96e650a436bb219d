//! Background and foreground color estimation.
//!
//! The background color comes from either a user pick (the exact pixel
//! color at a clicked coordinate) or, as a fallback, the pixels in a
//! border band around the image perimeter. The foreground color is only
//! needed by trimap segmentation; it is estimated from a centered square
//! with background-like pixels excluded.

use rand::Rng;

use crate::color::{self, Color};
use crate::types::{BackgroundDetection, Dimensions, PipelineError, RgbaImage, Settings};

/// Minimum border band width in pixels.
pub const MIN_BORDER_WIDTH: u32 = 2;

/// Border band width as a fraction of the smaller image side.
pub const BORDER_FRACTION: f64 = 0.01;

/// Number of k-means clusters over border samples.
pub const BACKGROUND_CLUSTERS: usize = 3;

/// Number of k-means clusters over center samples.
pub const FOREGROUND_CLUSTERS: usize = 2;

/// Center square side as a fraction of the smaller image side.
pub const CENTER_FRACTION: f64 = 0.2;

/// Center samples closer than this to the background color are ignored.
pub const FOREGROUND_EXCLUSION_DISTANCE: f32 = 50.0;

/// Width of the border band: `max(2, 1% of the smaller side)`, never
/// wider than half the smaller side (rounded up).
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn border_width(dimensions: Dimensions) -> u32 {
    let min_side = dimensions.min_side();
    let proportional = (f64::from(min_side) * BORDER_FRACTION).floor() as u32;
    proportional
        .max(MIN_BORDER_WIDTH)
        .min(min_side.div_ceil(2).max(1))
}

/// Whether `(x, y)` falls inside a border band of width `band`.
#[must_use]
pub const fn in_border(dimensions: Dimensions, band: u32, x: u32, y: u32) -> bool {
    x < band
        || y < band
        || x + band >= dimensions.width
        || y + band >= dimensions.height
}

/// Colors of every `stride`-th pixel in the border band.
#[must_use]
pub fn border_samples(image: &RgbaImage, stride: u32) -> Vec<Color> {
    let dims = Dimensions::of(image);
    let band = border_width(dims);
    let stride = stride.max(1);
    let mut samples = Vec::new();
    for y in (0..dims.height).step_by(stride as usize) {
        for x in (0..dims.width).step_by(stride as usize) {
            if in_border(dims, band, x, y) {
                samples.push(Color::from_rgba(image.get_pixel(x, y)));
            }
        }
    }
    samples
}

/// The exact color at a user-clicked coordinate.
///
/// # Errors
///
/// Returns [`PipelineError::CoordinateOutOfBounds`] if `(x, y)` is
/// outside the image.
pub fn sample_background(image: &RgbaImage, x: i64, y: i64) -> Result<Color, PipelineError> {
    let dimensions = Dimensions::of(image);
    let (Ok(ux), Ok(uy)) = (u32::try_from(x), u32::try_from(y)) else {
        return Err(PipelineError::CoordinateOutOfBounds { x, y, dimensions });
    };
    if !dimensions.contains(x, y) {
        return Err(PipelineError::CoordinateOutOfBounds { x, y, dimensions });
    }
    Ok(Color::from_rgba(image.get_pixel(ux, uy)))
}

/// Estimated background color and how it was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackgroundEstimate {
    /// The background color.
    pub color: Color,
    /// Number of border samples considered (0 for a user pick).
    pub sample_count: usize,
}

/// Estimate the background color.
///
/// A user pick wins when present. Otherwise border samples are reduced
/// according to `settings.background_detection`.
pub fn detect_background<R: Rng + ?Sized>(
    image: &RgbaImage,
    settings: &Settings,
    picked: Option<Color>,
    rng: &mut R,
) -> BackgroundEstimate {
    if let Some(color) = picked {
        return BackgroundEstimate {
            color,
            sample_count: 0,
        };
    }

    let samples = border_samples(image, settings.detail_level.sample_stride());
    let color = match settings.background_detection {
        BackgroundDetection::Average => color::average(&samples),
        BackgroundDetection::Cluster => color::kmeans(&samples, BACKGROUND_CLUSTERS, rng)
            .dominant()
            .unwrap_or_else(|| color::average(&samples)),
    };
    tracing::trace!(%color, samples = samples.len(), "background estimated from border");
    BackgroundEstimate {
        color,
        sample_count: samples.len(),
    }
}

/// Estimate the foreground color from the image center.
///
/// Samples a centered square whose side is at least 20% of the smaller
/// image side, skipping pixels within [`FOREGROUND_EXCLUSION_DISTANCE`]
/// of `background`. Returns the complement of `background` when every
/// sample is excluded.
pub fn detect_foreground<R: Rng + ?Sized>(
    image: &RgbaImage,
    settings: &Settings,
    background: Color,
    rng: &mut R,
) -> Color {
    let dims = Dimensions::of(image);
    let (x0, y0, side) = center_square(dims);
    let stride = settings.detail_level.sample_stride().max(1) as usize;

    let samples: Vec<Color> = (y0..y0 + side)
        .step_by(stride)
        .flat_map(|y| (x0..x0 + side).step_by(stride).map(move |x| (x, y)))
        .filter(|&(x, y)| x < dims.width && y < dims.height)
        .map(|(x, y)| Color::from_rgba(image.get_pixel(x, y)))
        .filter(|&c| color::distance(c, background) >= FOREGROUND_EXCLUSION_DISTANCE)
        .collect();

    if samples.is_empty() {
        tracing::trace!(%background, "no foreground samples; using complement");
        return background.complement();
    }

    color::kmeans(&samples, FOREGROUND_CLUSTERS, rng)
        .dominant()
        .unwrap_or_else(|| background.complement())
}

/// Top-left corner and side of the centered sampling square.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn center_square(dims: Dimensions) -> (u32, u32, u32) {
    let min_side = dims.min_side();
    let side = ((f64::from(min_side) * CENTER_FRACTION).ceil() as u32).clamp(1, min_side.max(1));
    let x0 = (dims.width - side.min(dims.width)) / 2;
    let y0 = (dims.height - side.min(dims.height)) / 2;
    (x0, y0, side)
}
