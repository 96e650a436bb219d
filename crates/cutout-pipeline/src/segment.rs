//! Segmentation: turn an image into an initial foreground mask.
//!
//! This module defines the [`Segment`] trait for pluggable segmentation
//! algorithms and the [`Segmenter`] enum selecting which one runs.
//! [`Algorithm::resolve`] maps the user-facing [`Algorithm`] (which
//! includes an `Adaptive` choice) onto a concrete [`Segmenter`] using
//! image statistics.
//!
//! Every segmenter is a pure function of its [`SegmentInput`]; nothing
//! is carried between calls.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::color::{self, Color, MAX_PERCEPTUAL_DISTANCE};
use crate::edge;
use crate::matting;
use crate::stats::ImageStats;
use crate::types::{Algorithm, Dimensions, Mask, RgbaImage, Settings};

/// Adaptive selection prefers edge-based segmentation above this edge ratio.
pub const ADAPTIVE_EDGE_RATIO: f64 = 0.1;

/// Adaptive selection prefers color-based segmentation above this total
/// channel range. Checked after [`ADAPTIVE_EDGE_RATIO`] and wins over it.
pub const ADAPTIVE_COLOR_RANGE: u32 = 300;

/// Color-based threshold at zero sensitivity.
pub const COLOR_BASE_THRESHOLD: f32 = 0.3;

/// How much full sensitivity lowers the color-based threshold.
pub const COLOR_SENSITIVITY_SPAN: f32 = 0.2;

/// Blended threshold at zero sensitivity.
pub const BLENDED_BASE_THRESHOLD: f32 = 0.5;

/// How much full sensitivity lowers the blended threshold.
pub const BLENDED_SENSITIVITY_SPAN: f32 = 0.3;

/// Weight of local edge strength subtracted from background probability.
pub const BLENDED_EDGE_WEIGHT: f32 = 0.5;

/// Edge strength above which a pixel seeds the foreground.
pub const EDGE_SEED_THRESHOLD: f32 = 0.2;

/// Neighbors closer than this to an already-foreground pixel join the
/// foreground during edge-based growth.
pub const EDGE_GROW_DISTANCE: f32 = 30.0;

/// The concrete segmentation algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Segmenter {
    /// Hard threshold on normalized color distance to the background.
    Color,
    /// Edge seeds grown over similar colors.
    Edge,
    /// Background probability from perceptual distance minus edge strength.
    Blended,
    /// Trimap plus simplified alpha matting.
    Trimap,
}

impl std::fmt::Display for Segmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Color => "color",
            Self::Edge => "edge",
            Self::Blended => "blended",
            Self::Trimap => "trimap",
        })
    }
}

impl Segmenter {
    /// Whether this segmenter needs a foreground color estimate.
    #[must_use]
    pub const fn needs_foreground(self) -> bool {
        matches!(self, Self::Trimap)
    }
}

impl Algorithm {
    /// Pick the concrete segmenter for this algorithm.
    ///
    /// `Adaptive` starts from [`Segmenter::Blended`], switches to
    /// [`Segmenter::Edge`] when the edge ratio exceeds
    /// [`ADAPTIVE_EDGE_RATIO`], and then to [`Segmenter::Color`] when the
    /// total channel range exceeds [`ADAPTIVE_COLOR_RANGE`], so color
    /// wins when both hold.
    #[must_use]
    pub fn resolve(self, stats: &ImageStats) -> Segmenter {
        match self {
            Self::Color => Segmenter::Color,
            Self::Edge => Segmenter::Edge,
            Self::Trimap => Segmenter::Trimap,
            Self::Adaptive => {
                let mut choice = Segmenter::Blended;
                if stats.edge_ratio > ADAPTIVE_EDGE_RATIO {
                    choice = Segmenter::Edge;
                }
                if stats.total_range() > ADAPTIVE_COLOR_RANGE {
                    choice = Segmenter::Color;
                }
                tracing::trace!(
                    edge_ratio = stats.edge_ratio,
                    total_range = stats.total_range(),
                    %choice,
                    "adaptive algorithm resolved",
                );
                choice
            }
        }
    }
}

/// Everything a segmenter reads.
#[derive(Debug, Clone, Copy)]
pub struct SegmentInput<'a> {
    /// Source pixels.
    pub image: &'a RgbaImage,
    /// Processing settings.
    pub settings: &'a Settings,
    /// Background color (picked or detected).
    pub background: Color,
    /// Foreground color; required by [`Segmenter::Trimap`], ignored otherwise.
    pub foreground: Option<Color>,
}

/// Trait for segmentation strategies.
///
/// Output: a mask with the image's dimensions, values in `[0, 1]`.
pub trait Segment {
    /// Segment the image.
    fn segment(&self, input: &SegmentInput<'_>) -> Mask;
}

impl Segment for Segmenter {
    fn segment(&self, input: &SegmentInput<'_>) -> Mask {
        match *self {
            Self::Color => segment_color(input.image, input.settings, input.background),
            Self::Edge => segment_edge(input.image, input.settings),
            Self::Blended => segment_blended(input.image, input.settings, input.background),
            Self::Trimap => {
                let foreground = input
                    .foreground
                    .unwrap_or_else(|| input.background.complement());
                matting::segment_trimap(input.image, input.background, foreground)
            }
        }
    }
}

/// Color-based segmentation.
///
/// Each pixel's normalized distance to `background`, shifted by the
/// foreground bias, is compared against `0.3 - 0.2 * sensitivity`:
/// below is background (0), otherwise foreground (1).
#[must_use]
pub fn segment_color(image: &RgbaImage, settings: &Settings, background: Color) -> Mask {
    let threshold =
        COLOR_SENSITIVITY_SPAN.mul_add(-settings.sensitivity_factor(), COLOR_BASE_THRESHOLD);
    let bias = settings.bias_shift();
    Mask::from_fn(Dimensions::of(image), |x, y| {
        let c = Color::from_rgba(image.get_pixel(x, y));
        let d = color::normalized_distance(c, background) + bias;
        if d < threshold { 0.0 } else { 1.0 }
    })
}

/// Blended color + edge segmentation (the "adaptive" scoring).
///
/// Background probability is `1 - perceptual_distance / 765`, minus
/// half the local edge strength when edge detection is enabled, minus
/// the foreground bias. Probabilities above `0.5 - 0.3 * sensitivity`
/// are background.
#[must_use]
pub fn segment_blended(image: &RgbaImage, settings: &Settings, background: Color) -> Mask {
    let threshold =
        BLENDED_SENSITIVITY_SPAN.mul_add(-settings.sensitivity_factor(), BLENDED_BASE_THRESHOLD);
    let bias = settings.bias_shift();
    let edges = settings.edge_detection.then(|| edge::edge_map(image));

    Mask::from_fn(Dimensions::of(image), |x, y| {
        let c = Color::from_rgba(image.get_pixel(x, y));
        let d = color::perceptual_distance(c, background) / MAX_PERCEPTUAL_DISTANCE;
        let mut probability = 1.0 - d.min(1.0);
        if let Some(edges) = &edges {
            probability -= edges.get_pixel(x, y).0[0] * BLENDED_EDGE_WEIGHT;
        }
        probability -= bias;
        if probability > threshold { 0.0 } else { 1.0 }
    })
}

/// Edge-based segmentation.
///
/// Pixels with edge strength above [`EDGE_SEED_THRESHOLD`] seed the
/// foreground. A breadth-first fill then marks 8-connected neighbors
/// whose color is within [`EDGE_GROW_DISTANCE`] of the foreground pixel
/// that reached them. The result is shifted uniformly by
/// `(bias - 50) / 200` and clamped.
#[must_use]
pub fn segment_edge(image: &RgbaImage, settings: &Settings) -> Mask {
    let dims = Dimensions::of(image);
    let width = dims.width as usize;
    let edges = edge::edge_map(image);

    let mut foreground = vec![false; dims.pixel_count()];
    let mut queue = VecDeque::new();
    for (x, y, e) in edges.enumerate_pixels() {
        if e.0[0] > EDGE_SEED_THRESHOLD {
            foreground[y as usize * width + x as usize] = true;
            queue.push_back((x, y));
        }
    }

    while let Some((x, y)) = queue.pop_front() {
        let current = Color::from_rgba(image.get_pixel(x, y));
        for (nx, ny) in neighbors8(dims, x, y) {
            let i = ny as usize * width + nx as usize;
            if foreground[i] {
                continue;
            }
            let neighbor = Color::from_rgba(image.get_pixel(nx, ny));
            if color::distance(current, neighbor) < EDGE_GROW_DISTANCE {
                foreground[i] = true;
                queue.push_back((nx, ny));
            }
        }
    }

    let shift = settings.bias_shift() / 2.0;
    Mask::from_fn(dims, |x, y| {
        let fg = foreground[y as usize * width + x as usize];
        (if fg { 1.0 } else { 0.0 }) + shift
    })
}

/// In-bounds 8-connected neighbors of `(x, y)`.
fn neighbors8(dims: Dimensions, x: u32, y: u32) -> impl Iterator<Item = (u32, u32)> {
    const OFFSETS: [(i64, i64); 8] = [
        (-1, -1),
        (0, -1),
        (1, -1),
        (-1, 0),
        (1, 0),
        (-1, 1),
        (0, 1),
        (1, 1),
    ];
    OFFSETS.into_iter().filter_map(move |(dx, dy)| {
        let nx = i64::from(x) + dx;
        let ny = i64::from(y) + dy;
        if dims.contains(nx, ny) {
            Some((u32::try_from(nx).ok()?, u32::try_from(ny).ok()?))
        } else {
            None
        }
    })
}
