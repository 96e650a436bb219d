//! Color math: distances, hex conversion, and k-means clustering.
//!
//! Two distance metrics are provided:
//!
//! - [`distance`]: unweighted Euclidean RGB distance, maximum
//!   [`MAX_DISTANCE`] (≈ 441.67). Used by every algorithm that compares
//!   colors against absolute thresholds (20, 30, 50, flood-fill
//!   tolerance) and by k-means assignment.
//! - [`perceptual_distance`]: `sqrt(3Δr² + 4Δg² + 2Δb²)`, maximum
//!   [`MAX_PERCEPTUAL_DISTANCE`] (765). Used only by the blended
//!   segmentation probability.
//!
//! [`kmeans`] takes the RNG as a parameter so callers control seeding.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::types::PipelineError;

/// Largest possible [`distance`] between two colors: black to white.
pub const MAX_DISTANCE: f32 = 441.672_96;

/// Largest possible [`perceptual_distance`] between two colors.
pub const MAX_PERCEPTUAL_DISTANCE: f32 = 765.0;

/// Number of Lloyd iterations run by [`kmeans`].
pub const KMEANS_ITERATIONS: usize = 10;

/// An opaque 24-bit RGB color.
///
/// Serializes as a `#rrggbb` hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl Color {
    /// Pure black.
    pub const BLACK: Self = Self::new(0, 0, 0);
    /// Pure white.
    pub const WHITE: Self = Self::new(255, 255, 255);

    /// Create a color from its channels.
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// The RGB part of an RGBA pixel (alpha is ignored).
    #[must_use]
    pub const fn from_rgba(pixel: &image::Rgba<u8>) -> Self {
        let [r, g, b, _] = pixel.0;
        Self { r, g, b }
    }

    /// Opaque RGBA pixel with this color.
    #[must_use]
    pub const fn to_rgba(self) -> image::Rgba<u8> {
        image::Rgba([self.r, self.g, self.b, 255])
    }

    /// Channel-wise complement (`255 - c`).
    #[must_use]
    pub const fn complement(self) -> Self {
        Self::new(255 - self.r, 255 - self.g, 255 - self.b)
    }

    /// Channels as an array, in R, G, B order.
    #[must_use]
    pub const fn channels(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }

    /// Sum of absolute per-channel differences.
    #[must_use]
    pub fn manhattan(self, other: Self) -> u32 {
        u32::from(self.r.abs_diff(other.r))
            + u32::from(self.g.abs_diff(other.g))
            + u32::from(self.b.abs_diff(other.b))
    }

    /// Lowercase `#rrggbb` representation.
    #[must_use]
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Parse a `#rrggbb` or `rrggbb` hex string (either case).
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidParameter`] if the string is not
    /// exactly six hex digits after an optional leading `#`.
    pub fn from_hex(hex: &str) -> Result<Self, PipelineError> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(PipelineError::InvalidParameter(format!(
                "invalid hex color {hex:?}: expected 6 hex digits"
            )));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16).map_err(|e| {
                PipelineError::InvalidParameter(format!("invalid hex color {hex:?}: {e}"))
            })
        };
        Ok(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_hex()
    }
}

impl TryFrom<String> for Color {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

/// Unweighted Euclidean distance in RGB space.
#[must_use]
pub fn distance(a: Color, b: Color) -> f32 {
    let dr = f32::from(a.r) - f32::from(b.r);
    let dg = f32::from(a.g) - f32::from(b.g);
    let db = f32::from(a.b) - f32::from(b.b);
    dr.mul_add(dr, dg.mul_add(dg, db * db)).sqrt()
}

/// [`distance`] scaled into `[0, 1]`.
#[must_use]
pub fn normalized_distance(a: Color, b: Color) -> f32 {
    (distance(a, b) / MAX_DISTANCE).min(1.0)
}

/// Perceptually weighted distance `sqrt(3Δr² + 4Δg² + 2Δb²)`.
#[must_use]
pub fn perceptual_distance(a: Color, b: Color) -> f32 {
    let dr = f32::from(a.r) - f32::from(b.r);
    let dg = f32::from(a.g) - f32::from(b.g);
    let db = f32::from(a.b) - f32::from(b.b);
    (3.0 * dr * dr + 4.0 * dg * dg + 2.0 * db * db).sqrt()
}

/// Result of [`kmeans`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clusters {
    /// Cluster centroids.
    pub centers: Vec<Color>,
    /// Number of points assigned to each centroid in the final iteration.
    pub sizes: Vec<usize>,
}

impl Clusters {
    /// Centroid of the most populated cluster (first one on ties).
    ///
    /// Returns `None` when there are no clusters or every cluster is empty.
    #[must_use]
    pub fn dominant(&self) -> Option<Color> {
        let (index, &size) = self
            .sizes
            .iter()
            .enumerate()
            .rev()
            .max_by_key(|&(_, size)| *size)?;
        if size == 0 {
            return None;
        }
        self.centers.get(index).copied()
    }
}

/// Lloyd's k-means over RGB samples.
///
/// Initial centers are `k` samples drawn (with replacement) from
/// `points` using `rng`. Runs [`KMEANS_ITERATIONS`] rounds of nearest
/// center assignment followed by per-cluster mean update. A cluster that
/// loses all its points keeps its previous center.
///
/// With no input points, returns `k` black centers with zero sizes.
pub fn kmeans<R: Rng + ?Sized>(points: &[Color], k: usize, rng: &mut R) -> Clusters {
    if points.is_empty() || k == 0 {
        return Clusters {
            centers: vec![Color::BLACK; k],
            sizes: vec![0; k],
        };
    }

    let mut centers: Vec<Color> = (0..k)
        .map(|_| points[rng.random_range(0..points.len())])
        .collect();
    let mut assignment = vec![0usize; points.len()];
    let mut sizes = vec![0usize; k];

    for _ in 0..KMEANS_ITERATIONS {
        for (slot, &point) in assignment.iter_mut().zip(points) {
            *slot = nearest_center(&centers, point);
        }

        let mut sums = vec![[0u64; 3]; k];
        sizes.iter_mut().for_each(|s| *s = 0);
        for (&cluster, &point) in assignment.iter().zip(points) {
            sizes[cluster] += 1;
            for (sum, channel) in sums[cluster].iter_mut().zip(point.channels()) {
                *sum += u64::from(channel);
            }
        }

        for ((center, sum), &size) in centers.iter_mut().zip(&sums).zip(&sizes) {
            if size > 0 {
                let mean = |total: u64| channel_mean(total, size);
                *center = Color::new(mean(sum[0]), mean(sum[1]), mean(sum[2]));
            }
        }
    }

    Clusters { centers, sizes }
}

/// Index of the center closest to `point` (first one on ties).
fn nearest_center(centers: &[Color], point: Color) -> usize {
    let mut best = 0;
    let mut best_distance = f32::INFINITY;
    for (i, &center) in centers.iter().enumerate() {
        let d = distance(point, center);
        if d < best_distance {
            best = i;
            best_distance = d;
        }
    }
    best
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn channel_mean(total: u64, count: usize) -> u8 {
    (total as f64 / count as f64).round().clamp(0.0, 255.0) as u8
}

/// Plain per-channel average of the samples (black when empty).
#[must_use]
pub fn average(points: &[Color]) -> Color {
    if points.is_empty() {
        return Color::BLACK;
    }
    let mut sums = [0u64; 3];
    for point in points {
        for (sum, channel) in sums.iter_mut().zip(point.channels()) {
            *sum += u64::from(channel);
        }
    }
    let n = points.len();
    Color::new(
        channel_mean(sums[0], n),
        channel_mean(sums[1], n),
        channel_mean(sums[2], n),
    )
}
