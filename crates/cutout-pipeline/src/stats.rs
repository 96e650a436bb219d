//! Whole-image color statistics.
//!
//! Computed once at the start of a run and used by adaptive algorithm
//! selection and diagnostics.

use crate::color::Color;
use crate::types::{Dimensions, RgbaImage};

/// Manhattan gradient (left/right or top/bottom) above which an interior
/// pixel counts as an edge pixel.
pub const EDGE_PIXEL_THRESHOLD: u32 = 100;

/// Read-only statistics snapshot for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageStats {
    /// Image dimensions.
    pub dimensions: Dimensions,
    /// Per-channel mean, rounded.
    pub average: Color,
    /// Per-channel minimum.
    pub min: Color,
    /// Per-channel maximum.
    pub max: Color,
    /// Interior pixels whose horizontal or vertical gradient exceeds
    /// [`EDGE_PIXEL_THRESHOLD`], divided by the total pixel count.
    pub edge_ratio: f64,
    /// 256-bucket histograms for R, G and B.
    pub histograms: [[u32; 256]; 3],
}

impl ImageStats {
    /// Compute statistics in a single pass over the pixels.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(image: &RgbaImage) -> Self {
        let dimensions = Dimensions::of(image);
        let (w, h) = (dimensions.width, dimensions.height);

        let mut sums = [0u64; 3];
        let mut min = [u8::MAX; 3];
        let mut max = [u8::MIN; 3];
        let mut histograms = [[0u32; 256]; 3];
        let mut edge_pixels = 0u64;

        for (x, y, pixel) in image.enumerate_pixels() {
            let channels = Color::from_rgba(pixel).channels();
            for c in 0..3 {
                let v = channels[c];
                sums[c] += u64::from(v);
                min[c] = min[c].min(v);
                max[c] = max[c].max(v);
                histograms[c][usize::from(v)] += 1;
            }

            if x > 0 && y > 0 && x + 1 < w && y + 1 < h {
                let at = |px: u32, py: u32| Color::from_rgba(image.get_pixel(px, py));
                let gx = at(x - 1, y).manhattan(at(x + 1, y));
                let gy = at(x, y - 1).manhattan(at(x, y + 1));
                if gx > EDGE_PIXEL_THRESHOLD || gy > EDGE_PIXEL_THRESHOLD {
                    edge_pixels += 1;
                }
            }
        }

        let total = dimensions.pixel_count() as u64;
        if total == 0 {
            return Self {
                dimensions,
                average: Color::BLACK,
                min: Color::BLACK,
                max: Color::BLACK,
                edge_ratio: 0.0,
                histograms,
            };
        }

        let mean = |sum: u64| mean_channel(sum, total);
        Self {
            dimensions,
            average: Color::new(mean(sums[0]), mean(sums[1]), mean(sums[2])),
            min: Color::new(min[0], min[1], min[2]),
            max: Color::new(max[0], max[1], max[2]),
            edge_ratio: edge_pixels as f64 / total as f64,
            histograms,
        }
    }

    /// Per-channel `max - min`.
    #[must_use]
    pub const fn range(&self) -> [u8; 3] {
        [
            self.max.r - self.min.r,
            self.max.g - self.min.g,
            self.max.b - self.min.b,
        ]
    }

    /// Sum of the three channel ranges, `0..=765`.
    #[must_use]
    pub fn total_range(&self) -> u32 {
        self.range().iter().map(|&r| u32::from(r)).sum()
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn mean_channel(sum: u64, count: u64) -> u8 {
    (sum as f64 / count as f64).round().clamp(0.0, 255.0) as u8
}
