//! Mask refinement: Gaussian smoothing followed by logistic sharpening.
//!
//! Smoothing uses a normalized separable kernel whose sigma grows with
//! the smoothing setting (`1 + smoothing / 100 * 2`) and whose radius is
//! `ceil(2 * sigma)`. Samples past the image edge clamp to the nearest
//! edge pixel. The sharpening curve `1 / (1 + exp(-10 (m - 0.5 + b)))`
//! pushes values toward 0 or 1, shifted by the foreground bias `b`.
//!
//! The blur runs on an `f32` copy of the mask rather than an 8-bit
//! image, so repeated refinement does not quantize the matte.

use image::{ImageBuffer, Luma};
use imageproc::filter::separable_filter_equal;

use crate::types::{Mask, Settings};

/// Single-channel float image the blur runs on.
type Matte = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Slope of the sharpening curve.
pub const SHARPEN_SLOPE: f32 = 10.0;

/// Blur sigma for a smoothing setting in `0..=100`.
#[must_use]
pub fn smoothing_sigma(smoothing: f32) -> f32 {
    1.0 + smoothing / 100.0 * 2.0
}

/// Normalized 1-D Gaussian kernel of length `2 * ceil(2 * sigma) + 1`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (2.0 * sigma).ceil().max(1.0) as usize;
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..=2 * radius)
        .map(|i| {
            let d = i as f32 - radius as f32;
            (-(d * d) / denom).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= sum;
    }
    kernel
}

/// Blur the mask with a separable Gaussian of the given sigma.
///
/// Non-positive sigma returns the mask unchanged.
#[must_use = "returns the blurred mask"]
pub fn gaussian_blur(mask: &Mask, sigma: f32) -> Mask {
    if sigma <= 0.0 || !sigma.is_finite() {
        return mask.clone();
    }
    let dims = mask.dimensions();
    let matte = Matte::from_fn(dims.width, dims.height, |x, y| Luma([mask.get(x, y)]));
    let blurred = separable_filter_equal(&matte, &gaussian_kernel(sigma));
    Mask::from_fn(dims, |x, y| blurred.get_pixel(x, y).0[0])
}

/// The sharpening curve with bias shift `bias`.
#[must_use]
pub fn sharpen(value: f32, bias: f32) -> f32 {
    1.0 / (1.0 + (-SHARPEN_SLOPE * (value - 0.5 + bias)).exp())
}

/// Refine a segmentation mask.
///
/// Blurs when `settings.smoothing > 0`, then always applies the
/// sharpening curve with `settings.bias_shift()`.
#[must_use = "returns the refined mask"]
pub fn refine(mask: &Mask, settings: &Settings) -> Mask {
    let mut refined = if settings.smoothing > 0.0 {
        gaussian_blur(mask, smoothing_sigma(settings.smoothing))
    } else {
        mask.clone()
    };
    let bias = settings.bias_shift();
    refined.map_in_place(|v| sharpen(v, bias));
    refined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Dimensions;

    fn step_mask() -> Mask {
        Mask::from_fn(Dimensions::new(20, 6), |x, _| if x < 10 { 0.0 } else { 1.0 })
    }

    #[test]
    fn sigma_follows_smoothing() {
        assert!((smoothing_sigma(0.0) - 1.0).abs() < f32::EPSILON);
        assert!((smoothing_sigma(30.0) - 1.6).abs() < 1e-6);
        assert!((smoothing_sigma(100.0) - 3.0).abs() < f32::EPSILON);
    }

    #[test]
    fn kernel_is_normalized_and_odd() {
        for sigma in [1.0, 1.6, 3.0] {
            let kernel = gaussian_kernel(sigma);
            assert_eq!(kernel.len() % 2, 1);
            let sum: f32 = kernel.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "sigma {sigma}: sum {sum}");
        }
        // sigma 1.6 -> radius ceil(3.2) = 4.
        assert_eq!(gaussian_kernel(1.6).len(), 9);
    }

    #[test]
    fn blur_softens_step() {
        let blurred = gaussian_blur(&step_mask(), 2.0);
        assert!(blurred.get(9, 3) > 0.0);
        assert!(blurred.get(10, 3) < 1.0);
        assert!(blurred.get(0, 3).abs() < 1e-4);
        assert!((blurred.get(19, 3) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn blur_of_uniform_mask_is_identity() {
        let mask = Mask::filled(Dimensions::new(7, 5), 0.4);
        let blurred = gaussian_blur(&mask, 3.0);
        assert!(blurred.values().iter().all(|v| (v - 0.4).abs() < 1e-5));
    }

    #[test]
    fn blur_clamps_samples_at_the_border() {
        // A lone bright corner: clamped sampling repeats it past the edge,
        // so the corner keeps more weight than its inner neighbor.
        let mask = Mask::from_fn(Dimensions::new(9, 9), |x, y| {
            if (x, y) == (0, 0) { 1.0 } else { 0.0 }
        });
        let blurred = gaussian_blur(&mask, 1.0);
        let kernel = gaussian_kernel(1.0);
        let radius = kernel.len() / 2;
        // Weight of every tap at or left of the corner along one axis.
        let edge: f32 = kernel[..=radius].iter().sum();
        assert!((blurred.get(0, 0) - edge * edge).abs() < 1e-5);
        assert!(blurred.get(1, 1) < blurred.get(0, 0));
        assert!(blurred.get(8, 8).abs() < 1e-6);
    }

    #[test]
    fn zero_sigma_returns_identical_mask() {
        let mask = step_mask();
        assert_eq!(gaussian_blur(&mask, 0.0), mask);
    }

    #[test]
    fn sharpen_bias_moves_midpoint() {
        assert!((sharpen(0.5, 0.0) - 0.5).abs() < 1e-6);
        assert!(sharpen(0.5, 0.2) > 0.8);
        assert!(sharpen(0.5, -0.2) < 0.2);
    }

    #[test]
    fn refine_without_smoothing_only_sharpens() {
        let settings = Settings {
            smoothing: 0.0,
            ..Settings::default()
        };
        let refined = refine(&step_mask(), &settings);
        assert!((refined.get(0, 0) - sharpen(0.0, 0.0)).abs() < 1e-6);
        assert!((refined.get(15, 0) - sharpen(1.0, 0.0)).abs() < 1e-6);
    }

    #[test]
    fn refine_keeps_values_in_range() {
        let refined = refine(&step_mask(), &Settings::default());
        assert!(refined.values().iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(refined.get(0, 3) < 0.01);
        assert!(refined.get(19, 3) > 0.99);
    }
}
