//! Shared types for the cutout background-removal engine.

use std::fmt;
use std::sync::Arc;

use image::Luma;
use serde::{Deserialize, Serialize};

pub use crate::color::Color;
use crate::segment::Segmenter;

/// Re-export `GrayImage` so downstream crates can exchange masks as
/// 8-bit images without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbaImage`, the pixel buffer every stage operates on.
pub use image::RgbaImage;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create dimensions from width and height.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Dimensions of an RGBA image.
    #[must_use]
    pub fn of(image: &RgbaImage) -> Self {
        Self::new(image.width(), image.height())
    }

    /// Total number of pixels.
    #[must_use]
    pub const fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Whether the signed coordinate lies inside the image.
    #[must_use]
    pub const fn contains(self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < self.width as i64 && y < self.height as i64
    }

    /// The smaller of width and height.
    #[must_use]
    pub fn min_side(self) -> u32 {
        self.width.min(self.height)
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Per-pixel foreground opacity in `[0, 1]`.
///
/// `1.0` is fully foreground (opaque), `0.0` fully background
/// (transparent). Values are stored row-major and every write is
/// clamped, so the range invariant holds after any operation. The
/// dimensions are fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    dimensions: Dimensions,
    values: Vec<f32>,
}

impl Mask {
    /// A mask with every pixel set to `value` (clamped).
    #[must_use]
    pub fn filled(dimensions: Dimensions, value: f32) -> Self {
        Self {
            dimensions,
            values: vec![clamp_unit(value); dimensions.pixel_count()],
        }
    }

    /// An all-background mask.
    #[must_use]
    pub fn new(dimensions: Dimensions) -> Self {
        Self::filled(dimensions, 0.0)
    }

    /// Build a mask by evaluating `f` at every pixel, clamping each value
    /// into `[0, 1]`.
    #[must_use]
    pub fn from_fn(dimensions: Dimensions, mut f: impl FnMut(u32, u32) -> f32) -> Self {
        let values = (0..dimensions.height)
            .flat_map(|y| (0..dimensions.width).map(move |x| (x, y)))
            .map(|(x, y)| clamp_unit(f(x, y)))
            .collect();
        Self { dimensions, values }
    }

    /// Build a mask from row-major values, clamping each into `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DimensionMismatch`] if `values.len()` is
    /// not `width * height`.
    pub fn from_values(dimensions: Dimensions, values: Vec<f32>) -> Result<Self, PipelineError> {
        if values.len() != dimensions.pixel_count() {
            return Err(PipelineError::DimensionMismatch {
                expected: dimensions,
                actual_len: values.len(),
            });
        }
        let values = values.into_iter().map(clamp_unit).collect();
        Ok(Self { dimensions, values })
    }

    /// Build a mask from an 8-bit grayscale image (`255` → `1.0`).
    #[must_use]
    pub fn from_gray_image(gray: &GrayImage) -> Self {
        Self {
            dimensions: Dimensions::new(gray.width(), gray.height()),
            values: gray.as_raw().iter().map(|&v| f32::from(v) / 255.0).collect(),
        }
    }

    /// Convert to an 8-bit grayscale image (`1.0` → `255`, rounded).
    #[must_use]
    pub fn to_gray_image(&self) -> GrayImage {
        GrayImage::from_fn(self.dimensions.width, self.dimensions.height, |x, y| {
            Luma([unit_to_byte(self.get(x, y))])
        })
    }

    /// Mask dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Mask width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.dimensions.width
    }

    /// Mask height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.dimensions.height
    }

    /// Row-major values.
    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Value at `(x, y)`. Panics if out of bounds, like `ImageBuffer::get_pixel`.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[self.index(x, y)]
    }

    /// Set the value at `(x, y)`, clamped into `[0, 1]`.
    pub fn set(&mut self, x: u32, y: u32, value: f32) {
        let i = self.index(x, y);
        self.values[i] = clamp_unit(value);
    }

    /// Apply `f` to every value, clamping the results.
    pub fn map_in_place(&mut self, mut f: impl FnMut(f32) -> f32) {
        for v in &mut self.values {
            *v = clamp_unit(f(*v));
        }
    }

    /// Fraction of pixels above `0.5`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn foreground_fraction(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let count = self.values.iter().filter(|&&v| v > 0.5).count();
        count as f64 / self.values.len() as f64
    }

    /// Ensure this mask has the same dimensions as `image`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MaskSizeMismatch`] when they differ.
    pub fn ensure_matches(&self, image: &RgbaImage) -> Result<(), PipelineError> {
        let image_dims = Dimensions::of(image);
        if self.dimensions == image_dims {
            Ok(())
        } else {
            Err(PipelineError::MaskSizeMismatch {
                image: image_dims,
                mask: self.dimensions,
            })
        }
    }

    pub(crate) fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.dimensions.width as usize + x as usize
    }
}

/// Clamp into `[0, 1]`, mapping NaN to `0`.
#[must_use]
pub fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

/// Convert a unit value to a byte, rounding.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn unit_to_byte(v: f32) -> u8 {
    (clamp_unit(v) * 255.0).round() as u8
}

/// Which segmentation algorithm to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Pick color, edge, or blended based on image statistics.
    #[default]
    Adaptive,
    /// Per-pixel color distance to the background color.
    Color,
    /// Edge seeds grown by flood fill over similar colors.
    Edge,
    /// Trimap seeding followed by simplified alpha matting.
    Trimap,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Adaptive => "adaptive",
            Self::Color => "color",
            Self::Edge => "edge",
            Self::Trimap => "trimap",
        })
    }
}

/// Sampling granularity for border and center color sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    /// Every fourth pixel.
    Low,
    /// Every second pixel.
    #[default]
    Medium,
    /// Every pixel.
    High,
}

impl DetailLevel {
    /// Step between sampled pixels along each axis.
    #[must_use]
    pub const fn sample_stride(self) -> u32 {
        match self {
            Self::Low => 4,
            Self::Medium => 2,
            Self::High => 1,
        }
    }
}

/// How the background color is estimated from border samples when the
/// user has not picked one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundDetection {
    /// Centroid of the largest k-means cluster (k = 3).
    #[default]
    Cluster,
    /// Plain per-channel average of all border samples.
    Average,
}

/// What the foreground is composited over.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "color")]
pub enum OutputBackground {
    /// Keep the alpha channel; no background is drawn.
    #[default]
    Transparent,
    /// Flat opaque color.
    Color(Color),
    /// An image, stretched to the output dimensions when sizes differ.
    ///
    /// Not serializable: hosts supply it at runtime.
    #[serde(skip)]
    Image(Arc<RgbaImage>),
}

/// Encoded output format, consumed by the host's encoding step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Lossless PNG with alpha.
    #[default]
    Png,
    /// Lossy JPEG (no alpha; composited over white if transparent).
    Jpeg,
    /// WebP with alpha.
    Webp,
}

impl OutputFormat {
    /// Conventional file extension.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
        }
    }
}

/// User-adjustable processing settings.
///
/// Deserialization fills missing fields from [`Default`], so hosts may
/// pass partial documents. Call [`validate`](Self::validate) before
/// processing; the pipeline does so on entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Segmentation algorithm.
    pub algorithm: Algorithm,
    /// How aggressively pixels are classified, `0..=100`.
    pub sensitivity: f32,
    /// Shift toward foreground (> 50) or background (< 50), `0..=100`.
    pub foreground_bias: f32,
    /// Gaussian smoothing strength, `0..=100` (0 disables blurring).
    pub smoothing: f32,
    /// Whether the blended algorithm subtracts local edge strength.
    pub edge_detection: bool,
    /// Border/center sampling granularity.
    pub detail_level: DetailLevel,
    /// Background color estimation strategy.
    pub background_detection: BackgroundDetection,
    /// Color-decontaminate soft edges when compositing.
    pub defringing: bool,
    /// Output background.
    pub background: OutputBackground,
    /// Encoder quality in `(0, 1]`.
    pub quality: f32,
    /// Encoded output format.
    pub format: OutputFormat,
    /// Seed for k-means initialisation. `None` draws a fresh seed per run.
    pub seed: Option<u64>,
}

impl Settings {
    /// Default sensitivity.
    pub const DEFAULT_SENSITIVITY: f32 = 50.0;
    /// Default (neutral) foreground bias.
    pub const DEFAULT_FOREGROUND_BIAS: f32 = 50.0;
    /// Default smoothing.
    pub const DEFAULT_SMOOTHING: f32 = 30.0;
    /// Default encoder quality.
    pub const DEFAULT_QUALITY: f32 = 0.92;

    /// Sensitivity normalized into `[0, 1]`.
    #[must_use]
    pub fn sensitivity_factor(&self) -> f32 {
        self.sensitivity / 100.0
    }

    /// Foreground-bias shift `(bias - 50) / 100`, in `[-0.5, 0.5]`.
    #[must_use]
    pub fn bias_shift(&self) -> f32 {
        (self.foreground_bias - 50.0) / 100.0
    }

    /// Check every numeric field is in range.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidSettings`] naming the first
    /// offending field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let percent_fields = [
            ("sensitivity", self.sensitivity),
            ("foreground_bias", self.foreground_bias),
            ("smoothing", self.smoothing),
        ];
        for (name, value) in percent_fields {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(PipelineError::InvalidSettings(format!(
                    "{name} must be within 0..=100, got {value}"
                )));
            }
        }
        if !self.quality.is_finite() || self.quality <= 0.0 || self.quality > 1.0 {
            return Err(PipelineError::InvalidSettings(format!(
                "quality must be within (0, 1], got {}",
                self.quality
            )));
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            sensitivity: Self::DEFAULT_SENSITIVITY,
            foreground_bias: Self::DEFAULT_FOREGROUND_BIAS,
            smoothing: Self::DEFAULT_SMOOTHING,
            edge_detection: true,
            detail_level: DetailLevel::default(),
            background_detection: BackgroundDetection::default(),
            defringing: true,
            background: OutputBackground::default(),
            quality: Self::DEFAULT_QUALITY,
            format: OutputFormat::default(),
            seed: None,
        }
    }
}

/// Everything one processing run needs.
#[derive(Debug, Clone)]
pub struct ProcessInput {
    /// Decoded source pixels. Read-only for the duration of the run.
    pub image: RgbaImage,
    /// Processing settings.
    pub settings: Settings,
    /// Background color picked by the user; overrides auto-detection.
    pub picked_background: Option<Color>,
    /// Previously edited mask; replaces segmentation when present.
    pub prior_mask: Option<Mask>,
}

impl ProcessInput {
    /// Input with default settings and no pick or prior mask.
    #[must_use]
    pub fn new(image: RgbaImage) -> Self {
        Self::with_settings(image, Settings::default())
    }

    /// Input with the given settings and no pick or prior mask.
    #[must_use]
    pub const fn with_settings(image: RgbaImage, settings: Settings) -> Self {
        Self {
            image,
            settings,
            picked_background: None,
            prior_mask: None,
        }
    }
}

/// Final output of a processing run.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    /// Refined alpha mask.
    pub mask: Mask,
    /// Source composited over the chosen background.
    pub composited: RgbaImage,
    /// Background color used for segmentation.
    pub background: Color,
    /// Foreground color (trimap runs only).
    pub foreground: Option<Color>,
    /// The segmenter that actually ran (`None` when a prior mask was reused).
    pub segmenter: Option<Segmenter>,
    /// Seed used for k-means initialisation.
    pub seed: u64,
    /// Source image dimensions.
    pub dimensions: Dimensions,
}

/// Errors that can occur during processing or manual editing.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Failed to decode an encoded input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// Encoded input bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// Width or height is zero, or the buffer length does not match.
    #[error("invalid image dimensions: {0}")]
    InvalidDimensions(String),

    /// A value buffer does not match the declared dimensions.
    #[error("buffer of {actual_len} values does not match dimensions {expected}")]
    DimensionMismatch {
        /// Declared dimensions.
        expected: Dimensions,
        /// Length of the supplied buffer.
        actual_len: usize,
    },

    /// Mask and image sizes differ.
    #[error("mask is {mask} but image is {image}")]
    MaskSizeMismatch {
        /// Image dimensions.
        image: Dimensions,
        /// Mask dimensions.
        mask: Dimensions,
    },

    /// A settings field is out of range.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// A tool or helper parameter is malformed.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A coordinate lies outside the image.
    #[error("coordinate ({x}, {y}) is outside the {dimensions} image")]
    CoordinateOutOfBounds {
        /// Horizontal coordinate.
        x: i64,
        /// Vertical coordinate.
        y: i64,
        /// Image dimensions.
        dimensions: Dimensions,
    },

    /// Manual editing was attempted while automatic processing is active.
    #[error("the mask is locked while automatic processing is running")]
    SessionBusy,

    /// A stage failed unexpectedly.
    #[error("processing failed: {0}")]
    ProcessingFailure(String),

    /// The caller cancelled the run.
    #[error("processing was cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Whether this is a caller-initiated cancellation rather than a failure.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Validate that an RGBA image has non-zero dimensions.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidDimensions`] if width or height is 0.
pub fn ensure_non_empty(image: &RgbaImage) -> Result<Dimensions, PipelineError> {
    let dims = Dimensions::of(image);
    if dims.width == 0 || dims.height == 0 {
        return Err(PipelineError::InvalidDimensions(format!(
            "image must be at least 1x1, got {dims}"
        )));
    }
    Ok(dims)
}

/// Build an RGBA image from a raw row-major buffer.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidDimensions`] if either dimension is
/// zero or `pixels.len() != width * height * 4`.
pub fn rgba_from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Result<RgbaImage, PipelineError> {
    if width == 0 || height == 0 {
        return Err(PipelineError::InvalidDimensions(format!(
            "image must be at least 1x1, got {width}x{height}"
        )));
    }
    let len = pixels.len();
    RgbaImage::from_raw(width, height, pixels).ok_or_else(|| {
        PipelineError::InvalidDimensions(format!(
            "{len} bytes is not a {width}x{height} RGBA buffer"
        ))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn mask_writes_are_clamped() {
        let mut mask = Mask::new(Dimensions::new(2, 2));
        mask.set(0, 0, 1.7);
        mask.set(1, 0, -0.3);
        mask.set(0, 1, f32::NAN);
        assert!((mask.get(0, 0) - 1.0).abs() < f32::EPSILON);
        assert!(mask.get(1, 0).abs() < f32::EPSILON);
        assert!(mask.get(0, 1).abs() < f32::EPSILON);
    }

    #[test]
    fn mask_from_values_rejects_wrong_length() {
        let result = Mask::from_values(Dimensions::new(3, 3), vec![0.0; 8]);
        assert!(matches!(
            result,
            Err(PipelineError::DimensionMismatch { actual_len: 8, .. })
        ));
    }

    #[test]
    fn mask_from_values_clamps() {
        let mask = Mask::from_values(Dimensions::new(2, 1), vec![2.0, -1.0]).unwrap();
        assert_eq!(mask.values(), &[1.0, 0.0]);
    }

    #[test]
    fn mask_from_fn_is_row_major_and_clamped() {
        let dims = Dimensions::new(3, 2);
        let mask = Mask::from_fn(dims, |x, y| f32::from(u8::try_from(x + 3 * y).unwrap()) - 1.0);
        assert_eq!(mask.values(), &[0.0, 0.0, 1.0, 1.0, 1.0, 1.0]);
        let mask = Mask::from_fn(dims, |x, y| if (x, y) == (2, 1) { 0.25 } else { f32::NAN });
        assert!((mask.get(2, 1) - 0.25).abs() < f32::EPSILON);
        assert!(mask.get(0, 0).abs() < f32::EPSILON);
    }

    #[test]
    fn mask_gray_conversion_round_trips_bytes() {
        let gray = GrayImage::from_fn(4, 3, |x, y| Luma([u8::try_from(x * 60 + y).unwrap()]));
        let mask = Mask::from_gray_image(&gray);
        assert_eq!(mask.dimensions(), Dimensions::new(4, 3));
        assert_eq!(mask.to_gray_image(), gray);
    }

    #[test]
    fn mask_ensure_matches_detects_mismatch() {
        let mask = Mask::new(Dimensions::new(4, 4));
        assert!(mask.ensure_matches(&RgbaImage::new(4, 4)).is_ok());
        assert!(matches!(
            mask.ensure_matches(&RgbaImage::new(4, 5)),
            Err(PipelineError::MaskSizeMismatch { .. })
        ));
    }

    #[test]
    fn foreground_fraction_counts_values_above_half() {
        let mask = Mask::from_values(Dimensions::new(4, 1), vec![0.0, 0.5, 0.6, 1.0]).unwrap();
        assert!((mask.foreground_fraction() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn settings_defaults() {
        let s = Settings::default();
        assert_eq!(s.algorithm, Algorithm::Adaptive);
        assert!((s.sensitivity - 50.0).abs() < f32::EPSILON);
        assert!((s.foreground_bias - 50.0).abs() < f32::EPSILON);
        assert!(s.bias_shift().abs() < f32::EPSILON);
        assert!(s.edge_detection);
        assert!(s.defringing);
        assert_eq!(s.background, OutputBackground::Transparent);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn settings_validate_rejects_out_of_range() {
        let tweaks: [fn(&mut Settings); 5] = [
            |s| s.sensitivity = 101.0,
            |s| s.foreground_bias = -1.0,
            |s| s.smoothing = f32::NAN,
            |s| s.quality = 0.0,
            |s| s.quality = 1.5,
        ];
        for tweak in tweaks {
            let mut settings = Settings::default();
            tweak(&mut settings);
            assert!(
                matches!(settings.validate(), Err(PipelineError::InvalidSettings(_))),
                "{settings:?} should be rejected",
            );
        }
    }

    #[test]
    fn settings_partial_json_fills_defaults() {
        let json = r##"{"algorithm":"trimap","sensitivity":70,"background":{"kind":"color","color":"#00ff00"}}"##;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.algorithm, Algorithm::Trimap);
        assert!((s.sensitivity - 70.0).abs() < f32::EPSILON);
        assert_eq!(s.background, OutputBackground::Color(Color::new(0, 255, 0)));
        assert!((s.smoothing - Settings::DEFAULT_SMOOTHING).abs() < f32::EPSILON);
    }

    #[test]
    fn settings_serde_round_trip() {
        let s = Settings {
            algorithm: Algorithm::Edge,
            detail_level: DetailLevel::High,
            background_detection: BackgroundDetection::Average,
            format: OutputFormat::Webp,
            seed: Some(9),
            ..Settings::default()
        };
        let json = serde_json::to_string(&s).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn rgba_from_raw_validates() {
        assert!(rgba_from_raw(2, 2, vec![0; 16]).is_ok());
        assert!(matches!(
            rgba_from_raw(2, 2, vec![0; 15]),
            Err(PipelineError::InvalidDimensions(_))
        ));
        assert!(matches!(
            rgba_from_raw(0, 2, vec![]),
            Err(PipelineError::InvalidDimensions(_))
        ));
    }

    #[test]
    fn ensure_non_empty_rejects_zero_sized() {
        assert!(ensure_non_empty(&RgbaImage::new(0, 3)).is_err());
        assert_eq!(
            ensure_non_empty(&RgbaImage::new(3, 2)).unwrap(),
            Dimensions::new(3, 2)
        );
    }

    #[test]
    fn error_display() {
        assert_eq!(PipelineError::Cancelled.to_string(), "processing was cancelled");
        assert!(PipelineError::Cancelled.is_cancelled());
        assert!(!PipelineError::EmptyInput.is_cancelled());
        let err = PipelineError::MaskSizeMismatch {
            image: Dimensions::new(4, 4),
            mask: Dimensions::new(2, 2),
        };
        assert_eq!(err.to_string(), "mask is 2x2 but image is 4x4");
    }
}
