//! Pipeline diagnostics: timing and per-stage metrics.
//!
//! These diagnostics are permanent instrumentation intended for
//! threshold tuning and parameter experimentation. Collect them with
//! [`process_with_diagnostics`](crate::process_with_diagnostics).
//!
//! Timestamps come from an injected [`Clock`], so the pipeline crate
//! stays free of platform time sources and tests can use a fake clock.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::segment::Segmenter;

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Source of timestamps for stage timing.
pub trait Clock {
    /// Opaque timestamp type.
    type Instant;

    /// The current time.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Stage 1: validation and image statistics.
    pub stats: StageDiagnostics,
    /// Stage 2: background (and foreground) estimation.
    pub background: StageDiagnostics,
    /// Stage 3: segmentation (or prior-mask reuse).
    pub segmentation: StageDiagnostics,
    /// Stage 4: smoothing and sharpening.
    pub refinement: StageDiagnostics,
    /// Stage 5: mask application and background blending.
    pub compositing: StageDiagnostics,
    /// Total wall-clock duration of the entire pipeline (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary across all stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics that vary by pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Image statistics.
    Stats {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
        /// Mean color.
        average: Color,
        /// Fraction of interior edge pixels.
        edge_ratio: f64,
        /// Sum of per-channel ranges.
        total_range: u32,
    },
    /// Background estimation.
    Background {
        /// Background color used for segmentation.
        background: Color,
        /// Foreground color, when the segmenter needed one.
        foreground: Option<Color>,
        /// Whether the background came from a user pick.
        picked: bool,
        /// Border samples considered (0 for a pick).
        sample_count: usize,
        /// k-means seed.
        seed: u64,
    },
    /// Segmentation.
    Segmentation {
        /// The segmenter that ran (`None` when a prior mask was reused).
        segmenter: Option<Segmenter>,
        /// Fraction of mask values above 0.5.
        foreground_fraction: f64,
    },
    /// Refinement.
    Refinement {
        /// Smoothing setting.
        smoothing: f32,
        /// Blur sigma, or `None` when smoothing is disabled.
        sigma: Option<f32>,
        /// Blur kernel length (0 when disabled).
        kernel_size: usize,
    },
    /// Compositing.
    Compositing {
        /// Whether soft defringing ran.
        defringing: bool,
        /// Pixels in the partial-alpha band eligible for defringing.
        partial_pixels: usize,
        /// Fully transparent output pixels.
        transparent_pixels: usize,
    },
}

/// High-level summary for the entire pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Source image width in pixels.
    pub image_width: u32,
    /// Source image height in pixels.
    pub image_height: u32,
    /// Total pixel count.
    pub pixel_count: u64,
    /// The segmenter that ran.
    pub segmenter: Option<Segmenter>,
    /// Fraction of final mask values above 0.5.
    pub foreground_fraction: f64,
    /// k-means seed, for reproducing the run.
    pub seed: u64,
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} ({} pixels)",
            self.summary.image_width, self.summary.image_height, self.summary.pixel_count,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        let stages = [
            ("Stats", &self.stats),
            ("Background", &self.background),
            ("Segmentation", &self.segmentation),
            ("Refinement", &self.refinement),
            ("Compositing", &self.compositing),
        ];
        for (name, diag) in stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Segmenter: {}  |  Foreground: {:.1}%  |  Seed: {}",
            self.summary
                .segmenter
                .map_or_else(|| "prior mask".to_string(), |s| s.to_string()),
            self.summary.foreground_fraction * 100.0,
            self.summary.seed,
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Stats {
            width,
            height,
            average,
            edge_ratio,
            total_range,
        } => format!(
            "{width}x{height} avg={average} edges={:.1}% range={total_range}",
            edge_ratio * 100.0,
        ),
        StageMetrics::Background {
            background,
            foreground,
            picked,
            sample_count,
            seed,
        } => {
            let source = if *picked {
                "picked".to_string()
            } else {
                format!("{sample_count} samples")
            };
            let fg = foreground.map(|c| format!(" fg={c}")).unwrap_or_default();
            format!("bg={background}{fg} ({source}, seed={seed})")
        }
        StageMetrics::Segmentation {
            segmenter,
            foreground_fraction,
        } => format!(
            "{} fg={:.1}%",
            segmenter.map_or_else(|| "prior mask".to_string(), |s| s.to_string()),
            foreground_fraction * 100.0,
        ),
        StageMetrics::Refinement {
            smoothing,
            sigma,
            kernel_size,
        } => sigma.map_or_else(
            || format!("smoothing={smoothing:.0} (no blur)"),
            |s| format!("smoothing={smoothing:.0} sigma={s:.2} kernel={kernel_size}"),
        ),
        StageMetrics::Compositing {
            defringing,
            partial_pixels,
            transparent_pixels,
        } => format!(
            "defringe={} partial={partial_pixels} transparent={transparent_pixels}",
            if *defringing { "soft" } else { "off" },
        ),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn stage(ms: u64, metrics: StageMetrics) -> StageDiagnostics {
        StageDiagnostics {
            duration: Duration::from_millis(ms),
            metrics,
        }
    }

    fn sample() -> PipelineDiagnostics {
        PipelineDiagnostics {
            stats: stage(
                2,
                StageMetrics::Stats {
                    width: 100,
                    height: 100,
                    average: Color::new(200, 120, 120),
                    edge_ratio: 0.02,
                    total_range: 510,
                },
            ),
            background: stage(
                3,
                StageMetrics::Background {
                    background: Color::WHITE,
                    foreground: None,
                    picked: false,
                    sample_count: 396,
                    seed: 42,
                },
            ),
            segmentation: stage(
                10,
                StageMetrics::Segmentation {
                    segmenter: Some(Segmenter::Color),
                    foreground_fraction: 0.36,
                },
            ),
            refinement: stage(
                20,
                StageMetrics::Refinement {
                    smoothing: 30.0,
                    sigma: Some(1.6),
                    kernel_size: 9,
                },
            ),
            compositing: stage(
                5,
                StageMetrics::Compositing {
                    defringing: true,
                    partial_pixels: 120,
                    transparent_pixels: 6000,
                },
            ),
            total_duration: Duration::from_millis(40),
            summary: PipelineSummary {
                image_width: 100,
                image_height: 100,
                pixel_count: 10_000,
                segmenter: Some(Segmenter::Color),
                foreground_fraction: 0.36,
                seed: 42,
            },
        }
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let d = Duration::from_millis(1234);
        let ms = duration_ms(d);
        assert!((ms - 1234.0).abs() < 0.01);
    }

    #[test]
    fn report_lists_every_stage() {
        let report = sample().report();
        assert!(report.contains("Pipeline Diagnostics Report"));
        for name in ["Stats", "Background", "Segmentation", "Refinement", "Compositing"] {
            assert!(report.contains(name), "missing {name}");
        }
        assert!(report.contains("bg=#ffffff"));
        assert!(report.contains("kernel=9"));
        assert!(report.contains("Seed: 42"));
    }

    #[test]
    fn prior_mask_is_named_in_report() {
        let mut diag = sample();
        diag.summary.segmenter = None;
        assert!(diag.report().contains("Segmenter: prior mask"));
    }

    #[test]
    fn diagnostics_serialize_durations_as_seconds() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!((json["total_duration"].as_f64().unwrap() - 0.04).abs() < 1e-9);
        assert_eq!(json["background"]["metrics"]["Background"]["background"], "#ffffff");
        let back: PipelineDiagnostics = serde_json::from_value(json).unwrap();
        assert_eq!(back.summary.seed, 42);
    }

    #[test]
    fn negative_duration_is_rejected() {
        let mut json = serde_json::to_value(sample()).unwrap();
        json["total_duration"] = serde_json::json!(-1.0);
        assert!(serde_json::from_value::<PipelineDiagnostics>(json).is_err());
    }
}
