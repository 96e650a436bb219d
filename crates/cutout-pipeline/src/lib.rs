//! cutout-pipeline: Pure background-removal engine (sans-IO).
//!
//! Converts an RGBA image plus [`Settings`] into an alpha mask and a
//! composited image through:
//! statistics -> background detection -> segmentation -> refinement ->
//! compositing.
//!
//! Manual refinement (brush, eraser, magic wand) lives in [`tools`] and
//! is tied together with automatic runs by [`session::EditSession`].
//!
//! This crate has **no I/O or threading** -- it operates on in-memory
//! buffers and returns structured data. Background execution lives in
//! `cutout-worker`; file handling and encoding live in the `cutout` CLI.

pub mod background;
pub mod color;
pub mod composite;
pub mod decode;
pub mod diagnostics;
pub mod edge;
pub mod matting;
pub mod pipeline;
pub mod refine;
pub mod segment;
pub mod session;
pub mod stats;
pub mod tools;
pub mod types;

pub use diagnostics::{Clock, PipelineDiagnostics, StageDiagnostics};
pub use pipeline::{CancelFlag, Pipeline};
pub use segment::{Segment, Segmenter};
pub use session::EditSession;
pub use tools::Tool;
pub use types::{
    Algorithm, BackgroundDetection, Color, DetailLevel, Dimensions, GrayImage, Mask,
    OutputBackground, OutputFormat, PipelineError, ProcessInput, ProcessResult, RgbaImage,
    Settings,
};

use diagnostics::PipelineSummary;
use pipeline::{Advance, Stage};

/// Run the full background-removal pipeline.
///
/// # Pipeline steps
///
/// 1. Validate input and compute image statistics
/// 2. Estimate the background color (user pick, clustering or average)
/// 3. Segment with the resolved algorithm, or reuse the prior mask
/// 4. Smooth and sharpen the mask
/// 5. Apply the mask (soft defringe) and blend over the background
///
/// # Errors
///
/// Returns [`PipelineError::InvalidDimensions`],
/// [`PipelineError::InvalidSettings`] or
/// [`PipelineError::MaskSizeMismatch`] for invalid input.
pub fn process(input: ProcessInput) -> Result<ProcessResult, PipelineError> {
    let composited = Pipeline::new(input)
        .analyze()?
        .detect_background()
        .segment()
        .refine()
        .composite()?;
    Ok(composited.into_result())
}

/// Run the pipeline with progress reporting and cancellation.
///
/// See [`pipeline::run`].
///
/// # Errors
///
/// Returns [`PipelineError::Cancelled`] when `cancel` is set before the
/// run finishes, or any error [`process`] returns.
pub fn process_with(
    input: ProcessInput,
    cancel: &CancelFlag,
    on_progress: impl FnMut(u8),
) -> Result<ProcessResult, PipelineError> {
    pipeline::run(input, cancel, on_progress)
}

/// Run the pipeline and collect per-stage timing and metrics.
///
/// # Errors
///
/// Returns any error [`process`] returns.
pub fn process_with_diagnostics<C: Clock>(
    input: ProcessInput,
    clock: &C,
) -> Result<(ProcessResult, PipelineDiagnostics), PipelineError> {
    let total_start = clock.now();
    let mut stage: Stage = Pipeline::new(input).into();
    let mut stages = Vec::with_capacity(pipeline::STAGE_COUNT - 1);

    loop {
        let start = clock.now();
        match stage.advance()? {
            Advance::Next(next) => {
                let duration = clock.elapsed(&start);
                let metrics = next.metrics().ok_or_else(|| {
                    PipelineError::ProcessingFailure(format!(
                        "stage {} reported no metrics",
                        next.name()
                    ))
                })?;
                stages.push(StageDiagnostics { duration, metrics });
                stage = next;
            }
            Advance::Complete(done) => {
                stage = done;
                break;
            }
        }
    }

    let total_duration = clock.elapsed(&total_start);
    let result = stage.complete()?;
    let [stats, background, segmentation, refinement, compositing]: [StageDiagnostics; 5] =
        stages.try_into().map_err(|v: Vec<StageDiagnostics>| {
            PipelineError::ProcessingFailure(format!("expected 5 timed stages, got {}", v.len()))
        })?;

    let summary = PipelineSummary {
        image_width: result.dimensions.width,
        image_height: result.dimensions.height,
        pixel_count: result.dimensions.pixel_count() as u64,
        segmenter: result.segmenter,
        foreground_fraction: result.mask.foreground_fraction(),
        seed: result.seed,
    };
    let diagnostics = PipelineDiagnostics {
        stats,
        background,
        segmentation,
        refinement,
        compositing,
        total_duration,
        summary,
    };
    Ok((result, diagnostics))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;
    use std::time::Duration;

    use super::*;

    fn red_square_on_white() -> RgbaImage {
        RgbaImage::from_fn(30, 30, |x, y| {
            if (8..22).contains(&x) && (8..22).contains(&y) {
                image::Rgba([255, 0, 0, 255])
            } else {
                image::Rgba([255, 255, 255, 255])
            }
        })
    }

    fn seeded(image: RgbaImage) -> ProcessInput {
        ProcessInput::with_settings(
            image,
            Settings {
                seed: Some(11),
                ..Settings::default()
            },
        )
    }

    /// Clock that advances one millisecond per reading.
    struct TickClock(Cell<u64>);

    impl Clock for TickClock {
        type Instant = u64;

        fn now(&self) -> u64 {
            let t = self.0.get();
            self.0.set(t + 1);
            t
        }

        fn elapsed(&self, since: &u64) -> Duration {
            Duration::from_millis(self.0.get() - since)
        }
    }

    #[test]
    fn process_and_stage_loop_agree() {
        let direct = process(seeded(red_square_on_white())).unwrap();
        let driven = process_with(seeded(red_square_on_white()), &CancelFlag::new(), |_| {})
            .unwrap();
        assert_eq!(direct.mask, driven.mask);
        assert_eq!(direct.composited, driven.composited);
    }

    #[test]
    fn process_rejects_empty_image() {
        let result = process(ProcessInput::new(RgbaImage::new(0, 0)));
        assert!(matches!(result, Err(PipelineError::InvalidDimensions(_))));
    }

    #[test]
    fn transparent_output_keeps_foreground_only() {
        let result = process(seeded(red_square_on_white())).unwrap();
        assert!(result.composited.get_pixel(0, 0).0[3] < 5);
        let center = result.composited.get_pixel(15, 15).0;
        assert_eq!(&center[..3], &[255, 0, 0]);
        assert!(center[3] > 250);
    }

    #[test]
    fn mask_stays_in_range_for_every_algorithm() {
        for algorithm in [
            Algorithm::Adaptive,
            Algorithm::Color,
            Algorithm::Edge,
            Algorithm::Trimap,
        ] {
            let mut input = seeded(red_square_on_white());
            input.settings.algorithm = algorithm;
            let result = process(input).unwrap();
            assert_eq!(result.mask.dimensions(), result.dimensions, "{algorithm}");
            assert!(
                result.mask.values().iter().all(|v| (0.0..=1.0).contains(v)),
                "{algorithm}"
            );
        }
    }

    #[test]
    fn diagnostics_cover_every_stage() {
        let clock = TickClock(Cell::new(0));
        let (result, diag) =
            process_with_diagnostics(seeded(red_square_on_white()), &clock).unwrap();
        assert_eq!(diag.summary.seed, 11);
        assert_eq!(diag.summary.pixel_count, 900);
        assert_eq!(diag.summary.segmenter, result.segmenter);
        assert_eq!(diag.stats.duration, Duration::from_millis(1));
        assert!(diag.total_duration >= Duration::from_millis(5));
        assert!(matches!(
            diag.compositing.metrics,
            diagnostics::StageMetrics::Compositing { defringing: true, .. }
        ));
    }
}
