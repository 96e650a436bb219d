//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! Unlike [`crate::process`] which runs the entire pipeline in one call,
//! [`Pipeline`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use cutout_pipeline::{Pipeline, ProcessInput, PipelineError, RgbaImage};
//! # fn run(image: RgbaImage) -> Result<(), PipelineError> {
//! let result = Pipeline::new(ProcessInput::new(image))
//!     .analyze()?
//!     .detect_background()
//!     .segment()
//!     .refine()
//!     .composite()?
//!     .into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next pipeline state
//! (or `Result` for fallible stages), carrying everything later stages
//! need. Every stage has a fixed progress milestone
//! ([`PipelineStage::PROGRESS`]); [`run`] reports them in order and
//! checks a [`CancelFlag`] between stages.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::background::{self, BackgroundEstimate};
use crate::composite::{self, DEFRINGE_HIGH, DEFRINGE_LOW, Defringe};
use crate::diagnostics::StageMetrics;
use crate::refine;
use crate::segment::{Segment, SegmentInput, Segmenter};
use crate::stats::ImageStats;
use crate::types::{
    Color, Dimensions, Mask, PipelineError, ProcessInput, ProcessResult, RgbaImage,
    ensure_non_empty,
};

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
///
/// Call [`analyze`](Self::analyze) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing; call .analyze() to continue"]
pub struct Pending {
    input: ProcessInput,
}

impl Pending {
    /// The source image.
    #[must_use]
    pub const fn image(&self) -> &RgbaImage {
        &self.input.image
    }

    /// Validate the input, seed the RNG and compute image statistics.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidDimensions`] for an empty image,
    /// [`PipelineError::InvalidSettings`] for out-of-range settings and
    /// [`PipelineError::MaskSizeMismatch`] when a prior mask does not
    /// match the image.
    pub fn analyze(self) -> Result<Analyzed, PipelineError> {
        let dimensions = ensure_non_empty(&self.input.image)?;
        self.input.settings.validate()?;
        if let Some(prior) = &self.input.prior_mask {
            prior.ensure_matches(&self.input.image)?;
        }

        let seed = self.input.settings.seed.unwrap_or_else(rand::random);
        let stats = ImageStats::compute(&self.input.image);
        tracing::debug!(
            %dimensions,
            seed,
            edge_ratio = stats.edge_ratio,
            total_range = stats.total_range(),
            "image analyzed",
        );
        Ok(Analyzed {
            input: self.input,
            dimensions,
            seed,
            rng: StdRng::seed_from_u64(seed),
            stats,
        })
    }
}

// ───────────────────────── Stage 1: Analyzed ─────────────────────────

/// Pipeline state after input validation and statistics.
///
/// Call [`detect_background`](Self::detect_background) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .detect_background() to continue"]
pub struct Analyzed {
    input: ProcessInput,
    dimensions: Dimensions,
    seed: u64,
    rng: StdRng,
    stats: ImageStats,
}

impl Analyzed {
    /// Whole-image statistics.
    #[must_use]
    pub const fn stats(&self) -> &ImageStats {
        &self.stats
    }

    /// Seed driving k-means initialisation for this run.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Estimate the background color (and the foreground color when the
    /// resolved segmenter needs one).
    ///
    /// A prior mask skips segmentation, so no segmenter is resolved and
    /// no foreground is estimated.
    pub fn detect_background(mut self) -> BackgroundDetected {
        let settings = &self.input.settings;
        let estimate = background::detect_background(
            &self.input.image,
            settings,
            self.input.picked_background,
            &mut self.rng,
        );
        let segmenter = self
            .input
            .prior_mask
            .is_none()
            .then(|| settings.algorithm.resolve(&self.stats));
        let foreground = segmenter
            .filter(|s| s.needs_foreground())
            .map(|_| {
                background::detect_foreground(
                    &self.input.image,
                    settings,
                    estimate.color,
                    &mut self.rng,
                )
            });
        tracing::debug!(
            background = %estimate.color,
            picked = self.input.picked_background.is_some(),
            segmenter = ?segmenter,
            "background detected",
        );
        BackgroundDetected {
            input: self.input,
            dimensions: self.dimensions,
            seed: self.seed,
            background: estimate,
            foreground,
            segmenter,
        }
    }
}

// ───────────────────── Stage 2: BackgroundDetected ───────────────────

/// Pipeline state after background (and foreground) estimation.
///
/// Call [`segment`](Self::segment) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .segment() to continue"]
pub struct BackgroundDetected {
    input: ProcessInput,
    dimensions: Dimensions,
    seed: u64,
    background: BackgroundEstimate,
    foreground: Option<Color>,
    segmenter: Option<Segmenter>,
}

impl BackgroundDetected {
    /// The estimated background color.
    #[must_use]
    pub const fn background(&self) -> Color {
        self.background.color
    }

    /// The estimated foreground color, if one was needed.
    #[must_use]
    pub const fn foreground(&self) -> Option<Color> {
        self.foreground
    }

    /// The segmenter that will run, or `None` when a prior mask is reused.
    #[must_use]
    pub const fn segmenter(&self) -> Option<Segmenter> {
        self.segmenter
    }

    /// Produce the initial mask.
    ///
    /// Runs the resolved segmenter, or takes the prior mask as-is.
    pub fn segment(mut self) -> Segmented {
        let prior = self.input.prior_mask.take();
        let mask = match (prior, self.segmenter) {
            (Some(prior), _) => prior,
            (None, Some(segmenter)) => segmenter.segment(&SegmentInput {
                image: &self.input.image,
                settings: &self.input.settings,
                background: self.background.color,
                foreground: self.foreground,
            }),
            // `segmenter` is only `None` when a prior mask was supplied.
            (None, None) => Mask::new(self.dimensions),
        };
        tracing::debug!(
            segmenter = ?self.segmenter,
            foreground_fraction = mask.foreground_fraction(),
            "segmented",
        );
        Segmented {
            input: self.input,
            dimensions: self.dimensions,
            seed: self.seed,
            background: self.background,
            foreground: self.foreground,
            segmenter: self.segmenter,
            mask,
        }
    }
}

// ───────────────────────── Stage 3: Segmented ────────────────────────

/// Pipeline state after segmentation.
///
/// Call [`refine`](Self::refine) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .refine() to continue"]
pub struct Segmented {
    input: ProcessInput,
    dimensions: Dimensions,
    seed: u64,
    background: BackgroundEstimate,
    foreground: Option<Color>,
    segmenter: Option<Segmenter>,
    mask: Mask,
}

impl Segmented {
    /// The raw segmentation mask.
    #[must_use]
    pub const fn mask(&self) -> &Mask {
        &self.mask
    }

    /// Smooth and sharpen the mask.
    pub fn refine(self) -> Refined {
        let refined = refine::refine(&self.mask, &self.input.settings);
        tracing::debug!(
            smoothing = self.input.settings.smoothing,
            foreground_fraction = refined.foreground_fraction(),
            "mask refined",
        );
        Refined {
            input: self.input,
            dimensions: self.dimensions,
            seed: self.seed,
            background: self.background,
            foreground: self.foreground,
            segmenter: self.segmenter,
            mask: refined,
        }
    }
}

// ───────────────────────── Stage 4: Refined ──────────────────────────

/// Pipeline state after mask refinement.
///
/// Call [`composite`](Self::composite) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .composite() to continue"]
pub struct Refined {
    input: ProcessInput,
    dimensions: Dimensions,
    seed: u64,
    background: BackgroundEstimate,
    foreground: Option<Color>,
    segmenter: Option<Segmenter>,
    mask: Mask,
}

impl Refined {
    /// The refined mask.
    #[must_use]
    pub const fn mask(&self) -> &Mask {
        &self.mask
    }

    /// Apply the mask (soft-defringed when enabled) and blend over the
    /// configured background.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MaskSizeMismatch`] if the mask no longer
    /// matches the image.
    pub fn composite(self) -> Result<Composited, PipelineError> {
        let settings = &self.input.settings;
        let defringe = if settings.defringing {
            Defringe::Soft
        } else {
            Defringe::None
        };
        let composited =
            composite::composite(&self.input.image, &self.mask, defringe, &settings.background)?;
        tracing::debug!(?defringe, "composited");
        Ok(Composited {
            input: self.input,
            dimensions: self.dimensions,
            seed: self.seed,
            background: self.background,
            foreground: self.foreground,
            segmenter: self.segmenter,
            mask: self.mask,
            composited,
        })
    }
}

// ───────────────────────── Stage 5: Composited ───────────────────────

/// Pipeline state after compositing, the final stage.
///
/// Call [`into_result`](Self::into_result) to extract the
/// [`ProcessResult`].
#[must_use = "call .into_result() to extract the ProcessResult"]
pub struct Composited {
    input: ProcessInput,
    dimensions: Dimensions,
    seed: u64,
    background: BackgroundEstimate,
    foreground: Option<Color>,
    segmenter: Option<Segmenter>,
    mask: Mask,
    composited: RgbaImage,
}

impl Composited {
    /// The composited output image.
    #[must_use]
    pub const fn composited(&self) -> &RgbaImage {
        &self.composited
    }

    /// Image dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Consume the pipeline and return the [`ProcessResult`].
    #[must_use]
    pub fn into_result(self) -> ProcessResult {
        ProcessResult {
            mask: self.mask,
            composited: self.composited,
            background: self.background.color,
            foreground: self.foreground,
            segmenter: self.segmenter,
            seed: self.seed,
            dimensions: self.dimensions,
        }
    }
}

// ──────────────────── PipelineStage trait + Stage enum ────────────────

/// Total number of stages in the pipeline.
pub const STAGE_COUNT: usize = 6;

/// The output produced by a single pipeline stage.
///
/// Each variant borrows the data that the corresponding stage computed.
#[must_use]
pub enum StageOutput<'a> {
    /// Source image (not yet analyzed).
    Source {
        /// The source image.
        image: &'a RgbaImage,
    },
    /// Image statistics.
    Stats {
        /// The statistics snapshot.
        stats: &'a ImageStats,
    },
    /// Background and foreground estimation.
    Background {
        /// Background color.
        background: Color,
        /// Foreground color, when estimated.
        foreground: Option<Color>,
    },
    /// Segmentation mask.
    Segmented {
        /// The raw mask.
        mask: &'a Mask,
    },
    /// Refined mask.
    Refined {
        /// The refined mask.
        mask: &'a Mask,
    },
    /// Composited output.
    Composited {
        /// The composited image.
        image: &'a RgbaImage,
        /// The final mask.
        mask: &'a Mask,
    },
}

/// Trait implemented by every pipeline stage, enabling uniform iteration.
///
/// Both the typed API (individual stage structs) and the dynamic API
/// ([`Stage`] enum) are available. This trait bridges the two.
pub trait PipelineStage: Sized {
    /// Human-readable name of this stage (e.g. `"source"`, `"refine"`).
    const NAME: &str;

    /// Zero-based index of this stage.
    const INDEX: usize;

    /// Progress percentage reported once this stage has been reached.
    const PROGRESS: u8;

    /// The output this stage produced.
    fn output(&self) -> StageOutput<'_>;

    /// Stage-specific metrics for diagnostics.
    ///
    /// Returns `None` for the initial [`Pending`] stage.
    fn metrics(&self) -> Option<StageMetrics>;

    /// Advance to the next stage.
    ///
    /// Returns `Ok(Some(stage))` on success, `Ok(None)` if already at
    /// the final stage, or `Err` if the stage transition fails.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] when validation or compositing fails.
    fn next(self) -> Result<Option<Stage>, PipelineError>;

    /// Run all remaining stages to completion.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if any remaining fallible stage fails.
    fn complete(self) -> Result<ProcessResult, PipelineError>;
}

impl PipelineStage for Pending {
    const NAME: &str = "source";
    const INDEX: usize = 0;
    const PROGRESS: u8 = 0;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Source {
            image: &self.input.image,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        None
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Analyzed(self.analyze()?)))
    }

    fn complete(self) -> Result<ProcessResult, PipelineError> {
        self.analyze()?.complete()
    }
}

impl PipelineStage for Analyzed {
    const NAME: &str = "stats";
    const INDEX: usize = 1;
    const PROGRESS: u8 = 10;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Stats { stats: &self.stats }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Stats {
            width: self.dimensions.width,
            height: self.dimensions.height,
            average: self.stats.average,
            edge_ratio: self.stats.edge_ratio,
            total_range: self.stats.total_range(),
        })
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::BackgroundDetected(self.detect_background())))
    }

    fn complete(self) -> Result<ProcessResult, PipelineError> {
        self.detect_background().complete()
    }
}

impl PipelineStage for BackgroundDetected {
    const NAME: &str = "background";
    const INDEX: usize = 2;
    const PROGRESS: u8 = 30;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Background {
            background: self.background.color,
            foreground: self.foreground,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Background {
            background: self.background.color,
            foreground: self.foreground,
            picked: self.input.picked_background.is_some(),
            sample_count: self.background.sample_count,
            seed: self.seed,
        })
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Segmented(self.segment())))
    }

    fn complete(self) -> Result<ProcessResult, PipelineError> {
        self.segment().complete()
    }
}

impl PipelineStage for Segmented {
    const NAME: &str = "segment";
    const INDEX: usize = 3;
    const PROGRESS: u8 = 50;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Segmented { mask: &self.mask }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Segmentation {
            segmenter: self.segmenter,
            foreground_fraction: self.mask.foreground_fraction(),
        })
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Refined(self.refine())))
    }

    fn complete(self) -> Result<ProcessResult, PipelineError> {
        self.refine().complete()
    }
}

impl PipelineStage for Refined {
    const NAME: &str = "refine";
    const INDEX: usize = 4;
    const PROGRESS: u8 = 80;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Refined { mask: &self.mask }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        let smoothing = self.input.settings.smoothing;
        let sigma = (smoothing > 0.0).then(|| refine::smoothing_sigma(smoothing));
        Some(StageMetrics::Refinement {
            smoothing,
            sigma,
            kernel_size: sigma.map_or(0, |s| refine::gaussian_kernel(s).len()),
        })
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Composited(self.composite()?)))
    }

    fn complete(self) -> Result<ProcessResult, PipelineError> {
        self.composite()?.complete()
    }
}

impl PipelineStage for Composited {
    const NAME: &str = "composite";
    const INDEX: usize = 5;
    const PROGRESS: u8 = 100;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Composited {
            image: &self.composited,
            mask: &self.mask,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        let partial_pixels = self
            .mask
            .values()
            .iter()
            .filter(|&&v| v > DEFRINGE_LOW && v < DEFRINGE_HIGH)
            .count();
        let transparent_pixels = self.composited.pixels().filter(|p| p.0[3] == 0).count();
        Some(StageMetrics::Compositing {
            defringing: self.input.settings.defringing,
            partial_pixels,
            transparent_pixels,
        })
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(None)
    }

    fn complete(self) -> Result<ProcessResult, PipelineError> {
        Ok(self.into_result())
    }
}

/// Enum wrapping all pipeline stages for uniform, loopable access.
///
/// ```rust
/// # use cutout_pipeline::{Pipeline, ProcessInput, PipelineError, RgbaImage};
/// # use cutout_pipeline::pipeline::{Stage, Advance};
/// # fn run(image: RgbaImage) -> Result<(), PipelineError> {
/// let mut stage: Stage = Pipeline::new(ProcessInput::new(image)).into();
/// loop {
///     match stage.advance()? {
///         Advance::Next(next) => stage = next,
///         Advance::Complete(done) => { stage = done; break; }
///     }
/// }
/// let result = stage.complete()?;
/// # Ok(())
/// # }
/// ```
#[must_use]
pub enum Stage {
    /// See [`Pending`].
    Pending(Pending),
    /// See [`Analyzed`].
    Analyzed(Analyzed),
    /// See [`BackgroundDetected`].
    BackgroundDetected(BackgroundDetected),
    /// See [`Segmented`].
    Segmented(Segmented),
    /// See [`Refined`].
    Refined(Refined),
    /// See [`Composited`].
    Composited(Composited),
}

/// Compile-time guard: if a [`Stage`] variant is added, this match becomes
/// non-exhaustive and the build fails, as a reminder to bump [`STAGE_COUNT`].
#[allow(dead_code, clippy::match_same_arms)]
const fn _stage_count_guard(s: &Stage) {
    match s {
        Stage::Pending(_)
        | Stage::Analyzed(_)
        | Stage::BackgroundDetected(_)
        | Stage::Segmented(_)
        | Stage::Refined(_)
        | Stage::Composited(_) => {}
    }
}

/// Result of [`Stage::advance`]: either the next stage or the
/// completed final stage returned unchanged.
#[must_use]
pub enum Advance {
    /// The pipeline advanced to this next stage.
    Next(Stage),
    /// The pipeline was already at the final stage and is returned unchanged.
    Complete(Stage),
}

/// Delegate a method call to whichever `Stage` variant is active.
macro_rules! delegate {
    ($self:ident, $method:ident $(, $arg:expr)*) => {
        match $self {
            Self::Pending(s) => s.$method($($arg),*),
            Self::Analyzed(s) => s.$method($($arg),*),
            Self::BackgroundDetected(s) => s.$method($($arg),*),
            Self::Segmented(s) => s.$method($($arg),*),
            Self::Refined(s) => s.$method($($arg),*),
            Self::Composited(s) => s.$method($($arg),*),
        }
    };
}

impl Stage {
    /// Human-readable name of the current stage.
    #[must_use]
    pub fn name(&self) -> &'static str {
        delegate!(self, name)
    }

    /// Zero-based index of the current stage.
    #[must_use]
    pub fn index(&self) -> usize {
        delegate!(self, index)
    }

    /// Progress percentage for the current stage.
    #[must_use]
    pub fn progress(&self) -> u8 {
        delegate!(self, progress)
    }

    /// The output this stage produced.
    pub fn output(&self) -> StageOutput<'_> {
        delegate!(self, output)
    }

    /// Stage-specific metrics for diagnostics.
    #[must_use]
    pub fn metrics(&self) -> Option<StageMetrics> {
        delegate!(self, metrics)
    }

    /// Whether the pipeline is at the final stage.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Composited(_))
    }

    /// Advance to the next stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if a fallible stage transition fails.
    pub fn next(self) -> Result<Option<Self>, PipelineError> {
        delegate!(self, next)
    }

    /// Advance to the next stage, returning `self` unchanged if
    /// already complete.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if a fallible stage transition fails.
    pub fn advance(self) -> Result<Advance, PipelineError> {
        if self.is_complete() {
            return Ok(Advance::Complete(self));
        }
        // Non-complete stages always return Ok(Some(_)) from next().
        #[allow(clippy::unreachable)]
        let next = self
            .next()?
            .unwrap_or_else(|| unreachable!("non-complete stage returned None from next()"));
        Ok(Advance::Next(next))
    }

    /// Run all remaining stages to completion.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if any remaining fallible stage fails.
    pub fn complete(self) -> Result<ProcessResult, PipelineError> {
        delegate!(self, complete)
    }
}

// Lets the macro call `.name()`, `.index()` and `.progress()` on `&self`;
// associated constants aren't reachable as `self.NAME`.
trait StageMetadata {
    fn name(&self) -> &'static str;
    fn index(&self) -> usize;
    fn progress(&self) -> u8;
}

impl<T: PipelineStage> StageMetadata for T {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn index(&self) -> usize {
        T::INDEX
    }

    fn progress(&self) -> u8 {
        T::PROGRESS
    }
}

impl From<Pending> for Stage {
    fn from(s: Pending) -> Self {
        Self::Pending(s)
    }
}

impl From<Analyzed> for Stage {
    fn from(s: Analyzed) -> Self {
        Self::Analyzed(s)
    }
}

impl From<BackgroundDetected> for Stage {
    fn from(s: BackgroundDetected) -> Self {
        Self::BackgroundDetected(s)
    }
}

impl From<Segmented> for Stage {
    fn from(s: Segmented) -> Self {
        Self::Segmented(s)
    }
}

impl From<Refined> for Stage {
    fn from(s: Refined) -> Self {
        Self::Refined(s)
    }
}

impl From<Composited> for Stage {
    fn from(s: Composited) -> Self {
        Self::Composited(s)
    }
}

// ───────────────────── Pipeline entry point ──────────────────────────

/// Incremental background-removal pipeline.
///
/// Created via [`Pipeline::new`], which stores the input without doing
/// any processing. Each stage method consumes the current state and
/// returns the next, making it a compile-time error to skip stages or
/// call them out of order.
pub struct Pipeline;

impl Pipeline {
    /// Create a new pipeline from a processing input.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(input: ProcessInput) -> Pending {
        Pending { input }
    }
}

// ───────────────────── Cancellation + driver ─────────────────────────

/// Shared cancellation token, checked between stages.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// A fresh, un-cancelled flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Drive a pipeline to completion, reporting progress and honoring
/// cancellation.
///
/// `on_progress` receives each stage's milestone (0, 10, 30, 50, 80,
/// 100) in order. The flag is checked before every transition; once it
/// is set the run stops with [`PipelineError::Cancelled`] and no result.
///
/// # Errors
///
/// Returns [`PipelineError::Cancelled`] on cancellation, or the first
/// stage error.
pub fn run(
    input: ProcessInput,
    cancel: &CancelFlag,
    mut on_progress: impl FnMut(u8),
) -> Result<ProcessResult, PipelineError> {
    let mut stage: Stage = Pipeline::new(input).into();
    on_progress(stage.progress());
    loop {
        if cancel.is_cancelled() {
            tracing::debug!(stage = stage.name(), "run cancelled");
            return Err(PipelineError::Cancelled);
        }
        match stage.advance()? {
            Advance::Next(next) => {
                stage = next;
                on_progress(stage.progress());
            }
            Advance::Complete(done) => {
                stage = done;
                break;
            }
        }
    }
    stage.complete()
}
