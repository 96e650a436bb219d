//! Editing session: the current mask and settings for one image.
//!
//! An [`EditSession`] owns the source image, the working mask and the
//! settings, and serializes access between automatic processing and
//! manual tools. While a run is in flight (between
//! [`begin_processing`](EditSession::begin_processing) and
//! [`complete_processing`](EditSession::complete_processing) or
//! [`abort_processing`](EditSession::abort_processing)) every mask edit
//! returns [`PipelineError::SessionBusy`].
//!
//! Previews rendered from the session use hard defringing, so alpha is
//! always fully on or off while the user edits.

use crate::background::sample_background;
use crate::composite;
use crate::tools::{self, StrokeOverlay, Tool};
use crate::types::{
    Color, Dimensions, Mask, PipelineError, ProcessInput, ProcessResult, RgbaImage, Settings,
    ensure_non_empty,
};

/// Whether automatic processing currently owns the mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Manual tools are available.
    Idle,
    /// A run is in flight; manual tools are locked.
    Processing,
}

/// Mask, settings and edit state for one image.
#[derive(Debug, Clone)]
pub struct EditSession {
    image: RgbaImage,
    mask: Mask,
    settings: Settings,
    picked_background: Option<Color>,
    state: SessionState,
    stroke: Option<StrokeOverlay>,
}

impl EditSession {
    /// Start a session with an all-background mask.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidDimensions`] for an empty image.
    pub fn new(image: RgbaImage, settings: Settings) -> Result<Self, PipelineError> {
        let dimensions = ensure_non_empty(&image)?;
        Ok(Self {
            image,
            mask: Mask::new(dimensions),
            settings,
            picked_background: None,
            state: SessionState::Idle,
            stroke: None,
        })
    }

    /// The source image.
    #[must_use]
    pub const fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// The working mask.
    #[must_use]
    pub const fn mask(&self) -> &Mask {
        &self.mask
    }

    /// Image (and mask) dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.mask.dimensions()
    }

    /// Current settings.
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace the settings used by the next run and by previews.
    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings;
    }

    /// The user-picked background color, if any.
    #[must_use]
    pub const fn picked_background(&self) -> Option<Color> {
        self.picked_background
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Whether a run is in flight.
    #[must_use]
    pub const fn is_processing(&self) -> bool {
        matches!(self.state, SessionState::Processing)
    }

    fn ensure_idle(&self) -> Result<(), PipelineError> {
        if self.is_processing() {
            Err(PipelineError::SessionBusy)
        } else {
            Ok(())
        }
    }

    /// Use the exact color at `(x, y)` as the background for later runs.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::CoordinateOutOfBounds`] when `(x, y)` is
    /// outside the image.
    pub fn pick_background(&mut self, x: i64, y: i64) -> Result<Color, PipelineError> {
        let color = sample_background(&self.image, x, y)?;
        self.picked_background = Some(color);
        Ok(color)
    }

    /// Forget the picked background and go back to auto-detection.
    pub fn clear_picked_background(&mut self) {
        self.picked_background = None;
    }

    /// Lock the mask and build the input for an automatic run.
    ///
    /// With `keep_edits` the current mask is passed as the prior mask, so
    /// the run refines and composites the user's edits instead of
    /// re-segmenting. Any stroke in progress is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SessionBusy`] if a run is already active.
    pub fn begin_processing(&mut self, keep_edits: bool) -> Result<ProcessInput, PipelineError> {
        self.ensure_idle()?;
        self.state = SessionState::Processing;
        self.stroke = None;
        tracing::debug!(keep_edits, "session processing started");
        Ok(ProcessInput {
            image: self.image.clone(),
            settings: self.settings.clone(),
            picked_background: self.picked_background,
            prior_mask: keep_edits.then(|| self.mask.clone()),
        })
    }

    /// Adopt a finished run's mask and unlock manual tools.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidParameter`] if no run is active and
    /// [`PipelineError::MaskSizeMismatch`] if the result does not match
    /// the session image. The session stays locked on a size mismatch.
    pub fn complete_processing(&mut self, result: ProcessResult) -> Result<(), PipelineError> {
        if !self.is_processing() {
            return Err(PipelineError::InvalidParameter(
                "no processing run is active".to_string(),
            ));
        }
        result.mask.ensure_matches(&self.image)?;
        self.mask = result.mask;
        self.state = SessionState::Idle;
        tracing::debug!("session processing completed");
        Ok(())
    }

    /// Unlock manual tools without touching the mask, after a failed or
    /// cancelled run.
    pub fn abort_processing(&mut self) {
        if self.is_processing() {
            tracing::debug!("session processing aborted");
        }
        self.state = SessionState::Idle;
    }

    /// Start a brush or eraser stroke.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SessionBusy`] while processing, or
    /// [`PipelineError::InvalidParameter`] for a bad radius or softness.
    pub fn begin_stroke(
        &mut self,
        tool: Tool,
        radius: f32,
        softness: f32,
    ) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        self.stroke = Some(StrokeOverlay::begin(
            self.dimensions(),
            tool,
            radius,
            softness,
        )?);
        Ok(())
    }

    /// Extend the current stroke to `(x, y)`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SessionBusy`] while processing, or
    /// [`PipelineError::InvalidParameter`] when no stroke was started.
    pub fn stroke_to(&mut self, x: i32, y: i32) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        let stroke = self.stroke.as_mut().ok_or_else(|| {
            PipelineError::InvalidParameter("no stroke in progress".to_string())
        })?;
        stroke.add_point(x, y);
        Ok(())
    }

    /// Merge the current stroke into the mask. Returns the number of
    /// pixels touched; 0 when no stroke was in progress.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SessionBusy`] while processing.
    pub fn end_stroke(&mut self) -> Result<usize, PipelineError> {
        self.ensure_idle()?;
        self.stroke
            .take()
            .map_or(Ok(0), |stroke| stroke.finish(&mut self.mask))
    }

    /// Apply a complete stroke along `points` in one call.
    ///
    /// # Errors
    ///
    /// Same as [`begin_stroke`](Self::begin_stroke).
    pub fn apply_stroke(
        &mut self,
        tool: Tool,
        radius: f32,
        softness: f32,
        points: &[(i32, i32)],
    ) -> Result<usize, PipelineError> {
        self.begin_stroke(tool, radius, softness)?;
        for &(x, y) in points {
            self.stroke_to(x, y)?;
        }
        self.end_stroke()
    }

    /// Toggle the region around `(x, y)` with the magic wand.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SessionBusy`] while processing, or any
    /// error [`tools::magic_wand`] returns.
    pub fn magic_wand(&mut self, x: i64, y: i64, tolerance: f32) -> Result<usize, PipelineError> {
        self.ensure_idle()?;
        tools::magic_wand(&self.image, &mut self.mask, x, y, tolerance)
    }

    /// Clear the mask back to all-background.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SessionBusy`] while processing.
    pub fn reset_mask(&mut self) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        self.mask = Mask::new(self.dimensions());
        self.stroke = None;
        Ok(())
    }

    /// Render a preview: hard-defringed cut-out over the configured
    /// background.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MaskSizeMismatch`] if the mask no longer
    /// matches the image.
    pub fn render(&self) -> Result<RgbaImage, PipelineError> {
        let cutout = composite::apply_mask_hard(&self.image, &self.mask)?;
        Ok(composite::blend_background(&cutout, &self.settings.background))
    }
}
