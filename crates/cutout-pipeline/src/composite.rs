//! Applying a mask to the source image and compositing the result.
//!
//! [`apply_mask`] writes mask values into the alpha channel, optionally
//! defringing soft edges first. [`blend_background`] then places the
//! cut-out over the requested [`OutputBackground`].
//!
//! Two defringe variants exist:
//!
//! - [`Defringe::Soft`] nudges partially-transparent pixels toward
//!   whichever side (background or foreground) their color resembles,
//!   using reference colors found in a 5x5 neighborhood.
//! - [`Defringe::Hard`] snaps alpha to 0 or 255 at the midpoint.

use image::imageops::FilterType;

use crate::color::{self, Color};
use crate::types::{
    Dimensions, Mask, OutputBackground, PipelineError, RgbaImage, clamp_unit, unit_to_byte,
};

/// Mask values strictly between these bounds are eligible for soft defringe.
pub const DEFRINGE_LOW: f32 = 0.05;
/// Upper bound of the soft defringe band.
pub const DEFRINGE_HIGH: f32 = 0.95;

/// Neighbors below this mask value supply the local background color.
pub const NEIGHBOR_BACKGROUND: f32 = 0.1;
/// Neighbors above this mask value supply the local foreground color.
pub const NEIGHBOR_FOREGROUND: f32 = 0.9;

/// Maximum adjustment applied by soft defringe.
pub const DEFRINGE_STRENGTH: f32 = 0.2;

/// Radius of the soft defringe neighborhood (5x5).
pub const DEFRINGE_RADIUS: i64 = 2;

/// Hard defringe alpha threshold: below is transparent, at or above opaque.
pub const HARD_ALPHA_THRESHOLD: u8 = 128;

/// Edge cleanup applied while writing alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Defringe {
    /// Write mask values as-is.
    None,
    /// Local color decontamination of partial pixels.
    Soft,
    /// Snap alpha to 0 or 255.
    Hard,
}

/// Soft-defringe a mask in place against the colors of `image`.
///
/// Reads from an unmodified copy, so the result does not depend on scan
/// order.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
pub fn soft_defringe(image: &RgbaImage, mask: &mut Mask) {
    let original = mask.clone();
    let dims = original.dimensions();
    for (x, y, p) in image.enumerate_pixels() {
        let m = original.get(x, y);
        if m <= DEFRINGE_LOW || m >= DEFRINGE_HIGH {
            continue;
        }

        let mut local_bg = None;
        let mut local_fg = None;
        for dy in -DEFRINGE_RADIUS..=DEFRINGE_RADIUS {
            for dx in -DEFRINGE_RADIUS..=DEFRINGE_RADIUS {
                let (nx, ny) = (i64::from(x) + dx, i64::from(y) + dy);
                if !dims.contains(nx, ny) {
                    continue;
                }
                let (nx, ny) = (nx as u32, ny as u32);
                let nm = original.get(nx, ny);
                if local_bg.is_none() && nm < NEIGHBOR_BACKGROUND {
                    local_bg = Some(Color::from_rgba(image.get_pixel(nx, ny)));
                }
                if local_fg.is_none() && nm > NEIGHBOR_FOREGROUND {
                    local_fg = Some(Color::from_rgba(image.get_pixel(nx, ny)));
                }
            }
        }

        let (Some(bg), Some(fg)) = (local_bg, local_fg) else {
            continue;
        };
        let c = Color::from_rgba(p);
        let to_bg = color::normalized_distance(c, bg);
        let to_fg = color::normalized_distance(c, fg);
        let adjusted = if to_bg < to_fg {
            DEFRINGE_STRENGTH.mul_add(-(1.0 - to_bg), m)
        } else {
            DEFRINGE_STRENGTH.mul_add(1.0 - to_fg, m)
        };
        mask.set(x, y, clamp_unit(adjusted));
    }
}

/// Copy `image` with the mask written into its alpha channel.
///
/// The source alpha is preserved multiplicatively, so pixels that were
/// already transparent stay transparent.
///
/// # Errors
///
/// Returns [`PipelineError::MaskSizeMismatch`] when the mask and image
/// dimensions differ.
pub fn apply_mask(
    image: &RgbaImage,
    mask: &Mask,
    defringe: Defringe,
) -> Result<RgbaImage, PipelineError> {
    mask.ensure_matches(image)?;

    let soft;
    let mask = if defringe == Defringe::Soft {
        let mut m = mask.clone();
        soft_defringe(image, &mut m);
        soft = m;
        &soft
    } else {
        mask
    };

    let mut out = image.clone();
    for (x, y, p) in out.enumerate_pixels_mut() {
        let source_alpha = f32::from(p.0[3]) / 255.0;
        let alpha = unit_to_byte(mask.get(x, y) * source_alpha);
        p.0[3] = match defringe {
            Defringe::Hard if alpha < HARD_ALPHA_THRESHOLD => 0,
            Defringe::Hard => 255,
            Defringe::None | Defringe::Soft => alpha,
        };
    }
    Ok(out)
}

/// [`apply_mask`] with [`Defringe::Hard`], as used for interactive
/// previews after manual edits.
///
/// # Errors
///
/// Returns [`PipelineError::MaskSizeMismatch`] when the mask and image
/// dimensions differ.
pub fn apply_mask_hard(image: &RgbaImage, mask: &Mask) -> Result<RgbaImage, PipelineError> {
    apply_mask(image, mask, Defringe::Hard)
}

/// Composite a cut-out over `background`.
///
/// Transparent keeps the cut-out as-is. A color background yields an
/// opaque image. An image background is resized to the cut-out's
/// dimensions when they differ, then the cut-out is drawn over it.
#[must_use]
pub fn blend_background(cutout: &RgbaImage, background: &OutputBackground) -> RgbaImage {
    match background {
        OutputBackground::Transparent => cutout.clone(),
        OutputBackground::Color(color) => {
            let mut out = cutout.clone();
            for p in out.pixels_mut() {
                *p = over(*p, color.to_rgba());
            }
            out
        }
        OutputBackground::Image(image) => {
            let dims = Dimensions::of(cutout);
            let resized;
            let backdrop: &RgbaImage = if Dimensions::of(image) == dims {
                image
            } else {
                resized = image::imageops::resize(
                    image.as_ref(),
                    dims.width,
                    dims.height,
                    FilterType::Triangle,
                );
                &resized
            };
            let mut out = cutout.clone();
            for (p, b) in out.pixels_mut().zip(backdrop.pixels()) {
                *p = over(*p, *b);
            }
            out
        }
    }
}

/// Porter-Duff "over" with straight (non-premultiplied) alpha.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn over(top: image::Rgba<u8>, bottom: image::Rgba<u8>) -> image::Rgba<u8> {
    let ta = f32::from(top.0[3]) / 255.0;
    let ba = f32::from(bottom.0[3]) / 255.0;
    let out_a = ba.mul_add(1.0 - ta, ta);
    if out_a <= 0.0 {
        return image::Rgba([0, 0, 0, 0]);
    }
    let mut px = [0u8; 4];
    for c in 0..3 {
        let t = f32::from(top.0[c]);
        let b = f32::from(bottom.0[c]);
        let v = (t * ta + b * ba * (1.0 - ta)) / out_a;
        px[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    px[3] = unit_to_byte(out_a);
    image::Rgba(px)
}

/// Mask application plus background blending in one call.
///
/// # Errors
///
/// Returns [`PipelineError::MaskSizeMismatch`] when the mask and image
/// dimensions differ.
pub fn composite(
    image: &RgbaImage,
    mask: &Mask,
    defringe: Defringe,
    background: &OutputBackground,
) -> Result<RgbaImage, PipelineError> {
    let cutout = apply_mask(image, mask, defringe)?;
    Ok(blend_background(&cutout, background))
}
