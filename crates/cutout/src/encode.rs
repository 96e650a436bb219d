//! Encoding of composited output and masks.

use std::path::Path;

use cutout_pipeline::composite::blend_background;
use cutout_pipeline::{Color, GrayImage, OutputBackground, OutputFormat, RgbaImage};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageError};

/// Map a `(0, 1]` quality factor to the JPEG encoder's 1-100 scale.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn jpeg_quality(quality: f32) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

/// Guess the output format from a file extension.
pub fn format_from_path(path: &Path) -> Option<OutputFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some(OutputFormat::Png),
        "jpg" | "jpeg" => Some(OutputFormat::Jpeg),
        "webp" => Some(OutputFormat::Webp),
        _ => None,
    }
}

/// Encode `image` in `format`.
///
/// JPEG has no alpha channel, so the image is flattened over white
/// first. WebP is written lossless; `quality` only affects JPEG.
pub fn encode(
    image: &RgbaImage,
    format: OutputFormat,
    quality: f32,
) -> Result<Vec<u8>, ImageError> {
    let (width, height) = image.dimensions();
    let mut buf = Vec::new();
    match format {
        OutputFormat::Png => PngEncoder::new(&mut buf).write_image(
            image.as_raw(),
            width,
            height,
            ExtendedColorType::Rgba8,
        )?,
        OutputFormat::Jpeg => {
            let flattened = blend_background(image, &OutputBackground::Color(Color::WHITE));
            let rgb = image::DynamicImage::ImageRgba8(flattened).to_rgb8();
            JpegEncoder::new_with_quality(&mut buf, jpeg_quality(quality)).write_image(
                rgb.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )?;
        }
        OutputFormat::Webp => WebPEncoder::new_lossless(&mut buf).write_image(
            image.as_raw(),
            width,
            height,
            ExtendedColorType::Rgba8,
        )?,
    }
    tracing::debug!(format = format.extension(), bytes = buf.len(), "image encoded");
    Ok(buf)
}

/// Encode a grayscale mask as PNG.
pub fn encode_mask(mask: &GrayImage) -> Result<Vec<u8>, ImageError> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf).write_image(
        mask.as_raw(),
        mask.width(),
        mask.height(),
        ExtendedColorType::L8,
    )?;
    Ok(buf)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cutout_pipeline::decode::decode_rgba;

    use super::*;

    fn half_transparent() -> RgbaImage {
        RgbaImage::from_fn(8, 4, |x, _| {
            if x < 4 {
                image::Rgba([0, 0, 255, 255])
            } else {
                image::Rgba([0, 0, 0, 0])
            }
        })
    }

    #[test]
    fn quality_maps_to_percent() {
        assert_eq!(jpeg_quality(0.92), 92);
        assert_eq!(jpeg_quality(1.0), 100);
        assert_eq!(jpeg_quality(0.001), 1);
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(format_from_path(Path::new("a.PNG")), Some(OutputFormat::Png));
        assert_eq!(format_from_path(Path::new("a.jpeg")), Some(OutputFormat::Jpeg));
        assert_eq!(format_from_path(Path::new("a.webp")), Some(OutputFormat::Webp));
        assert_eq!(format_from_path(Path::new("a.gif")), None);
        assert_eq!(format_from_path(Path::new("noext")), None);
    }

    #[test]
    fn png_keeps_alpha() {
        let img = half_transparent();
        let bytes = encode(&img, OutputFormat::Png, 0.92).unwrap();
        assert_eq!(decode_rgba(&bytes).unwrap(), img);
    }

    #[test]
    fn webp_is_lossless() {
        let img = half_transparent();
        let bytes = encode(&img, OutputFormat::Webp, 0.5).unwrap();
        let decoded = decode_rgba(&bytes).unwrap();
        assert_eq!(decoded.get_pixel(1, 1), img.get_pixel(1, 1));
        assert_eq!(decoded.get_pixel(6, 1).0[3], 0);
    }

    #[test]
    fn jpeg_flattens_over_white() {
        let bytes = encode(&half_transparent(), OutputFormat::Jpeg, 1.0).unwrap();
        let decoded = decode_rgba(&bytes).unwrap();
        assert!(decoded.pixels().all(|p| p.0[3] == 255));
        let right = decoded.get_pixel(7, 2).0;
        assert!(right.iter().take(3).all(|&c| c > 230), "{right:?}");
    }

    #[test]
    fn mask_encodes_as_grayscale_png() {
        let mask = GrayImage::from_fn(3, 3, |x, _| image::Luma([if x == 1 { 255 } else { 0 }]));
        let bytes = encode_mask(&mask).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_luma8();
        assert_eq!(decoded, mask);
    }
}
