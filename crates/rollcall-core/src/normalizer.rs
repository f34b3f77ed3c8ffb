//! Photo normalization before detection.
//!
//! Decodes base64 or raw encoded bytes into an RGB8 buffer, rejects images
//! that are too small to hold a usable face, then applies a brightness
//! correction and a mild unsharp-mask blend so that photos from different
//! camera sensors land closer together in embedding space. Correction is
//! best-effort: if it fails the decoded image is returned unmodified.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use image::{imageops, ImageBuffer, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum accepted width and height, in pixels.
pub const MIN_IMAGE_SIDE: u32 = 100;

/// Mean luminance above which the image is darkened.
const LUMINANCE_UPPER: f32 = 180.0;
/// Mean luminance below which the image is brightened.
const LUMINANCE_LOWER: f32 = 70.0;
/// Correction gain is clamped to this range.
const MIN_GAIN: f32 = 0.5;
const MAX_GAIN: f32 = 2.0;

const SHARPEN_SIGMA: f32 = 1.0;
const SHARPEN_THRESHOLD: i32 = 2;
/// Weight of the sharpened image in the final blend.
const SHARPEN_WEIGHT: f32 = 0.3;

#[derive(Error, Debug)]
pub enum InvalidImage {
    #[error("image payload is empty")]
    Empty,
    #[error("invalid base64 encoding: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("cannot decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("image too small: {width}x{height} (minimum {min}x{min})")]
    TooSmall { width: u32, height: u32, min: u32 },
}

/// Where an input photo comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    /// Base64 text, optionally prefixed by a `data:<mime>;base64,` URL header.
    Base64(String),
    /// Raw encoded bytes (JPEG, PNG, ...).
    Bytes(Vec<u8>),
}

/// A decoded, corrected photo ready for detection.
pub struct NormalizedImage {
    pub image: RgbImage,
    /// Mean luminance of the decoded image, before correction.
    pub mean_luminance: f32,
    /// Whether the correction stage ran to completion.
    pub corrected: bool,
}

#[derive(Error, Debug)]
enum CorrectionError {
    #[error("blend buffer size mismatch ({0} bytes)")]
    BufferSize(usize),
    #[error("non-finite luminance")]
    NonFinite,
}

/// Decode and normalize a photo.
pub fn prepare(source: &ImageSource) -> Result<NormalizedImage, InvalidImage> {
    let image = match source {
        ImageSource::Base64(text) => decode_base64(text)?,
        ImageSource::Bytes(bytes) => decode_bytes(bytes)?,
    };
    Ok(normalize(image))
}

/// Decode base64 text (with or without a data-URL prefix) into RGB8.
pub fn decode_base64(text: &str) -> Result<RgbImage, InvalidImage> {
    let payload = match text.split_once(',') {
        Some((header, body)) if header.starts_with("data:") => body,
        _ => text,
    };
    let payload: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if payload.is_empty() {
        return Err(InvalidImage::Empty);
    }
    let bytes = B64.decode(payload.as_bytes())?;
    decode_bytes(&bytes)
}

/// Decode encoded image bytes into RGB8, enforcing the minimum size.
pub fn decode_bytes(bytes: &[u8]) -> Result<RgbImage, InvalidImage> {
    if bytes.is_empty() {
        return Err(InvalidImage::Empty);
    }
    let image = image::load_from_memory(bytes)?.into_rgb8();
    let (width, height) = image.dimensions();
    if width < MIN_IMAGE_SIDE || height < MIN_IMAGE_SIDE {
        return Err(InvalidImage::TooSmall {
            width,
            height,
            min: MIN_IMAGE_SIDE,
        });
    }
    Ok(image)
}

/// Apply brightness correction and sharpening. Never fails.
pub fn normalize(image: RgbImage) -> NormalizedImage {
    let mean = mean_luminance(&image);
    let corrected = correct(&image, mean);
    settle(image, mean, corrected)
}

/// Keep the corrected image, or the decoded one if correction failed.
fn settle(image: RgbImage, mean: f32, corrected: Result<RgbImage, CorrectionError>) -> NormalizedImage {
    match corrected {
        Ok(corrected) => NormalizedImage {
            image: corrected,
            mean_luminance: mean,
            corrected: true,
        },
        Err(err) => {
            tracing::warn!(error = %err, "image correction failed; using decoded image as-is");
            NormalizedImage {
                image,
                mean_luminance: mean,
                corrected: false,
            }
        }
    }
}

/// Mean Rec.601 luma (0.0–255.0).
pub fn mean_luminance(image: &RgbImage) -> f32 {
    let count = image.width() as usize * image.height() as usize;
    if count == 0 {
        return 0.0;
    }
    let sum: f64 = image
        .pixels()
        .map(|p| 0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64)
        .sum();
    (sum / count as f64) as f32
}

fn correct(image: &RgbImage, mean: f32) -> Result<RgbImage, CorrectionError> {
    if !mean.is_finite() {
        return Err(CorrectionError::NonFinite);
    }

    let mut adjusted = image.clone();
    if let Some(gain) = brightness_gain(mean) {
        tracing::debug!(mean, gain, "adjusting brightness");
        apply_gain(&mut adjusted, gain);
    }

    let sharpened = imageops::unsharpen(&adjusted, SHARPEN_SIGMA, SHARPEN_THRESHOLD);
    blend(&adjusted, &sharpened, SHARPEN_WEIGHT)
}

/// Gain that moves `mean` back to the nearest bound, or `None` if in range.
fn brightness_gain(mean: f32) -> Option<f32> {
    let target = if mean > LUMINANCE_UPPER {
        LUMINANCE_UPPER
    } else if mean < LUMINANCE_LOWER {
        LUMINANCE_LOWER
    } else {
        return None;
    };
    Some((target / mean.max(1.0)).clamp(MIN_GAIN, MAX_GAIN))
}

fn apply_gain(image: &mut RgbImage, gain: f32) {
    for pixel in image.pixels_mut() {
        for c in pixel.0.iter_mut() {
            *c = (*c as f32 * gain).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// `(1 - weight) * base + weight * overlay`, per channel.
fn blend(base: &RgbImage, overlay: &RgbImage, weight: f32) -> Result<RgbImage, CorrectionError> {
    let data: Vec<u8> = base
        .as_raw()
        .iter()
        .zip(overlay.as_raw().iter())
        .map(|(&a, &b)| {
            (a as f32 * (1.0 - weight) + b as f32 * weight)
                .round()
                .clamp(0.0, 255.0) as u8
        })
        .collect();
    let len = data.len();
    ImageBuffer::from_raw(base.width(), base.height(), data).ok_or(CorrectionError::BufferSize(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_bytes_accepts_minimum_size() {
        let img = decode_bytes(&png_bytes(100, 100, [120, 120, 120])).unwrap();
        assert_eq!(img.dimensions(), (100, 100));
    }

    #[test]
    fn test_decode_bytes_rejects_small_image() {
        let err = decode_bytes(&png_bytes(99, 200, [0, 0, 0])).unwrap_err();
        assert!(matches!(err, InvalidImage::TooSmall { width: 99, height: 200, .. }));
    }

    #[test]
    fn test_decode_bytes_rejects_garbage() {
        let err = decode_bytes(b"definitely not an image").unwrap_err();
        assert!(matches!(err, InvalidImage::Decode(_)));
    }

    #[test]
    fn test_decode_empty_payloads() {
        assert!(matches!(decode_bytes(&[]).unwrap_err(), InvalidImage::Empty));
        assert!(matches!(decode_base64("data:image/png;base64,").unwrap_err(), InvalidImage::Empty));
    }

    #[test]
    fn test_decode_base64_strips_data_url_prefix() {
        let encoded = B64.encode(png_bytes(128, 128, [10, 200, 30]));
        let plain = decode_base64(&encoded).unwrap();
        let prefixed = decode_base64(&format!("data:image/png;base64,{encoded}")).unwrap();
        assert_eq!(plain, prefixed);
        assert_eq!(plain.get_pixel(0, 0), &Rgb([10, 200, 30]));
    }

    #[test]
    fn test_decode_base64_rejects_bad_encoding() {
        let err = decode_base64("!!!not base64!!!").unwrap_err();
        assert!(matches!(err, InvalidImage::Encoding(_)));
    }

    #[test]
    fn test_normalize_darkens_overexposed_image() {
        let img = RgbImage::from_pixel(120, 120, Rgb([240, 240, 240]));
        let out = normalize(img);
        assert!(out.corrected);
        assert!((out.mean_luminance - 240.0).abs() < 0.5);
        let after = mean_luminance(&out.image);
        assert!(after < 200.0, "expected darkening, got {after}");
    }

    #[test]
    fn test_normalize_brightens_underexposed_image() {
        let img = RgbImage::from_pixel(120, 120, Rgb([30, 30, 30]));
        let out = normalize(img);
        let after = mean_luminance(&out.image);
        assert!(after > 50.0, "expected brightening, got {after}");
    }

    #[test]
    fn test_normalize_leaves_well_exposed_flat_image_unchanged() {
        let img = RgbImage::from_pixel(120, 120, Rgb([128, 128, 128]));
        let out = normalize(img.clone());
        // Flat image: nothing to sharpen, no gain applied.
        assert_eq!(out.image, img);
    }

    #[test]
    fn test_normalize_preserves_dimensions() {
        let img = RgbImage::from_fn(150, 110, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 90]));
        let out = normalize(img);
        assert_eq!(out.image.dimensions(), (150, 110));
    }

    #[test]
    fn test_failed_correction_falls_back_to_decoded_image() {
        let decoded = RgbImage::from_pixel(120, 120, Rgb([250, 250, 250]));
        let mismatched = RgbImage::new(60, 60);
        let err = blend(&decoded, &mismatched, SHARPEN_WEIGHT).unwrap_err();
        assert!(matches!(err, CorrectionError::BufferSize(_)));

        let mean = mean_luminance(&decoded);
        let out = settle(decoded.clone(), mean, Err(err));
        assert!(!out.corrected);
        assert_eq!(out.image, decoded);
        assert!((out.mean_luminance - 250.0).abs() < 0.01);

        let out = settle(decoded.clone(), f32::NAN, correct(&decoded, f32::NAN));
        assert!(!out.corrected);
        assert_eq!(out.image, decoded);
    }

    #[test]
    fn test_brightness_gain_bounds() {
        assert!(brightness_gain(128.0).is_none());
        assert!((brightness_gain(360.0).unwrap() - 0.5).abs() < 1e-6);
        assert!((brightness_gain(10.0).unwrap() - MAX_GAIN).abs() < 1e-6);
    }

    #[test]
    fn test_prepare_from_bytes() {
        let out = prepare(&ImageSource::Bytes(png_bytes(100, 120, [90, 90, 90]))).unwrap();
        assert_eq!(out.image.dimensions(), (100, 120));
    }
}
