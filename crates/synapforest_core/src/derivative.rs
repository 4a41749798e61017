//! Size-bounded raster derivatives (thumbnails and previews).
//!
//! # Invariants
//! - Output pixel count never exceeds the requested budget.
//! - Aspect ratio is preserved up to integer rounding.
//! - Failures are reported, never panicked; callers treat them as non-fatal.

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::path::Path;
use thiserror::Error;

/// Encoded format of every derivative artifact.
pub const DERIVATIVE_FORMAT: ImageFormat = ImageFormat::WebP;
/// File extension matching `DERIVATIVE_FORMAT`.
pub const DERIVATIVE_EXT: &str = "webp";

/// Default thumbnail budget: 256 x 256 pixels.
pub const DEFAULT_THUMBNAIL_MAX_PIXELS: u64 = 256 * 256;
/// Default preview budget: 768 x 768 pixels.
pub const DEFAULT_PREVIEW_MAX_PIXELS: u64 = 768 * 768;

/// Purpose of a derivative artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DerivativeKind {
    Thumbnail,
    Preview,
}

impl DerivativeKind {
    pub const ALL: [DerivativeKind; 2] = [DerivativeKind::Thumbnail, DerivativeKind::Preview];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Thumbnail => "thumbnail",
            Self::Preview => "preview",
        }
    }

    /// Library sub-directory holding artifacts of this kind.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Thumbnail => "thumbnails",
            Self::Preview => "previews",
        }
    }
}

#[derive(Debug, Error)]
pub enum DerivativeError {
    #[error("failed to decode source image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode derivative: {0}")]
    Encode(#[source] image::ImageError),
    #[error("failed to prepare derivative directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Computes output dimensions whose product fits in `max_pixels`.
///
/// Images already within budget keep their size. Otherwise both sides are
/// multiplied by `sqrt(max_pixels / (width * height))` and rounded; when
/// rounding up would overshoot the budget the floor is used instead. Sides
/// never drop below one pixel.
pub fn fit_within_budget(width: u32, height: u32, max_pixels: u64) -> (u32, u32) {
    let pixels = u64::from(width) * u64::from(height);
    if pixels <= max_pixels {
        return (width, height);
    }

    let scale = (max_pixels as f64 / pixels as f64).sqrt();
    let rounded = (
        scale_side(width, scale, f64::round),
        scale_side(height, scale, f64::round),
    );
    if u64::from(rounded.0) * u64::from(rounded.1) <= max_pixels {
        return rounded;
    }
    let (mut floored_width, mut floored_height) = (
        scale_side(width, scale, f64::floor),
        scale_side(height, scale, f64::floor),
    );
    // Only a side clamped to 1 can still overshoot; cap the other one.
    if u64::from(floored_width) * u64::from(floored_height) > max_pixels {
        let cap = max_pixels.clamp(1, u64::from(u32::MAX)) as u32;
        if floored_width == 1 {
            floored_height = floored_height.min(cap);
        } else {
            floored_width = floored_width.min(cap);
        }
    }
    (floored_width, floored_height)
}

fn scale_side(side: u32, scale: f64, round: fn(f64) -> f64) -> u32 {
    (round(f64::from(side) * scale) as u32).max(1)
}

/// Decodes `source`, downsizes it to `max_pixels` and writes a WebP file to
/// `dest`. Returns the written dimensions.
pub fn generate_derivative(
    source: &Path,
    dest: &Path,
    max_pixels: u64,
) -> Result<(u32, u32), DerivativeError> {
    let image = image::open(source).map_err(DerivativeError::Decode)?;
    let (width, height) = fit_within_budget(image.width(), image.height(), max_pixels);

    let resized = if (width, height) == (image.width(), image.height()) {
        image
    } else {
        image.resize_exact(width, height, FilterType::Lanczos3)
    };
    // The WebP encoder only accepts 8-bit RGB(A).
    let encodable = DynamicImage::ImageRgba8(resized.to_rgba8());

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    encodable
        .save_with_format(dest, DERIVATIVE_FORMAT)
        .map_err(DerivativeError::Encode)?;
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::{fit_within_budget, generate_derivative, DerivativeError};
    use image::{ImageBuffer, Rgb};

    #[test]
    fn fit_keeps_small_images_untouched() {
        assert_eq!(fit_within_budget(100, 50, 65_536), (100, 50));
        assert_eq!(fit_within_budget(256, 256, 65_536), (256, 256));
    }

    #[test]
    fn fit_bounds_wide_image_and_keeps_ratio() {
        let (width, height) = fit_within_budget(4000, 2000, 65_536);
        assert!(u64::from(width) * u64::from(height) <= 65_536);
        assert!((i64::from(width) - 2 * i64::from(height)).abs() <= 1);
        assert_eq!((width, height), (362, 181));
    }

    #[test]
    fn fit_never_exceeds_budget_after_rounding() {
        for (width, height) in [(1001, 999), (3, 7919), (12345, 678), (7, 7)] {
            for budget in [1u64, 10, 99, 4096, 65_536] {
                let (w, h) = fit_within_budget(width, height, budget);
                assert!(w >= 1 && h >= 1);
                if u64::from(width) * u64::from(height) > budget && budget > 1 {
                    assert!(u64::from(w) * u64::from(h) <= budget, "{width}x{height}@{budget}");
                }
            }
        }
    }

    #[test]
    fn generate_writes_bounded_webp() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("wide.png");
        let buffer = ImageBuffer::from_fn(400, 200, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 9]));
        buffer.save(&source).unwrap();

        let dest = dir.path().join("out").join("wide.webp");
        let written = generate_derivative(&source, &dest, 5_000).unwrap();
        assert_eq!(written, (100, 50));
        assert_eq!(image::image_dimensions(&dest).unwrap(), (100, 50));
    }

    #[test]
    fn generate_reports_decode_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("broken.png");
        std::fs::write(&source, b"definitely not a png").unwrap();

        let err = generate_derivative(&source, &dir.path().join("x.webp"), 100).unwrap_err();
        assert!(matches!(err, DerivativeError::Decode(_)));
    }
}
