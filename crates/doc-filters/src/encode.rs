//! Image encoding: `DynamicImage` → JPEG or PNG bytes.
//!
//! Grayscale sources are written as single-channel images, which roughly
//! thirds the size of a binarized page compared with RGB. PNG is always
//! written with the best compression level; `quality` only applies to JPEG.

use crate::FilterError;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ExtendedColorType, ImageEncoder};
use std::path::Path;

/// Output formats accepted by the upload target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
}

impl OutputFormat {
    /// Pick the format from a file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            _ => None,
        }
    }

    /// Whether a lower quality setting shrinks the output.
    pub fn is_lossy(self) -> bool {
        matches!(self, Self::Jpeg)
    }
}

/// Encode `image` in `format`. `quality` (1–100) is used for JPEG only.
pub fn encode(image: &DynamicImage, format: OutputFormat, quality: u8) -> Result<Vec<u8>, FilterError> {
    let mut buf = Vec::new();
    let (w, h) = (image.width(), image.height());

    let (pixels, color) = if image.color().has_color() {
        (image.to_rgb8().into_raw(), ExtendedColorType::Rgb8)
    } else {
        (image.to_luma8().into_raw(), ExtendedColorType::L8)
    };

    match format {
        OutputFormat::Jpeg => {
            JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
                .write_image(&pixels, w, h, color)?;
        }
        OutputFormat::Png => {
            PngEncoder::new_with_quality(&mut buf, CompressionType::Best, FilterType::Adaptive)
                .write_image(&pixels, w, h, color)?;
        }
    }
    Ok(buf)
}
