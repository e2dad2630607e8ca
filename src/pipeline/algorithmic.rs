//! Algorithmic treatment: Sauvola binarization, in place.
//!
//! ```text
//! read → gray → [stretch + CLAHE] → Sauvola(k, window) → deskew → encode → compress
//! ```
//!
//! The file keeps its name and format, so the upload tree layout produced
//! by normalization is untouched.

use crate::error::ImageError;
use crate::output::{BatchReport, Stage};
use crate::pipeline::compress::{compress_under_ceiling, CompressionOutcome};
use crate::pipeline::discover::is_raster_upload;
use crate::pipeline::{blocking, deskew_binary, run_batch, write_atomic, Processed};
use crate::progress::ProgressCallback;
use doc_filters::{encode, enhance_contrast, sauvola, to_gray, OutputFormat, SauvolaParams};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use tracing::debug;

/// JPEG quality used when rewriting a binarized page.
const OUTPUT_JPEG_QUALITY: u8 = 95;

/// Binarize one image in place, then enforce the size ceiling.
pub fn binarize_algorithmic(
    path: &Path,
    params: &SauvolaParams,
    contrast_enhance: bool,
    ceiling_bytes: u64,
) -> Result<CompressionOutcome, ImageError> {
    let format = OutputFormat::from_path(path).ok_or_else(|| ImageError::UnsupportedFormat {
        path: path.to_path_buf(),
    })?;
    let img = image::open(path).map_err(|e| ImageError::unreadable(path, e))?;

    let mut gray = to_gray(&img);
    if contrast_enhance {
        gray = enhance_contrast(&gray);
    }

    let binary = sauvola(&gray, params).map_err(|e| ImageError::FilterFailed {
        path: path.to_path_buf(),
        operation: "Sauvola binarization".into(),
        detail: e.to_string(),
    })?;
    let (straight, angle) = deskew_binary(&binary);
    if angle != 0.0 {
        debug!("{}: deskewed by {:.1}°", path.display(), angle);
    }

    let bytes = encode(&DynamicImage::ImageLuma8(straight), format, OUTPUT_JPEG_QUALITY)
        .map_err(|e| ImageError::EncodeFailed {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
    write_atomic(path, &bytes)?;

    compress_under_ceiling(path, ceiling_bytes)
}

/// Apply the algorithmic treatment to every raster image in `paths`.
pub async fn run_algorithmic(
    paths: &[PathBuf],
    params: SauvolaParams,
    contrast_enhance: bool,
    ceiling_bytes: u64,
    progress: Option<&ProgressCallback>,
) -> BatchReport {
    run_batch(Stage::Algorithmic, paths, is_raster_upload, progress, |path| async move {
        let p = path.clone();
        let compression = blocking(&path, "Sauvola binarization", move || {
            binarize_algorithmic(&p, &params, contrast_enhance, ceiling_bytes)
        })
        .await?;
        Ok(Processed {
            output: None,
            compression: Some(compression),
        })
    })
    .await
}
