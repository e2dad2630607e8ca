//! Upload normalization: make every source image acceptable to the upload
//! target before it is scored or treated.
//!
//! Each image is decoded, flattened to RGB (or kept single-channel when the
//! source has no colour), capped at the maximum edge length and written as a
//! quality-95 JPEG into the mirrored destination tree. Unless `basic_only` is
//! set, the size ceiling is enforced straight away.

use crate::error::ImageError;
use crate::output::{BatchReport, Stage};
use crate::pipeline::compress::{compress_under_ceiling, CompressionOutcome};
use crate::pipeline::discover::is_image_file;
use crate::pipeline::{blocking, run_batch, write_atomic, Processed};
use crate::progress::ProgressCallback;
use doc_filters::{encode, OutputFormat};
use image::imageops::FilterType;
use image::DynamicImage;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// JPEG quality for normalized images.
pub const UPLOAD_JPEG_QUALITY: u8 = 95;

/// Limits imposed by the upload target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadRequirements {
    pub max_edge: u32,
    pub size_ceiling_bytes: u64,
}

impl Default for UploadRequirements {
    fn default() -> Self {
        Self {
            max_edge: 10_000,
            size_ceiling_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Convert `src` into an upload-ready JPEG at `dst`.
pub fn normalize_for_upload(
    src: &Path,
    dst: &Path,
    basic_only: bool,
    reqs: &UploadRequirements,
) -> Result<Option<CompressionOutcome>, ImageError> {
    let img = image::open(src).map_err(|e| ImageError::unreadable(src, e))?;

    let img = if img.color().has_color() {
        DynamicImage::ImageRgb8(img.to_rgb8())
    } else {
        DynamicImage::ImageLuma8(img.to_luma8())
    };

    let img = if img.width().max(img.height()) > reqs.max_edge {
        debug!(
            "{}: {}×{} exceeds {} px, downscaling",
            src.display(),
            img.width(),
            img.height(),
            reqs.max_edge
        );
        img.resize(reqs.max_edge, reqs.max_edge, FilterType::Lanczos3)
    } else {
        img
    };

    let bytes = encode(&img, OutputFormat::Jpeg, UPLOAD_JPEG_QUALITY).map_err(|e| {
        ImageError::EncodeFailed {
            path: src.to_path_buf(),
            detail: e.to_string(),
        }
    })?;

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| ImageError::io(dst, e))?;
    }
    write_atomic(dst, &bytes)?;

    if basic_only {
        return Ok(None);
    }
    compress_under_ceiling(dst, reqs.size_ceiling_bytes).map(Some)
}

/// Normalize every `(source, destination)` pair.
pub async fn normalize_all(
    pairs: &[(PathBuf, PathBuf)],
    reqs: UploadRequirements,
    progress: Option<&ProgressCallback>,
) -> BatchReport {
    let targets: HashMap<PathBuf, PathBuf> = pairs.iter().cloned().collect();
    let sources: Vec<PathBuf> = pairs.iter().map(|(src, _)| src.clone()).collect();

    run_batch(Stage::Normalize, &sources, is_image_file, progress, |src| {
        let dst = targets.get(&src).cloned();
        async move {
            let dst = dst.ok_or_else(|| ImageError::io(&src, "no destination path"))?;
            let (s, d) = (src.clone(), dst.clone());
            let compression = blocking(&src, "upload normalization", move || {
                normalize_for_upload(&s, &d, false, &reqs)
            })
            .await?;
            Ok(Processed {
                output: Some(dst),
                compression,
            })
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgba, RgbaImage};
    use tempfile::TempDir;

    #[test]
    fn converts_png_to_rgb_jpeg() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.png");
        let dst = dir.path().join("out/sub/a.jpg");
        RgbaImage::from_pixel(40, 30, Rgba([200, 10, 10, 128]))
            .save(&src)
            .unwrap();

        normalize_for_upload(&src, &dst, true, &UploadRequirements::default()).unwrap();
        let out = image::open(&dst).unwrap();
        assert_eq!((out.width(), out.height()), (40, 30));
        assert!(matches!(out, DynamicImage::ImageRgb8(_)));
    }

    #[test]
    fn gray_stays_single_channel() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("g.png");
        let dst = dir.path().join("g.jpg");
        GrayImage::from_pixel(32, 32, Luma([90])).save(&src).unwrap();
        normalize_for_upload(&src, &dst, true, &UploadRequirements::default()).unwrap();
        assert!(matches!(image::open(&dst).unwrap(), DynamicImage::ImageLuma8(_)));
    }

    #[test]
    fn caps_longest_edge() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("wide.png");
        let dst = dir.path().join("wide.jpg");
        GrayImage::from_pixel(600, 300, Luma([200])).save(&src).unwrap();
        let reqs = UploadRequirements {
            max_edge: 300,
            ..Default::default()
        };
        normalize_for_upload(&src, &dst, true, &reqs).unwrap();
        let (w, h) = image::image_dimensions(&dst).unwrap();
        assert_eq!((w, h), (300, 150));
    }

    #[test]
    fn undecodable_input() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("broken.jpg");
        fs::write(&src, b"definitely not a jpeg").unwrap();
        let err = normalize_for_upload(&src, &dir.path().join("o.jpg"), true, &Default::default())
            .unwrap_err();
        assert!(matches!(err, ImageError::Unreadable { .. }));
    }

    #[tokio::test]
    async fn batch_continues_past_bad_image() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.png");
        let bad = dir.path().join("bad.png");
        GrayImage::from_pixel(16, 16, Luma([10])).save(&good).unwrap();
        fs::write(&bad, b"junk").unwrap();
        let pairs = vec![
            (bad.clone(), dir.path().join("out/bad.jpg")),
            (good.clone(), dir.path().join("out/good.jpg")),
        ];

        let report = normalize_all(&pairs, UploadRequirements::default(), None).await;
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert!(dir.path().join("out/good.jpg").exists());
        assert!(!dir.path().join("out/bad.jpg").exists());
    }
}
