//! Pipeline stages for routing document scans.
//!
//! Each submodule implements one step; the orchestration lives in
//! [`crate::run`].
//!
//! ## Data Flow
//!
//! ```text
//! discover ──▶ normalize ──▶ (score, classify) ──┬──▶ algorithmic ─────────────▶ upload tree
//! (walkdir)    (.jpg, size)                      └──▶ model A ─▶ manifest ─▶ model B
//! ```
//!
//! 1. [`discover`]    find images under the source tree, mirror their paths
//! 2. [`normalize`]   convert each image to upload format in the destination
//! 3. [`algorithmic`] Sauvola binarization for images routed there
//! 4. [`model`]       grayscale + denoise now, model inference in stage 2
//! 5. [`compress`]    size-budget loop shared by every writer
//!
//! Every per-image stage goes through [`run_batch`]: one failed image is
//! logged and recorded, and the batch carries on.

pub mod algorithmic;
pub mod compress;
pub mod discover;
pub mod model;
pub mod normalize;

use crate::error::ImageError;
use crate::output::{BatchReport, ImageResult, Stage};
use crate::pipeline::compress::CompressionOutcome;
use crate::progress::ProgressCallback;
use image::GrayImage;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// What a stage produced for one image.
#[derive(Debug, Default)]
pub(crate) struct Processed {
    pub output: Option<PathBuf>,
    pub compression: Option<CompressionOutcome>,
}

/// Run `op` over every accepted path, isolating failures per image.
///
/// Paths rejected by `accept` are recorded as skipped and never touched. An
/// empty (or fully skipped) batch logs and returns without firing progress
/// events.
pub(crate) async fn run_batch<F, Fut>(
    stage: Stage,
    paths: &[PathBuf],
    accept: fn(&Path) -> bool,
    progress: Option<&ProgressCallback>,
    mut op: F,
) -> BatchReport
where
    F: FnMut(PathBuf) -> Fut,
    Fut: Future<Output = Result<Processed, ImageError>>,
{
    let mut report = BatchReport::empty(stage);
    let (work, skipped): (Vec<&PathBuf>, Vec<&PathBuf>) =
        paths.iter().partition(|p| accept(p.as_path()));
    report.skipped = skipped.into_iter().cloned().collect();
    for path in &report.skipped {
        info!("{}: skipping {} (not a raster upload format)", stage, path.display());
    }

    let total = work.len();
    if total == 0 {
        info!("{}: no images, nothing to do", stage);
        return report;
    }

    info!("{}: {} image(s)", stage, total);
    if let Some(cb) = progress {
        cb.on_stage_start(stage, total);
    }

    for (index, path) in work.into_iter().enumerate() {
        if let Some(cb) = progress {
            cb.on_image_start(stage, index, total, path);
        }
        let started = Instant::now();
        let outcome = op(path.clone()).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(processed) => {
                if let Some(cb) = progress {
                    cb.on_image_complete(stage, index, total, path);
                }
                ImageResult {
                    path: path.clone(),
                    output: processed.output,
                    duration_ms,
                    compression: processed.compression,
                    error: None,
                }
            }
            Err(error) => {
                warn!("{}: {}", stage, error);
                if let Some(cb) = progress {
                    cb.on_image_error(stage, index, total, &error);
                }
                ImageResult {
                    path: path.clone(),
                    output: None,
                    duration_ms,
                    compression: None,
                    error: Some(error),
                }
            }
        };
        report.results.push(result);
    }

    if let Some(cb) = progress {
        cb.on_stage_complete(stage, total, report.succeeded());
    }
    info!(
        "{}: {} succeeded, {} failed",
        stage,
        report.succeeded(),
        report.failed()
    );
    report
}

/// Run CPU-bound image work off the async worker threads.
pub(crate) async fn blocking<T, F>(path: &Path, operation: &str, f: F) -> Result<T, ImageError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ImageError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ImageError::FilterFailed {
            path: path.to_path_buf(),
            operation: operation.to_string(),
            detail: format!("task panicked: {e}"),
        })?
}

/// Replace `path` with `bytes` without ever leaving a truncated file behind.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ImageError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| ImageError::io(path, e))?;
    tmp.write_all(bytes).map_err(|e| ImageError::io(path, e))?;
    tmp.persist(path).map_err(|e| ImageError::io(path, e.error))?;
    Ok(())
}

/// Deskew a binary page and snap the interpolated edges back to black/white.
pub(crate) fn deskew_binary(binary: &GrayImage) -> (GrayImage, f32) {
    let (mut straight, angle) = doc_filters::deskew(binary);
    for p in straight.pixels_mut() {
        p.0[0] = if p.0[0] < 128 { 0 } else { 255 };
    }
    (straight, angle)
}
