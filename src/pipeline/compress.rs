//! Size-budget compression: shrink an image file until it fits the upload
//! ceiling.
//!
//! ## Search order
//!
//! 1. JPEG only: re-encode at falling quality, 95 → 30 in steps of 10.
//! 2. Then (immediately, for PNG) scale both edges by the same factor,
//!    never below a 256 px short edge. The first scaling step is
//!    `sqrt(ceiling / size)` itself; if that candidate still misses, each
//!    further step is `0.95 × sqrt(ceiling / size)` clamped to `[0.5, 0.95]`.
//!
//! Every candidate is encoded from the decoded original, so scaling never
//! compounds resampling loss. A candidate is kept only if it is smaller than
//! the best so far, and the file is rewritten only if the best beats the
//! original. The loop stops after [`MAX_ITERATIONS`] encodes whatever
//! happens.

use crate::error::ImageError;
use crate::pipeline::write_atomic;
use doc_filters::{encode, OutputFormat};
use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Hard bound on encode attempts per image.
pub const MAX_ITERATIONS: u32 = 20;

/// First JPEG quality tried.
pub const QUALITY_START: u8 = 95;

/// Lowest JPEG quality tried before scaling.
pub const QUALITY_FLOOR: u8 = 30;

const QUALITY_STEP: u8 = 10;

/// Shortest edge the compressor will scale down to.
pub const MIN_EDGE: u32 = 256;

const MIN_SCALE_STEP: f64 = 0.5;
const MAX_SCALE_STEP: f64 = 0.95;
const SCALE_MARGIN: f64 = 0.95;

/// What the compressor did to one file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressionOutcome {
    pub original_bytes: u64,
    pub final_bytes: u64,
    /// Encodes attempted. `0` when the file was already under the ceiling.
    pub iterations: u32,
    /// `false` when the floor or the iteration bound was hit first.
    pub met_ceiling: bool,
    /// JPEG quality of the written file, if it was rewritten as JPEG.
    pub final_quality: Option<u8>,
    /// Dimensions of the written file, if it was rewritten.
    pub final_dimensions: Option<(u32, u32)>,
}

impl CompressionOutcome {
    fn untouched(bytes: u64, met_ceiling: bool) -> Self {
        Self {
            original_bytes: bytes,
            final_bytes: bytes,
            iterations: 0,
            met_ceiling,
            final_quality: None,
            final_dimensions: None,
        }
    }

    pub fn rewritten(&self) -> bool {
        self.final_dimensions.is_some()
    }
}

struct Candidate {
    bytes: Vec<u8>,
    quality: Option<u8>,
    dimensions: (u32, u32),
}

/// Shrink `path` in place until it is at most `ceiling_bytes`.
///
/// CPU-bound; call from a blocking context.
pub fn compress_under_ceiling(path: &Path, ceiling_bytes: u64) -> Result<CompressionOutcome, ImageError> {
    let original_bytes = fs::metadata(path).map_err(|e| ImageError::io(path, e))?.len();
    if original_bytes <= ceiling_bytes {
        return Ok(CompressionOutcome::untouched(original_bytes, true));
    }

    let format = OutputFormat::from_path(path).ok_or_else(|| ImageError::UnsupportedFormat {
        path: path.to_path_buf(),
    })?;
    let original = image::open(path).map_err(|e| ImageError::unreadable(path, e))?;
    let (width, height) = (original.width(), original.height());

    debug!(
        "Compressing {} ({} bytes, ceiling {})",
        path.display(),
        original_bytes,
        ceiling_bytes
    );

    let mut quality = format.is_lossy().then_some(QUALITY_START);
    let mut scale = 1.0f64;
    let mut best: Option<Candidate> = None;
    let mut best_len = original_bytes;
    let mut iterations = 0;
    let mut scaled_once = false;

    while iterations < MAX_ITERATIONS {
        iterations += 1;

        let dimensions = scaled(width, height, scale);
        let image: Cow<'_, DynamicImage> = if dimensions == (width, height) {
            Cow::Borrowed(&original)
        } else {
            Cow::Owned(original.resize_exact(dimensions.0, dimensions.1, FilterType::Lanczos3))
        };
        let bytes = encode(&image, format, quality.unwrap_or(QUALITY_START)).map_err(|e| {
            ImageError::EncodeFailed {
                path: path.to_path_buf(),
                detail: e.to_string(),
            }
        })?;
        let size = bytes.len() as u64;

        if size < best_len {
            best_len = size;
            best = Some(Candidate {
                bytes,
                quality,
                dimensions,
            });
        }
        if best_len <= ceiling_bytes {
            break;
        }

        match quality {
            Some(q) if q > QUALITY_FLOOR => {
                quality = Some(q.saturating_sub(QUALITY_STEP).max(QUALITY_FLOOR));
            }
            _ => {
                let step = scale_step(ceiling_bytes, size, scaled_once);
                scaled_once = true;
                let floor = MIN_EDGE as f64 / width.min(height) as f64;
                let next = (scale * step).max(floor);
                if next >= scale || scaled(width, height, next) == dimensions {
                    break;
                }
                scale = next;
            }
        }
    }

    let met_ceiling = best_len <= ceiling_bytes;
    let outcome = match best {
        Some(candidate) => {
            write_atomic(path, &candidate.bytes)?;
            CompressionOutcome {
                original_bytes,
                final_bytes: candidate.bytes.len() as u64,
                iterations,
                met_ceiling,
                final_quality: candidate.quality,
                final_dimensions: Some(candidate.dimensions),
            }
        }
        None => CompressionOutcome {
            iterations,
            ..CompressionOutcome::untouched(original_bytes, false)
        },
    };

    if !met_ceiling {
        warn!(
            "{}: could not get under {} bytes; best effort is {} bytes after {} attempt(s)",
            path.display(),
            ceiling_bytes,
            outcome.final_bytes,
            iterations
        );
    } else {
        debug!(
            "{}: {} → {} bytes in {} attempt(s)",
            path.display(),
            original_bytes,
            outcome.final_bytes,
            iterations
        );
    }
    Ok(outcome)
}

/// Edge factor for the next scaling attempt, given the size of the last
/// candidate.
fn scale_step(ceiling_bytes: u64, size: u64, retry: bool) -> f64 {
    let ratio = (ceiling_bytes as f64 / size as f64).sqrt();
    if retry {
        (ratio * SCALE_MARGIN).clamp(MIN_SCALE_STEP, MAX_SCALE_STEP)
    } else {
        ratio.clamp(MIN_SCALE_STEP, 1.0)
    }
}

fn scaled(width: u32, height: u32, scale: f64) -> (u32, u32) {
    if scale >= 1.0 {
        return (width, height);
    }
    (
        ((width as f64 * scale).round() as u32).max(1),
        ((height as f64 * scale).round() as u32).max(1),
    )
}
