//! Error types for the scanroute library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`], **fatal**: the run cannot produce trustworthy output
//!   (score store unwritable, manifest unreadable, model directory missing,
//!   bad configuration). Returned as `Err(PipelineError)` from the stage entry
//!   points in [`crate::run`].
//!
//! * [`ImageError`], **non-fatal**: a single image failed (undecodable file,
//!   scorer crash, model timeout) but the rest of the batch is fine. Stored
//!   inside [`crate::output::ImageResult`] and
//!   [`crate::scoring::ScoreOutcome`] so one bad scan never stalls the batch.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// All fatal errors returned by the scanroute library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The source directory does not exist or is not a directory.
    #[error("Source directory not found: '{path}'")]
    SourceNotFound { path: PathBuf },

    /// Directory traversal failed part-way.
    #[error("Failed to scan '{path}': {detail}")]
    Discovery { path: PathBuf, detail: String },

    /// Could not create the destination tree.
    #[error("Failed to create output directory '{path}': {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Score store errors ────────────────────────────────────────────────
    /// Writing or flushing a score failed. Scores are the only branching
    /// signal, so the run stops here.
    #[error("Failed to write score store '{path}': {source}")]
    StoreWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading the score store back failed.
    #[error("Failed to read score store '{path}': {source}")]
    StoreRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A line other than the last one could not be parsed.
    #[error("Score store '{path}' is corrupt at line {line}: {detail}")]
    StoreCorrupt {
        path: PathBuf,
        line: usize,
        detail: String,
    },

    // ── Manifest errors ───────────────────────────────────────────────────
    /// The manifest is missing or not valid JSON.
    #[error("Failed to read manifest '{path}': {detail}\nRun `scanroute prepare` first.")]
    ManifestRead { path: PathBuf, detail: String },

    /// The manifest could not be written.
    #[error("Failed to write manifest '{path}': {detail}")]
    ManifestWrite { path: PathBuf, detail: String },

    /// The manifest was produced by an incompatible version.
    #[error("Manifest '{path}' has schema '{found}', expected '{expected}'")]
    ManifestSchema {
        path: PathBuf,
        found: String,
        expected: &'static str,
    },

    // ── Backend errors ────────────────────────────────────────────────────
    /// The binarization model directory does not exist.
    #[error("Model directory not found: '{path}'\nDownload and unpack the model, then pass --model-dir.")]
    ModelDirMissing { path: PathBuf },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The file-name filter is not a valid regular expression.
    #[error("Invalid file-name filter '{pattern}': {detail}")]
    InvalidFilter { pattern: String, detail: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single image.
///
/// The batch continues; the error is recorded next to the image's result.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ImageError {
    /// The file could not be opened or decoded.
    #[error("'{path}': cannot read image: {detail}")]
    Unreadable { path: PathBuf, detail: String },

    /// The quality backend failed or returned a non-finite score.
    #[error("'{path}': quality scoring failed: {detail}")]
    ScoringFailed { path: PathBuf, detail: String },

    /// An external call exceeded its time limit.
    #[error("'{path}': {operation} timed out after {secs}s")]
    Timeout {
        path: PathBuf,
        operation: String,
        secs: u64,
    },

    /// A pixel filter failed.
    #[error("'{path}': {operation} failed: {detail}")]
    FilterFailed {
        path: PathBuf,
        operation: String,
        detail: String,
    },

    /// Re-encoding the result failed.
    #[error("'{path}': encoding failed: {detail}")]
    EncodeFailed { path: PathBuf, detail: String },

    /// The binarization model failed.
    #[error("'{path}': model binarization failed: {detail}")]
    BinarizeFailed { path: PathBuf, detail: String },

    /// The extension is not one the stage can write.
    #[error("'{path}': unsupported output format")]
    UnsupportedFormat { path: PathBuf },

    /// File-system operation failed.
    #[error("'{path}': I/O error: {detail}")]
    Io { path: PathBuf, detail: String },
}

impl ImageError {
    /// The image this error belongs to.
    pub fn path(&self) -> &Path {
        match self {
            ImageError::Unreadable { path, .. }
            | ImageError::ScoringFailed { path, .. }
            | ImageError::Timeout { path, .. }
            | ImageError::FilterFailed { path, .. }
            | ImageError::EncodeFailed { path, .. }
            | ImageError::BinarizeFailed { path, .. }
            | ImageError::UnsupportedFormat { path }
            | ImageError::Io { path, .. } => path,
        }
    }

    pub(crate) fn io(path: &Path, err: impl std::fmt::Display) -> Self {
        ImageError::Io {
            path: path.to_path_buf(),
            detail: err.to_string(),
        }
    }

    pub(crate) fn unreadable(path: &Path, err: impl std::fmt::Display) -> Self {
        ImageError::Unreadable {
            path: path.to_path_buf(),
            detail: err.to_string(),
        }
    }
}
