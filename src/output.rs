//! Result types returned by the pipeline stages.
//!
//! Every stage returns a [`BatchReport`] holding one [`ImageResult`] per
//! image it attempted. Failed images carry their [`ImageError`] instead of
//! aborting the batch. Callers decide whether any failure is fatal.

use crate::classify::Treatment;
use crate::error::ImageError;
use crate::pipeline::compress::CompressionOutcome;
use crate::scoring::ScoringReport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// A processing stage, used for progress events and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Conversion to upload format into the destination tree.
    Normalize,
    /// Quality scoring.
    Score,
    /// Sauvola treatment for "bad" images.
    Algorithmic,
    /// Grayscale + denoise before the model (stage A).
    ModelPrepare,
    /// Model inference, deskew, compression (stage B).
    ModelFinish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Normalize => "Normalizing",
            Stage::Score => "Scoring",
            Stage::Algorithmic => "Binarizing (Sauvola)",
            Stage::ModelPrepare => "Preparing for model",
            Stage::ModelFinish => "Binarizing (model)",
        };
        f.write_str(label)
    }
}

/// Outcome of one image in one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResult {
    /// Image the stage read.
    pub path: PathBuf,
    /// File the stage wrote, when different from `path`.
    pub output: Option<PathBuf>,
    /// Wall-clock time spent on this image.
    pub duration_ms: u64,
    /// Size-budget compression applied to the output, if any ran.
    pub compression: Option<CompressionOutcome>,
    /// `None` on success.
    pub error: Option<ImageError>,
}

impl ImageResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// The file that holds this image after the stage: `output` if set,
    /// otherwise the (in-place) `path`.
    pub fn final_path(&self) -> &PathBuf {
        self.output.as_ref().unwrap_or(&self.path)
    }
}

/// Per-stage collection of image results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub stage: Stage,
    pub results: Vec<ImageResult>,
    /// Images the stage did not attempt (format outside the accepted set).
    pub skipped: Vec<PathBuf>,
}

impl BatchReport {
    pub fn empty(stage: Stage) -> Self {
        Self {
            stage,
            results: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// Errors in processing order.
    pub fn errors(&self) -> impl Iterator<Item = &ImageError> {
        self.results.iter().filter_map(|r| r.error.as_ref())
    }

    /// Results whose size ceiling could not be met.
    pub fn over_ceiling(&self) -> impl Iterator<Item = &ImageResult> {
        self.results
            .iter()
            .filter(|r| r.compression.is_some_and(|c| !c.met_ceiling))
    }
}

/// Everything stage 1 ([`crate::run::prepare`]) produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareOutput {
    pub normalize: BatchReport,
    pub scoring: ScoringReport,
    /// Polarity actually used for classification.
    pub lower_better: bool,
    pub threshold: f64,
    /// Treatment chosen for each normalized image.
    pub routes: BTreeMap<PathBuf, Treatment>,
    pub algorithmic: BatchReport,
    pub model_prepare: BatchReport,
    /// Where the hand-off manifest for stage 2 was written.
    pub manifest_path: PathBuf,
    pub total_duration_ms: u64,
}

/// Everything stage 2 ([`crate::run::binarize`]) produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinarizeOutput {
    pub report: BatchReport,
    pub total_duration_ms: u64,
}
