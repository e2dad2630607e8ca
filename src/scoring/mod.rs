//! Quality scoring: one score per image, persisted as it is produced.
//!
//! [`QualityScorer`] walks the normalized images one at a time, asks its
//! [`QualityBackend`] for a score and writes the result to the
//! [`ScoreStore`] before moving on. Any per-image failure (undecodable file,
//! backend crash, timeout, NaN) is recorded as [`Score::Unscored`] with the
//! reason, so the classifier later routes the image as "bad".
//!
//! Only a store write failure stops the batch.

pub mod backends;

pub use backends::{
    metric_lower_better, CommandBackend, Device, QualityBackend, SharpnessBackend,
    DEFAULT_SCORER_ARGS,
};

use crate::error::{ImageError, PipelineError};
use crate::output::Stage;
use crate::pipeline::discover::is_image_file;
use crate::progress::ProgressCallback;
use crate::store::ScoreStore;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A quality score, or the fact that none could be measured.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Score {
    Scored(f64),
    Unscored,
}

impl Score {
    pub fn value(self) -> Option<f64> {
        match self {
            Score::Scored(v) => Some(v),
            Score::Unscored => None,
        }
    }

    pub fn is_scored(self) -> bool {
        matches!(self, Score::Scored(_))
    }
}

/// What happened to one image during scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScoreOutcome {
    Scored { path: PathBuf, score: f64 },
    Failed { path: PathBuf, error: ImageError },
}

impl ScoreOutcome {
    pub fn path(&self) -> &Path {
        match self {
            ScoreOutcome::Scored { path, .. } | ScoreOutcome::Failed { path, .. } => path,
        }
    }
}

/// Summary of a scoring batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoringReport {
    /// One entry per image handed to the backend, in processing order.
    pub outcomes: Vec<ScoreOutcome>,
    /// Images excluded by the name filter. They have no store entry.
    pub filtered: Vec<PathBuf>,
    /// Files that are not images (`.DS_Store`, sidecars).
    pub skipped: Vec<PathBuf>,
}

impl ScoringReport {
    pub fn scored(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ScoreOutcome::Scored { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.scored()
    }
}

/// Options for [`QualityScorer`].
#[derive(Debug, Clone, Copy)]
pub struct ScorerOptions {
    /// Time limit per image.
    pub timeout: Duration,
}

impl Default for ScorerOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
        }
    }
}

/// Scores a batch of images into a [`ScoreStore`].
pub struct QualityScorer {
    backend: Arc<dyn QualityBackend>,
    options: ScorerOptions,
}

impl QualityScorer {
    pub fn new(backend: Arc<dyn QualityBackend>, options: ScorerOptions) -> Self {
        Self { backend, options }
    }

    pub fn backend(&self) -> &dyn QualityBackend {
        self.backend.as_ref()
    }

    /// Score one image under the configured timeout. Non-finite values are
    /// reported as failures.
    pub async fn score_one(&self, path: &Path) -> Result<f64, ImageError> {
        let secs = self.options.timeout.as_secs();
        let value = match tokio::time::timeout(self.options.timeout, self.backend.score(path)).await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(ImageError::Timeout {
                    path: path.to_path_buf(),
                    operation: format!("{} scoring", self.backend.name()),
                    secs,
                })
            }
        };
        if !value.is_finite() {
            return Err(ImageError::ScoringFailed {
                path: path.to_path_buf(),
                detail: format!("non-finite score {value}"),
            });
        }
        Ok(value)
    }

    /// Score every image in `paths` whose file name matches `name_filter`,
    /// writing each result to `store` before the next image starts.
    pub async fn score_all(
        &self,
        paths: &[PathBuf],
        store: &mut ScoreStore,
        name_filter: Option<&Regex>,
        progress: Option<&ProgressCallback>,
    ) -> Result<ScoringReport, PipelineError> {
        let mut report = ScoringReport::default();

        let mut work = Vec::with_capacity(paths.len());
        for path in paths {
            if !is_image_file(path) {
                report.skipped.push(path.clone());
                continue;
            }
            let matches = match name_filter {
                Some(re) => path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|name| re.is_match(name)),
                None => true,
            };
            if matches {
                work.push(path);
            } else {
                report.filtered.push(path.clone());
            }
        }

        if !report.filtered.is_empty() {
            info!(
                "{} image(s) excluded by the name filter; they will be treated as unscored",
                report.filtered.len()
            );
        }

        let total = work.len();
        if total == 0 {
            info!("No images to score");
            return Ok(report);
        }

        info!(
            "Scoring {} image(s) with {} ({} is better)",
            total,
            self.backend.name(),
            if self.backend.lower_better() { "lower" } else { "higher" }
        );
        if let Some(cb) = progress {
            cb.on_stage_start(Stage::Score, total);
        }

        for (index, path) in work.into_iter().enumerate() {
            if let Some(cb) = progress {
                cb.on_image_start(Stage::Score, index, total, path);
            }

            match self.score_one(path).await {
                Ok(value) => {
                    store.put(path, Score::Scored(value))?;
                    debug!("Score for {} is {:.4}", path.display(), value);
                    if let Some(cb) = progress {
                        cb.on_image_complete(Stage::Score, index, total, path);
                    }
                    report.outcomes.push(ScoreOutcome::Scored {
                        path: path.clone(),
                        score: value,
                    });
                }
                Err(error) => {
                    let reason = error.to_string();
                    store.put_with_reason(path, Score::Unscored, Some(&reason))?;
                    warn!("{}", reason);
                    if let Some(cb) = progress {
                        cb.on_image_error(Stage::Score, index, total, &error);
                    }
                    report.outcomes.push(ScoreOutcome::Failed {
                        path: path.clone(),
                        error,
                    });
                }
            }
        }

        if let Some(cb) = progress {
            cb.on_stage_complete(Stage::Score, total, report.scored());
        }
        info!(
            "Scoring finished: {} scored, {} unscored",
            report.scored(),
            report.failed()
        );
        Ok(report)
    }
}
