//! Quality classification and treatment routing.
//!
//! Two pure, total functions sit between the score store and the treatment
//! pipelines:
//!
//! ```text
//! ScoreEntry ──classify──▶ QualityClass ──route──▶ Treatment
//!  (Scored/Unscored)        (Good/Bad)            (Algorithmic/ModelBased)
//! ```
//!
//! Unscored images are always `Bad`, whatever the threshold or polarity: a
//! failed measurement sends the image to the deterministic Sauvola treatment
//! rather than to the model.

use crate::scoring::Score;
use crate::store::ScoreEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Binary quality class derived from a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityClass {
    Good,
    Bad,
}

/// The binarization strategy applied to an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Treatment {
    /// Classic Sauvola adaptive thresholding.
    Algorithmic,
    /// Neural binarization model.
    ModelBased,
}

impl fmt::Display for Treatment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Treatment::Algorithmic => f.write_str("algorithmic"),
            Treatment::ModelBased => f.write_str("model-based"),
        }
    }
}

/// Threshold bound to a specific metric's polarity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityThreshold {
    pub threshold: f64,
    /// `true` when a lower score means a better image for the metric in use.
    pub lower_better: bool,
}

impl QualityThreshold {
    /// Classify one score. The boundary is inclusive on the "good" side.
    pub fn class_of(&self, score: Score) -> QualityClass {
        match score.value() {
            Some(s) if self.lower_better && s <= self.threshold => QualityClass::Good,
            Some(s) if !self.lower_better && s >= self.threshold => QualityClass::Good,
            _ => QualityClass::Bad,
        }
    }
}

/// Which treatment each quality class receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentPolicy {
    pub good: Treatment,
    pub bad: Treatment,
}

impl Default for TreatmentPolicy {
    /// Good → model, bad → Sauvola: tuned for dark microfiche scans, where
    /// the model only helps on images that are already legible.
    fn default() -> Self {
        Self {
            good: Treatment::ModelBased,
            bad: Treatment::Algorithmic,
        }
    }
}

impl TreatmentPolicy {
    pub fn treatment_for(&self, class: QualityClass) -> Treatment {
        match class {
            QualityClass::Good => self.good,
            QualityClass::Bad => self.bad,
        }
    }
}

/// Classify every entry.
pub fn classify(
    entries: &[ScoreEntry],
    threshold: &QualityThreshold,
) -> BTreeMap<PathBuf, QualityClass> {
    entries
        .iter()
        .map(|e| (e.path.clone(), threshold.class_of(e.score)))
        .collect()
}

/// Map every classified path to its treatment.
pub fn route(
    classes: &BTreeMap<PathBuf, QualityClass>,
    policy: &TreatmentPolicy,
) -> BTreeMap<PathBuf, Treatment> {
    classes
        .iter()
        .map(|(path, class)| (path.clone(), policy.treatment_for(*class)))
        .collect()
}

/// Paths split by treatment, each list in path order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub algorithmic: Vec<PathBuf>,
    pub model: Vec<PathBuf>,
}

pub fn partition(routes: &BTreeMap<PathBuf, Treatment>) -> Partition {
    let mut out = Partition::default();
    for (path, treatment) in routes {
        match treatment {
            Treatment::Algorithmic => out.algorithmic.push(path.clone()),
            Treatment::ModelBased => out.model.push(path.clone()),
        }
    }
    out
}
