//! Quality backends: where a score actually comes from.
//!
//! * [`SharpnessBackend`]: in-process focus measure. No model, no Python,
//!   always available. Good enough to separate legible scans from blurred or
//!   washed-out ones.
//! * [`CommandBackend`]: a learned no-reference IQA metric (`maniqa-koniq`,
//!   `niqe`, …) served by an external helper program, one call per image.
//!
//! The compute device is an explicit [`Device`] value handed to the backend,
//! never detected globally at start-up.

use crate::error::{ImageError, PipelineError};
use crate::external::{self, ExternalFailure};
use async_trait::async_trait;
use doc_filters::{laplacian_variance, to_gray};
use image::imageops::FilterType;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// A source of per-image quality scores.
#[async_trait]
pub trait QualityBackend: Send + Sync {
    /// Metric name, for logs and reports.
    fn name(&self) -> &str;

    /// `true` when a lower score means a better image.
    fn lower_better(&self) -> bool;

    /// Score one image.
    async fn score(&self, path: &Path) -> Result<f64, ImageError>;
}

// ── Metric catalogue ─────────────────────────────────────────────────────

static METRIC_POLARITY: Lazy<HashMap<&'static str, bool>> = Lazy::new(|| {
    let lower = ["niqe", "ilniqe", "brisque", "piqe", "pi", "nrqm_inv"];
    let higher = [
        "maniqa",
        "maniqa-koniq",
        "maniqa-kadid",
        "maniqa-pipal",
        "musiq",
        "musiq-koniq",
        "musiq-spaq",
        "musiq-ava",
        "clipiqa",
        "clipiqa+",
        "hyperiqa",
        "dbcnn",
        "paq2piq",
        "topiq_nr",
        "topiq_nr-flive",
        "topiq_nr-spaq",
        "nima",
        "nima-koniq",
        "cnniqa",
        "nrqm",
        "liqe",
        "liqe_mix",
        "laplacian-sharpness",
    ];
    lower
        .iter()
        .map(|m| (*m, true))
        .chain(higher.iter().map(|m| (*m, false)))
        .collect()
});

/// Polarity of a known metric, `None` if the metric is not catalogued.
pub fn metric_lower_better(metric: &str) -> Option<bool> {
    METRIC_POLARITY
        .get(metric.to_ascii_lowercase().as_str())
        .copied()
}

// ── Device ───────────────────────────────────────────────────────────────

/// Compute device requested from a model-backed scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    /// Let the helper pick (CUDA, then MPS, then CPU).
    #[default]
    Auto,
    Cpu,
    Cuda,
    Mps,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Device::Auto => "auto",
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
            Device::Mps => "mps",
        })
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Device::Auto),
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda),
            "mps" => Ok(Device::Mps),
            other => Err(format!(
                "unknown device '{other}' (expected auto, cpu, cuda or mps)"
            )),
        }
    }
}

// ── SharpnessBackend ─────────────────────────────────────────────────────

/// Variance-of-Laplacian sharpness mapped into `[0, 1)` as `v / (v + s)`.
///
/// The image is downscaled so its longest edge is at most `max_edge` before
/// measuring; scan resolution then does not dominate the score.
#[derive(Debug, Clone)]
pub struct SharpnessBackend {
    saturation: f64,
    max_edge: u32,
}

impl Default for SharpnessBackend {
    fn default() -> Self {
        Self::new(500.0, 1024)
    }
}

impl SharpnessBackend {
    pub const NAME: &'static str = "laplacian-sharpness";

    pub fn new(saturation: f64, max_edge: u32) -> Self {
        Self {
            saturation: saturation.max(f64::EPSILON),
            max_edge: max_edge.max(16),
        }
    }

    fn score_blocking(&self, path: &Path) -> Result<f64, ImageError> {
        let img = image::open(path).map_err(|e| ImageError::unreadable(path, e))?;
        let img = if img.width().max(img.height()) > self.max_edge {
            img.resize(self.max_edge, self.max_edge, FilterType::Triangle)
        } else {
            img
        };
        let variance = laplacian_variance(&to_gray(&img));
        Ok(variance / (variance + self.saturation))
    }
}

#[async_trait]
impl QualityBackend for SharpnessBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn lower_better(&self) -> bool {
        false
    }

    async fn score(&self, path: &Path) -> Result<f64, ImageError> {
        let this = self.clone();
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || this.score_blocking(&owned))
            .await
            .map_err(|e| ImageError::ScoringFailed {
                path: path.to_path_buf(),
                detail: format!("scoring task panicked: {e}"),
            })?
    }
}

// ── CommandBackend ───────────────────────────────────────────────────────

/// Arguments passed to the scorer program when none are configured.
pub const DEFAULT_SCORER_ARGS: &[&str] =
    &["--metric", "{metric}", "--device", "{device}", "{image}"];

/// Scores images by running an external program once per image.
///
/// The program must print the score as the last number on stdout, e.g. a
/// small `pyiqa` wrapper:
///
/// ```text
/// score_image.py --metric maniqa-koniq --device cuda /scans/001.jpg
/// 0.4127
/// ```
#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: PathBuf,
    args: Vec<String>,
    metric: String,
    device: Device,
    lower_better: bool,
    // Bounded again by the scorer's own timeout; this one kills the child.
    timeout: Duration,
}

impl CommandBackend {
    /// `lower_better` overrides the catalogue; it is required for metrics
    /// the catalogue does not know.
    pub fn new(
        program: impl Into<PathBuf>,
        metric: impl Into<String>,
        device: Device,
        lower_better: Option<bool>,
    ) -> Result<Self, PipelineError> {
        let metric = metric.into();
        let lower_better = lower_better
            .or_else(|| metric_lower_better(&metric))
            .ok_or_else(|| {
                PipelineError::InvalidConfig(format!(
                    "Unknown metric '{metric}': pass --lower-better or --higher-better"
                ))
            })?;
        Ok(Self {
            program: program.into(),
            args: DEFAULT_SCORER_ARGS.iter().map(|s| s.to_string()).collect(),
            metric,
            device,
            lower_better,
            timeout: Duration::from_secs(300),
        })
    }

    /// Replace the argument template. `{metric}`, `{device}` and `{image}`
    /// are substituted per call.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl QualityBackend for CommandBackend {
    fn name(&self) -> &str {
        &self.metric
    }

    fn lower_better(&self) -> bool {
        self.lower_better
    }

    async fn score(&self, path: &Path) -> Result<f64, ImageError> {
        let image = path.to_string_lossy();
        let device = self.device.to_string();
        let args = external::expand_args(
            &self.args,
            &[
                ("metric", self.metric.as_str()),
                ("device", device.as_str()),
                ("image", &*image),
            ],
        );

        let stdout = external::run(&self.program, &args, self.timeout)
            .await
            .map_err(|failure| match failure {
                ExternalFailure::Timeout => ImageError::Timeout {
                    path: path.to_path_buf(),
                    operation: format!("{} scoring", self.metric),
                    secs: self.timeout.as_secs(),
                },
                other => ImageError::ScoringFailed {
                    path: path.to_path_buf(),
                    detail: other.to_string(),
                },
            })?;

        parse_score(&stdout).ok_or_else(|| ImageError::ScoringFailed {
            path: path.to_path_buf(),
            detail: format!("no score in scorer output: {:?}", stdout.trim()),
        })
    }
}

/// Last whitespace-separated token on stdout that parses as a number.
fn parse_score(stdout: &str) -> Option<f64> {
    stdout
        .split_whitespace()
        .rev()
        .map(|tok| tok.trim_matches(|c: char| c == '[' || c == ']' || c == ',' || c == '(' || c == ')'))
        .find_map(|tok| tok.parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use tempfile::TempDir;

    #[test]
    fn catalogue_polarity() {
        assert_eq!(metric_lower_better("maniqa-koniq"), Some(false));
        assert_eq!(metric_lower_better("NIQE"), Some(true));
        assert_eq!(metric_lower_better("brisque"), Some(true));
        assert_eq!(metric_lower_better("made-up"), None);
    }

    #[test]
    fn device_parsing() {
        assert_eq!("CUDA".parse::<Device>().unwrap(), Device::Cuda);
        assert_eq!("mps".parse::<Device>().unwrap(), Device::Mps);
        assert!("tpu".parse::<Device>().is_err());
        assert_eq!(Device::default().to_string(), "auto");
    }

    #[test]
    fn parses_last_number() {
        assert_eq!(parse_score("0.4127\n"), Some(0.4127));
        assert_eq!(parse_score("loading model...\nscore: 3.5\n"), Some(3.5));
        assert_eq!(parse_score("tensor([[0.61]])"), None);
        assert_eq!(parse_score("[0.61]"), Some(0.61));
        assert_eq!(parse_score("nothing here"), None);
    }

    #[test]
    fn unknown_metric_needs_polarity() {
        assert!(CommandBackend::new("score", "mystery", Device::Cpu, None).is_err());
        let b = CommandBackend::new("score", "mystery", Device::Cpu, Some(true)).unwrap();
        assert!(b.lower_better());
    }

    #[test]
    fn override_beats_catalogue() {
        let b = CommandBackend::new("score", "niqe", Device::Cpu, Some(false)).unwrap();
        assert!(!b.lower_better());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_backend_reads_stdout() {
        let b = CommandBackend::new("sh", "maniqa-koniq", Device::Cpu, None)
            .unwrap()
            .with_args(vec!["-c".into(), "echo scoring {image}; echo 0.5".into()]);
        assert_eq!(b.score(Path::new("/x/a.jpg")).await.unwrap(), 0.5);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_backend_failure_is_scoring_error() {
        let b = CommandBackend::new("sh", "niqe", Device::Cpu, None)
            .unwrap()
            .with_args(vec!["-c".into(), "exit 1".into()]);
        let err = b.score(Path::new("a.jpg")).await.unwrap_err();
        assert!(matches!(err, ImageError::ScoringFailed { .. }));
    }

    #[tokio::test]
    async fn sharpness_prefers_sharp_pages() {
        let dir = TempDir::new().unwrap();
        let sharp = dir.path().join("sharp.png");
        let flat = dir.path().join("flat.png");
        GrayImage::from_fn(128, 128, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                Luma([0])
            } else {
                Luma([255])
            }
        })
        .save(&sharp)
        .unwrap();
        GrayImage::from_pixel(128, 128, Luma([128])).save(&flat).unwrap();

        let backend = SharpnessBackend::default();
        let s = backend.score(&sharp).await.unwrap();
        let f = backend.score(&flat).await.unwrap();
        assert!(s > f, "sharp {s} <= flat {f}");
        assert!((0.0..1.0).contains(&s));
        assert_eq!(f, 0.0);
    }

    #[test]
    fn sharpness_parameters_are_clamped() {
        let backend = SharpnessBackend::new(-3.0, 2);
        assert!(backend.saturation > 0.0);
        assert_eq!(backend.max_edge, 16);
        let default = SharpnessBackend::default();
        assert_eq!((default.saturation, default.max_edge), (500.0, 1024));
    }

    #[tokio::test]
    async fn sharpness_unreadable_file() {
        let dir = TempDir::new().unwrap();
        let bogus = dir.path().join("bogus.jpg");
        std::fs::write(&bogus, b"not an image").unwrap();
        let err = SharpnessBackend::default().score(&bogus).await.unwrap_err();
        assert!(matches!(err, ImageError::Unreadable { .. }));
    }
}
