//! Configuration types for a routing run.
//!
//! All run behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Both stages read the same struct: stage 1
//! ([`crate::run::prepare`]) uses the directories, scoring and Sauvola knobs;
//! stage 2 ([`crate::run::binarize`]) only needs the manifest location, the
//! size ceiling and the model timeout.

use crate::classify::{Treatment, TreatmentPolicy};
use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use crate::store::DEFAULT_STORE_FILE;
use doc_filters::SauvolaParams;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Default hand-off manifest, relative to the working directory.
pub const DEFAULT_MANIFEST_FILE: &str = "model_manifest.json";

/// Default good/bad boundary, tuned for `maniqa-koniq` on microfiche scans.
pub const DEFAULT_THRESHOLD: f64 = 0.335;

/// Transkribus upload limit.
pub const DEFAULT_SIZE_CEILING_BYTES: u64 = 10 * 1024 * 1024;

/// Configuration for a routing run.
///
/// # Example
/// ```rust
/// use scanroute::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .source_dir("scans")
///     .dest_dir("upload")
///     .sauvola_k(0.2)
///     .name_filter("^page_")
///     .build()
///     .unwrap();
/// assert_eq!(config.sauvola.window_size, 11);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Tree of original scans. Required for stage 1.
    pub source_dir: PathBuf,

    /// Tree the normalized, treated images are written to. Mirrors
    /// `source_dir`. Required for stage 1.
    pub dest_dir: PathBuf,

    /// Score store location. `None` → `<source_dir>/image_scores.jsonl`.
    pub score_store_path: Option<PathBuf>,

    /// Hand-off file between stage 1 and stage 2.
    pub manifest_path: PathBuf,

    /// Sauvola `k` and window for the algorithmic treatment.
    pub sauvola: SauvolaParams,

    /// Apply min-max normalisation + CLAHE before binarizing. Default: false.
    pub contrast_enhance: bool,

    /// Only score files whose name matches. The rest stay unscored and are
    /// routed as "bad".
    pub name_filter: Option<Regex>,

    /// Good/bad boundary, inclusive on the good side.
    pub threshold: f64,

    /// Force the metric polarity. `None` uses what the backend reports.
    pub lower_better_override: Option<bool>,

    /// Treatment per quality class.
    pub treatment_policy: TreatmentPolicy,

    /// Upload size limit enforced by the compressor. Default: 10 MiB.
    pub size_ceiling_bytes: u64,

    /// Longest edge allowed by the upload service. Default: 10 000 px.
    pub max_upload_pixels: u32,

    /// Per-image time limit for the quality backend. Default: 300 s.
    pub score_timeout_secs: u64,

    /// Per-image time limit for the binarization model. Default: 900 s.
    pub model_timeout_secs: u64,

    /// Optional per-image progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::new(),
            dest_dir: PathBuf::new(),
            score_store_path: None,
            manifest_path: PathBuf::from(DEFAULT_MANIFEST_FILE),
            sauvola: SauvolaParams::default(),
            contrast_enhance: false,
            name_filter: None,
            threshold: DEFAULT_THRESHOLD,
            lower_better_override: None,
            treatment_policy: TreatmentPolicy::default(),
            size_ceiling_bytes: DEFAULT_SIZE_CEILING_BYTES,
            max_upload_pixels: 10_000,
            score_timeout_secs: 300,
            model_timeout_secs: 900,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("source_dir", &self.source_dir)
            .field("dest_dir", &self.dest_dir)
            .field("score_store_path", &self.score_store_path())
            .field("manifest_path", &self.manifest_path)
            .field("sauvola", &self.sauvola)
            .field("contrast_enhance", &self.contrast_enhance)
            .field("name_filter", &self.name_filter.as_ref().map(Regex::as_str))
            .field("threshold", &self.threshold)
            .field("lower_better_override", &self.lower_better_override)
            .field("treatment_policy", &self.treatment_policy)
            .field("size_ceiling_bytes", &self.size_ceiling_bytes)
            .field("max_upload_pixels", &self.max_upload_pixels)
            .field("score_timeout_secs", &self.score_timeout_secs)
            .field("model_timeout_secs", &self.model_timeout_secs)
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

impl PipelineConfig {
    /// Create a builder with default values.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: PipelineConfig::default(),
            name_filter: None,
        }
    }

    /// Effective score store location.
    pub fn score_store_path(&self) -> PathBuf {
        self.score_store_path
            .clone()
            .unwrap_or_else(|| self.source_dir.join(DEFAULT_STORE_FILE))
    }

    pub fn score_timeout(&self) -> Duration {
        Duration::from_secs(self.score_timeout_secs)
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
    // Compiled in `build()` so a bad pattern is reported as a config error.
    name_filter: Option<String>,
}

impl PipelineConfigBuilder {
    pub fn source_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.source_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn dest_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.dest_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn score_store_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config.score_store_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn manifest_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config.manifest_path = path.as_ref().to_path_buf();
        self
    }

    pub fn sauvola_k(mut self, k: f64) -> Self {
        self.config.sauvola.k = k;
        self
    }

    pub fn sauvola_window_size(mut self, size: u32) -> Self {
        self.config.sauvola.window_size = size;
        self
    }

    pub fn contrast_enhance(mut self, v: bool) -> Self {
        self.config.contrast_enhance = v;
        self
    }

    pub fn name_filter(mut self, pattern: impl Into<String>) -> Self {
        self.name_filter = Some(pattern.into());
        self
    }

    pub fn threshold(mut self, t: f64) -> Self {
        self.config.threshold = t;
        self
    }

    pub fn lower_better(mut self, v: bool) -> Self {
        self.config.lower_better_override = Some(v);
        self
    }

    pub fn treatment_policy(mut self, policy: TreatmentPolicy) -> Self {
        self.config.treatment_policy = policy;
        self
    }

    pub fn good_treatment(mut self, t: Treatment) -> Self {
        self.config.treatment_policy.good = t;
        self
    }

    pub fn bad_treatment(mut self, t: Treatment) -> Self {
        self.config.treatment_policy.bad = t;
        self
    }

    pub fn size_ceiling_bytes(mut self, bytes: u64) -> Self {
        self.config.size_ceiling_bytes = bytes;
        self
    }

    pub fn max_upload_pixels(mut self, px: u32) -> Self {
        self.config.max_upload_pixels = px;
        self
    }

    pub fn score_timeout_secs(mut self, secs: u64) -> Self {
        self.config.score_timeout_secs = secs;
        self
    }

    pub fn model_timeout_secs(mut self, secs: u64) -> Self {
        self.config.model_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(mut self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.sauvola.window_size < 3 {
            return Err(PipelineError::InvalidConfig(format!(
                "Sauvola window size must be >= 3, got {}",
                c.sauvola.window_size
            )));
        }
        if c.sauvola.window_size % 2 == 0 {
            warn!(
                "Sauvola window size {} is even; the window is centred as if it were {}",
                c.sauvola.window_size,
                c.sauvola.window_size + 1
            );
        }
        if !c.sauvola.k.is_finite() {
            return Err(PipelineError::InvalidConfig(format!(
                "Sauvola k must be finite, got {}",
                c.sauvola.k
            )));
        }
        if !c.threshold.is_finite() {
            return Err(PipelineError::InvalidConfig(format!(
                "Quality threshold must be finite, got {}",
                c.threshold
            )));
        }
        if c.size_ceiling_bytes == 0 {
            return Err(PipelineError::InvalidConfig(
                "Size ceiling must be > 0 bytes".into(),
            ));
        }
        if c.max_upload_pixels < 256 {
            return Err(PipelineError::InvalidConfig(format!(
                "Max upload edge must be >= 256 px, got {}",
                c.max_upload_pixels
            )));
        }
        if c.score_timeout_secs == 0 || c.model_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "Timeouts must be >= 1 second".into(),
            ));
        }

        if let Some(pattern) = self.name_filter.take() {
            let re = Regex::new(&pattern).map_err(|e| PipelineError::InvalidFilter {
                pattern: pattern.clone(),
                detail: e.to_string(),
            })?;
            self.config.name_filter = Some(re);
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.sauvola.k, 0.24);
        assert_eq!(c.sauvola.window_size, 11);
        assert_eq!(c.threshold, 0.335);
        assert_eq!(c.size_ceiling_bytes, 10 * 1024 * 1024);
        assert_eq!(c.treatment_policy.good, Treatment::ModelBased);
        assert_eq!(c.treatment_policy.bad, Treatment::Algorithmic);
        assert!(!c.contrast_enhance);
        assert!(c.name_filter.is_none());
    }

    #[test]
    fn store_defaults_next_to_source() {
        let c = PipelineConfig::builder().source_dir("/scans").build().unwrap();
        assert_eq!(
            c.score_store_path(),
            PathBuf::from("/scans").join(DEFAULT_STORE_FILE)
        );
        let c = PipelineConfig::builder()
            .source_dir("/scans")
            .score_store_path("/tmp/s.jsonl")
            .build()
            .unwrap();
        assert_eq!(c.score_store_path(), PathBuf::from("/tmp/s.jsonl"));
    }

    #[test]
    fn rejects_tiny_window() {
        let err = PipelineConfig::builder()
            .sauvola_window_size(1)
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn accepts_even_window() {
        let c = PipelineConfig::builder()
            .sauvola_window_size(12)
            .build()
            .unwrap();
        assert_eq!(c.sauvola.window_size, 12);
    }

    #[test]
    fn rejects_non_finite_threshold() {
        assert!(PipelineConfig::builder()
            .threshold(f64::NAN)
            .build()
            .is_err());
    }

    #[test]
    fn rejects_zero_ceiling() {
        assert!(PipelineConfig::builder()
            .size_ceiling_bytes(0)
            .build()
            .is_err());
    }

    #[test]
    fn compiles_name_filter() {
        let c = PipelineConfig::builder()
            .name_filter(r"^page_\d+")
            .build()
            .unwrap();
        let re = c.name_filter.unwrap();
        assert!(re.is_match("page_001.jpg"));
        assert!(!re.is_match("cover.jpg"));
    }

    #[test]
    fn bad_name_filter_is_reported() {
        let err = PipelineConfig::builder()
            .name_filter("page_(")
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidFilter { .. }));
    }

    #[test]
    fn debug_hides_callback() {
        let c = PipelineConfig::default();
        let s = format!("{c:?}");
        assert!(s.contains("progress_callback: false"));
    }
}
