//! Model-based treatment, split across two processes.
//!
//! ## Stage A (`prepare`, this process)
//!
//! ```text
//! read → gray → denoise → [stretch + CLAHE] → write back in place
//! ```
//!
//! ## Stage B (`binarize`, possibly another machine or environment)
//!
//! ```text
//! manifest → model inference → <stem>.png → delete input → deskew → compress
//! ```
//!
//! The binarization model only writes PNG or TIFF; PNG is the one the
//! upload target accepts, so stage B always produces `<stem>.png`. Every
//! image in stage B is isolated like stage A: one failed inference leaves
//! the input in place and the batch moves on.

use crate::error::{ImageError, PipelineError};
use crate::external::{self, ExternalFailure};
use crate::manifest::TreatmentManifest;
use crate::output::{BatchReport, Stage};
use crate::pipeline::compress::compress_under_ceiling;
use crate::pipeline::discover::is_raster_upload;
use crate::pipeline::{blocking, deskew_binary, run_batch, write_atomic, Processed};
use crate::progress::ProgressCallback;
use async_trait::async_trait;
use doc_filters::{denoise, encode, enhance_contrast, to_gray, OutputFormat};
use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

// ── Stage A ──────────────────────────────────────────────────────────────

/// Prepare one image for the model, in place.
pub fn prepare_image(path: &Path, contrast_enhance: bool) -> Result<(), ImageError> {
    let format = OutputFormat::from_path(path).ok_or_else(|| ImageError::UnsupportedFormat {
        path: path.to_path_buf(),
    })?;
    let img = image::open(path).map_err(|e| ImageError::unreadable(path, e))?;

    let mut gray = denoise(&to_gray(&img));
    if contrast_enhance {
        gray = enhance_contrast(&gray);
    }

    let bytes = encode(&DynamicImage::ImageLuma8(gray), format, 95).map_err(|e| {
        ImageError::EncodeFailed {
            path: path.to_path_buf(),
            detail: e.to_string(),
        }
    })?;
    write_atomic(path, &bytes)
}

/// Stage A over every path routed to the model.
pub async fn prepare_for_model(
    paths: &[PathBuf],
    contrast_enhance: bool,
    progress: Option<&ProgressCallback>,
) -> BatchReport {
    run_batch(Stage::ModelPrepare, paths, is_raster_upload, progress, |path| async move {
        let p = path.clone();
        blocking(&path, "model preparation", move || {
            prepare_image(&p, contrast_enhance)
        })
        .await?;
        Ok(Processed::default())
    })
    .await
}

// ── Binarizer backends ───────────────────────────────────────────────────

/// A neural binarization model.
#[async_trait]
pub trait ModelBinarizer: Send + Sync {
    fn name(&self) -> &str;

    /// Binarize `input`, writing the result to `output`.
    async fn binarize(&self, input: &Path, output: &Path) -> Result<(), ImageError>;
}

/// Arguments passed to the binarizer program when none are configured
/// (the `sbb_binarize` command line).
pub const DEFAULT_BINARIZER_ARGS: &[&str] = &["-m", "{model}", "{input}", "{output}"];

/// Runs an external binarization program once per image.
#[derive(Debug, Clone)]
pub struct CommandBinarizer {
    program: PathBuf,
    args: Vec<String>,
    model_dir: PathBuf,
    timeout: Duration,
}

impl CommandBinarizer {
    /// Fails if `model_dir` does not exist: no image could be binarized.
    pub fn new(
        program: impl Into<PathBuf>,
        model_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let model_dir = model_dir.into();
        if !model_dir.is_dir() {
            return Err(PipelineError::ModelDirMissing { path: model_dir });
        }
        Ok(Self {
            program: program.into(),
            args: DEFAULT_BINARIZER_ARGS.iter().map(|s| s.to_string()).collect(),
            model_dir,
            timeout,
        })
    }

    /// Replace the argument template. `{model}`, `{input}` and `{output}`
    /// are substituted per call.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

#[async_trait]
impl ModelBinarizer for CommandBinarizer {
    fn name(&self) -> &str {
        self.program
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("binarizer")
    }

    async fn binarize(&self, input: &Path, output: &Path) -> Result<(), ImageError> {
        let model = self.model_dir.to_string_lossy();
        let input_s = input.to_string_lossy();
        let output_s = output.to_string_lossy();
        let args = external::expand_args(
            &self.args,
            &[("model", &*model), ("input", &*input_s), ("output", &*output_s)],
        );

        external::run(&self.program, &args, self.timeout)
            .await
            .map_err(|failure| match failure {
                ExternalFailure::Timeout => ImageError::Timeout {
                    path: input.to_path_buf(),
                    operation: "model binarization".into(),
                    secs: self.timeout.as_secs(),
                },
                other => ImageError::BinarizeFailed {
                    path: input.to_path_buf(),
                    detail: other.to_string(),
                },
            })?;

        if !output.is_file() {
            return Err(ImageError::BinarizeFailed {
                path: input.to_path_buf(),
                detail: format!("model wrote no output at {}", output.display()),
            });
        }
        Ok(())
    }
}

// ── Stage B ──────────────────────────────────────────────────────────────

/// Where stage B writes the binarized version of `input`.
pub fn binarized_output_path(input: &Path) -> PathBuf {
    input.with_extension("png")
}

/// Stage B for one image. Returns the path of the finished file.
async fn finish_image(
    input: &Path,
    binarizer: &dyn ModelBinarizer,
    ceiling_bytes: u64,
) -> Result<Processed, ImageError> {
    let output = binarized_output_path(input);
    // A `.png` input would be overwritten mid-inference; infer to a sibling.
    let infer_to = if output == input {
        input.with_extension("binarized.png")
    } else {
        output.clone()
    };

    binarizer.binarize(input, &infer_to).await?;

    if infer_to != output {
        fs::rename(&infer_to, &output).map_err(|e| ImageError::io(&output, e))?;
    } else {
        fs::remove_file(input).map_err(|e| ImageError::io(input, e))?;
    }

    let target = output.clone();
    let compression = blocking(&output, "deskew", move || {
        let img = image::open(&target).map_err(|e| ImageError::unreadable(&target, e))?;
        let (straight, angle) = deskew_binary(&to_gray(&img));
        if angle != 0.0 {
            debug!("{}: deskewed by {:.1}°", target.display(), angle);
            let bytes = encode(&DynamicImage::ImageLuma8(straight), OutputFormat::Png, 0)
                .map_err(|e| ImageError::EncodeFailed {
                    path: target.clone(),
                    detail: e.to_string(),
                })?;
            write_atomic(&target, &bytes)?;
        }
        compress_under_ceiling(&target, ceiling_bytes)
    })
    .await?;

    Ok(Processed {
        output: Some(output),
        compression: Some(compression),
    })
}

/// Stage B over every path in the manifest.
///
/// An empty manifest returns an empty report without touching the
/// binarizer.
pub async fn finish_model(
    manifest: &TreatmentManifest,
    binarizer: Arc<dyn ModelBinarizer>,
    ceiling_bytes: u64,
    progress: Option<&ProgressCallback>,
) -> BatchReport {
    if manifest.is_empty() {
        info!("{}: manifest is empty, nothing to binarize", Stage::ModelFinish);
        return BatchReport::empty(Stage::ModelFinish);
    }

    run_batch(
        Stage::ModelFinish,
        &manifest.paths,
        is_raster_upload,
        progress,
        |path| {
            let binarizer = Arc::clone(&binarizer);
            async move { finish_image(&path, binarizer.as_ref(), ceiling_bytes).await }
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Writes a thresholded copy of the input; fails on names containing "fail".
    #[derive(Default)]
    struct ThresholdBinarizer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelBinarizer for ThresholdBinarizer {
        fn name(&self) -> &str {
            "threshold"
        }

        async fn binarize(&self, input: &Path, output: &Path) -> Result<(), ImageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if input.to_string_lossy().contains("fail") {
                return Err(ImageError::BinarizeFailed {
                    path: input.to_path_buf(),
                    detail: "model crashed".into(),
                });
            }
            let mut gray = image::open(input).unwrap().to_luma8();
            for p in gray.pixels_mut() {
                p.0[0] = if p.0[0] < 128 { 0 } else { 255 };
            }
            gray.save(output).unwrap();
            Ok(())
        }
    }

    fn page(path: &Path) {
        RgbImage::from_fn(96, 96, |_, y| {
            if y % 10 < 2 {
                Rgb([20, 20, 20])
            } else {
                Rgb([230, 220, 200])
            }
        })
        .save(path)
        .unwrap();
    }

    #[test]
    fn prepare_makes_gray_in_place() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.jpg");
        page(&path);
        prepare_image(&path, true).unwrap();
        assert!(matches!(image::open(&path).unwrap(), DynamicImage::ImageLuma8(_)));
    }

    #[tokio::test]
    async fn prepare_empty_is_ok() {
        let report = prepare_for_model(&[], false, None).await;
        assert!(report.results.is_empty());
    }

    #[test]
    fn output_path_is_png_sibling() {
        assert_eq!(
            binarized_output_path(Path::new("/u/box/001.jpg")),
            PathBuf::from("/u/box/001.png")
        );
    }

    #[tokio::test]
    async fn empty_manifest_never_calls_binarizer() {
        let binarizer = Arc::new(ThresholdBinarizer::default());
        let report = finish_model(
            &TreatmentManifest::new(Vec::new()),
            binarizer.clone(),
            u64::MAX,
            None,
        )
        .await;
        assert!(report.results.is_empty());
        assert_eq!(binarizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn finish_replaces_input_and_isolates_failures() {
        let dir = TempDir::new().unwrap();
        let ok = dir.path().join("001.jpg");
        let failing = dir.path().join("fail_002.jpg");
        let also_ok = dir.path().join("003.png");
        page(&ok);
        page(&failing);
        GrayImage::from_pixel(64, 64, Luma([240])).save(&also_ok).unwrap();

        let binarizer = Arc::new(ThresholdBinarizer::default());
        let manifest = TreatmentManifest::new(vec![ok.clone(), failing.clone(), also_ok.clone()]);
        let report = finish_model(&manifest, binarizer.clone(), u64::MAX, None).await;

        assert_eq!(binarizer.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);

        assert!(!ok.exists());
        assert!(dir.path().join("001.png").exists());
        assert!(failing.exists(), "failed input must be left in place");
        assert!(also_ok.exists());
        assert!(!dir.path().join("003.binarized.png").exists());
        assert_eq!(
            report.results[0].output.as_deref(),
            Some(dir.path().join("001.png").as_path())
        );
    }

    #[test]
    fn missing_model_dir_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = CommandBinarizer::new("sbb_binarize", dir.path().join("nope"), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, PipelineError::ModelDirMissing { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_binarizer_requires_output() {
        let dir = TempDir::new().unwrap();
        let b = CommandBinarizer::new("sh", dir.path(), Duration::from_secs(5))
            .unwrap()
            .with_args(vec!["-c".into(), "true".into()]);
        let err = b
            .binarize(&dir.path().join("in.jpg"), &dir.path().join("in.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::BinarizeFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_binarizer_substitutes_paths() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.jpg");
        let output = dir.path().join("in.png");
        fs::write(&input, b"x").unwrap();
        let b = CommandBinarizer::new("sh", dir.path(), Duration::from_secs(5))
            .unwrap()
            .with_args(vec!["-c".into(), "cp \"$0\" \"$1\"".into(), "{input}".into(), "{output}".into()]);
        b.binarize(&input, &output).await.unwrap();
        assert_eq!(fs::read(&output).unwrap(), b"x");
    }
}
