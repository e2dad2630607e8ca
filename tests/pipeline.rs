//! End-to-end tests for both stages of a run.
//!
//! Scoring and binarization use in-process stubs so the tests need neither
//! a quality model nor the SBB binarizer on the machine.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use scanroute::store::read_entries;
use scanroute::{
    binarize, compress_under_ceiling, prepare, ImageError, ModelBinarizer, PipelineConfig,
    QualityBackend, Score, Treatment, TreatmentManifest,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// `RUST_LOG=scanroute=debug` shows the pipeline's own logs.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Scores keyed on the file stem; `c` always fails.
struct StemScores;

#[async_trait]
impl QualityBackend for StemScores {
    fn name(&self) -> &str {
        "stem-scores"
    }

    fn lower_better(&self) -> bool {
        false
    }

    async fn score(&self, path: &Path) -> Result<f64, ImageError> {
        match path.file_stem().and_then(|s| s.to_str()) {
            Some("a") => Ok(0.50),
            Some("b") => Ok(0.20),
            _ => Err(ImageError::ScoringFailed {
                path: path.to_path_buf(),
                detail: "backend exploded".into(),
            }),
        }
    }
}

/// Thresholds the input at mid-gray and counts calls.
#[derive(Default)]
struct CountingBinarizer {
    calls: AtomicUsize,
}

#[async_trait]
impl ModelBinarizer for CountingBinarizer {
    fn name(&self) -> &str {
        "counting"
    }

    async fn binarize(&self, input: &Path, output: &Path) -> Result<(), ImageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut gray = image::open(input)
            .map_err(|e| ImageError::BinarizeFailed {
                path: input.to_path_buf(),
                detail: e.to_string(),
            })?
            .to_luma8();
        for p in gray.pixels_mut() {
            p.0[0] = if p.0[0] < 128 { 0 } else { 255 };
        }
        gray.save(output).map_err(|e| ImageError::BinarizeFailed {
            path: input.to_path_buf(),
            detail: e.to_string(),
        })
    }
}

fn write_page(path: &Path) {
    RgbImage::from_fn(300, 200, |x, y| {
        if (30..270).contains(&x) && y % 16 < 4 {
            Rgb([30, 30, 30])
        } else {
            Rgb([225, 215, 190])
        }
    })
    .save(path)
    .unwrap();
}

fn write_noise(path: &Path, width: u32, height: u32) {
    let mut state = 0x2545_f491_4f6c_dd1du64;
    let img = RgbImage::from_fn(width, height, |_, _| {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let b = state.to_le_bytes();
        Rgb([b[0], b[1], b[2]])
    });
    img.save(path).unwrap();
}

struct Workspace {
    _dir: TempDir,
    source: PathBuf,
    dest: PathBuf,
    manifest: PathBuf,
}

fn workspace(pages: &[&str]) -> Workspace {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("scans");
    let dest = dir.path().join("upload");
    fs::create_dir_all(&source).unwrap();
    for name in pages {
        write_page(&source.join(name));
    }
    let manifest = dir.path().join("manifest.json");
    Workspace {
        _dir: dir,
        source,
        dest,
        manifest,
    }
}

fn config(ws: &Workspace) -> PipelineConfig {
    PipelineConfig::builder()
        .source_dir(&ws.source)
        .dest_dir(&ws.dest)
        .manifest_path(&ws.manifest)
        .threshold(0.335)
        .build()
        .unwrap()
}

// ── Stage 1 + stage 2 ────────────────────────────────────────────────────────

#[tokio::test]
async fn routes_by_score_and_binarizes_good_images_with_the_model() {
    init_tracing();
    let ws = workspace(&["a.png", "b.png", "c.png"]);
    let config = config(&ws);

    let output = prepare(&config, Arc::new(StemScores)).await.unwrap();
    let dest = fs::canonicalize(&ws.dest).unwrap();
    let (a, b, c) = (dest.join("a.jpg"), dest.join("b.jpg"), dest.join("c.jpg"));

    assert_eq!(output.normalize.succeeded(), 3);
    assert!(!output.lower_better);
    assert_eq!(output.routes.get(&a), Some(&Treatment::ModelBased));
    assert_eq!(output.routes.get(&b), Some(&Treatment::Algorithmic));
    assert_eq!(output.routes.get(&c), Some(&Treatment::Algorithmic));
    assert_eq!(output.scoring.scored(), 2);
    assert_eq!(output.scoring.failed(), 1);

    // The failed image is persisted as unscored, with the reason.
    let entries = read_entries(&config.score_store_path()).unwrap();
    assert_eq!(entries.len(), 3);
    let c_entry = entries.iter().find(|e| e.path == c).unwrap();
    assert_eq!(c_entry.score, Score::Unscored);
    assert!(c_entry.reason.as_deref().unwrap().contains("backend exploded"));

    // Sauvola output is binary and stays in place.
    assert_eq!(output.algorithmic.succeeded(), 2);
    let binarized = image::open(&b).unwrap().to_luma8();
    let extreme = binarized
        .pixels()
        .filter(|p| p.0[0] < 64 || p.0[0] > 191)
        .count();
    assert!(extreme * 10 >= binarized.pixels().count() * 9);

    // Only the good image is handed to stage 2, already gray.
    let manifest = TreatmentManifest::read(&ws.manifest).unwrap();
    assert_eq!(manifest.paths, vec![a.clone()]);
    assert_eq!(output.model_prepare.succeeded(), 1);
    assert!(image::open(&a).unwrap().as_luma8().is_some());

    let model = Arc::new(CountingBinarizer::default());
    let finished = binarize(&config, model.clone()).await.unwrap();
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    assert_eq!(finished.report.succeeded(), 1);
    assert!(!a.exists());
    assert!(dest.join("a.png").exists());

    // Originals are never touched.
    for name in ["a.png", "b.png", "c.png"] {
        assert!(ws.source.join(name).exists());
    }
}

#[tokio::test]
async fn filtered_out_images_are_routed_as_bad() {
    let ws = workspace(&["a.png", "b.png"]);
    let config = PipelineConfig::builder()
        .source_dir(&ws.source)
        .dest_dir(&ws.dest)
        .manifest_path(&ws.manifest)
        .name_filter("^b")
        .build()
        .unwrap();

    let output = prepare(&config, Arc::new(StemScores)).await.unwrap();
    let dest = fs::canonicalize(&ws.dest).unwrap();

    assert_eq!(output.scoring.filtered, vec![dest.join("a.jpg")]);
    assert_eq!(
        output.routes.get(&dest.join("a.jpg")),
        Some(&Treatment::Algorithmic)
    );
    assert!(TreatmentManifest::read(&ws.manifest).unwrap().is_empty());
}

#[tokio::test]
async fn lower_better_override_flips_routing() {
    let ws = workspace(&["a.png", "b.png"]);
    let config = PipelineConfig::builder()
        .source_dir(&ws.source)
        .dest_dir(&ws.dest)
        .manifest_path(&ws.manifest)
        .lower_better(true)
        .build()
        .unwrap();

    let output = prepare(&config, Arc::new(StemScores)).await.unwrap();
    let dest = fs::canonicalize(&ws.dest).unwrap();

    assert!(output.lower_better);
    assert_eq!(
        output.routes.get(&dest.join("a.jpg")),
        Some(&Treatment::Algorithmic)
    );
    assert_eq!(
        output.routes.get(&dest.join("b.jpg")),
        Some(&Treatment::ModelBased)
    );
}

#[tokio::test]
async fn empty_source_writes_empty_manifest_and_never_calls_the_model() {
    init_tracing();
    let ws = workspace(&[]);
    let config = config(&ws);

    let output = prepare(&config, Arc::new(StemScores)).await.unwrap();
    assert!(output.routes.is_empty());
    assert!(output.normalize.results.is_empty());
    assert!(TreatmentManifest::read(&ws.manifest).unwrap().is_empty());

    let model = Arc::new(CountingBinarizer::default());
    let finished = binarize(&config, model.clone()).await.unwrap();
    assert!(finished.report.results.is_empty());
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_source_is_fatal() {
    let ws = workspace(&[]);
    let config = PipelineConfig::builder()
        .source_dir(ws.source.join("nope"))
        .dest_dir(&ws.dest)
        .manifest_path(&ws.manifest)
        .build()
        .unwrap();
    let err = prepare(&config, Arc::new(StemScores)).await.unwrap_err();
    assert!(matches!(err, scanroute::PipelineError::SourceNotFound { .. }));
    assert!(!ws.manifest.exists());
}

#[tokio::test]
async fn binarize_without_manifest_is_fatal() {
    let ws = workspace(&[]);
    let config = config(&ws);
    let err = binarize(&config, Arc::new(CountingBinarizer::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, scanroute::PipelineError::ManifestRead { .. }));
}

// ── Compression ──────────────────────────────────────────────────────────────

#[test]
fn compressor_fits_noise_slightly_over_the_ceiling() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("noise.png");
    write_noise(&path, 600, 400);
    let original = fs::metadata(&path).unwrap().len();
    let ceiling = (original as f64 / 1.2) as u64;

    let outcome = compress_under_ceiling(&path, ceiling).unwrap();
    assert!(outcome.met_ceiling);
    assert!(outcome.iterations < 20);
    assert!(fs::metadata(&path).unwrap().len() <= ceiling);

    let (w, h) = image::image_dimensions(&path).unwrap();
    assert!(w <= 600 && h <= 400);
    assert!(w.min(h) >= 256);
}
