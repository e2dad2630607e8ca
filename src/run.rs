//! Top-level entry points for the two stages of a run.
//!
//! ```text
//! prepare  (stage 1)                                   binarize (stage 2)
//! ───────────────────────────────────────────────      ─────────────────────
//! discover → normalize → score → classify → route       read manifest
//!   ├─ algorithmic: Sauvola, deskew, compress            model inference
//!   └─ model A: gray, denoise ─▶ manifest ─────────────▶ deskew, compress
//! ```
//!
//! Only fatal conditions are returned as `Err`; per-image failures are in the
//! reports of [`PrepareOutput`] and [`BinarizeOutput`].

use crate::classify::{classify, partition, route, QualityThreshold};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::manifest::TreatmentManifest;
use crate::output::{BinarizeOutput, PrepareOutput};
use crate::pipeline::algorithmic::run_algorithmic;
use crate::pipeline::discover::{discover_images, is_raster_upload, mirror_paths};
use crate::pipeline::model::{finish_model, prepare_for_model, ModelBinarizer};
use crate::pipeline::normalize::{normalize_all, UploadRequirements};
use crate::scoring::{QualityBackend, QualityScorer, Score, ScorerOptions};
use crate::store::{ScoreEntry, ScoreStore};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Stage 1: normalize, score, route and treat every image under
/// `config.source_dir`, then write the hand-off manifest.
pub async fn prepare(
    config: &PipelineConfig,
    backend: Arc<dyn QualityBackend>,
) -> Result<PrepareOutput, PipelineError> {
    let total_start = Instant::now();
    let progress = config.progress_callback.as_ref();

    // ── Step 1: Resolve directories ──────────────────────────────────────
    if !config.source_dir.is_dir() {
        return Err(PipelineError::SourceNotFound {
            path: config.source_dir.clone(),
        });
    }
    let source = fs::canonicalize(&config.source_dir).map_err(|e| PipelineError::Discovery {
        path: config.source_dir.clone(),
        detail: e.to_string(),
    })?;
    fs::create_dir_all(&config.dest_dir).map_err(|source| PipelineError::OutputDir {
        path: config.dest_dir.clone(),
        source,
    })?;
    let dest = fs::canonicalize(&config.dest_dir).map_err(|source| PipelineError::OutputDir {
        path: config.dest_dir.clone(),
        source,
    })?;
    info!("Preparing {} → {}", source.display(), dest.display());

    // ── Step 2: Discover and normalize ───────────────────────────────────
    let originals = discover_images(&source, &[dest.as_path()])?;
    info!("Found {} image(s)", originals.len());
    let pairs = mirror_paths(&source, &dest, &originals);
    let reqs = UploadRequirements {
        max_edge: config.max_upload_pixels,
        size_ceiling_bytes: config.size_ceiling_bytes,
    };
    let normalize = normalize_all(&pairs, reqs, progress).await;
    let normalized: Vec<PathBuf> = normalize
        .results
        .iter()
        .filter(|r| r.is_ok())
        .map(|r| r.final_path().clone())
        .collect();

    // ── Step 3: Score ────────────────────────────────────────────────────
    let mut store = ScoreStore::reset(config.score_store_path())?;
    let scorer = QualityScorer::new(
        backend,
        ScorerOptions {
            timeout: config.score_timeout(),
        },
    );
    let scoring = scorer
        .score_all(&normalized, &mut store, config.name_filter.as_ref(), progress)
        .await?;

    // ── Step 4: Classify and route ───────────────────────────────────────
    let lower_better = config
        .lower_better_override
        .unwrap_or_else(|| scorer.backend().lower_better());
    let threshold = QualityThreshold {
        threshold: config.threshold,
        lower_better,
    };

    let mut entries = store.iterate()?;
    info!(
        "{} score(s) persisted to {} ({} unscored)",
        entries.len(),
        store.location().display(),
        entries.iter().filter(|e| !e.score.is_scored()).count()
    );
    let stored: HashSet<PathBuf> = entries.iter().map(|e| e.path.clone()).collect();
    for path in &normalized {
        if !stored.contains(path) {
            debug!("{} has no score, treating as unscored", path.display());
            entries.push(ScoreEntry {
                path: path.clone(),
                score: Score::Unscored,
                reason: None,
            });
        }
    }

    let routes = route(&classify(&entries, &threshold), &config.treatment_policy);
    let split = partition(&routes);
    info!(
        "Routing: {} algorithmic, {} model-based (threshold {}, {} is better)",
        split.algorithmic.len(),
        split.model.len(),
        threshold.threshold,
        if lower_better { "lower" } else { "higher" }
    );

    // ── Step 5: Treat ────────────────────────────────────────────────────
    let algorithmic = run_algorithmic(
        &split.algorithmic,
        config.sauvola,
        config.contrast_enhance,
        config.size_ceiling_bytes,
        progress,
    )
    .await;

    let model_prepare = prepare_for_model(&split.model, config.contrast_enhance, progress).await;

    // ── Step 6: Hand off ─────────────────────────────────────────────────
    let manifest = TreatmentManifest::new(
        split
            .model
            .iter()
            .filter(|p| is_raster_upload(p))
            .cloned()
            .collect(),
    );
    manifest.write(&config.manifest_path)?;
    info!(
        "Wrote {} path(s) for model binarization to {}",
        manifest.len(),
        config.manifest_path.display()
    );

    Ok(PrepareOutput {
        normalize,
        scoring,
        lower_better,
        threshold: config.threshold,
        routes,
        algorithmic,
        model_prepare,
        manifest_path: config.manifest_path.clone(),
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    })
}

/// Stage 2: binarize every image listed in `config.manifest_path` with the
/// model, then deskew and compress.
pub async fn binarize(
    config: &PipelineConfig,
    binarizer: Arc<dyn ModelBinarizer>,
) -> Result<BinarizeOutput, PipelineError> {
    let total_start = Instant::now();
    let manifest = TreatmentManifest::read(&config.manifest_path)?;
    info!(
        "Read {} path(s) from {}",
        manifest.len(),
        config.manifest_path.display()
    );

    let report = finish_model(
        &manifest,
        binarizer,
        config.size_ceiling_bytes,
        config.progress_callback.as_ref(),
    )
    .await;

    Ok(BinarizeOutput {
        report,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    })
}

/// Blocking wrapper for [`prepare`]. Creates its own tokio runtime.
pub fn prepare_sync(
    config: &PipelineConfig,
    backend: Arc<dyn QualityBackend>,
) -> Result<PrepareOutput, PipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(prepare(config, backend))
}

/// Blocking wrapper for [`binarize`]. Creates its own tokio runtime.
pub fn binarize_sync(
    config: &PipelineConfig,
    binarizer: Arc<dyn ModelBinarizer>,
) -> Result<BinarizeOutput, PipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(binarize(config, binarizer))
}
