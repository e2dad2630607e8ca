//! # scanroute
//!
//! Quality-adaptive binarization of scanned document pages before OCR/HTR
//! upload.
//!
//! ## Why route by quality?
//!
//! Neural binarization models do very well on legible scans and badly on
//! dark, blurred microfiche. Classic Sauvola thresholding is the reverse:
//! predictable everywhere, never brilliant. This crate scores every page with
//! a no-reference quality metric and sends each one to the treatment that
//! suits it.
//!
//! ## Pipeline Overview
//!
//! ```text
//! source tree
//!  │
//!  ├─ 1. Normalize  convert to upload format into a mirrored tree (.jpg)
//!  ├─ 2. Score      one persisted score per image (crash-safe JSONL store)
//!  ├─ 3. Classify   threshold + metric polarity → good / bad
//!  ├─ 4. Route      good → model, bad → Sauvola (configurable)
//!  ├─ 5a. Sauvola   binarize, deskew, compress under the size ceiling
//!  └─ 5b. Model     gray + denoise, manifest ──▶ stage 2: infer, deskew, compress
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scanroute::{prepare, PipelineConfig, SharpnessBackend};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .source_dir("scans")
//!         .dest_dir("upload")
//!         .build()?;
//!     let output = prepare(&config, Arc::new(SharpnessBackend::default())).await?;
//!     eprintln!(
//!         "{} image(s) binarized, {} waiting for the model",
//!         output.algorithmic.succeeded(),
//!         output.model_prepare.results.len()
//!     );
//!     Ok(())
//! }
//! ```
//!
//! Stage 2 runs wherever the model is installed:
//!
//! ```rust,no_run
//! use scanroute::{binarize, CommandBinarizer, PipelineConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), scanroute::PipelineError> {
//! let config = PipelineConfig::default();
//! let model = CommandBinarizer::new("sbb_binarize", "models/2020_01_16", Duration::from_secs(900))?;
//! let output = binarize(&config, Arc::new(model)).await?;
//! # Ok(()) }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `scanroute` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! scanroute = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod classify;
pub mod config;
pub mod error;
mod external;
pub mod manifest;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod run;
pub mod scoring;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use classify::{QualityClass, QualityThreshold, Treatment, TreatmentPolicy};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use doc_filters::SauvolaParams;
pub use error::{ImageError, PipelineError};
pub use manifest::{TreatmentManifest, MANIFEST_SCHEMA};
pub use output::{BatchReport, BinarizeOutput, ImageResult, PrepareOutput, Stage};
pub use pipeline::compress::{compress_under_ceiling, CompressionOutcome};
pub use pipeline::model::{CommandBinarizer, ModelBinarizer};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use run::{binarize, binarize_sync, prepare, prepare_sync};
pub use scoring::{
    CommandBackend, Device, QualityBackend, QualityScorer, Score, ScoringReport, SharpnessBackend,
};
pub use store::{ScoreEntry, ScoreStore};
