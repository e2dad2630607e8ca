//! Progress-callback trait for per-image pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as each stage works through its images: how many there are, which
//! file is current, and whether it succeeded.
//!
//! # Example
//!
//! ```rust
//! use scanroute::{PipelineConfig, PipelineProgressCallback, Stage};
//! use std::path::Path;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl PipelineProgressCallback for Counter {
//!     fn on_image_complete(&self, stage: Stage, index: usize, total: usize, path: &Path) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{stage}: {}/{} {}", index + 1, total, path.display());
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::ImageError;
use crate::output::Stage;
use std::path::Path;
use std::sync::Arc;

/// Called by the pipeline stages as they process each image.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `index` is 0-based.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once before a stage touches its first image.
    fn on_stage_start(&self, stage: Stage, total: usize) {
        let _ = (stage, total);
    }

    /// Called just before an image is processed.
    fn on_image_start(&self, stage: Stage, index: usize, total: usize, path: &Path) {
        let _ = (stage, index, total, path);
    }

    /// Called when an image is processed successfully.
    fn on_image_complete(&self, stage: Stage, index: usize, total: usize, path: &Path) {
        let _ = (stage, index, total, path);
    }

    /// Called when an image fails; the stage moves on to the next one.
    fn on_image_error(&self, stage: Stage, index: usize, total: usize, error: &ImageError) {
        let _ = (stage, index, total, error);
    }

    /// Called once after every image in the stage has been attempted.
    fn on_stage_complete(&self, stage: Stage, total: usize, success_count: usize) {
        let _ = (stage, total, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        stage_total: AtomicUsize,
        stage_success: AtomicUsize,
    }

    impl PipelineProgressCallback for TrackingCallback {
        fn on_stage_start(&self, _stage: Stage, total: usize) {
            self.stage_total.store(total, Ordering::SeqCst);
        }

        fn on_image_start(&self, _stage: Stage, _index: usize, _total: usize, _path: &Path) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_image_complete(&self, _stage: Stage, _index: usize, _total: usize, _path: &Path) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_image_error(&self, _stage: Stage, _index: usize, _total: usize, _error: &ImageError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stage_complete(&self, _stage: Stage, _total: usize, success_count: usize) {
            self.stage_success.store(success_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        let path = PathBuf::from("a.jpg");
        cb.on_stage_start(Stage::Score, 2);
        cb.on_image_start(Stage::Score, 0, 2, &path);
        cb.on_image_complete(Stage::Score, 0, 2, &path);
        cb.on_image_error(
            Stage::Score,
            1,
            2,
            &ImageError::UnsupportedFormat { path: path.clone() },
        );
        cb.on_stage_complete(Stage::Score, 2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        let path = PathBuf::from("scan.jpg");

        tracker.on_stage_start(Stage::Algorithmic, 3);
        assert_eq!(tracker.stage_total.load(Ordering::SeqCst), 3);

        for i in 0..3 {
            tracker.on_image_start(Stage::Algorithmic, i, 3, &path);
        }
        tracker.on_image_complete(Stage::Algorithmic, 0, 3, &path);
        tracker.on_image_complete(Stage::Algorithmic, 1, 3, &path);
        tracker.on_image_error(
            Stage::Algorithmic,
            2,
            3,
            &ImageError::io(&path, "disk full"),
        );
        tracker.on_stage_complete(Stage::Algorithmic, 3, 2);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.stage_success.load(Ordering::SeqCst), 2);
    }
}
