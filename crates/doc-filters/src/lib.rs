//! # doc-filters
//!
//! Pixel-level filters for scanned document pages, the building blocks that
//! `scanroute` composes into its two binarization treatments.
//!
//! ```text
//! DynamicImage
//!  │
//!  ├─ tone     grayscale, min-max stretch, CLAHE
//!  ├─ denoise  non-local means (h 10, 7×7 patch, 21×21 search)
//!  ├─ sauvola  adaptive threshold (integral images, O(1) per pixel)
//!  ├─ deskew   projection-profile skew search + rotation
//!  └─ encode   JPEG/PNG bytes at a quality level
//! ```
//!
//! Every filter is a pure function from an image to a new image; nothing here
//! touches the file system.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use doc_filters::{deskew, sauvola, to_gray, SauvolaParams};
//!
//! let page = image::open("page.jpg").unwrap();
//! let gray = to_gray(&page);
//! let (straight, _angle) = deskew(&gray);
//! let binary = sauvola(&straight, &SauvolaParams::default()).unwrap();
//! binary.save("page.png").unwrap();
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod denoise;
pub mod deskew;
pub mod encode;
pub mod sauvola;
pub mod sharpness;
pub mod tone;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use denoise::{denoise, nl_means};
pub use deskew::{deskew, estimate_skew, rotate};
pub use encode::{encode, OutputFormat};
pub use sauvola::{sauvola, SauvolaParams};
pub use sharpness::laplacian_variance;
pub use tone::{clahe, enhance_contrast, normalize_min_max, to_gray};

use thiserror::Error;

/// Errors returned by the filters in this crate.
#[derive(Debug, Error)]
pub enum FilterError {
    /// A filter parameter is outside its valid range.
    #[error("Invalid filter parameter: {0}")]
    InvalidParameter(String),

    /// The image codec rejected the image.
    #[error("Image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}
