//! Image discovery and source → destination path mirroring.

use crate::error::PipelineError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extensions treated as images when walking the source tree.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "tiff", "tif", "bmp", "gif", "webp", "ico", "svg",
];

/// Extensions accepted by the upload target.
pub const UPLOAD_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "pdf"];

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// `true` for files with an image extension; hidden files never count.
pub fn is_image_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'));
    !hidden && extension_of(path).is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
}

/// `true` for files the upload target accepts.
pub fn is_upload_format(path: &Path) -> bool {
    extension_of(path).is_some_and(|e| UPLOAD_EXTENSIONS.contains(&e.as_str()))
}

/// Accepted upload formats that the treatments can rewrite (everything but PDF).
pub fn is_raster_upload(path: &Path) -> bool {
    is_upload_format(path) && extension_of(path).as_deref() != Some("pdf")
}

/// All images under `root`, in file-name order within each directory.
///
/// Anything under one of `exclude` is ignored, so a destination tree nested
/// inside the source tree is not picked up again.
pub fn discover_images(root: &Path, exclude: &[&Path]) -> Result<Vec<PathBuf>, PipelineError> {
    if !root.is_dir() {
        return Err(PipelineError::SourceNotFound {
            path: root.to_path_buf(),
        });
    }

    let mut images = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !exclude.iter().any(|ex| entry.path() == *ex));

    for entry in walker {
        let entry = entry.map_err(|e| PipelineError::Discovery {
            path: e
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| root.to_path_buf()),
            detail: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if is_image_file(entry.path()) {
            images.push(entry.into_path());
        } else {
            debug!("Ignoring non-image file {}", entry.path().display());
        }
    }
    Ok(images)
}

/// Map each source image to its `.jpg` location under `dest_root`,
/// preserving the relative directory structure.
///
/// Two sources that would land on the same file (`scan.png` and `scan.tif`)
/// are disambiguated by keeping the original extension in the stem
/// (`scan_tif.jpg`).
pub fn mirror_paths(src_root: &Path, dest_root: &Path, sources: &[PathBuf]) -> Vec<(PathBuf, PathBuf)> {
    let mut claimed: HashSet<PathBuf> = HashSet::new();
    let mut pairs = Vec::with_capacity(sources.len());

    for src in sources {
        let rel = src.strip_prefix(src_root).unwrap_or(src.as_path());
        let mut dest = dest_root.join(rel).with_extension("jpg");
        if claimed.contains(&dest) {
            let stem = rel
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let ext = extension_of(src).unwrap_or_default();
            let renamed = dest.with_file_name(format!("{stem}_{ext}.jpg"));
            warn!(
                "{} and another image both map to {}; writing {}",
                src.display(),
                dest.display(),
                renamed.display()
            );
            dest = renamed;
        }
        claimed.insert(dest.clone());
        pairs.push((src.clone(), dest));
    }
    pairs
}
