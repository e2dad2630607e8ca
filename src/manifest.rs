//! Hand-off manifest between stage 1 (`prepare`) and stage 2 (`binarize`).
//!
//! The model runs in a separate process, often inside a different Python
//! environment, so nothing in memory survives between the stages. The
//! manifest is the only channel: a versioned JSON record listing, in order,
//! every image prepared for the model.
//!
//! ```json
//! { "schema": "scanroute.manifest/v1", "paths": ["/upload/a/001.jpg", "..."] }
//! ```

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Schema tag written into, and required from, every manifest.
pub const MANIFEST_SCHEMA: &str = "scanroute.manifest/v1";

/// Ordered list of images routed to the model treatment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentManifest {
    pub schema: String,
    pub paths: Vec<PathBuf>,
}

impl TreatmentManifest {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            schema: MANIFEST_SCHEMA.to_string(),
            paths,
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Write atomically: a reader never sees a half-written manifest.
    pub fn write(&self, location: &Path) -> Result<(), PipelineError> {
        let err = |detail: String| PipelineError::ManifestWrite {
            path: location.to_path_buf(),
            detail,
        };

        let parent = match location.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| err(e.to_string()))?;

        let json = serde_json::to_vec_pretty(self).map_err(|e| err(e.to_string()))?;
        let mut tmp = NamedTempFile::new_in(&parent).map_err(|e| err(e.to_string()))?;
        tmp.write_all(&json).map_err(|e| err(e.to_string()))?;
        tmp.as_file().sync_all().map_err(|e| err(e.to_string()))?;
        tmp.persist(location).map_err(|e| err(e.error.to_string()))?;

        debug!(
            "Wrote manifest with {} path(s) to {}",
            self.paths.len(),
            location.display()
        );
        Ok(())
    }

    /// Read and validate a manifest written by [`write`](Self::write).
    pub fn read(location: &Path) -> Result<Self, PipelineError> {
        let bytes = fs::read(location).map_err(|e| PipelineError::ManifestRead {
            path: location.to_path_buf(),
            detail: e.to_string(),
        })?;
        let manifest: TreatmentManifest =
            serde_json::from_slice(&bytes).map_err(|e| PipelineError::ManifestRead {
                path: location.to_path_buf(),
                detail: e.to_string(),
            })?;
        if manifest.schema != MANIFEST_SCHEMA {
            return Err(PipelineError::ManifestSchema {
                path: location.to_path_buf(),
                found: manifest.schema,
                expected: MANIFEST_SCHEMA,
            });
        }
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn preserves_order_exactly() {
        let dir = TempDir::new().unwrap();
        let location = dir.path().join("m.json");
        let paths = vec![
            PathBuf::from("/u/z.jpg"),
            PathBuf::from("/u/a b/ü.jpg"),
            PathBuf::from("/u/a.jpg"),
        ];
        TreatmentManifest::new(paths.clone()).write(&location).unwrap();
        let back = TreatmentManifest::read(&location).unwrap();
        assert_eq!(back.paths, paths);
        assert_eq!(back.schema, MANIFEST_SCHEMA);
    }

    #[test]
    fn empty_manifest() {
        let dir = TempDir::new().unwrap();
        let location = dir.path().join("m.json");
        TreatmentManifest::new(Vec::new()).write(&location).unwrap();
        assert!(TreatmentManifest::read(&location).unwrap().is_empty());
    }

    #[test]
    fn overwrite_replaces_previous() {
        let dir = TempDir::new().unwrap();
        let location = dir.path().join("m.json");
        TreatmentManifest::new(vec![PathBuf::from("old.jpg")])
            .write(&location)
            .unwrap();
        TreatmentManifest::new(vec![PathBuf::from("new.jpg")])
            .write(&location)
            .unwrap();
        let back = TreatmentManifest::read(&location).unwrap();
        assert_eq!(back.paths, vec![PathBuf::from("new.jpg")]);
    }

    #[test]
    fn unknown_schema_is_rejected() {
        let dir = TempDir::new().unwrap();
        let location = dir.path().join("m.json");
        fs::write(&location, r#"{"schema":"scanroute.manifest/v9","paths":[]}"#).unwrap();
        let err = TreatmentManifest::read(&location).unwrap_err();
        assert!(matches!(err, PipelineError::ManifestSchema { .. }));
    }

    #[test]
    fn missing_manifest_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = TreatmentManifest::read(&dir.path().join("none.json")).unwrap_err();
        assert!(matches!(err, PipelineError::ManifestRead { .. }));
    }

    #[test]
    fn bare_list_is_rejected() {
        let dir = TempDir::new().unwrap();
        let location = dir.path().join("m.json");
        fs::write(&location, r#"["a.jpg","b.jpg"]"#).unwrap();
        assert!(matches!(
            TreatmentManifest::read(&location).unwrap_err(),
            PipelineError::ManifestRead { .. }
        ));
    }
}
