//! Persistent score store: one JSON line per scored image.
//!
//! ## Format
//!
//! Each score is appended as a single line and `sync_data` runs before the
//! next image is scored, so a crash loses at most the in-flight image. Overwrites are
//! appends too; on read, the last line for a path wins.
//!
//! A crash in the middle of an append can leave a torn, unterminated final
//! line. That line is skipped with a warning. Unparsable lines anywhere else
//! are fatal.
//!
//! The store for a run always starts empty: [`ScoreStore::reset`] deletes
//! whatever a previous run left at the same location.

use crate::error::PipelineError;
use crate::scoring::Score;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default file name, created next to the source tree.
pub const DEFAULT_STORE_FILE: &str = "image_scores.jsonl";

/// One persisted score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub path: PathBuf,
    pub score: Score,
    /// Why the image is unscored, when it is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Durable `path → score` map backed by a JSON Lines file.
#[derive(Debug)]
pub struct ScoreStore {
    location: PathBuf,
    file: File,
}

impl ScoreStore {
    /// Delete any store at `location` and open a fresh, empty one.
    pub fn reset(location: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let location = location.as_ref();
        match fs::remove_file(location) {
            Ok(()) => debug!("Removed score store from previous run: {}", location.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(PipelineError::StoreWrite {
                    path: location.to_path_buf(),
                    source,
                })
            }
        }
        Self::open(location)
    }

    /// Open the store at `location`, creating it if missing. Existing
    /// entries are kept.
    pub fn open(location: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let location = location.as_ref().to_path_buf();
        if let Some(parent) = location.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| PipelineError::StoreWrite {
                path: location.clone(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&location)
            .map_err(|source| PipelineError::StoreWrite {
                path: location.clone(),
                source,
            })?;
        Ok(Self { location, file })
    }

    /// Where the store lives on disk.
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Write the score for `path`, flushed to disk before returning.
    pub fn put(&mut self, path: &Path, score: Score) -> Result<(), PipelineError> {
        self.put_with_reason(path, score, None)
    }

    /// Like [`put`](Self::put), recording why an image is unscored.
    pub fn put_with_reason(
        &mut self,
        path: &Path,
        score: Score,
        reason: Option<&str>,
    ) -> Result<(), PipelineError> {
        let entry = ScoreEntry {
            path: path.to_path_buf(),
            score,
            reason: reason.map(str::to_string),
        };
        let mut line = serde_json::to_vec(&entry).map_err(|e| PipelineError::StoreWrite {
            path: self.location.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        line.push(b'\n');

        // One write per entry keeps a torn write confined to the last line.
        self.file
            .write_all(&line)
            .and_then(|_| self.file.sync_data())
            .map_err(|source| PipelineError::StoreWrite {
                path: self.location.clone(),
                source,
            })
    }

    /// All persisted entries, latest write per path, in first-written order.
    pub fn iterate(&self) -> Result<Vec<ScoreEntry>, PipelineError> {
        read_entries(&self.location)
    }

    /// Number of distinct paths in the store.
    pub fn len(&self) -> Result<usize, PipelineError> {
        Ok(self.iterate()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, PipelineError> {
        Ok(self.len()? == 0)
    }
}

/// Read a store file without opening it for writing.
pub fn read_entries(location: &Path) -> Result<Vec<ScoreEntry>, PipelineError> {
    let content = match fs::read_to_string(location) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(PipelineError::StoreRead {
                path: location.to_path_buf(),
                source,
            })
        }
    };

    let terminated = content.ends_with('\n');
    let lines: Vec<&str> = content.lines().collect();
    let last = lines.len().saturating_sub(1);

    let mut entries: Vec<ScoreEntry> = Vec::new();
    let mut index: HashMap<PathBuf, usize> = HashMap::new();

    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: ScoreEntry = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(e) if i == last && !terminated => {
                warn!(
                    "Skipping torn final line in score store {}: {}",
                    location.display(),
                    e
                );
                continue;
            }
            Err(e) => {
                return Err(PipelineError::StoreCorrupt {
                    path: location.to_path_buf(),
                    line: i + 1,
                    detail: e.to_string(),
                })
            }
        };

        match index.get(&entry.path) {
            Some(&slot) => entries[slot] = entry,
            None => {
                index.insert(entry.path.clone(), entries.len());
                entries.push(entry);
            }
        }
    }
    Ok(entries)
}
