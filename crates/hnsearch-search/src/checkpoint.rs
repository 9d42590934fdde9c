//! Ingestion checkpoint
//!
//! Small JSON file recording how far the pipeline got through the current
//! batch of incremental inputs. The on-disk id arrays are the source of
//! truth for which items are embedded; the checkpoint's row offset and
//! file markers only let a resume skip re-scanning rows it has already
//! consumed. A missing or unreadable checkpoint therefore costs time, not
//! correctness.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::vectors::{tmp_path, write_atomic};

/// Progress within the current incremental batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Checkpoint {
    /// Items embedded so far in this batch
    pub total_processed: u64,
    /// Row to resume from within `current_file`
    pub row_offset: u64,
    /// File the row offset refers to (first unfinished file)
    pub current_file: Option<String>,
    /// Files fully consumed and durably embedded
    pub completed_files: Vec<String>,
}

impl Checkpoint {
    /// Load the checkpoint, treating a missing or unreadable file as a
    /// fresh start (legacy formats carry extra fields and fail the strict
    /// parse on purpose).
    pub fn load(path: &Path) -> Self {
        let Ok(bytes) = std::fs::read(path) else {
            return Self::default();
        };
        match serde_json::from_slice(&bytes) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!("Ignoring unreadable checkpoint {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Persist atomically (temp file, then rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec(self)?;
        write_atomic(path, |w| {
            use std::io::Write;
            w.write_all(&json)
        })
    }

    /// Remove the checkpoint and any stale temporary.
    pub fn clear(path: &Path) -> Result<()> {
        for p in [path.to_path_buf(), tmp_path(path)] {
            if p.exists() {
                std::fs::remove_file(&p)?;
            }
        }
        Ok(())
    }

    /// Whether a file was already fully consumed in this batch.
    pub fn is_completed(&self, file_name: &str) -> bool {
        self.completed_files.iter().any(|f| f == file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_is_default() {
        let dir = TempDir::new().unwrap();
        let checkpoint = Checkpoint::load(&dir.path().join("incremental_checkpoint.json"));
        assert_eq!(checkpoint, Checkpoint::default());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("incremental_checkpoint.json");
        let checkpoint = Checkpoint {
            total_processed: 1234,
            row_offset: 56,
            current_file: Some("incremental_20240102_000000.parquet".to_string()),
            completed_files: vec!["incremental_20240101_000000.parquet".to_string()],
        };
        checkpoint.save(&path).unwrap();
        assert_eq!(Checkpoint::load(&path), checkpoint);
    }

    #[test]
    fn test_legacy_checkpoint_with_extra_fields_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("incremental_checkpoint.json");
        std::fs::write(
            &path,
            r#"{"total_processed": 10, "row_offset": 5, "processed_ids": [1, 2, 3]}"#,
        )
        .unwrap();
        assert_eq!(Checkpoint::load(&path), Checkpoint::default());
    }

    #[test]
    fn test_clear_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("incremental_checkpoint.json");
        Checkpoint::default().save(&path).unwrap();
        Checkpoint::clear(&path).unwrap();
        assert!(!path.exists());
        // Clearing again is a no-op
        Checkpoint::clear(&path).unwrap();
    }
}
