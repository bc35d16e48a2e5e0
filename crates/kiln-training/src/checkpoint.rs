//! Checkpoint persistence for one logical run.

use crate::error::{TrainError, TrainResult};
use crate::history::TrainingHistory;
use crate::layout::{collision_free, RunLayout};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Record of one rolling-checkpoint write. Superseded checkpoint files are
/// overwritten in place, so only the newest record maps to bytes on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub val_loss: f64,
}

/// Maps a logical run to its filesystem location and owns all snapshot
/// writes. Saves are atomic: bytes land in a temp file in the target
/// directory first, then rename into place, so a crash mid-save can never
/// leave a checkpoint that `exists` but cannot be read back.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    layout: RunLayout,
    extension: String,
}

impl CheckpointStore {
    #[must_use]
    pub fn new(root: PathBuf, extension: &str) -> Self {
        Self { layout: RunLayout::new(root), extension: extension.to_string() }
    }

    #[must_use]
    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    #[must_use]
    pub fn checkpoint_path(&self) -> PathBuf {
        self.layout.checkpoint_path(&self.extension)
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.checkpoint_path().is_file()
    }

    pub fn ensure_dirs(&self) -> TrainResult<()> {
        self.layout.ensure_dirs()
    }

    /// Raw snapshot bytes from the rolling checkpoint. Deserialization into a
    /// model is the engine's job; a missing file is reported as corrupt
    /// because callers gate on [`exists`](Self::exists) first.
    pub fn load(&self) -> TrainResult<Vec<u8>> {
        let path = self.checkpoint_path();
        std::fs::read(&path).map_err(|e| TrainError::CorruptCheckpoint {
            path,
            reason: e.to_string(),
        })
    }

    /// Overwrite the rolling checkpoint with a new best snapshot.
    pub fn save_checkpoint(&self, bytes: &[u8], val_loss: f64) -> TrainResult<CheckpointRecord> {
        let path = self.checkpoint_path();
        self.write_atomic(&path, bytes)?;
        Ok(CheckpointRecord { path, timestamp: Utc::now(), val_loss })
    }

    /// Write the final artifact under a fresh timestamped name derived from
    /// the session start time. Never overwrites the rolling checkpoint.
    pub fn save_final(&self, bytes: &[u8], started_at: DateTime<Utc>) -> TrainResult<PathBuf> {
        let path = collision_free(self.layout.final_model_path(started_at, &self.extension));
        self.write_atomic(&path, bytes)?;
        Ok(path)
    }

    pub fn save_history(
        &self,
        history: &TrainingHistory,
        started_at: DateTime<Utc>,
    ) -> TrainResult<PathBuf> {
        let path = collision_free(self.layout.history_path(started_at));
        let json = serde_json::to_vec_pretty(history)?;
        self.write_atomic(&path, &json)?;
        Ok(path)
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> TrainResult<()> {
        let storage_err = |source: std::io::Error| TrainError::StorageWrite {
            path: path.to_path_buf(),
            source,
        };
        let dir = path.parent().ok_or_else(|| TrainError::StorageWrite {
            path: path.to_path_buf(),
            source: std::io::Error::other("path has no parent directory"),
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(storage_err)?;
        std::io::Write::write_all(&mut tmp, bytes).map_err(storage_err)?;
        tmp.persist(path).map_err(|e| storage_err(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_then_load_round_trips_bytes() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path().to_path_buf(), "json");
        store.ensure_dirs().unwrap();

        assert!(!store.exists());
        let record = store.save_checkpoint(b"{\"weights\":[1,2,3]}", 0.42).unwrap();
        assert!(store.exists());
        assert_eq!(record.path, store.checkpoint_path());
        assert_eq!(record.val_loss, 0.42);
        assert_eq!(store.load().unwrap(), b"{\"weights\":[1,2,3]}");
    }

    #[test]
    fn test_rolling_checkpoint_is_overwritten_in_place() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path().to_path_buf(), "json");
        store.ensure_dirs().unwrap();

        let first = store.save_checkpoint(b"one", 0.9).unwrap();
        let second = store.save_checkpoint(b"two", 0.5).unwrap();
        assert_eq!(first.path, second.path);
        assert_eq!(store.load().unwrap(), b"two");
    }

    #[test]
    fn test_final_artifact_gets_distinct_timestamped_path() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path().to_path_buf(), "json");
        store.ensure_dirs().unwrap();

        store.save_checkpoint(b"rolling", 0.5).unwrap();
        let started_at = Utc::now();
        let final_path = store.save_final(b"final", started_at).unwrap();

        assert_ne!(final_path, store.checkpoint_path());
        assert!(final_path.to_string_lossy().ends_with("_model.json"));
        // Rolling checkpoint untouched by the final save.
        assert_eq!(store.load().unwrap(), b"rolling");

        // A second session starting in the same second still gets a fresh path.
        let other = store.save_final(b"final-2", started_at).unwrap();
        assert_ne!(other, final_path);
    }

    #[test]
    fn test_save_into_missing_directory_is_storage_write_error() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path().join("gone"), "json");
        // ensure_dirs deliberately not called
        let err = store.save_checkpoint(b"x", 0.1);
        assert!(matches!(err, Err(TrainError::StorageWrite { .. })));
    }
}
