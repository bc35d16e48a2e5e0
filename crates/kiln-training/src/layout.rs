use crate::error::TrainResult;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Filesystem layout for one run root.
///
/// The rolling checkpoint lives at `<root>/model/checkpoint.<ext>` and is
/// overwritten in place; final artifacts and history files are timestamped
/// and written once per session.
#[derive(Debug, Clone)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn model_dir(&self) -> PathBuf {
        self.root.join("model")
    }

    #[must_use]
    pub fn history_dir(&self) -> PathBuf {
        self.root.join("history")
    }

    #[must_use]
    pub fn checkpoint_path(&self, extension: &str) -> PathBuf {
        self.model_dir().join(format!("checkpoint.{extension}"))
    }

    #[must_use]
    pub fn final_model_path(&self, started_at: DateTime<Utc>, extension: &str) -> PathBuf {
        self.model_dir()
            .join(format!("{}_model.{extension}", started_at.format("%Y%m%d_%H%M%S")))
    }

    #[must_use]
    pub fn history_path(&self, started_at: DateTime<Utc>) -> PathBuf {
        self.history_dir()
            .join(format!("{}_history.json", started_at.format("%Y%m%d_%H%M%S")))
    }

    pub fn ensure_dirs(&self) -> TrainResult<()> {
        std::fs::create_dir_all(self.model_dir())?;
        std::fs::create_dir_all(self.history_dir())?;
        Ok(())
    }
}

/// Sidestep a name collision by appending `-N` before the extension. Only
/// relevant when two sessions start against the same root within one second.
#[must_use]
pub fn collision_free(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }
    let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    let ext = path.extension().map(|s| s.to_string_lossy().to_string());
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
    for n in 1.. {
        let name = match &ext {
            Some(ext) => format!("{stem}-{n}.{ext}"),
            None => format!("{stem}-{n}"),
        };
        let candidate = parent.join(name);
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!()
}
