//! Directory-backed labeled datasets and the dataset profiler.
//!
//! A dataset root contains one subdirectory per class label; every regular
//! file below a class directory is one example. The handle holds an immutable
//! sample index, so profiling and repeated epoch iteration never consume it.

use crate::error::{TrainError, TrainResult};
use crate::settings::TrainingSettings;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Class label of "good" slides in the default deployment layout.
pub const GOOD_CLASS: &str = "G";
/// Class label of "no-good" slides.
pub const NO_GOOD_CLASS: &str = "NG";

/// One example: a file path plus the index of its class in
/// [`LabeledDataset::classes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledSample {
    pub path: PathBuf,
    pub class: usize,
}

#[derive(Debug, Clone)]
pub struct LabeledDataset {
    root: PathBuf,
    classes: Vec<String>,
    samples: Vec<LabeledSample>,
    batch_size: usize,
    seed: u64,
    shuffle: bool,
}

impl LabeledDataset {
    /// Index a dataset directory. Labels are inferred from the subdirectory
    /// names, sorted for a stable class order. File contents are not read
    /// here; decoding is the engine's concern.
    pub fn open_dir(root: &Path, settings: &TrainingSettings, shuffle: bool) -> TrainResult<Self> {
        if !root.is_dir() {
            return Err(TrainError::Dataset(format!(
                "dataset directory does not exist: {}",
                root.display()
            )));
        }

        let mut classes = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            classes.push(name);
        }
        classes.sort();
        if classes.is_empty() {
            return Err(TrainError::Dataset(format!(
                "no class subdirectories under {}",
                root.display()
            )));
        }

        let mut samples = Vec::new();
        for (class, name) in classes.iter().enumerate() {
            let class_dir = root.join(name);
            let mut paths = Vec::new();
            for entry in std::fs::read_dir(&class_dir)? {
                let entry = entry?;
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                paths.push(path);
            }
            paths.sort();
            samples.extend(paths.into_iter().map(|path| LabeledSample { path, class }));
        }
        if samples.is_empty() {
            return Err(TrainError::Dataset(format!("no examples under {}", root.display())));
        }

        Ok(Self {
            root: root.to_path_buf(),
            classes,
            samples,
            batch_size: settings.batch_size.max(1),
            seed: settings.seed,
            shuffle,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Batches for one epoch, in a deterministic order derived from the
    /// dataset seed and the epoch index. Iteration borrows the index, so the
    /// dataset stays reusable across epochs and across profiling.
    pub fn epoch_batches(&self, epoch: u32) -> impl Iterator<Item = Vec<&LabeledSample>> {
        let mut order: Vec<usize> = (0..self.samples.len()).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(u64::from(epoch)));
            order.shuffle(&mut rng);
        }

        let batch_size = self.batch_size;
        let batches: Vec<Vec<&LabeledSample>> = order
            .chunks(batch_size)
            .map(|chunk| chunk.iter().map(|&i| &self.samples[i]).collect())
            .collect();
        batches.into_iter()
    }
}

/// Exact per-class counts for one split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetStats {
    pub per_class: BTreeMap<String, u64>,
    pub total: u64,
}

impl DatasetStats {
    #[must_use]
    pub fn count_for(&self, class: &str) -> u64 {
        self.per_class.get(class).copied().unwrap_or(0)
    }
}

/// Count examples per class. Reads only the in-memory index; the dataset
/// remains fully iterable afterwards and repeated calls return identical
/// counts.
#[must_use]
pub fn profile(dataset: &LabeledDataset) -> DatasetStats {
    let mut per_class: BTreeMap<String, u64> =
        dataset.classes().iter().map(|c| (c.clone(), 0)).collect();
    for sample in &dataset.samples {
        if let Some(count) = per_class.get_mut(&dataset.classes[sample.class]) {
            *count += 1;
        }
    }
    let total = dataset.samples.len() as u64;
    DatasetStats { per_class, total }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_split(root: &Path, good: usize, no_good: usize) {
        std::fs::create_dir_all(root.join(GOOD_CLASS)).unwrap();
        std::fs::create_dir_all(root.join(NO_GOOD_CLASS)).unwrap();
        for i in 0..good {
            std::fs::write(root.join(GOOD_CLASS).join(format!("g{i}.bin")), vec![i as u8; 64])
                .unwrap();
        }
        for i in 0..no_good {
            std::fs::write(
                root.join(NO_GOOD_CLASS).join(format!("ng{i}.bin")),
                vec![255 - i as u8; 64],
            )
            .unwrap();
        }
    }

    #[test]
    fn test_profile_counts_are_exact_and_sum_to_total() {
        let temp = TempDir::new().unwrap();
        write_split(temp.path(), 5, 3);

        let ds = LabeledDataset::open_dir(temp.path(), &TrainingSettings::default(), true).unwrap();
        let stats = profile(&ds);

        assert_eq!(stats.count_for(GOOD_CLASS), 5);
        assert_eq!(stats.count_for(NO_GOOD_CLASS), 3);
        assert_eq!(stats.per_class.values().sum::<u64>(), stats.total);
        assert_eq!(stats.total, 8);
    }

    #[test]
    fn test_profile_is_idempotent_and_non_destructive() {
        let temp = TempDir::new().unwrap();
        write_split(temp.path(), 4, 2);

        let ds = LabeledDataset::open_dir(temp.path(), &TrainingSettings::default(), true).unwrap();
        let first = profile(&ds);
        let second = profile(&ds);
        assert_eq!(first, second);

        // The dataset is still iterable in full after profiling.
        let seen: usize = ds.epoch_batches(1).map(|b| b.len()).sum();
        assert_eq!(seen, ds.len());
    }

    #[test]
    fn test_epoch_batches_are_deterministic_per_epoch() {
        let temp = TempDir::new().unwrap();
        write_split(temp.path(), 6, 6);

        let settings = TrainingSettings { batch_size: 4, ..Default::default() };
        let ds = LabeledDataset::open_dir(temp.path(), &settings, true).unwrap();

        let order = |epoch| {
            ds.epoch_batches(epoch)
                .flatten()
                .map(|s| s.path.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(order(1), order(1));
        assert_ne!(order(1), order(2));
    }

    #[test]
    fn test_validation_split_iterates_in_stable_order() {
        let temp = TempDir::new().unwrap();
        write_split(temp.path(), 3, 3);

        let ds = LabeledDataset::open_dir(temp.path(), &TrainingSettings::default(), false).unwrap();
        let a: Vec<_> = ds.epoch_batches(1).flatten().map(|s| s.path.clone()).collect();
        let b: Vec<_> = ds.epoch_batches(2).flatten().map(|s| s.path.clone()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_open_dir_rejects_empty_root() {
        let temp = TempDir::new().unwrap();
        let err = LabeledDataset::open_dir(temp.path(), &TrainingSettings::default(), true);
        assert!(matches!(err, Err(TrainError::Dataset(_))));
    }
}
