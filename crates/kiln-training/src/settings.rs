use crate::error::{TrainError, TrainResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Deployment-level tunables for dataset handling, separate from the
/// per-session [`TrainingRequest`](crate::request::TrainingRequest).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub batch_size: usize,
    /// Expected sample dimensions (width, height); forwarded to the engine
    /// as part of the architecture input shape.
    pub image_size: [u32; 2],
    pub channels: u32,
    pub seed: u64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self { batch_size: 32, image_size: [256, 256], channels: 3, seed: 123 }
    }
}

impl TrainingSettings {
    pub fn from_toml_file(path: &Path) -> TrainResult<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| TrainError::Configuration(format!("bad settings file {}: {e}", path.display())))
    }

    #[must_use]
    pub fn input_shape(&self) -> [u32; 3] {
        [self.image_size[0], self.image_size[1], self.channels]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_usable() {
        let settings = TrainingSettings::default();
        assert!(settings.batch_size > 0);
        assert_eq!(settings.input_shape(), [256, 256, 3]);
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let settings: TrainingSettings = toml::from_str("batch_size = 8").unwrap();
        assert_eq!(settings.batch_size, 8);
        assert_eq!(settings.seed, TrainingSettings::default().seed);
    }
}
