use crate::error::{TrainError, TrainResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Gradient optimizer selection. The request carries the raw name so an
/// unrecognized optimizer is rejected up front, before any dataset or model
/// work happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Optimizer {
    Adam,
    Sgd,
}

impl FromStr for Optimizer {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "adam" => Ok(Self::Adam),
            "sgd" => Ok(Self::Sgd),
            other => Err(TrainError::UnsupportedOptimizer(other.to_string())),
        }
    }
}

impl std::fmt::Display for Optimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Adam => write!(f, "adam"),
            Self::Sgd => write!(f, "sgd"),
        }
    }
}

/// How chatty the epoch loop is on the local log (not the progress channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    Silent,
    Progress,
    Detailed,
}

impl Verbosity {
    /// Numeric levels as used by the original tooling: 0 silent, 1 progress,
    /// anything higher detailed.
    #[must_use]
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => Self::Silent,
            1 => Self::Progress,
            _ => Self::Detailed,
        }
    }
}

/// Immutable input to one training session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRequest {
    pub dataset_dir: PathBuf,
    pub validation_dir: PathBuf,
    pub epochs: u32,
    /// Raw optimizer name, validated via [`Optimizer::from_str`].
    pub optimizer: String,
    pub learning_rate: f64,
    pub verbosity: Verbosity,
}

impl TrainingRequest {
    /// Shape-only validation; performs no filesystem access.
    pub fn validate(&self) -> TrainResult<()> {
        if self.epochs == 0 {
            return Err(TrainError::Configuration("epochs must be >= 1".to_string()));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(TrainError::Configuration("learning_rate must be > 0".to_string()));
        }
        if self.dataset_dir.as_os_str().is_empty() {
            return Err(TrainError::Configuration("dataset_dir is required".to_string()));
        }
        if self.validation_dir.as_os_str().is_empty() {
            return Err(TrainError::Configuration("validation_dir is required".to_string()));
        }
        self.optimizer()?;
        Ok(())
    }

    pub fn optimizer(&self) -> TrainResult<Optimizer> {
        self.optimizer.parse()
    }
}
