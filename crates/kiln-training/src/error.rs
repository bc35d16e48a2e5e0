use std::path::PathBuf;
use thiserror::Error;

pub type TrainResult<T> = std::result::Result<T, TrainError>;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("invalid training request: {0}")]
    Configuration(String),

    #[error("unsupported optimizer: {0}")]
    UnsupportedOptimizer(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("corrupt checkpoint at {path}: {reason}")]
    CorruptCheckpoint { path: PathBuf, reason: String },

    #[error("failed to write {path}: {source}")]
    StorageWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("observer '{observer}' failed: {reason}")]
    Observer { observer: &'static str, reason: String },

    #[error("progress delivery failed: {0}")]
    ChannelDelivery(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrainError {
    /// Stable kind string carried by the wire-level `error` event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::UnsupportedOptimizer(_) => "unsupported_optimizer",
            Self::Dataset(_) => "dataset",
            Self::CorruptCheckpoint { .. } => "corrupt_checkpoint",
            Self::StorageWrite { .. } => "storage_write",
            Self::Observer { .. } => "observer",
            Self::ChannelDelivery(_) => "channel_delivery",
            Self::Engine(_) => "engine",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Other(_) => "other",
        }
    }
}
