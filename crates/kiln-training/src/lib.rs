//! Kiln Training
//!
//! Backend-agnostic training-session primitives for:
//! - Describing a session (`TrainingRequest`, `TrainingSettings`)
//! - Profiling directory-backed labeled datasets
//! - Persisting checkpoints and final artifacts (`CheckpointStore`)
//! - Streaming progress events to a remote observer (`ProgressChannel`)
//! - Driving a pluggable numeric backend (`ModelEngine`) through the
//!   epoch loop (`TrainingSession`)

pub mod callbacks;
pub mod checkpoint;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod history;
pub mod layout;
pub mod progress;
pub mod request;
pub mod session;
pub mod settings;

pub use callbacks::{
    BestCheckpoint, CallbackChain, EarlyStopping, EpochContext, EpochObserver, LrDecay,
    ProgressBridge, Telemetry, EARLY_STOP_PATIENCE, LR_DECAY_FACTOR, LR_DECAY_PATIENCE,
    MIN_LEARNING_RATE,
};
pub use checkpoint::{CheckpointRecord, CheckpointStore};
pub use dataset::{profile, DatasetStats, LabeledDataset, LabeledSample, GOOD_CLASS, NO_GOOD_CLASS};
pub use engine::{
    ArchitectureSpec, EpochMetrics, LayerSpec, ModelEngine, ModelHandle, OptimizerConfig,
};
pub use error::{TrainError, TrainResult};
pub use history::{EpochResult, TrainingHistory};
pub use layout::RunLayout;
pub use progress::{
    DatasetInfo, EpochUpdate, ErrorEvent, MemoryChannel, ModelSaved, ProgressChannel,
    ProgressEvent, ProgressReporter, StdoutProgressChannel,
};
pub use request::{Optimizer, TrainingRequest, Verbosity};
pub use session::{decide_model_source, CancelToken, ModelSource, SessionReport, TrainingSession};
pub use settings::TrainingSettings;
