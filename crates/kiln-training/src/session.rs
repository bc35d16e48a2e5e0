//! The training session orchestrator.
//!
//! One session drives one [`TrainingRequest`] end to end:
//! `Init -> Profiling -> ModelReady -> EpochLoop -> Finalizing -> Done`,
//! with `Errored` reachable from any state. Epochs run strictly
//! sequentially; progress delivery is asynchronous on the reporter's task.

use crate::callbacks::CallbackChain;
use crate::checkpoint::CheckpointStore;
use crate::dataset::{self, LabeledDataset};
use crate::engine::{ArchitectureSpec, ModelEngine, OptimizerConfig};
use crate::error::{TrainError, TrainResult};
use crate::history::{EpochResult, TrainingHistory};
use crate::progress::{
    DatasetInfo, ErrorEvent, ModelSaved, ProgressChannel, ProgressEvent, ProgressReporter,
};
use crate::request::{TrainingRequest, Verbosity};
use crate::settings::TrainingSettings;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Cooperative cancellation handle. Checked only at epoch boundaries; the
/// engine's inner loop is opaque and never interrupted mid-epoch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One-time resume-vs-fresh decision, made before the epoch loop starts and
/// never re-checked inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSource {
    Resume,
    Fresh,
}

#[must_use]
pub fn decide_model_source(store: &CheckpointStore) -> ModelSource {
    if store.exists() {
        ModelSource::Resume
    } else {
        ModelSource::Fresh
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Init,
    Profiling,
    ModelReady,
    EpochLoop,
    Finalizing,
    Done,
}

impl SessionState {
    fn enter(self, next: Self) -> Self {
        tracing::debug!(from = ?self, to = ?next, "session state");
        next
    }
}

/// What one completed session produced.
#[derive(Debug)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub history: TrainingHistory,
    pub model_path: PathBuf,
    pub history_path: PathBuf,
    pub resumed: bool,
    pub stopped_early: bool,
}

pub struct TrainingSession {
    engine: Arc<dyn ModelEngine>,
    store: Arc<CheckpointStore>,
    settings: TrainingSettings,
    channel: Option<Arc<dyn ProgressChannel>>,
    cancel: Option<CancelToken>,
}

impl TrainingSession {
    #[must_use]
    pub fn new(engine: Arc<dyn ModelEngine>, store: Arc<CheckpointStore>, settings: TrainingSettings) -> Self {
        Self { engine, store, settings, channel: None, cancel: None }
    }

    /// Attach the duplex observer channel for this session.
    #[must_use]
    pub fn with_channel(mut self, channel: Arc<dyn ProgressChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Run the session to completion. On error the session emits a single
    /// `error` event (when a channel exists), flushes the queue, and returns;
    /// there is no implicit retry.
    pub async fn run(&self, request: &TrainingRequest) -> TrainResult<SessionReport> {
        let (reporter, delivery) = match &self.channel {
            Some(channel) => {
                let (reporter, handle) = ProgressReporter::spawn(channel.clone());
                (Some(reporter), Some(handle))
            }
            None => (None, None),
        };

        let result = self.drive(request, reporter.as_ref()).await;

        if let (Err(e), Some(reporter)) = (&result, &reporter) {
            reporter
                .emit(ProgressEvent::Error(ErrorEvent {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                }))
                .await;
        }

        // Closing every producer lets the delivery task drain and exit, so
        // awaiting it guarantees all queued events were offered in order.
        drop(reporter);
        if let Some(handle) = delivery {
            let _ = handle.await;
        }

        result
    }

    async fn drive(
        &self,
        request: &TrainingRequest,
        reporter: Option<&ProgressReporter>,
    ) -> TrainResult<SessionReport> {
        let session_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut state = SessionState::Init;
        tracing::info!(%session_id, epochs = request.epochs, "training session starting");

        // Init: shape checks only, no side effects on invalid input.
        request.validate()?;
        let optimizer = request.optimizer()?;

        // Profiling: stats are computed exactly once, and the dataset_info
        // event is queued before any epoch event can exist.
        state = state.enter(SessionState::Profiling);
        let train = LabeledDataset::open_dir(&request.dataset_dir, &self.settings, true)?;
        let val = LabeledDataset::open_dir(&request.validation_dir, &self.settings, false)?;
        let train_stats = dataset::profile(&train);
        let val_stats = dataset::profile(&val);
        tracing::info!(
            train = train_stats.total,
            val = val_stats.total,
            classes = ?train.classes(),
            "datasets profiled"
        );
        if let Some(reporter) = reporter {
            reporter
                .emit(ProgressEvent::DatasetInfo(DatasetInfo::from_stats(&train_stats, &val_stats)))
                .await;
        }

        // ModelReady: the resume decision happens once, here.
        state = state.enter(SessionState::ModelReady);
        self.store.ensure_dirs()?;
        let source = decide_model_source(&self.store);
        let mut model = match source {
            ModelSource::Resume => {
                let path = self.store.checkpoint_path();
                tracing::info!(path = %path.display(), "resuming from checkpoint");
                let bytes = self.store.load()?;
                self.engine.deserialize(&bytes).map_err(|e| TrainError::CorruptCheckpoint {
                    path,
                    reason: e.to_string(),
                })?
            }
            ModelSource::Fresh => {
                let arch = ArchitectureSpec::slide_classifier(self.settings.input_shape());
                self.engine.build(&arch, self.settings.seed)?
            }
        };
        self.engine.compile(
            &mut model,
            OptimizerConfig { optimizer, learning_rate: request.learning_rate },
        )?;

        // EpochLoop: the chain is assembled once so observer counters span
        // the whole session.
        state = state.enter(SessionState::EpochLoop);
        let mut chain = CallbackChain::standard(
            self.store.clone(),
            self.engine.clone(),
            session_id.to_string(),
            reporter.cloned(),
        );
        let mut history = TrainingHistory::default();
        let mut stopped_early = false;
        for epoch in 1..=request.epochs {
            let metrics = self.engine.run_epoch(&mut model, epoch, &train, &val, &mut chain)?;
            history.push(EpochResult {
                epoch,
                loss: metrics.loss,
                accuracy: metrics.accuracy,
                val_loss: metrics.val_loss,
                val_accuracy: metrics.val_accuracy,
            });
            if request.verbosity >= Verbosity::Progress {
                tracing::info!(
                    epoch,
                    loss = metrics.loss,
                    accuracy = metrics.accuracy,
                    val_loss = metrics.val_loss,
                    val_accuracy = metrics.val_accuracy,
                );
            }

            // Epoch boundary: let queued events flush, then observe stop and
            // cancellation signals. Both end the loop normally.
            tokio::task::yield_now().await;
            if chain.should_stop() {
                stopped_early = true;
                break;
            }
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                tracing::info!(epoch, "cancellation requested; ending loop");
                stopped_early = true;
                break;
            }
        }

        // Finalizing: the final artifact is written once under a fresh
        // timestamped name, whether or not it matches the best checkpoint.
        state = state.enter(SessionState::Finalizing);
        let bytes = self.engine.serialize(&model)?;
        let model_path = self.store.save_final(&bytes, started_at)?;
        let history_path = self.store.save_history(&history, started_at)?;
        if let Some(reporter) = reporter {
            reporter
                .emit(ProgressEvent::ModelSaved(ModelSaved {
                    model_path: model_path.display().to_string(),
                }))
                .await;
        }

        state.enter(SessionState::Done);
        tracing::info!(%session_id, epochs_run = history.len(), path = %model_path.display(), "training session finished");

        Ok(SessionReport {
            session_id,
            history,
            model_path,
            history_path,
            resumed: source == ModelSource::Resume,
            stopped_early,
        })
    }
}
