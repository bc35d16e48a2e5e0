//! End-to-end session behavior against a scripted engine: event ordering,
//! early stopping, resume, and fail-fast configuration errors.

use kiln_training::{
    CallbackChain, CancelToken, CheckpointStore, EpochContext, EpochMetrics, LabeledDataset,
    MemoryChannel, ModelEngine, ModelHandle, OptimizerConfig, ProgressEvent, TrainError,
    TrainingRequest, TrainingSession, TrainingSettings, Verbosity,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScriptedState {
    epochs_run: u32,
    learning_rate: f64,
}

/// Engine whose validation loss follows a fixed script; epoch k reads entry
/// k-1 (the last entry repeats). Weights are stood in for by `epochs_run`.
struct ScriptedEngine {
    val_losses: Vec<f64>,
}

impl ScriptedEngine {
    fn new(val_losses: Vec<f64>) -> Self {
        Self { val_losses }
    }

    fn scripted_loss(&self, epoch: u32) -> f64 {
        let idx = (epoch as usize - 1).min(self.val_losses.len() - 1);
        self.val_losses[idx]
    }
}

impl ModelEngine for ScriptedEngine {
    fn id(&self) -> &'static str {
        "scripted"
    }

    fn file_extension(&self) -> &'static str {
        "json"
    }

    fn build(&self, _arch: &kiln_training::ArchitectureSpec, _seed: u64) -> Result<ModelHandle, TrainError> {
        Ok(ModelHandle::new(self.id(), Box::new(ScriptedState { epochs_run: 0, learning_rate: 0.0 })))
    }

    fn compile(&self, model: &mut ModelHandle, optimizer: OptimizerConfig) -> Result<(), TrainError> {
        let state = model
            .state_mut::<ScriptedState>()
            .ok_or_else(|| TrainError::Engine("foreign model handle".to_string()))?;
        state.learning_rate = optimizer.learning_rate;
        Ok(())
    }

    fn run_epoch(
        &self,
        model: &mut ModelHandle,
        epoch: u32,
        train: &LabeledDataset,
        _val: &LabeledDataset,
        chain: &mut CallbackChain,
    ) -> Result<EpochMetrics, TrainError> {
        let loss = self.scripted_loss(epoch);
        for (batch, _) in train.epoch_batches(epoch).enumerate() {
            chain.on_batch_end(batch as u64, loss);
        }

        let lr = {
            let state = model
                .state_mut::<ScriptedState>()
                .ok_or_else(|| TrainError::Engine("foreign model handle".to_string()))?;
            state.epochs_run += 1;
            state.learning_rate
        };

        let metrics =
            EpochMetrics { loss, accuracy: 0.8, val_loss: loss, val_accuracy: 0.75 };
        let mut ctx = EpochContext::new(epoch, &metrics, &*model, lr);
        chain.on_epoch_end(&mut ctx);
        let lr_override = ctx.lr_override();
        drop(ctx);
        if let Some(next) = lr_override {
            if let Some(state) = model.state_mut::<ScriptedState>() {
                state.learning_rate = next;
            }
        }
        Ok(metrics)
    }

    fn serialize(&self, model: &ModelHandle) -> Result<Vec<u8>, TrainError> {
        let state = model
            .state::<ScriptedState>()
            .ok_or_else(|| TrainError::Engine("foreign model handle".to_string()))?;
        Ok(serde_json::to_vec(state)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<ModelHandle, TrainError> {
        let state: ScriptedState = serde_json::from_slice(bytes)?;
        Ok(ModelHandle::new(self.id(), Box::new(state)))
    }
}

fn write_split(root: &Path, good: usize, no_good: usize) {
    std::fs::create_dir_all(root.join("G")).unwrap();
    std::fs::create_dir_all(root.join("NG")).unwrap();
    for i in 0..good {
        std::fs::write(root.join("G").join(format!("g{i:03}.bin")), vec![7; 32]).unwrap();
    }
    for i in 0..no_good {
        std::fs::write(root.join("NG").join(format!("ng{i:03}.bin")), vec![9; 32]).unwrap();
    }
}

struct Fixture {
    _temp: TempDir,
    request: TrainingRequest,
    store: Arc<CheckpointStore>,
    channel: Arc<MemoryChannel>,
}

fn fixture(epochs: u32, good: usize, no_good: usize, val_good: usize, val_no_good: usize) -> Fixture {
    let temp = TempDir::new().unwrap();
    let dataset_dir = temp.path().join("train");
    let validation_dir = temp.path().join("val");
    write_split(&dataset_dir, good, no_good);
    write_split(&validation_dir, val_good, val_no_good);

    let request = TrainingRequest {
        dataset_dir,
        validation_dir,
        epochs,
        optimizer: "adam".to_string(),
        learning_rate: 1e-3,
        verbosity: Verbosity::Silent,
    };
    let store = Arc::new(CheckpointStore::new(temp.path().join("run"), "json"));
    Fixture { _temp: temp, request, store, channel: Arc::new(MemoryChannel::default()) }
}

fn session(f: &Fixture, engine: ScriptedEngine) -> TrainingSession {
    TrainingSession::new(Arc::new(engine), f.store.clone(), TrainingSettings::default())
        .with_channel(f.channel.clone())
}

#[tokio::test]
async fn test_event_sequence_for_plain_three_epoch_run() {
    let f = fixture(3, 50, 30, 10, 10);
    let engine = ScriptedEngine::new(vec![0.9, 0.7, 0.5]);

    let report = session(&f, engine).run(&f.request).await.unwrap();
    assert_eq!(report.history.len(), 3);
    assert!(!report.stopped_early);
    assert!(!report.resumed);

    let events = f.channel.events();
    // Exactly: one dataset_info, three epoch updates, one model_saved.
    assert_eq!(events.len(), 5);
    match &events[0] {
        ProgressEvent::DatasetInfo(info) => {
            assert_eq!(info.g_count, 50);
            assert_eq!(info.ng_count, 30);
            assert_eq!(info.slide_count, 80);
            assert_eq!(info.val_g_count, 10);
            assert_eq!(info.val_ng_count, 10);
            assert_eq!(info.val_slide_count, 20);
        }
        other => panic!("expected dataset_info first, got {other:?}"),
    }
    for (i, event) in events[1..4].iter().enumerate() {
        match event {
            ProgressEvent::Epoch(update) => {
                assert_eq!(update.epoch, i as u32 + 1);
                assert!(update.loss >= 0.0);
                assert!(update.accuracy >= 0.0);
            }
            other => panic!("expected epoch update at position {i}, got {other:?}"),
        }
    }
    match &events[4] {
        ProgressEvent::ModelSaved(saved) => {
            assert_ne!(
                Path::new(&saved.model_path),
                f.store.checkpoint_path(),
                "final artifact must not reuse the rolling checkpoint path"
            );
            assert_eq!(Path::new(&saved.model_path), report.model_path);
        }
        other => panic!("expected model_saved last, got {other:?}"),
    }
}

#[tokio::test]
async fn test_early_stopping_ends_loop_after_patience_window() {
    let f = fixture(20, 4, 4, 2, 2);
    // Epoch 1 sets the baseline; nothing improves afterwards, so with
    // patience 7 the loop ends at epoch 8.
    let engine = ScriptedEngine::new(vec![0.5, 0.6]);

    let report = session(&f, engine).run(&f.request).await.unwrap();
    assert!(report.stopped_early);
    assert_eq!(report.history.len(), 8);

    let events = f.channel.events();
    let epoch_updates = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::Epoch(_)))
        .count();
    assert_eq!(epoch_updates, 8);
    // model_saved is still emitted, after the last epoch update.
    assert!(matches!(events.last(), Some(ProgressEvent::ModelSaved(_))));
}

#[tokio::test]
async fn test_unsupported_optimizer_fails_before_any_side_effect() {
    let f = fixture(3, 2, 2, 1, 1);
    let mut request = f.request.clone();
    request.optimizer = "rmsprop".to_string();

    let engine = ScriptedEngine::new(vec![0.5]);
    let err = session(&f, engine).run(&request).await.unwrap_err();
    assert!(matches!(err, TrainError::UnsupportedOptimizer(_)));

    // No run directory was created: the name check precedes dataset loading
    // and model construction.
    assert!(!f.store.layout().root().exists());

    let events = f.channel.events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        ProgressEvent::Error(e) => {
            assert_eq!(e.kind, "unsupported_optimizer");
            assert!(e.message.contains("rmsprop"));
        }
        other => panic!("expected a single error event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_resume_continues_from_checkpoint_state() {
    let f = fixture(2, 3, 3, 1, 1);

    // First session: improving losses, so the best checkpoint is written on
    // the final epoch with epochs_run = 2.
    let report = session(&f, ScriptedEngine::new(vec![0.9, 0.8]))
        .run(&f.request)
        .await
        .unwrap();
    assert!(!report.resumed);
    assert!(f.store.exists());

    // Second session resumes and keeps counting instead of resetting.
    let mut request = f.request.clone();
    request.epochs = 1;
    let report = session(&f, ScriptedEngine::new(vec![0.7]))
        .run(&request)
        .await
        .unwrap();
    assert!(report.resumed);

    let artifact = std::fs::read(&report.model_path).unwrap();
    let state: ScriptedState = serde_json::from_slice(&artifact).unwrap();
    assert_eq!(state.epochs_run, 3, "resume must not reset the model state");
}

#[tokio::test]
async fn test_corrupt_checkpoint_is_fatal_for_resume() {
    let f = fixture(1, 2, 2, 1, 1);
    f.store.ensure_dirs().unwrap();
    f.store.save_checkpoint(b"not json at all", 0.5).unwrap();

    let err = session(&f, ScriptedEngine::new(vec![0.5]))
        .run(&f.request)
        .await
        .unwrap_err();
    assert!(matches!(err, TrainError::CorruptCheckpoint { .. }));

    let events = f.channel.events();
    assert_eq!(events.len(), 2, "dataset_info then the error event");
    match &events[1] {
        ProgressEvent::Error(e) => assert_eq!(e.kind, "corrupt_checkpoint"),
        other => panic!("expected error event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cancellation_ends_loop_at_epoch_boundary_and_finalizes() {
    let f = fixture(10, 2, 2, 1, 1);
    let token = CancelToken::new();
    token.cancel();

    let engine = ScriptedEngine::new(vec![0.9, 0.8]);
    let sess = TrainingSession::new(Arc::new(engine), f.store.clone(), TrainingSettings::default())
        .with_channel(f.channel.clone())
        .with_cancel_token(token);

    let report = sess.run(&f.request).await.unwrap();
    assert!(report.stopped_early);
    assert_eq!(report.history.len(), 1, "cancellation is only observed between epochs");
    assert!(report.model_path.exists(), "a cancelled session still writes its artifact");
}

#[tokio::test]
async fn test_session_without_channel_still_trains_and_saves() {
    let f = fixture(2, 2, 2, 1, 1);
    let sess = TrainingSession::new(
        Arc::new(ScriptedEngine::new(vec![0.9, 0.8])),
        f.store.clone(),
        TrainingSettings::default(),
    );

    let report = sess.run(&f.request).await.unwrap();
    assert_eq!(report.history.len(), 2);
    assert!(report.model_path.exists());
    assert!(report.history_path.exists());
}

#[tokio::test]
async fn test_lr_decay_reaches_engine_state_through_the_chain() {
    let f = fixture(6, 2, 2, 1, 1);
    // Baseline at epoch 1, then a plateau: LR decays after epochs 4 (wait=3).
    let engine = ScriptedEngine::new(vec![0.5, 0.6]);

    let report = session(&f, engine).run(&f.request).await.unwrap();
    assert_eq!(report.history.len(), 6);

    let artifact = std::fs::read(&report.model_path).unwrap();
    let state: ScriptedState = serde_json::from_slice(&artifact).unwrap();
    assert!(
        state.learning_rate < 1e-3,
        "learning rate should have decayed from 1e-3, got {}",
        state.learning_rate
    );
}
