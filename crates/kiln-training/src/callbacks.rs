//! The callback chain: an ordered, fixed set of observers the engine invokes
//! at batch and epoch boundaries.
//!
//! Observers carry session-scoped mutable state (patience counters, best
//! losses) on the chain instance itself; the chain is assembled once per
//! session and threaded by reference through every epoch call. An error in
//! any single observer is logged and isolated so it can neither corrupt the
//! training history nor abort the loop.

use crate::checkpoint::CheckpointStore;
use crate::engine::{EpochMetrics, ModelEngine, ModelHandle};
use crate::error::TrainResult;
use crate::progress::{ProgressEvent, ProgressReporter};
use std::sync::Arc;

/// Validation-loss patience before the session stops early.
pub const EARLY_STOP_PATIENCE: u32 = 7;
/// Validation-loss patience before the learning rate decays.
pub const LR_DECAY_PATIENCE: u32 = 3;
/// Multiplicative learning-rate decay factor.
pub const LR_DECAY_FACTOR: f64 = 0.2;
/// Lower bound for the decayed learning rate.
pub const MIN_LEARNING_RATE: f64 = 1e-5;

/// Per-epoch view handed to each observer. Observers read the metrics and
/// model, and record directives (stop, learning-rate override) the engine
/// applies after the chain runs.
pub struct EpochContext<'a> {
    pub epoch: u32,
    pub metrics: &'a EpochMetrics,
    pub model: &'a ModelHandle,
    learning_rate: f64,
    lr_override: Option<f64>,
    stop_requested: bool,
}

impl<'a> EpochContext<'a> {
    #[must_use]
    pub fn new(
        epoch: u32,
        metrics: &'a EpochMetrics,
        model: &'a ModelHandle,
        learning_rate: f64,
    ) -> Self {
        Self { epoch, metrics, model, learning_rate, lr_override: None, stop_requested: false }
    }

    #[must_use]
    pub fn learning_rate(&self) -> f64 {
        self.lr_override.unwrap_or(self.learning_rate)
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.lr_override = Some(learning_rate);
    }

    #[must_use]
    pub fn lr_override(&self) -> Option<f64> {
        self.lr_override
    }

    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }
}

pub trait EpochObserver: Send {
    fn name(&self) -> &'static str;

    fn on_batch_end(&mut self, _batch: u64, _loss: f64) -> TrainResult<()> {
        Ok(())
    }

    fn on_epoch_end(&mut self, ctx: &mut EpochContext<'_>) -> TrainResult<()>;
}

/// Stops the loop after `patience` epochs without validation-loss
/// improvement. Counters span the whole session.
pub struct EarlyStopping {
    patience: u32,
    best: Option<f64>,
    wait: u32,
}

impl EarlyStopping {
    #[must_use]
    pub fn new(patience: u32) -> Self {
        Self { patience, best: None, wait: 0 }
    }
}

impl EpochObserver for EarlyStopping {
    fn name(&self) -> &'static str {
        "early_stopping"
    }

    fn on_epoch_end(&mut self, ctx: &mut EpochContext<'_>) -> TrainResult<()> {
        let val_loss = ctx.metrics.val_loss;
        if self.best.is_none_or(|best| val_loss < best) {
            self.best = Some(val_loss);
            self.wait = 0;
            return Ok(());
        }
        self.wait += 1;
        if self.wait >= self.patience {
            tracing::info!(
                epoch = ctx.epoch,
                patience = self.patience,
                "val_loss did not improve for {} epochs; stopping",
                self.wait
            );
            ctx.request_stop();
        }
        Ok(())
    }
}

/// Shrinks the learning rate on a validation-loss plateau instead of
/// stopping. Independent counters from [`EarlyStopping`], shorter patience.
pub struct LrDecay {
    factor: f64,
    patience: u32,
    min_lr: f64,
    best: Option<f64>,
    wait: u32,
}

impl LrDecay {
    #[must_use]
    pub fn new(factor: f64, patience: u32, min_lr: f64) -> Self {
        Self { factor, patience, min_lr, best: None, wait: 0 }
    }
}

impl EpochObserver for LrDecay {
    fn name(&self) -> &'static str {
        "lr_decay"
    }

    fn on_epoch_end(&mut self, ctx: &mut EpochContext<'_>) -> TrainResult<()> {
        let val_loss = ctx.metrics.val_loss;
        if self.best.is_none_or(|best| val_loss < best) {
            self.best = Some(val_loss);
            self.wait = 0;
            return Ok(());
        }
        self.wait += 1;
        if self.wait >= self.patience {
            self.wait = 0;
            let current = ctx.learning_rate();
            let next = (current * self.factor).max(self.min_lr);
            if next < current {
                tracing::info!(epoch = ctx.epoch, from = current, to = next, "reducing learning rate");
                ctx.set_learning_rate(next);
            }
        }
        Ok(())
    }
}

/// Persists the model to the rolling checkpoint path whenever validation
/// loss improves on the best snapshot actually written. A failed write is
/// reported by the chain as degraded and retried on the next improvement.
pub struct BestCheckpoint {
    store: Arc<CheckpointStore>,
    engine: Arc<dyn ModelEngine>,
    best: Option<f64>,
}

impl BestCheckpoint {
    #[must_use]
    pub fn new(store: Arc<CheckpointStore>, engine: Arc<dyn ModelEngine>) -> Self {
        Self { store, engine, best: None }
    }
}

impl EpochObserver for BestCheckpoint {
    fn name(&self) -> &'static str {
        "best_checkpoint"
    }

    fn on_epoch_end(&mut self, ctx: &mut EpochContext<'_>) -> TrainResult<()> {
        let val_loss = ctx.metrics.val_loss;
        if self.best.is_some_and(|best| val_loss >= best) {
            return Ok(());
        }
        let bytes = self.engine.serialize(ctx.model)?;
        let record = self.store.save_checkpoint(&bytes, val_loss)?;
        tracing::info!(
            epoch = ctx.epoch,
            val_loss,
            path = %record.path.display(),
            "val_loss improved; checkpoint saved"
        );
        // Only a successful write advances the best marker, so the next
        // improving epoch retries after a storage failure.
        self.best = Some(val_loss);
        Ok(())
    }
}

/// Forwards per-batch and per-epoch scalars to the tracing sink.
pub struct Telemetry {
    run_tag: String,
}

impl Telemetry {
    #[must_use]
    pub fn new(run_tag: String) -> Self {
        Self { run_tag }
    }
}

impl EpochObserver for Telemetry {
    fn name(&self) -> &'static str {
        "telemetry"
    }

    fn on_batch_end(&mut self, batch: u64, loss: f64) -> TrainResult<()> {
        tracing::trace!(target: "kiln::telemetry", run = %self.run_tag, batch, loss);
        Ok(())
    }

    fn on_epoch_end(&mut self, ctx: &mut EpochContext<'_>) -> TrainResult<()> {
        let m = ctx.metrics;
        tracing::debug!(
            target: "kiln::telemetry",
            run = %self.run_tag,
            epoch = ctx.epoch,
            loss = m.loss,
            accuracy = m.accuracy,
            val_loss = m.val_loss,
            val_accuracy = m.val_accuracy,
        );
        Ok(())
    }
}

/// Converts completed-epoch metrics into an `epoch_update` wire event.
/// Enqueues without blocking; delivery happens on the reporter's task.
pub struct ProgressBridge {
    reporter: ProgressReporter,
}

impl ProgressBridge {
    #[must_use]
    pub fn new(reporter: ProgressReporter) -> Self {
        Self { reporter }
    }
}

impl EpochObserver for ProgressBridge {
    fn name(&self) -> &'static str {
        "progress_bridge"
    }

    fn on_epoch_end(&mut self, ctx: &mut EpochContext<'_>) -> TrainResult<()> {
        self.reporter.enqueue(ProgressEvent::Epoch(crate::progress::EpochUpdate {
            epoch: ctx.epoch,
            loss: ctx.metrics.loss,
            accuracy: ctx.metrics.accuracy,
            val_loss: ctx.metrics.val_loss,
            val_accuracy: ctx.metrics.val_accuracy,
        }));
        Ok(())
    }
}

/// Ordered observer set for one session.
pub struct CallbackChain {
    observers: Vec<Box<dyn EpochObserver>>,
    stop_requested: bool,
}

impl CallbackChain {
    #[must_use]
    pub fn new(observers: Vec<Box<dyn EpochObserver>>) -> Self {
        Self { observers, stop_requested: false }
    }

    /// The standard composition: early stopping, LR decay, best checkpoint,
    /// telemetry, and - when a channel was supplied - the progress bridge.
    #[must_use]
    pub fn standard(
        store: Arc<CheckpointStore>,
        engine: Arc<dyn ModelEngine>,
        run_tag: String,
        reporter: Option<ProgressReporter>,
    ) -> Self {
        let mut observers: Vec<Box<dyn EpochObserver>> = vec![
            Box::new(EarlyStopping::new(EARLY_STOP_PATIENCE)),
            Box::new(LrDecay::new(LR_DECAY_FACTOR, LR_DECAY_PATIENCE, MIN_LEARNING_RATE)),
            Box::new(BestCheckpoint::new(store, engine)),
            Box::new(Telemetry::new(run_tag)),
        ];
        if let Some(reporter) = reporter {
            observers.push(Box::new(ProgressBridge::new(reporter)));
        }
        Self::new(observers)
    }

    pub fn on_batch_end(&mut self, batch: u64, loss: f64) {
        for observer in &mut self.observers {
            if let Err(e) = observer.on_batch_end(batch, loss) {
                tracing::warn!(observer = observer.name(), error = %e, "batch observer failed");
            }
        }
    }

    /// Dispatch epoch end to every observer in order. Observer failures are
    /// logged and do not propagate; stop requests are sticky for the session.
    pub fn on_epoch_end(&mut self, ctx: &mut EpochContext<'_>) {
        for observer in &mut self.observers {
            if let Err(e) = observer.on_epoch_end(ctx) {
                tracing::warn!(
                    observer = observer.name(),
                    error = %e,
                    "observer failed; training continues"
                );
            }
        }
        if ctx.stop_requested() {
            self.stop_requested = true;
        }
    }

    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop_requested
    }
}
