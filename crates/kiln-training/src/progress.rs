//! Progress events, the channel abstraction, and the asynchronous reporter.
//!
//! Events are JSON-object-shaped and match the wire contract of the remote
//! observer exactly. Delivery runs on a dedicated task fed by a bounded FIFO
//! queue so the epoch loop never blocks on a slow observer.

use crate::dataset::{DatasetStats, GOOD_CLASS, NO_GOOD_CLASS};
use crate::error::{TrainError, TrainResult};
use crate::history::EpochResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Bound on the in-flight event queue per session.
pub const EVENT_QUEUE_CAPACITY: usize = 64;

/// Dataset composition for both splits, sent once before the first epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename = "dataset_info")]
pub struct DatasetInfo {
    pub g_count: u64,
    pub ng_count: u64,
    pub slide_count: u64,
    pub val_g_count: u64,
    pub val_ng_count: u64,
    pub val_slide_count: u64,
}

impl DatasetInfo {
    #[must_use]
    pub fn from_stats(train: &DatasetStats, val: &DatasetStats) -> Self {
        Self {
            g_count: train.count_for(GOOD_CLASS),
            ng_count: train.count_for(NO_GOOD_CLASS),
            slide_count: train.total,
            val_g_count: val.count_for(GOOD_CLASS),
            val_ng_count: val.count_for(NO_GOOD_CLASS),
            val_slide_count: val.total,
        }
    }
}

/// Per-epoch metrics update. The wire shape carries no status tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochUpdate {
    pub epoch: u32,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
}

impl From<EpochResult> for EpochUpdate {
    fn from(r: EpochResult) -> Self {
        Self {
            epoch: r.epoch,
            loss: r.loss,
            accuracy: r.accuracy,
            val_loss: r.val_loss,
            val_accuracy: r.val_accuracy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename = "model_saved")]
pub struct ModelSaved {
    pub model_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename = "error")]
pub struct ErrorEvent {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressEvent {
    DatasetInfo(DatasetInfo),
    Epoch(EpochUpdate),
    ModelSaved(ModelSaved),
    Error(ErrorEvent),
}

/// Outbound half of the duplex connection to a remote observer.
///
/// The channel is for observability, not control: delivery failures mark the
/// observer as gone and training continues.
#[async_trait]
pub trait ProgressChannel: Send + Sync {
    async fn send(&self, event: &ProgressEvent) -> TrainResult<()>;
}

/// Writes each event as one JSON line on stdout.
#[derive(Debug, Default)]
pub struct StdoutProgressChannel;

#[async_trait]
impl ProgressChannel for StdoutProgressChannel {
    async fn send(&self, event: &ProgressEvent) -> TrainResult<()> {
        println!("{}", serde_json::to_string(event)?);
        Ok(())
    }
}

/// Records events in memory; for tests and local diagnostics.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    events: Mutex<Vec<ProgressEvent>>,
}

impl MemoryChannel {
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ProgressChannel for MemoryChannel {
    async fn send(&self, event: &ProgressEvent) -> TrainResult<()> {
        self.events
            .lock()
            .map_err(|_| TrainError::ChannelDelivery("event buffer poisoned".to_string()))?
            .push(event.clone());
        Ok(())
    }
}

/// Producer handle for the session's event queue.
///
/// One reporter (plus clones, one held by the progress bridge observer)
/// feeds a single bounded queue drained by a delivery task, which preserves
/// FIFO order end to end. `emit` awaits queue space and is meant for the
/// orchestrator's own suspension points; `enqueue` never blocks and is meant
/// for observers running inside the engine's epoch loop.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ProgressReporter {
    /// Spawn the delivery task for `channel`. Dropping every reporter clone
    /// closes the queue; awaiting the returned handle then guarantees all
    /// queued events were offered to the channel.
    #[must_use]
    pub fn spawn(channel: Arc<dyn ProgressChannel>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<ProgressEvent>(EVENT_QUEUE_CAPACITY);
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = channel.send(&event).await {
                    tracing::warn!(error = %e, "progress observer unreachable; delivery stopped");
                    break;
                }
            }
        });
        (Self { tx }, handle)
    }

    /// Queue an event, waiting for space. A closed queue (observer task gone)
    /// is not an error for the session.
    pub async fn emit(&self, event: ProgressEvent) {
        if self.tx.send(event).await.is_err() {
            tracing::debug!("progress queue closed; event dropped");
        }
    }

    /// Queue an event without blocking. If the observer has stalled long
    /// enough to fill the queue, the event is dropped with a warning rather
    /// than stalling the epoch loop.
    pub fn enqueue(&self, event: ProgressEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("progress queue full; dropping epoch update");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("progress queue closed; event dropped");
            }
        }
    }
}
