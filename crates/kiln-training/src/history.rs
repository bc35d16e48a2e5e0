use serde::{Deserialize, Serialize};

/// Metrics for one completed epoch, immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochResult {
    pub epoch: u32,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
}

/// Append-only sequence of epoch results; insertion order is epoch order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    epochs: Vec<EpochResult>,
}

impl TrainingHistory {
    pub fn push(&mut self, result: EpochResult) {
        self.epochs.push(result);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&EpochResult> {
        self.epochs.last()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[EpochResult] {
        &self.epochs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_preserves_epoch_order() {
        let mut history = TrainingHistory::default();
        for epoch in 1..=3 {
            history.push(EpochResult {
                epoch,
                loss: 1.0 / f64::from(epoch),
                accuracy: 0.5,
                val_loss: 1.0,
                val_accuracy: 0.5,
            });
        }
        let epochs: Vec<u32> = history.as_slice().iter().map(|r| r.epoch).collect();
        assert_eq!(epochs, vec![1, 2, 3]);
        assert_eq!(history.last().unwrap().epoch, 3);
    }
}
