//! Byte-histogram softmax classifier.
//!
//! Each example file is reduced to a normalized 256-bin byte histogram; a
//! single linear layer with a softmax head is trained on sparse categorical
//! cross-entropy. The convolutional stages of the architecture spec are
//! approximated away; the classifier head width is honored exactly.

use kiln_training::engine::{
    ArchitectureSpec, EpochMetrics, ModelEngine, ModelHandle, OptimizerConfig,
};
use kiln_training::{
    CallbackChain, EpochContext, LabeledDataset, LabeledSample, Optimizer, TrainError, TrainResult,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;

const FEATURES: usize = 256;

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-8;

/// Probability floor inside the cross-entropy log.
const PROB_FLOOR: f64 = 1e-12;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OptimizerState {
    config: OptimizerConfig,
    /// Current rate; starts at the configured rate and decays via the chain.
    learning_rate: f64,
    step: u64,
    m_w: Vec<Vec<f64>>,
    v_w: Vec<Vec<f64>>,
    m_b: Vec<f64>,
    v_b: Vec<f64>,
}

impl OptimizerState {
    fn new(config: OptimizerConfig, classes: usize) -> Self {
        Self {
            config,
            learning_rate: config.learning_rate,
            step: 0,
            m_w: vec![vec![0.0; FEATURES]; classes],
            v_w: vec![vec![0.0; FEATURES]; classes],
            m_b: vec![0.0; classes],
            v_b: vec![0.0; classes],
        }
    }
}

/// Full model state: weights plus optimizer moments, all serializable so a
/// checkpoint restores training exactly where it left off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramModel {
    arch: ArchitectureSpec,
    classes: usize,
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
    optimizer: Option<OptimizerState>,
}

impl HistogramModel {
    fn forward(&self, x: &[f64]) -> Vec<f64> {
        let logits: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(w, b)| w.iter().zip(x).map(|(wi, xi)| wi * xi).sum::<f64>() + b)
            .collect();
        softmax(&logits)
    }

    fn check_label(&self, sample: &LabeledSample) -> TrainResult<usize> {
        if sample.class >= self.classes {
            return Err(TrainError::Engine(format!(
                "class index {} exceeds the {}-way classifier head",
                sample.class, self.classes
            )));
        }
        Ok(sample.class)
    }

    /// One gradient step over a batch; returns (mean loss, correct count).
    fn train_batch(&mut self, batch: &[&LabeledSample]) -> TrainResult<(f64, usize)> {
        let n = batch.len() as f64;
        let mut grad_w = vec![vec![0.0; FEATURES]; self.classes];
        let mut grad_b = vec![0.0; self.classes];
        let mut loss_sum = 0.0;
        let mut correct = 0;

        for sample in batch {
            let label = self.check_label(sample)?;
            let x = byte_histogram(&sample.path)?;
            let probs = self.forward(&x);

            loss_sum += -probs[label].max(PROB_FLOOR).ln();
            if argmax(&probs) == label {
                correct += 1;
            }
            for c in 0..self.classes {
                let err = probs[c] - f64::from(u8::from(c == label));
                grad_b[c] += err;
                for (gw, xi) in grad_w[c].iter_mut().zip(&x) {
                    *gw += err * xi;
                }
            }
        }

        for row in &mut grad_w {
            for g in row {
                *g /= n;
            }
        }
        for g in &mut grad_b {
            *g /= n;
        }

        self.apply_gradients(&grad_w, &grad_b)?;
        Ok((loss_sum / n, correct))
    }

    fn apply_gradients(&mut self, grad_w: &[Vec<f64>], grad_b: &[f64]) -> TrainResult<()> {
        let Self { weights, bias, optimizer, .. } = self;
        let opt = optimizer
            .as_mut()
            .ok_or_else(|| TrainError::Engine("model was not compiled".to_string()))?;

        match opt.config.optimizer {
            Optimizer::Sgd => {
                let lr = opt.learning_rate;
                for (w, g) in weights.iter_mut().zip(grad_w) {
                    for (wi, gi) in w.iter_mut().zip(g) {
                        *wi -= lr * gi;
                    }
                }
                for (b, g) in bias.iter_mut().zip(grad_b) {
                    *b -= lr * g;
                }
            }
            Optimizer::Adam => {
                opt.step += 1;
                let lr = opt.learning_rate;
                let t = opt.step as i32;
                let bc1 = 1.0 - ADAM_BETA1.powi(t);
                let bc2 = 1.0 - ADAM_BETA2.powi(t);

                for c in 0..weights.len() {
                    for i in 0..FEATURES {
                        let g = grad_w[c][i];
                        let m = &mut opt.m_w[c][i];
                        let v = &mut opt.v_w[c][i];
                        *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
                        *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
                        weights[c][i] -= lr * (*m / bc1) / ((*v / bc2).sqrt() + ADAM_EPSILON);
                    }
                    let g = grad_b[c];
                    let m = &mut opt.m_b[c];
                    let v = &mut opt.v_b[c];
                    *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
                    *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
                    bias[c] -= lr * (*m / bc1) / ((*v / bc2).sqrt() + ADAM_EPSILON);
                }
            }
        }
        Ok(())
    }

    fn evaluate(&self, dataset: &LabeledDataset) -> TrainResult<(f64, f64)> {
        let mut loss_sum = 0.0;
        let mut correct = 0usize;
        let mut seen = 0usize;
        for batch in dataset.epoch_batches(0) {
            for sample in batch {
                let label = self.check_label(sample)?;
                let x = byte_histogram(&sample.path)?;
                let probs = self.forward(&x);
                loss_sum += -probs[label].max(PROB_FLOOR).ln();
                if argmax(&probs) == label {
                    correct += 1;
                }
                seen += 1;
            }
        }
        let n = seen.max(1) as f64;
        Ok((loss_sum / n, correct as f64 / n))
    }
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|z| (z - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

fn byte_histogram(path: &Path) -> TrainResult<Vec<f64>> {
    let bytes = std::fs::read(path)?;
    let mut hist = vec![0.0; FEATURES];
    if bytes.is_empty() {
        return Ok(hist);
    }
    for b in &bytes {
        hist[*b as usize] += 1.0;
    }
    let total = bytes.len() as f64;
    for h in &mut hist {
        *h /= total;
    }
    Ok(hist)
}

#[derive(Debug, Default, Clone)]
pub struct HistogramEngine;

impl HistogramEngine {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn state<'a>(&self, model: &'a ModelHandle) -> TrainResult<&'a HistogramModel> {
        model
            .state::<HistogramModel>()
            .ok_or_else(|| TrainError::Engine("model handle belongs to another engine".to_string()))
    }

    fn state_mut<'a>(&self, model: &'a mut ModelHandle) -> TrainResult<&'a mut HistogramModel> {
        model
            .state_mut::<HistogramModel>()
            .ok_or_else(|| TrainError::Engine("model handle belongs to another engine".to_string()))
    }
}

impl ModelEngine for HistogramEngine {
    fn id(&self) -> &'static str {
        "histogram-softmax"
    }

    fn file_extension(&self) -> &'static str {
        "json"
    }

    fn build(&self, arch: &ArchitectureSpec, seed: u64) -> TrainResult<ModelHandle> {
        let classes = arch.num_classes() as usize;
        if classes == 0 {
            return Err(TrainError::Engine(
                "architecture spec has no dense classifier head".to_string(),
            ));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let weights = (0..classes)
            .map(|_| (0..FEATURES).map(|_| rng.gen_range(-0.05..0.05)).collect())
            .collect();
        let model = HistogramModel {
            arch: arch.clone(),
            classes,
            weights,
            bias: vec![0.0; classes],
            optimizer: None,
        };
        Ok(ModelHandle::new(self.id(), Box::new(model)))
    }

    fn compile(&self, model: &mut ModelHandle, optimizer: OptimizerConfig) -> TrainResult<()> {
        let state = self.state_mut(model)?;
        let classes = state.classes;
        state.optimizer = Some(OptimizerState::new(optimizer, classes));
        Ok(())
    }

    fn run_epoch(
        &self,
        model: &mut ModelHandle,
        epoch: u32,
        train: &LabeledDataset,
        val: &LabeledDataset,
        chain: &mut CallbackChain,
    ) -> TrainResult<EpochMetrics> {
        let (metrics, learning_rate) = {
            let state = self.state_mut(model)?;
            if state.optimizer.is_none() {
                return Err(TrainError::Engine("model was not compiled".to_string()));
            }

            let mut loss_sum = 0.0;
            let mut correct = 0usize;
            let mut seen = 0usize;
            for (batch_idx, batch) in train.epoch_batches(epoch).enumerate() {
                let (batch_loss, batch_correct) = state.train_batch(&batch)?;
                loss_sum += batch_loss * batch.len() as f64;
                correct += batch_correct;
                seen += batch.len();
                chain.on_batch_end(batch_idx as u64, batch_loss);
            }
            let n = seen.max(1) as f64;
            let (val_loss, val_accuracy) = state.evaluate(val)?;

            let metrics = EpochMetrics {
                loss: loss_sum / n,
                accuracy: correct as f64 / n,
                val_loss,
                val_accuracy,
            };
            let learning_rate = state.optimizer.as_ref().map_or(0.0, |o| o.learning_rate);
            (metrics, learning_rate)
        };

        let mut ctx = EpochContext::new(epoch, &metrics, &*model, learning_rate);
        chain.on_epoch_end(&mut ctx);
        let lr_override = ctx.lr_override();
        drop(ctx);

        if let Some(next) = lr_override {
            let state = self.state_mut(model)?;
            if let Some(opt) = state.optimizer.as_mut() {
                tracing::debug!(from = opt.learning_rate, to = next, "applying learning-rate override");
                opt.learning_rate = next;
            }
        }

        Ok(metrics)
    }

    fn serialize(&self, model: &ModelHandle) -> TrainResult<Vec<u8>> {
        let state = self.state(model)?;
        Ok(serde_json::to_vec_pretty(state)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> TrainResult<ModelHandle> {
        let state: HistogramModel = serde_json::from_slice(bytes)?;
        Ok(ModelHandle::new(self.id(), Box::new(state)))
    }
}
