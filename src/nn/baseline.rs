//! Baseline evaluators.
//!
//! - `ConstantEvaluator`: fixed score and uniform policy; records how it is
//!   called, which makes it the stub of choice in tests
//! - `LinearEvaluator`: `tanh(w·x + b)` trained by gradient descent on the
//!   mean squared error, a small but real learner

use std::io::{Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::core::EvalError;

use super::traits::{EvalOutput, Evaluator, FeatureBatch};

/// Evaluator returning the same score for every position.
#[derive(Debug)]
pub struct ConstantEvaluator {
    score: f32,
    policy: bool,
    batch_size: usize,
    calls: AtomicUsize,
    learn_calls: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
}

impl ConstantEvaluator {
    /// Evaluator scoring everything as `score`, without a policy head.
    #[must_use]
    pub fn new(score: f32) -> Self {
        Self {
            score,
            policy: false,
            batch_size: 32,
            calls: AtomicUsize::new(0),
            learn_calls: AtomicUsize::new(0),
            batch_sizes: Mutex::new(Vec::new()),
        }
    }

    /// Also return uniform action weights.
    #[must_use]
    pub fn with_policy(mut self) -> Self {
        self.policy = true;
        self
    }

    /// Set the preferred learning batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Number of `evaluate` calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of `learn` calls so far.
    #[must_use]
    pub fn learn_calls(&self) -> usize {
        self.learn_calls.load(Ordering::SeqCst)
    }

    /// Size of every batch evaluated, in call order.
    #[must_use]
    pub fn batch_sizes(&self) -> Vec<usize> {
        match self.batch_sizes.lock() {
            Ok(sizes) => sizes.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Evaluator for ConstantEvaluator {
    fn name(&self) -> &str {
        "constant"
    }

    fn evaluate(&self, batch: &FeatureBatch) -> Result<EvalOutput, EvalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut sizes) = self.batch_sizes.lock() {
            sizes.push(batch.len());
        }
        let action_weights = if self.policy {
            batch
                .action_counts
                .iter()
                .flat_map(|&n| std::iter::repeat(1.0 / n.max(1) as f32).take(n))
                .collect()
        } else {
            Vec::new()
        };
        Ok(EvalOutput {
            scores: vec![self.score; batch.len()],
            action_weights,
        })
    }

    fn learn(
        &self,
        batch: &FeatureBatch,
        labels: &[f32],
        _policy_labels: &[Vec<f32>],
    ) -> Result<f32, EvalError> {
        if labels.len() != batch.len() {
            return Err(EvalError::Shape(format!(
                "{} labels for {} positions",
                labels.len(),
                batch.len()
            )));
        }
        self.learn_calls.fetch_add(1, Ordering::SeqCst);
        let n = labels.len().max(1) as f32;
        Ok(labels.iter().map(|l| (l - self.score).powi(2)).sum::<f32>() / n)
    }

    fn save(&self, out: &mut dyn Write) -> Result<(), EvalError> {
        bincode::serialize_into(out, &self.score)?;
        Ok(())
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn has_policy(&self) -> bool {
        self.policy
    }
}

/// Hyper-parameters of `LinearEvaluator`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinearConfig {
    /// Step size of each update.
    pub learning_rate: f32,
    /// L2 regularization factor.
    pub l2_reg: f32,
    /// Gradients are clipped to this L2 length (0 = no clipping).
    pub gradient_clip: f32,
    /// Preferred mini-batch size.
    pub batch_size: usize,
}

impl Default for LinearConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            l2_reg: 1e-4,
            gradient_clip: 1.0,
            batch_size: 100,
        }
    }
}

impl LinearConfig {
    /// Set the learning rate.
    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set the L2 regularization factor.
    pub fn with_l2_reg(mut self, l2_reg: f32) -> Self {
        self.l2_reg = l2_reg;
        self
    }

    /// Set the preferred mini-batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

#[derive(Serialize, Deserialize)]
struct LinearCheckpoint {
    weights: Vec<f32>,
}

/// Linear model squashed by `tanh`. The last weight is the bias.
#[derive(Debug)]
pub struct LinearEvaluator {
    weights: RwLock<Vec<f32>>,
    config: LinearConfig,
}

impl LinearEvaluator {
    /// Zero-initialized model over `features` inputs.
    #[must_use]
    pub fn new(features: usize, config: LinearConfig) -> Self {
        Self {
            weights: RwLock::new(vec![0.0; features + 1]),
            config,
        }
    }

    /// Model with explicit weights (bias last).
    #[must_use]
    pub fn with_weights(weights: Vec<f32>, config: LinearConfig) -> Self {
        Self {
            weights: RwLock::new(weights),
            config,
        }
    }

    /// Restore a model written by `save`.
    pub fn load(reader: impl Read, config: LinearConfig) -> Result<Self, EvalError> {
        let checkpoint: LinearCheckpoint = bincode::deserialize_from(reader)?;
        Ok(Self::with_weights(checkpoint.weights, config))
    }

    /// Copy of the current weights.
    pub fn weights(&self) -> Result<Vec<f32>, EvalError> {
        Ok(self.read()?.clone())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<f32>>, EvalError> {
        self.weights
            .read()
            .map_err(|_| EvalError::Backend("linear weights lock poisoned".into()))
    }

    fn check_width(weights: &[f32], batch: &FeatureBatch) -> Result<(), EvalError> {
        let expected = weights.len() - 1;
        match batch.positions.iter().find(|p| p.len() != expected) {
            Some(bad) => Err(EvalError::Shape(format!(
                "features have {} values, model expects {}",
                bad.len(),
                expected
            ))),
            None => Ok(()),
        }
    }

    fn forward(weights: &[f32], features: &[f32]) -> f32 {
        let (w, bias) = weights.split_at(weights.len() - 1);
        let logit = bias[0] + w.iter().zip(features).map(|(a, b)| a * b).sum::<f32>();
        logit.tanh()
    }

    fn loss(&self, weights: &[f32], batch: &FeatureBatch, labels: &[f32]) -> f32 {
        let n = labels.len().max(1) as f32;
        let mse = batch
            .positions
            .iter()
            .zip(labels)
            .map(|(x, label)| (label - Self::forward(weights, &x.tensor)).powi(2))
            .sum::<f32>()
            / n;
        mse + self.config.l2_reg * weights.iter().map(|w| w * w).sum::<f32>()
    }
}

impl Evaluator for LinearEvaluator {
    fn name(&self) -> &str {
        "linear"
    }

    fn evaluate(&self, batch: &FeatureBatch) -> Result<EvalOutput, EvalError> {
        let weights = self.read()?;
        Self::check_width(&weights, batch)?;
        Ok(EvalOutput {
            scores: batch
                .positions
                .iter()
                .map(|x| Self::forward(&weights, &x.tensor))
                .collect(),
            action_weights: Vec::new(),
        })
    }

    fn learn(
        &self,
        batch: &FeatureBatch,
        labels: &[f32],
        _policy_labels: &[Vec<f32>],
    ) -> Result<f32, EvalError> {
        if labels.len() != batch.len() || batch.is_empty() {
            return Err(EvalError::Shape(format!(
                "{} labels for {} positions",
                labels.len(),
                batch.len()
            )));
        }
        let mut weights = self
            .weights
            .write()
            .map_err(|_| EvalError::Backend("linear weights lock poisoned".into()))?;
        Self::check_width(&weights, batch)?;

        // d/dw of (label - tanh(w·x+b))^2 averaged over the batch.
        let n = labels.len() as f32;
        let bias = weights.len() - 1;
        let mut grad = vec![0.0f32; weights.len()];
        for (x, label) in batch.positions.iter().zip(labels) {
            let score = Self::forward(&weights, &x.tensor);
            let c = 2.0 * (score - label) * (1.0 - score * score) / n;
            for (g, xi) in grad.iter_mut().zip(&x.tensor) {
                *g += c * xi;
            }
            grad[bias] += c;
        }
        if self.config.l2_reg > 0.0 {
            for (g, w) in grad.iter_mut().zip(weights.iter()) {
                *g += 2.0 * self.config.l2_reg * w;
            }
        }
        if self.config.gradient_clip > 0.0 {
            let norm = grad.iter().map(|g| g * g).sum::<f32>().sqrt();
            if norm > self.config.gradient_clip {
                let ratio = self.config.gradient_clip / norm;
                grad.iter_mut().for_each(|g| *g *= ratio);
            }
        }
        for (w, g) in weights.iter_mut().zip(&grad) {
            *w -= self.config.learning_rate * g;
        }
        Ok(self.loss(&weights, batch, labels))
    }

    fn save(&self, out: &mut dyn Write) -> Result<(), EvalError> {
        let checkpoint = LinearCheckpoint {
            weights: self.weights()?,
        };
        bincode::serialize_into(out, &checkpoint)?;
        Ok(())
    }

    fn batch_size(&self) -> usize {
        self.config.batch_size
    }
}
