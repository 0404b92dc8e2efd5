//! Evaluator trait and the batch types that flow through it.
//!
//! An evaluator is the numeric model: it maps a batch of encoded positions
//! to one score each, optionally to per-action weights, and it can learn
//! from labeled examples. Implementations sit behind `Arc<dyn Evaluator>`
//! and are called from many threads, so every method takes `&self`.

use std::io::Write;
use std::ops::Range;

use crate::core::{EngineError, EvalError};

use super::encoder::EncodedState;

/// Concatenated features for a batch of positions.
///
/// Position `i` owns `action_counts[i]` consecutive entries of the flat
/// per-action arrays (features and returned weights), in position order.
#[derive(Clone, Debug, Default)]
pub struct FeatureBatch {
    /// One entry per position.
    pub positions: Vec<EncodedState>,
    /// Number of actions each position asks weights for (0 = no policy).
    pub action_counts: Vec<usize>,
    /// Per-action features, concatenated. Empty when the encoder has none.
    pub action_features: Vec<EncodedState>,
}

impl FeatureBatch {
    /// Empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty batch with room for `capacity` positions.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            positions: Vec::with_capacity(capacity),
            action_counts: Vec::with_capacity(capacity),
            action_features: Vec::new(),
        }
    }

    /// Append one position.
    pub fn push(
        &mut self,
        features: EncodedState,
        action_count: usize,
        action_features: Vec<EncodedState>,
    ) {
        self.positions.push(features);
        self.action_counts.push(action_count);
        self.action_features.extend(action_features);
    }

    /// Number of positions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether the batch has no positions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Sum of all action counts.
    #[must_use]
    pub fn total_actions(&self) -> usize {
        self.action_counts.iter().sum()
    }

    /// Slice of the flat per-action arrays owned by each position.
    #[must_use]
    pub fn action_ranges(&self) -> Vec<Range<usize>> {
        let mut start = 0;
        self.action_counts
            .iter()
            .map(|&count| {
                let range = start..start + count;
                start += count;
                range
            })
            .collect()
    }
}

/// Result of one evaluator call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EvalOutput {
    /// One score per position, for the side to move there.
    pub scores: Vec<f32>,
    /// Flat per-action weights, or empty when the model has no policy.
    pub action_weights: Vec<f32>,
}

impl EvalOutput {
    /// Split into per-position `(score, weights)` pairs.
    ///
    /// Fails with an invariant violation if the output does not match the
    /// batch it was computed for.
    pub fn split(self, batch: &FeatureBatch) -> Result<Vec<(f32, Option<Vec<f32>>)>, EngineError> {
        if self.scores.len() != batch.len() {
            return Err(EngineError::invariant(format!(
                "evaluator returned {} scores for {} positions",
                self.scores.len(),
                batch.len()
            )));
        }
        let with_policy = !self.action_weights.is_empty();
        if with_policy && self.action_weights.len() != batch.total_actions() {
            return Err(EngineError::invariant(format!(
                "evaluator returned {} action weights for {} actions",
                self.action_weights.len(),
                batch.total_actions()
            )));
        }
        Ok(self
            .scores
            .into_iter()
            .zip(batch.action_ranges())
            .map(|(score, range)| {
                let weights = (with_policy && !range.is_empty())
                    .then(|| self.action_weights[range].to_vec());
                (score, weights)
            })
            .collect())
    }
}

/// Numeric position evaluator that can also learn.
pub trait Evaluator: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Score every position of `batch`.
    fn evaluate(&self, batch: &FeatureBatch) -> Result<EvalOutput, EvalError>;

    /// One learning step on labeled examples, returning the loss.
    ///
    /// `policy_labels[i]` is empty when position `i` has no policy target.
    fn learn(
        &self,
        batch: &FeatureBatch,
        labels: &[f32],
        policy_labels: &[Vec<f32>],
    ) -> Result<f32, EvalError>;

    /// Write a checkpoint of the model.
    fn save(&self, out: &mut dyn Write) -> Result<(), EvalError>;

    /// Preferred mini-batch size for `learn`.
    fn batch_size(&self) -> usize {
        100
    }

    /// Whether `evaluate` produces action weights.
    fn has_policy(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_with_counts(counts: &[usize]) -> FeatureBatch {
        let mut batch = FeatureBatch::new();
        for &count in counts {
            batch.push(EncodedState::flat(vec![0.0]), count, Vec::new());
        }
        batch
    }

    #[test]
    fn test_action_ranges() {
        let batch = batch_with_counts(&[2, 0, 3]);
        assert_eq!(batch.total_actions(), 5);
        assert_eq!(batch.action_ranges(), vec![0..2, 2..2, 2..5]);
    }

    #[test]
    fn test_split_demultiplexes_by_position() {
        let batch = batch_with_counts(&[2, 0, 3]);
        let output = EvalOutput {
            scores: vec![0.1, 0.2, 0.3],
            action_weights: vec![0.5, 0.5, 0.2, 0.3, 0.5],
        };
        let split = output.split(&batch).unwrap();
        assert_eq!(split[0], (0.1, Some(vec![0.5, 0.5])));
        assert_eq!(split[1], (0.2, None));
        assert_eq!(split[2], (0.3, Some(vec![0.2, 0.3, 0.5])));
    }

    #[test]
    fn test_split_without_policy() {
        let batch = batch_with_counts(&[2, 1]);
        let output = EvalOutput {
            scores: vec![0.0, 1.0],
            action_weights: Vec::new(),
        };
        let split = output.split(&batch).unwrap();
        assert_eq!(split, vec![(0.0, None), (1.0, None)]);
    }

    #[test]
    fn test_split_rejects_count_mismatch() {
        let batch = batch_with_counts(&[1, 1]);
        let short = EvalOutput {
            scores: vec![0.0],
            action_weights: Vec::new(),
        };
        assert!(matches!(short.split(&batch), Err(EngineError::Invariant(_))));

        let bad_weights = EvalOutput {
            scores: vec![0.0, 0.0],
            action_weights: vec![1.0],
        };
        assert!(matches!(bad_weights.split(&batch), Err(EngineError::Invariant(_))));
    }
}
