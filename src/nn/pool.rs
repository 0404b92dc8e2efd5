//! Round-robin pool of interchangeable evaluator sessions.
//!
//! Sessions are expected to share parameters (for example several handles
//! onto one model, or replicas on different devices that are kept in
//! sync), so any of them may serve any batch. Learning and checkpointing go
//! to the first session.

use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::core::EvalError;

use super::traits::{EvalOutput, Evaluator, FeatureBatch};

/// Set of evaluator sessions served in turn.
pub struct SessionPool {
    sessions: Vec<Arc<dyn Evaluator>>,
    turn: Mutex<usize>,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("sessions", &self.sessions.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl SessionPool {
    /// Pool over the given sessions.
    ///
    /// Returns `None` when `sessions` is empty.
    #[must_use]
    pub fn new(sessions: Vec<Arc<dyn Evaluator>>) -> Option<Self> {
        if sessions.is_empty() {
            return None;
        }
        Some(Self {
            sessions,
            turn: Mutex::new(0),
        })
    }

    /// Pool with a single session.
    #[must_use]
    pub fn single(session: Arc<dyn Evaluator>) -> Self {
        Self {
            sessions: vec![session],
            turn: Mutex::new(0),
        }
    }

    /// Pool of `count` handles onto the same thread-safe evaluator.
    #[must_use]
    pub fn replicate(session: Arc<dyn Evaluator>, count: usize) -> Self {
        Self {
            sessions: vec![session; count.max(1)],
            turn: Mutex::new(0),
        }
    }

    /// Number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Always false; a pool has at least one session.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Next session in round-robin order.
    pub fn next_session(&self) -> Arc<dyn Evaluator> {
        let index = {
            let mut turn = match self.turn.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let index = *turn;
            *turn = (index + 1) % self.sessions.len();
            index
        };
        Arc::clone(&self.sessions[index])
    }

    /// Session used for learning and checkpoints.
    #[must_use]
    pub fn primary(&self) -> &Arc<dyn Evaluator> {
        &self.sessions[0]
    }
}

impl Evaluator for SessionPool {
    fn name(&self) -> &str {
        self.primary().name()
    }

    fn evaluate(&self, batch: &FeatureBatch) -> Result<EvalOutput, EvalError> {
        self.next_session().evaluate(batch)
    }

    fn learn(
        &self,
        batch: &FeatureBatch,
        labels: &[f32],
        policy_labels: &[Vec<f32>],
    ) -> Result<f32, EvalError> {
        self.primary().learn(batch, labels, policy_labels)
    }

    fn save(&self, out: &mut dyn Write) -> Result<(), EvalError> {
        self.primary().save(out)
    }

    fn batch_size(&self) -> usize {
        self.primary().batch_size()
    }

    fn has_policy(&self) -> bool {
        self.primary().has_policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{ConstantEvaluator, EncodedState};

    #[test]
    fn test_round_robin() {
        let a = Arc::new(ConstantEvaluator::new(0.0));
        let b = Arc::new(ConstantEvaluator::new(1.0));
        let pool = SessionPool::new(vec![a.clone() as Arc<dyn Evaluator>, b.clone()]).unwrap();

        let mut batch = FeatureBatch::new();
        batch.push(EncodedState::flat(vec![0.0]), 0, Vec::new());

        let scores: Vec<f32> = (0..4)
            .map(|_| pool.evaluate(&batch).unwrap().scores[0])
            .collect();
        assert_eq!(scores, vec![0.0, 1.0, 0.0, 1.0]);
        assert_eq!(a.calls(), 2);
        assert_eq!(b.calls(), 2);
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert!(SessionPool::new(Vec::new()).is_none());
    }

    #[test]
    fn test_learning_goes_to_primary() {
        let a = Arc::new(ConstantEvaluator::new(0.0));
        let b = Arc::new(ConstantEvaluator::new(0.0));
        let pool = SessionPool::new(vec![a.clone() as Arc<dyn Evaluator>, b.clone()]).unwrap();
        let mut batch = FeatureBatch::new();
        batch.push(EncodedState::flat(vec![0.0]), 0, Vec::new());
        pool.learn(&batch, &[1.0], &[Vec::new()]).unwrap();
        assert_eq!(a.learn_calls(), 1);
        assert_eq!(b.learn_calls(), 0);
    }
}
