//! Position-level scoring used by searchers.
//!
//! `PositionScorer` is what a searcher sees: positions in, scores out, from
//! the perspective of the side to move at each scored position.
//! `ModelScorer` implements it on top of a `StateEncoder` and an evaluator,
//! either calling the session pool directly or going through the
//! `AutoBatchDispatcher` so that concurrent searches share batches.

use std::sync::Arc;

use crate::core::{EngineError, GameRules, Result};

use super::dispatch::{AutoBatchDispatcher, Ticket};
use super::encoder::StateEncoder;
use super::pool::SessionPool;
use super::traits::{Evaluator, FeatureBatch};

/// Scores positions for the side to move.
pub trait PositionScorer<G: GameRules>: Send + Sync {
    /// Score of one position.
    fn score(&self, position: &G::Position) -> Result<f32>;

    /// Scores of many positions, in order.
    fn batch_score(&self, positions: &[G::Position]) -> Result<Vec<f32>> {
        positions.iter().map(|p| self.score(p)).collect()
    }

    /// Score plus one weight per action of `actions`, if the model has a
    /// policy head.
    fn score_with_policy(
        &self,
        position: &G::Position,
        _actions: &[G::Action],
    ) -> Result<(f32, Option<Vec<f32>>)> {
        Ok((self.score(position)?, None))
    }

    /// Whether `score_with_policy` can return weights.
    fn has_policy(&self) -> bool {
        false
    }
}

/// How `ModelScorer` reaches the evaluator.
#[derive(Clone, Debug)]
pub enum Route {
    /// Call the pool synchronously on the caller's thread.
    Direct(Arc<SessionPool>),
    /// Queue requests on the batching dispatcher.
    Batched(AutoBatchDispatcher),
}

/// Scorer backed by an encoder and an evaluator.
pub struct ModelScorer<G: GameRules> {
    encoder: Arc<dyn StateEncoder<G>>,
    route: Route,
}

impl<G: GameRules> std::fmt::Debug for ModelScorer<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelScorer").field("route", &self.route).finish()
    }
}

impl<G: GameRules> ModelScorer<G> {
    /// Scorer calling `pool` directly.
    pub fn direct(encoder: Arc<dyn StateEncoder<G>>, pool: Arc<SessionPool>) -> Self {
        Self {
            encoder,
            route: Route::Direct(pool),
        }
    }

    /// Scorer going through `dispatcher`.
    pub fn batched(encoder: Arc<dyn StateEncoder<G>>, dispatcher: AutoBatchDispatcher) -> Self {
        Self {
            encoder,
            route: Route::Batched(dispatcher),
        }
    }

    /// How this scorer reaches the evaluator.
    #[must_use]
    pub fn route(&self) -> &Route {
        &self.route
    }

    fn evaluate_direct(
        pool: &SessionPool,
        batch: &FeatureBatch,
    ) -> Result<Vec<(f32, Option<Vec<f32>>)>> {
        pool.evaluate(batch)
            .map_err(EngineError::from)?
            .split(batch)
    }
}

impl<G: GameRules> PositionScorer<G> for ModelScorer<G> {
    fn score(&self, position: &G::Position) -> Result<f32> {
        Ok(self.score_with_policy(position, &[])?.0)
    }

    fn batch_score(&self, positions: &[G::Position]) -> Result<Vec<f32>> {
        match &self.route {
            Route::Direct(pool) => {
                let mut batch = FeatureBatch::with_capacity(positions.len());
                for position in positions {
                    batch.push(self.encoder.encode(position), 0, Vec::new());
                }
                Ok(Self::evaluate_direct(pool, &batch)?
                    .into_iter()
                    .map(|(score, _)| score)
                    .collect())
            }
            Route::Batched(dispatcher) => {
                // Submit everything before waiting so the positions can share
                // batches with each other and with other callers.
                let tickets: Vec<Ticket> = positions
                    .iter()
                    .map(|p| dispatcher.submit(self.encoder.encode(p), 0, Vec::new()))
                    .collect();
                tickets
                    .into_iter()
                    .map(|t| t.wait().map(|out| out.score))
                    .collect()
            }
        }
    }

    fn score_with_policy(
        &self,
        position: &G::Position,
        actions: &[G::Action],
    ) -> Result<(f32, Option<Vec<f32>>)> {
        let features = self.encoder.encode(position);
        let action_features = if actions.is_empty() {
            Vec::new()
        } else {
            self.encoder.encode_actions(position, actions)
        };
        match &self.route {
            Route::Direct(pool) => {
                let mut batch = FeatureBatch::with_capacity(1);
                batch.push(features, actions.len(), action_features);
                Self::evaluate_direct(pool, &batch)?
                    .pop()
                    .ok_or_else(|| EngineError::invariant("evaluator returned no result"))
            }
            Route::Batched(dispatcher) => {
                let out = dispatcher.score(features, actions.len(), action_features)?;
                Ok((out.score, out.action_weights))
            }
        }
    }

    fn has_policy(&self) -> bool {
        match &self.route {
            Route::Direct(pool) => pool.has_policy(),
            Route::Batched(dispatcher) => dispatcher.has_policy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CancelToken;
    use crate::games::{Nim, NimEncoder};
    use crate::nn::{ConstantEvaluator, DispatchConfig, LinearConfig, LinearEvaluator};

    fn nim_encoder(nim: &Nim) -> Arc<dyn StateEncoder<Nim>> {
        Arc::new(NimEncoder::new(nim))
    }

    #[test]
    fn test_direct_batch_score_is_one_call() {
        let nim = Nim::new(5, 2);
        let eval = Arc::new(ConstantEvaluator::new(0.3));
        let pool = Arc::new(SessionPool::single(eval.clone()));
        let scorer = ModelScorer::direct(nim_encoder(&nim), pool);

        let start = nim.initial_position(10);
        let children: Vec<_> = nim
            .legal_actions(&start)
            .iter()
            .map(|a| nim.apply(&start, a))
            .collect();
        let scores = scorer.batch_score(&children).unwrap();
        assert_eq!(scores, vec![0.3, 0.3]);
        assert_eq!(eval.calls(), 1);
    }

    #[test]
    fn test_linear_scores_through_encoder() {
        let nim = Nim::new(4, 1);
        // Even piles lose for the side to move.
        let eval = Arc::new(LinearEvaluator::with_weights(
            vec![-1.0, 1.0, 0.0],
            LinearConfig::default(),
        ));
        let scorer = ModelScorer::direct(nim_encoder(&nim), Arc::new(SessionPool::single(eval)));
        let start = nim.initial_position(10);
        assert!(scorer.score(&start).unwrap() < 0.0);
        let next = nim.apply(&start, &1);
        assert!(scorer.score(&next).unwrap() > 0.0);
    }

    #[test]
    fn test_batched_policy_weights() {
        let nim = Nim::new(5, 3);
        let eval = Arc::new(ConstantEvaluator::new(0.0).with_policy());
        let pool = Arc::new(SessionPool::single(eval));
        let dispatcher = AutoBatchDispatcher::new(
            pool,
            DispatchConfig::default().with_batch_size(1),
            CancelToken::new(),
        );
        let scorer = ModelScorer::batched(nim_encoder(&nim), dispatcher);
        assert!(PositionScorer::<Nim>::has_policy(&scorer));

        let start = nim.initial_position(10);
        let actions = nim.legal_actions(&start);
        let (score, weights) = scorer.score_with_policy(&start, &actions).unwrap();
        assert_eq!(score, 0.0);
        let weights = weights.unwrap();
        assert_eq!(weights.len(), 3);
        assert!((weights.iter().sum::<f32>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_batched_batch_score_shares_batches() {
        let nim = Nim::new(9, 3);
        let eval = Arc::new(ConstantEvaluator::new(0.0));
        let pool = Arc::new(SessionPool::single(eval.clone()));
        let dispatcher = AutoBatchDispatcher::new(
            pool,
            DispatchConfig::default().with_batch_size(3),
            CancelToken::new(),
        );
        let scorer = ModelScorer::batched(nim_encoder(&nim), dispatcher);

        let start = nim.initial_position(10);
        let children: Vec<_> = nim
            .legal_actions(&start)
            .iter()
            .map(|a| nim.apply(&start, a))
            .collect();
        assert_eq!(scorer.batch_score(&children).unwrap().len(), 3);
        assert_eq!(eval.batch_sizes(), vec![3]);
    }
}
