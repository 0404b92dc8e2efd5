//! Softmax sampling over another strategy's candidates.
//!
//! The wrapper asks its base strategy once for the scored root actions and
//! samples from `softmax(score / randomness)`. Small `randomness` sharpens
//! the distribution towards the greedy choice, large values flatten it.

use std::sync::Arc;

use crate::core::{one_hot, EngineError, GameRules, Result, SeedSequence, WIN_SCORE};

use super::{finished_game, first_best, ScoredAction, SearchResult, Searcher};

/// Randomized wrapper around a base strategy.
pub struct Randomized<G: GameRules> {
    base: Arc<dyn Searcher<G>>,
    randomness: f32,
    seeds: SeedSequence,
    name: String,
}

impl<G: GameRules> std::fmt::Debug for Randomized<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Randomized")
            .field("base", &self.base.name())
            .field("randomness", &self.randomness)
            .finish()
    }
}

impl<G: GameRules> Randomized<G> {
    /// Wrap `base`, sampling with temperature `randomness`.
    pub fn new(base: Arc<dyn Searcher<G>>, randomness: f32, seed: u64) -> Self {
        let name = format!("{}+rand", base.name());
        Self {
            base,
            randomness,
            seeds: SeedSequence::new(seed),
            name,
        }
    }

    /// Sampling temperature.
    pub fn randomness(&self) -> f32 {
        self.randomness
    }
}

/// `softmax(score / temperature)`. Scores of `-inf` get probability zero;
/// if every score is `-inf` the result is uniform.
pub(crate) fn softmax(scores: &[f32], temperature: f32) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        return vec![1.0 / scores.len() as f32; scores.len()];
    }
    let exps: Vec<f32> = scores
        .iter()
        .map(|&s| ((s - max) / temperature).exp())
        .collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

impl<G: GameRules> Searcher<G> for Randomized<G> {
    fn name(&self) -> &str {
        &self.name
    }

    fn search(&self, position: &G::Position) -> Result<SearchResult<G>> {
        let mut candidates = self.base.score_candidates(position)?;
        if candidates.is_empty() {
            return Err(finished_game());
        }
        let count = candidates.len();
        if let Some((i, c)) = candidates.iter().enumerate().find(|(i, c)| c.index != *i) {
            return Err(EngineError::invariant(format!(
                "{}: candidate {i} carries action index {}",
                self.base.name(),
                c.index
            )));
        }

        if let Some(win) = candidates.iter().position(|c| c.score >= WIN_SCORE) {
            return Ok(candidates.swap_remove(win).into_result(Some(one_hot(count, win))));
        }

        let scores: Vec<f32> = candidates.iter().map(|c| c.score).collect();
        let greedy = first_best(scores.iter().copied()).unwrap_or(0);
        if self.randomness <= 0.0 {
            return Ok(candidates.swap_remove(greedy).into_result(Some(one_hot(count, greedy))));
        }

        let probabilities = softmax(&scores, self.randomness);
        let index = self
            .seeds
            .next_rng()
            .choose_weighted(&probabilities)
            .unwrap_or(greedy);
        Ok(candidates.swap_remove(index).into_result(Some(probabilities)))
    }

    fn score_candidates(&self, position: &G::Position) -> Result<Vec<ScoredAction<G>>> {
        self.base.score_candidates(position)
    }

    fn release(&self, position: &G::Position) {
        self.base.release(position);
    }
}
