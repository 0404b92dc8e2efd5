//! Game-tree search strategies.
//!
//! ## Overview
//!
//! A `Searcher` picks an action at a position, using a `PositionScorer` as
//! its oracle. Every strategy returns a legal action of the position, or
//! the skip action when and only when no legal action exists, and never
//! carries state from one call to the next apart from the shared
//! `NextPositionCache`.
//!
//! - **AlphaBeta**: depth-bounded negamax with pruning, optionally
//!   deepened iteratively under a time budget
//! - **Randomized**: samples among a base strategy's scored candidates
//! - **Mcts** (in `crate::mcts`): PUCT tree search
//!
//! All scores are from the perspective of the side to move at the searched
//! position.
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//! use rust_selfplay::core::GameRules;
//! use rust_selfplay::games::{GraphGame, GraphScorer};
//! use rust_selfplay::search::{AlphaBeta, AlphaBetaConfig, NextPositionCache, Searcher};
//!
//! // Two moves, each answered by one of two replies.
//! let game = Arc::new(GraphGame::uniform_tree(2, 2, |leaf| [0.5, -0.2, 0.1, 0.3][leaf]));
//! let scorer = Arc::new(GraphScorer::new(Arc::clone(&game)));
//! let cache = Arc::new(NextPositionCache::new(Arc::clone(&game)));
//! let searcher = AlphaBeta::new(Arc::clone(&game), scorer, cache, AlphaBetaConfig::default());
//!
//! let result = searcher.search(&game.initial_position(10)).unwrap();
//! assert_eq!(result.action, 2); // the second move
//! ```

pub mod alpha_beta;
pub mod cache;
pub mod randomized;

use serde::{Deserialize, Serialize};

use crate::core::{ConfigError, EngineError, GameRules, Params, Result};

pub use alpha_beta::{AlphaBeta, AlphaBetaConfig};
pub use cache::{Expansion, NextPositionCache};
pub use randomized::Randomized;

/// Outcome of one search.
#[derive(Clone, Debug)]
pub struct SearchResult<G: GameRules> {
    /// Chosen action.
    pub action: G::Action,
    /// Position after `action`.
    pub next: G::Position,
    /// Value of `action` for the side to move.
    pub score: f32,
    /// Training target over the position's actions, if the strategy has one.
    pub policy: Option<Vec<f32>>,
}

/// One root action with its searched value.
#[derive(Clone, Debug)]
pub struct ScoredAction<G: GameRules> {
    /// Index in the position's action enumeration.
    pub index: usize,
    /// The action.
    pub action: G::Action,
    /// Position after `action`.
    pub next: G::Position,
    /// Value of `action` for the side to move.
    pub score: f32,
}

impl<G: GameRules> ScoredAction<G> {
    /// Turn into a search result with the given policy.
    pub fn into_result(self, policy: Option<Vec<f32>>) -> SearchResult<G> {
        SearchResult {
            action: self.action,
            next: self.next,
            score: self.score,
            policy,
        }
    }
}

/// A strategy choosing actions.
pub trait Searcher<G: GameRules>: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Choose an action at a non-terminal `position`.
    fn search(&self, position: &G::Position) -> Result<SearchResult<G>>;

    /// Value of every root action, one entry per legal action in
    /// enumeration order. Actions the strategy never looked at score
    /// `f32::NEG_INFINITY`.
    fn score_candidates(&self, position: &G::Position) -> Result<Vec<ScoredAction<G>>>;

    /// Forget cached work tied to `position`.
    fn release(&self, _position: &G::Position) {}
}

/// Options shared by every strategy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Softmax temperature of the randomized wrapper; `0` disables it.
    pub randomness: f32,
    /// Seed for strategies that sample.
    pub seed: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            randomness: 0.0,
            seed: 42,
        }
    }
}

impl SearchConfig {
    /// Set the randomized wrapper temperature.
    #[must_use]
    pub fn with_randomness(mut self, randomness: f32) -> Self {
        self.randomness = randomness;
        self
    }

    /// Set the seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Pop `randomness` and `seed` from `params`.
    pub fn from_params(params: &mut Params) -> std::result::Result<Self, ConfigError> {
        let defaults = Self::default();
        let randomness: f32 = params.pop_or("randomness", defaults.randomness)?;
        if !randomness.is_finite() || randomness < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "randomness".into(),
                value: randomness.to_string(),
                reason: "must be a non-negative number".into(),
            });
        }
        Ok(Self {
            randomness,
            seed: params.pop_or("seed", defaults.seed)?,
        })
    }
}

/// Index of the first maximum. Ties go to the lower index.
pub(crate) fn first_best(scores: impl IntoIterator<Item = f32>) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, score) in scores.into_iter().enumerate() {
        match best {
            Some((_, b)) if score <= b => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

pub(crate) fn finished_game() -> EngineError {
    EngineError::invariant("search requested at a finished position")
}
