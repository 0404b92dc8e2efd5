//! Players: a search strategy bound to the scorer it consults.
//!
//! Players are assembled from option strings through an explicit
//! `Registry`, for example `"linear,ab,max_depth=3,randomness=0.1"`: one
//! key selects the scorer, one selects the strategy, and the remaining
//! keys configure them.

pub mod registry;

use std::sync::Arc;

use crate::core::{GameRules, Result};
use crate::nn::PositionScorer;
use crate::search::{SearchResult, Searcher};

pub use registry::{Registry, ScorerBuilder, SearchContext, SearcherBuilder};

/// A configured player.
pub struct Player<G: GameRules> {
    name: String,
    searcher: Arc<dyn Searcher<G>>,
    scorer: Arc<dyn PositionScorer<G>>,
}

impl<G: GameRules> Clone for Player<G> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            searcher: Arc::clone(&self.searcher),
            scorer: Arc::clone(&self.scorer),
        }
    }
}

impl<G: GameRules> std::fmt::Debug for Player<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("name", &self.name)
            .field("searcher", &self.searcher.name())
            .finish()
    }
}

impl<G: GameRules> Player<G> {
    /// Bind `searcher` and `scorer` under `name`.
    pub fn new(
        name: impl Into<String>,
        searcher: Arc<dyn Searcher<G>>,
        scorer: Arc<dyn PositionScorer<G>>,
    ) -> Self {
        Self {
            name: name.into(),
            searcher,
            scorer,
        }
    }

    /// Player name, usually its option string.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Search strategy.
    pub fn searcher(&self) -> &Arc<dyn Searcher<G>> {
        &self.searcher
    }

    /// Scorer the strategy consults.
    pub fn scorer(&self) -> &Arc<dyn PositionScorer<G>> {
        &self.scorer
    }

    /// Choose an action at `position`.
    pub fn play(&self, position: &G::Position) -> Result<SearchResult<G>> {
        self.searcher.search(position)
    }

    /// Drop cached search work tied to `position`.
    pub fn release(&self, position: &G::Position) {
        self.searcher.release(position);
    }
}
