//! Explicit registry of scorer and strategy builders.
//!
//! The assembling code decides which scorers and strategies exist by
//! registering them; nothing is registered implicitly.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use rust_selfplay::games::{GraphGame, GraphScorer};
//! use rust_selfplay::nn::PositionScorer;
//! use rust_selfplay::player::Registry;
//!
//! let game = Arc::new(GraphGame::uniform_tree(2, 2, |i| i as f32 / 4.0));
//! let scorer_game = Arc::clone(&game);
//! let registry = Registry::new(Arc::clone(&game))
//!     .with_default_searchers()
//!     .with_scorer("static", move |_| {
//!         let scorer = GraphScorer::new(Arc::clone(&scorer_game));
//!         Ok(Arc::new(scorer) as Arc<dyn PositionScorer<GraphGame>>)
//!     });
//!
//! let player = registry.build_player("static,ab,max_depth=2").unwrap();
//! assert_eq!(player.searcher().name(), "ab");
//!
//! // Unknown keys are rejected.
//! assert!(registry.build_player("static,ab,depth=2").is_err());
//! ```

use std::sync::Arc;

use crate::core::{ConfigError, GameRules, Params};
use crate::mcts::{MCTSConfig, MCTSSearch};
use crate::nn::PositionScorer;
use crate::search::{
    AlphaBeta, AlphaBetaConfig, NextPositionCache, Randomized, SearchConfig, Searcher,
};

use super::Player;

/// Builds a scorer from the options left after its key was matched.
pub type ScorerBuilder<G> =
    Box<dyn Fn(&mut Params) -> Result<Arc<dyn PositionScorer<G>>, ConfigError> + Send + Sync>;

/// Builds a strategy from its options and the player's collaborators.
pub type SearcherBuilder<G> = Box<
    dyn Fn(&mut Params, &SearchContext<G>) -> Result<Arc<dyn Searcher<G>>, ConfigError>
        + Send
        + Sync,
>;

/// Collaborators handed to strategy builders.
pub struct SearchContext<G: GameRules> {
    /// Game rules.
    pub rules: Arc<G>,
    /// The player's scorer.
    pub scorer: Arc<dyn PositionScorer<G>>,
    /// The player's next-position cache.
    pub cache: Arc<NextPositionCache<G>>,
}

/// Registry of scorer and strategy builders for one game.
pub struct Registry<G: GameRules> {
    rules: Arc<G>,
    scorers: Vec<(String, ScorerBuilder<G>)>,
    searchers: Vec<(String, SearcherBuilder<G>)>,
    default_searcher: Option<String>,
}

impl<G: GameRules> std::fmt::Debug for Registry<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("scorers", &self.scorer_keys())
            .field("searchers", &self.searcher_keys())
            .field("default_searcher", &self.default_searcher)
            .finish()
    }
}

impl<G: GameRules> Registry<G> {
    /// Empty registry. `ab` is the default strategy once registered.
    pub fn new(rules: Arc<G>) -> Self {
        Self {
            rules,
            scorers: Vec::new(),
            searchers: Vec::new(),
            default_searcher: Some("ab".to_string()),
        }
    }

    /// Register the built-in strategies `ab` and `mcts`.
    #[must_use]
    pub fn with_default_searchers(self) -> Self {
        self.with_searcher("ab", |params, ctx| {
            let config = AlphaBetaConfig::from_params(params)?;
            Ok(Arc::new(AlphaBeta::new(
                Arc::clone(&ctx.rules),
                Arc::clone(&ctx.scorer),
                Arc::clone(&ctx.cache),
                config,
            )) as Arc<dyn Searcher<G>>)
        })
        .with_searcher("mcts", |params, ctx| {
            let config = MCTSConfig::from_params(params)?;
            Ok(Arc::new(MCTSSearch::new(
                Arc::clone(&ctx.rules),
                Arc::clone(&ctx.scorer),
                Arc::clone(&ctx.cache),
                config,
            )) as Arc<dyn Searcher<G>>)
        })
    }

    /// Register a scorer under `key`.
    #[must_use]
    pub fn with_scorer<F>(mut self, key: impl Into<String>, builder: F) -> Self
    where
        F: Fn(&mut Params) -> Result<Arc<dyn PositionScorer<G>>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.scorers.push((key.into(), Box::new(builder)));
        self
    }

    /// Register a strategy under `key`.
    #[must_use]
    pub fn with_searcher<F>(mut self, key: impl Into<String>, builder: F) -> Self
    where
        F: Fn(&mut Params, &SearchContext<G>) -> Result<Arc<dyn Searcher<G>>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.searchers.push((key.into(), Box::new(builder)));
        self
    }

    /// Strategy used when the options name none. `None` makes one required.
    #[must_use]
    pub fn with_default_searcher(mut self, key: Option<&str>) -> Self {
        self.default_searcher = key.map(str::to_string);
        self
    }

    /// Registered scorer keys.
    pub fn scorer_keys(&self) -> Vec<&str> {
        self.scorers.iter().map(|(k, _)| k.as_str()).collect()
    }

    /// Registered strategy keys.
    pub fn searcher_keys(&self) -> Vec<&str> {
        self.searchers.iter().map(|(k, _)| k.as_str()).collect()
    }

    /// Game rules.
    pub fn rules(&self) -> &Arc<G> {
        &self.rules
    }

    /// Build a player from an option string.
    ///
    /// Exactly one registered scorer key must appear. At most one strategy
    /// key may appear; without one the default strategy is used. Every
    /// other key must be consumed by the builders.
    pub fn build_player(&self, config: &str) -> Result<Player<G>, ConfigError> {
        let mut params = Params::parse(config)?;

        let scorer_index = single_match(&params, &self.scorers, "scorer")?;
        let scorer_index = scorer_index.ok_or_else(|| ConfigError::Missing {
            kind: "scorer",
            context: config.to_string(),
        })?;
        let (scorer_key, build_scorer) = &self.scorers[scorer_index];
        let scorer = build_scorer(&mut params)?;
        params.pop(scorer_key);

        let searcher_index = match single_match(&params, &self.searchers, "search strategy")? {
            Some(index) => index,
            None => self.default_searcher_index(config)?,
        };
        let (searcher_key, build_searcher) = &self.searchers[searcher_index];
        let ctx = SearchContext {
            rules: Arc::clone(&self.rules),
            scorer: Arc::clone(&scorer),
            cache: Arc::new(NextPositionCache::new(Arc::clone(&self.rules))),
        };
        let mut searcher = build_searcher(&mut params, &ctx)?;
        params.pop(searcher_key);

        let common = SearchConfig::from_params(&mut params)?;
        if common.randomness > 0.0 {
            searcher = Arc::new(Randomized::new(searcher, common.randomness, common.seed));
        }

        params.finish()?;
        log::info!("built player {:?} using {}", config, searcher.name());
        Ok(Player::new(config, searcher, scorer))
    }

    fn default_searcher_index(&self, config: &str) -> Result<usize, ConfigError> {
        self.default_searcher
            .as_deref()
            .and_then(|key| self.searchers.iter().position(|(k, _)| k == key))
            .ok_or_else(|| ConfigError::Missing {
                kind: "search strategy",
                context: config.to_string(),
            })
    }
}

fn single_match<B>(
    params: &Params,
    builders: &[(String, B)],
    kind: &str,
) -> Result<Option<usize>, ConfigError> {
    let matches: Vec<usize> = builders
        .iter()
        .enumerate()
        .filter(|(_, (key, _))| params.has(key))
        .map(|(i, _)| i)
        .collect();
    match matches.as_slice() {
        [] => Ok(None),
        [one] => Ok(Some(*one)),
        many => Err(ConfigError::Conflict {
            context: params.source().to_string(),
            reason: format!(
                "more than one {kind} selected: {}",
                many.iter().map(|&i| builders[i].0.as_str()).collect::<Vec<_>>().join(", ")
            ),
        }),
    }
}
