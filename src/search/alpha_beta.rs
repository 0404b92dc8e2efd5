//! Depth-bounded alpha-beta search.
//!
//! Negamax formulation with fail-soft bounds: every value is from the
//! perspective of the side to move at the node it belongs to, and a child's
//! value is negated on the way up. Children are visited in enumeration
//! order and ties keep the earlier action, so the chosen action is the one
//! plain minimax would choose.
//!
//! Horizon positions are scored in one batch per node and scaled by
//! `EVAL_SCALE`, so a heuristic score never matches a proven win.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::{
    end_score, ConfigError, EngineError, GameRules, Params, Result, EVAL_SCALE, WIN_SCORE,
};
use crate::nn::PositionScorer;

use super::cache::{Expansion, NextPositionCache};
use super::{finished_game, ScoredAction, SearchResult, Searcher};

/// Deepest iteration tried when searching against a clock.
const MAX_TIMED_DEPTH: usize = 64;

/// Skip the next iteration unless this many times the last one's duration
/// is left on the clock.
const DEEPENING_FACTOR: u32 = 5;

/// Alpha-beta configuration parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlphaBetaConfig {
    /// Search depth in plies when no time budget is set.
    pub max_depth: usize,

    /// Time budget. When set, depth grows iteratively until it runs out.
    pub max_time: Option<Duration>,

    /// Factor applied once per ply to values propagated from deeper plies.
    /// Proven wins and losses are not discounted.
    pub discount: f32,
}

impl Default for AlphaBetaConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            max_time: None,
            discount: 1.0,
        }
    }
}

impl AlphaBetaConfig {
    /// Set the search depth.
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Search against a clock.
    #[must_use]
    pub fn with_max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }

    /// Set the per-ply discount.
    #[must_use]
    pub fn with_discount(mut self, discount: f32) -> Self {
        self.discount = discount;
        self
    }

    /// Pop `max_depth`, `max_time` and `discount` from `params`.
    pub fn from_params(params: &mut Params) -> std::result::Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            max_depth: params.pop_or("max_depth", defaults.max_depth)?,
            max_time: params.pop_duration("max_time")?,
            discount: params.pop_or("discount", defaults.discount)?,
        };
        if config.max_depth == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_depth".into(),
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        if !(config.discount > 0.0 && config.discount <= 1.0) {
            return Err(ConfigError::InvalidValue {
                key: "discount".into(),
                value: config.discount.to_string(),
                reason: "must be in (0, 1]".into(),
            });
        }
        Ok(config)
    }
}

/// Why a search stopped early.
enum Halt {
    Deadline,
    Failed(EngineError),
}

impl From<EngineError> for Halt {
    fn from(err: EngineError) -> Self {
        Halt::Failed(err)
    }
}

type Step<T> = std::result::Result<T, Halt>;

/// Alpha-beta searcher.
pub struct AlphaBeta<G: GameRules> {
    rules: Arc<G>,
    scorer: Arc<dyn PositionScorer<G>>,
    cache: Arc<NextPositionCache<G>>,
    config: AlphaBetaConfig,
}

impl<G: GameRules> std::fmt::Debug for AlphaBeta<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlphaBeta").field("config", &self.config).finish()
    }
}

impl<G: GameRules> AlphaBeta<G> {
    /// Create a searcher.
    pub fn new(
        rules: Arc<G>,
        scorer: Arc<dyn PositionScorer<G>>,
        cache: Arc<NextPositionCache<G>>,
        config: AlphaBetaConfig,
    ) -> Self {
        Self {
            rules,
            scorer,
            cache,
            config,
        }
    }

    /// Searcher configuration.
    pub fn config(&self) -> &AlphaBetaConfig {
        &self.config
    }

    fn discounted(&self, value: f32) -> f32 {
        if value.abs() >= WIN_SCORE {
            value
        } else {
            value * self.config.discount
        }
    }

    /// Window to search a child with so that its discounted value compares
    /// correctly against `[alpha, beta]`. Errs on the wide side.
    fn child_window(&self, alpha: f32, beta: f32) -> (f32, f32) {
        let d = self.config.discount;
        let lo = if alpha >= 0.0 { alpha } else { alpha / d };
        let hi = if beta > 0.0 { beta / d } else { beta };
        (lo, hi)
    }

    /// Terminal values of the children, from the parent's side.
    fn terminal_values(&self, expansion: &Expansion<G>) -> Vec<Option<f32>> {
        expansion
            .children
            .iter()
            .map(|child| end_score(self.rules.as_ref(), child).map(|s| -s))
            .collect()
    }

    /// Values of the open children at the horizon, from the parent's side.
    fn horizon_values(
        &self,
        expansion: &Expansion<G>,
        terminal: &[Option<f32>],
    ) -> Result<Vec<f32>> {
        let open: Vec<G::Position> = expansion
            .children
            .iter()
            .zip(terminal)
            .filter(|(_, t)| t.is_none())
            .map(|(child, _)| child.clone())
            .collect();
        let scores = if open.is_empty() {
            Vec::new()
        } else {
            self.scorer.batch_score(&open)?
        };
        if scores.len() != open.len() {
            return Err(EngineError::invariant(format!(
                "scorer returned {} scores for {} positions",
                scores.len(),
                open.len()
            )));
        }
        let mut scores = scores.into_iter();
        Ok(terminal
            .iter()
            .map(|t| match t {
                Some(v) => *v,
                None => scores.next().map_or(0.0, |s| -EVAL_SCALE * s),
            })
            .collect())
    }

    fn node_value(
        &self,
        position: &G::Position,
        depth: usize,
        alpha: f32,
        beta: f32,
        deadline: Option<Instant>,
    ) -> Step<f32> {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(Halt::Deadline);
            }
        }
        let expansion = self.cache.expand(position);
        let (_, value) = self.best_child(&expansion, depth, alpha, beta, deadline)?;
        Ok(value)
    }

    /// Best child index and its value, searching `depth` plies below the
    /// node that `expansion` belongs to.
    fn best_child(
        &self,
        expansion: &Expansion<G>,
        depth: usize,
        mut alpha: f32,
        beta: f32,
        deadline: Option<Instant>,
    ) -> Step<(usize, f32)> {
        let terminal = self.terminal_values(expansion);
        if let Some(win) = terminal.iter().position(|t| t.map_or(false, |v| v >= WIN_SCORE)) {
            return Ok((win, WIN_SCORE));
        }

        if depth <= 1 {
            let values = self.horizon_values(expansion, &terminal)?;
            return Ok(pick(&values));
        }

        let mut best = (0, f32::NEG_INFINITY);
        for (i, child) in expansion.children.iter().enumerate() {
            let value = match terminal[i] {
                Some(v) => v,
                None => {
                    let (lo, hi) = self.child_window(alpha, beta);
                    let raw = -self.node_value(child, depth - 1, -hi, -lo, deadline)?;
                    self.discounted(raw)
                }
            };
            if value > best.1 {
                best = (i, value);
            }
            if best.1 > alpha {
                alpha = best.1;
            }
            if alpha >= beta {
                break;
            }
        }
        Ok(best)
    }

    /// Exact value of every child, each searched with a full window.
    fn child_values(
        &self,
        expansion: &Expansion<G>,
        depth: usize,
        deadline: Option<Instant>,
    ) -> Step<Vec<f32>> {
        let terminal = self.terminal_values(expansion);
        if depth <= 1 {
            return Ok(self.horizon_values(expansion, &terminal)?);
        }
        let mut values = Vec::with_capacity(expansion.len());
        for (child, t) in expansion.children.iter().zip(&terminal) {
            let value = match t {
                Some(v) => *v,
                None => {
                    let raw = -self.node_value(
                        child,
                        depth - 1,
                        f32::NEG_INFINITY,
                        f32::INFINITY,
                        deadline,
                    )?;
                    self.discounted(raw)
                }
            };
            values.push(value);
        }
        Ok(values)
    }

    /// `child_values` deepened against the clock. Returns the values of the
    /// last depth that completed.
    fn iterative_values(&self, expansion: &Expansion<G>, max_time: Duration) -> Result<Vec<f32>> {
        let started = Instant::now();
        let deadline = started + max_time;

        let mut values = unwind(self.child_values(expansion, 1, None))?;
        let mut last = started.elapsed();
        let mut reached = 1;

        for depth in 2..=MAX_TIMED_DEPTH {
            if values.iter().any(|v| *v >= WIN_SCORE) {
                break;
            }
            let now = Instant::now();
            if now >= deadline || deadline - now < last * DEEPENING_FACTOR {
                break;
            }
            match self.child_values(expansion, depth, Some(deadline)) {
                Ok(found) => {
                    values = found;
                    last = now.elapsed();
                    reached = depth;
                }
                Err(Halt::Deadline) => break,
                Err(Halt::Failed(err)) => return Err(err),
            }
        }
        log::debug!("alpha-beta scored candidates to depth {} in {:?}", reached, started.elapsed());
        Ok(values)
    }

    fn iterative(&self, expansion: &Expansion<G>, max_time: Duration) -> Result<(usize, f32)> {
        let started = Instant::now();
        let deadline = started + max_time;

        // Depth 1 always completes so there is a move to return.
        let mut best =
            unwind(self.best_child(expansion, 1, f32::NEG_INFINITY, f32::INFINITY, None))?;
        let mut last = started.elapsed();
        let mut reached = 1;

        for depth in 2..=MAX_TIMED_DEPTH {
            if best.1.abs() >= WIN_SCORE {
                break;
            }
            let now = Instant::now();
            if now >= deadline || deadline - now < last * DEEPENING_FACTOR {
                break;
            }
            match self.best_child(
                expansion,
                depth,
                f32::NEG_INFINITY,
                f32::INFINITY,
                Some(deadline),
            ) {
                Ok(found) => {
                    best = found;
                    last = now.elapsed();
                    reached = depth;
                }
                Err(Halt::Deadline) => break,
                Err(Halt::Failed(err)) => return Err(err),
            }
        }
        log::debug!("alpha-beta reached depth {} in {:?}", reached, started.elapsed());
        Ok(best)
    }
}

fn pick(values: &[f32]) -> (usize, f32) {
    let index = super::first_best(values.iter().copied()).unwrap_or(0);
    (index, values.get(index).copied().unwrap_or(f32::NEG_INFINITY))
}

fn unwind<T>(step: Step<T>) -> Result<T> {
    match step {
        Ok(v) => Ok(v),
        Err(Halt::Failed(err)) => Err(err),
        Err(Halt::Deadline) => Err(EngineError::invariant("search without a deadline timed out")),
    }
}

impl<G: GameRules> Searcher<G> for AlphaBeta<G> {
    fn name(&self) -> &str {
        "ab"
    }

    fn search(&self, position: &G::Position) -> Result<SearchResult<G>> {
        let expansion = self.cache.expand(position);
        if expansion.is_empty() {
            return Err(finished_game());
        }
        let (index, score) = match self.config.max_time {
            Some(max_time) => self.iterative(&expansion, max_time)?,
            None => {
                let depth = self.config.max_depth.max(1);
                unwind(self.best_child(&expansion, depth, f32::NEG_INFINITY, f32::INFINITY, None))?
            }
        };
        Ok(SearchResult {
            action: expansion.actions[index].clone(),
            next: expansion.children[index].clone(),
            score,
            policy: None,
        })
    }

    fn score_candidates(&self, position: &G::Position) -> Result<Vec<ScoredAction<G>>> {
        let expansion = self.cache.expand(position);
        if expansion.is_empty() {
            return Err(finished_game());
        }
        let values = match self.config.max_time {
            Some(max_time) => self.iterative_values(&expansion, max_time)?,
            None => unwind(self.child_values(&expansion, self.config.max_depth.max(1), None))?,
        };
        Ok(values
            .into_iter()
            .enumerate()
            .map(|(index, score)| ScoredAction {
                index,
                action: expansion.actions[index].clone(),
                next: expansion.children[index].clone(),
                score,
            })
            .collect())
    }

    fn release(&self, position: &G::Position) {
        self.cache.release(position);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::{GraphGame, GraphScorer, Nim, NimEncoder, NodeOutcome};
    use crate::nn::{ConstantEvaluator, ModelScorer, SessionPool};

    fn constant_scorer(nim: &Nim) -> Arc<dyn PositionScorer<Nim>> {
        let pool = SessionPool::single(Arc::new(ConstantEvaluator::new(0.0)));
        Arc::new(ModelScorer::<Nim>::direct(Arc::new(NimEncoder::new(nim)), Arc::new(pool)))
    }

    fn searcher(
        game: GraphGame,
        config: AlphaBetaConfig,
    ) -> (Arc<GraphGame>, Arc<GraphScorer>, AlphaBeta<GraphGame>) {
        let game = Arc::new(game);
        let scorer = Arc::new(GraphScorer::new(Arc::clone(&game)));
        let cache = Arc::new(NextPositionCache::new(Arc::clone(&game)));
        let ab = AlphaBeta::new(Arc::clone(&game), scorer.clone(), cache, config);
        (game, scorer, ab)
    }

    #[test]
    fn test_depth_one_picks_worst_reply_for_opponent() {
        let mut game = GraphGame::new();
        let root = game.add_node(0.0);
        for value in [0.4, -0.6, 0.1] {
            let child = game.add_node(value);
            game.connect(root, child);
        }
        let (game, scorer, ab) = searcher(game, AlphaBetaConfig::default().with_max_depth(1));

        let result = ab.search(&game.initial_position(10)).unwrap();
        assert_eq!(result.action, 2);
        assert!((result.score - 0.6 * EVAL_SCALE).abs() < 1e-6);
        assert_eq!(scorer.evaluations(), 3);
    }

    #[test]
    fn test_depth_two_minimax() {
        let leaves = [0.5, -0.2, 0.1, 0.3];
        let tree = GraphGame::uniform_tree(2, 2, |i| leaves[i]);
        let (game, _, ab) = searcher(tree, AlphaBetaConfig::default());
        let result = ab.search(&game.initial_position(10)).unwrap();
        // Opponent answers move 1 with leaf -0.2 and move 2 with leaf 0.1.
        assert_eq!(result.action, 2);
        assert!((result.score - 0.1 * EVAL_SCALE).abs() < 1e-6);
    }

    #[test]
    fn test_immediate_win_taken() {
        let mut game = GraphGame::new();
        let root = game.add_node(0.0);
        let good = game.add_node(-0.9);
        let win = game.add_terminal(NodeOutcome::MoverLoses);
        game.connect(root, good);
        game.connect(root, win);
        let (game, scorer, ab) = searcher(game, AlphaBetaConfig::default().with_max_depth(3));

        let result = ab.search(&game.initial_position(10)).unwrap();
        assert_eq!(result.action, win);
        assert_eq!(result.score, WIN_SCORE);
        assert_eq!(scorer.evaluations(), 0);
    }

    #[test]
    fn test_discount_shrinks_deep_values() {
        let leaves = [0.5, 0.5, 0.5, 0.5];
        let config = AlphaBetaConfig::default().with_discount(0.5);
        let (game, _, ab) = searcher(GraphGame::uniform_tree(2, 2, |i| leaves[i]), config);
        let result = ab.search(&game.initial_position(10)).unwrap();
        assert!((result.score - 0.25 * EVAL_SCALE).abs() < 1e-6);
    }

    #[test]
    fn test_score_candidates_exact() {
        let leaves = [0.5, -0.2, 0.1, 0.3];
        let tree = GraphGame::uniform_tree(2, 2, |i| leaves[i]);
        let (game, _, ab) = searcher(tree, AlphaBetaConfig::default());
        let candidates = ab.score_candidates(&game.initial_position(10)).unwrap();
        let scores: Vec<f32> = candidates.iter().map(|c| c.score).collect();
        assert_eq!(candidates.len(), 2);
        assert!((scores[0] + 0.2 * EVAL_SCALE).abs() < 1e-6);
        assert!((scores[1] - 0.1 * EVAL_SCALE).abs() < 1e-6);
    }

    #[test]
    fn test_forced_pass_returns_skip() {
        let mut game = GraphGame::new();
        let root = game.add_node(0.0);
        let stuck = game.add_node(0.0);
        game.connect(root, stuck);
        let (game, _, ab) = searcher(game, AlphaBetaConfig::default());
        let pos = game.apply(&game.initial_position(10), &stuck);
        let result = ab.search(&pos).unwrap();
        assert_eq!(result.action, game.skip_action());
    }

    #[test]
    fn test_finished_position_is_an_error() {
        let nim = Arc::new(Nim::new(1, 1));
        let scorer = constant_scorer(&nim);
        let cache = Arc::new(NextPositionCache::new(Arc::clone(&nim)));
        let ab = AlphaBeta::new(Arc::clone(&nim), scorer, cache, AlphaBetaConfig::default());
        let end = nim.apply(&nim.initial_position(10), &1);
        let err = ab.search(&end).unwrap_err();
        assert!(matches!(err, EngineError::Invariant(_)));
    }

    #[test]
    fn test_nim_plays_to_losing_pile() {
        let nim = Arc::new(Nim::new(10, 3));
        let scorer = constant_scorer(&nim);
        let cache = Arc::new(NextPositionCache::new(Arc::clone(&nim)));
        let config = AlphaBetaConfig::default().with_max_depth(12);
        let ab = AlphaBeta::new(Arc::clone(&nim), scorer, cache, config);
        // 10 stones: taking 2 leaves 8, a multiple of 4.
        let result = ab.search(&nim.initial_position(50)).unwrap();
        assert_eq!(result.action, 2);
        assert_eq!(result.score, WIN_SCORE);
    }

    #[test]
    fn test_timed_search_returns_move() {
        let leaves: Vec<f32> = (0..27).map(|i| (i as f32 * 0.37).sin()).collect();
        let config = AlphaBetaConfig::default().with_max_time(Duration::from_millis(50));
        let (game, _, ab) = searcher(GraphGame::uniform_tree(3, 3, |i| leaves[i]), config);
        let result = ab.search(&game.initial_position(10)).unwrap();
        assert!(game.legal_actions(&game.initial_position(10)).contains(&result.action));
    }

    #[test]
    fn test_timed_candidates_deepen_past_max_depth() {
        let nim = Arc::new(Nim::new(6, 3));
        let scorer = constant_scorer(&nim);
        let cache = Arc::new(NextPositionCache::new(Arc::clone(&nim)));
        let config = AlphaBetaConfig::default().with_max_time(Duration::from_secs(2));
        let ab = AlphaBeta::new(Arc::clone(&nim), scorer, cache, config);

        let candidates = ab.score_candidates(&nim.initial_position(50)).unwrap();
        assert_eq!(candidates.len(), 3);
        // Taking 2 leaves 4, a loss for the opponent three plies down.
        assert_eq!(candidates[1].score, WIN_SCORE);
    }

    #[test]
    fn test_timed_candidates_respect_the_clock() {
        let nim = Arc::new(Nim::new(60, 3));
        let scorer = constant_scorer(&nim);
        let cache = Arc::new(NextPositionCache::new(Arc::clone(&nim)));
        let config = AlphaBetaConfig::default().with_max_time(Duration::from_millis(50));
        let ab = AlphaBeta::new(Arc::clone(&nim), scorer, cache, config);

        let started = Instant::now();
        let candidates = ab.score_candidates(&nim.initial_position(200)).unwrap();
        assert_eq!(candidates.len(), 3);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_config_from_params() {
        let mut params = Params::parse("max_depth=4,max_time=250ms,discount=0.9").unwrap();
        let config = AlphaBetaConfig::from_params(&mut params).unwrap();
        assert_eq!(config.max_depth, 4);
        assert_eq!(config.max_time, Some(Duration::from_millis(250)));
        assert!((config.discount - 0.9).abs() < 1e-6);
        params.finish().unwrap();

        let mut bad = Params::parse("discount=1.5").unwrap();
        assert!(AlphaBetaConfig::from_params(&mut bad).is_err());
    }
}
