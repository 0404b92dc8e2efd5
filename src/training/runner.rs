//! Plays one match between two players.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::{end_score, ConfigError, EngineError, GameResult, GameRules, Params, Result, Side};
use crate::player::Player;

use super::record::{Match, MatchBuilder, MatchEnd};

/// Match settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Ply cap. A match reaching it is a draw.
    pub max_plies: usize,

    /// Earlier occurrences of a position that make the match a draw.
    pub repetition_limit: usize,

    /// Odd match ids let the second player move first.
    pub alternate_first: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            max_plies: 200,
            repetition_limit: 3,
            alternate_first: true,
        }
    }
}

impl MatchConfig {
    /// Create config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ply cap.
    pub fn with_max_plies(mut self, max_plies: usize) -> Self {
        self.max_plies = max_plies;
        self
    }

    /// Set the repetition limit.
    pub fn with_repetition_limit(mut self, limit: usize) -> Self {
        self.repetition_limit = limit;
        self
    }

    /// Enable or disable alternating the first mover.
    pub fn with_alternate_first(mut self, alternate: bool) -> Self {
        self.alternate_first = alternate;
        self
    }

    /// Read `max_plies`, `repetition_limit` and `alternate_first`.
    pub fn from_params(params: &mut Params) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            max_plies: params.pop_or("max_plies", defaults.max_plies)?,
            repetition_limit: params.pop_or("repetition_limit", defaults.repetition_limit)?,
            alternate_first: params.pop_or("alternate_first", defaults.alternate_first)?,
        };
        if config.max_plies == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_plies".into(),
                value: "0".into(),
                reason: "a match needs at least one ply".into(),
            });
        }
        Ok(config)
    }
}

/// Runs matches between two players.
pub struct MatchRunner<G: GameRules> {
    rules: Arc<G>,
    config: MatchConfig,
}

impl<G: GameRules> std::fmt::Debug for MatchRunner<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchRunner").field("config", &self.config).finish()
    }
}

impl<G: GameRules> MatchRunner<G> {
    /// Runner for `rules`.
    pub fn new(rules: Arc<G>, config: MatchConfig) -> Self {
        Self { rules, config }
    }

    /// Game rules.
    pub fn rules(&self) -> &Arc<G> {
        &self.rules
    }

    /// Match settings.
    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Play match `id`. `a` moves first unless the match is swapped.
    ///
    /// Stops at a finished position, at the ply cap, or when the current
    /// position has repeated `repetition_limit` times. Searcher caches are
    /// released after every ply.
    pub fn run_match(&self, id: u64, a: &Player<G>, b: &Player<G>) -> Result<Match<G>> {
        let rules = self.rules.as_ref();
        let swapped = self.config.alternate_first && id % 2 == 1;
        let (first, second) = if swapped { (b, a) } else { (a, b) };
        log::debug!(
            "match {id}: {} vs {}{}",
            first.name(),
            second.name(),
            if swapped { " (swapped)" } else { "" }
        );

        let mut builder = MatchBuilder::<G>::new(rules.initial_position(self.config.max_plies));
        let mut last_was_skip = false;
        let end = loop {
            let position = builder.last().clone();
            if rules.is_terminal(&position) {
                break MatchEnd::Terminal;
            }
            if rules.repetitions(&position) >= self.config.repetition_limit {
                break MatchEnd::Repetition;
            }
            if rules.ply(&position) >= self.config.max_plies {
                break MatchEnd::PlyLimit;
            }

            let legal = rules.legal_actions(&position);
            if legal.is_empty() {
                if last_was_skip {
                    return Err(EngineError::invariant(format!(
                        "match {id}: neither side has a legal action at ply {}",
                        rules.ply(&position)
                    )));
                }
                let skip = rules.skip_action();
                let next = rules.apply(&position, &skip);
                builder.push_skip(skip, next);
                last_was_skip = true;
                continue;
            }
            last_was_skip = false;

            let player = match rules.next_player(&position) {
                Side::First => first,
                Side::Second => second,
            };
            let played = player.play(&position)?;
            if !legal.contains(&played.action) {
                return Err(EngineError::invariant(format!(
                    "match {id}: {} played illegal action {:?}",
                    player.name(),
                    played.action
                )));
            }
            if let Some(policy) = &played.policy {
                if policy.len() != legal.len() {
                    return Err(EngineError::invariant(format!(
                        "match {id}: {} returned {} policy weights for {} actions",
                        player.name(),
                        policy.len(),
                        legal.len()
                    )));
                }
            }
            builder.push(played.action, played.next, played.score, played.policy);
            a.release(&position);
            b.release(&position);
        };

        let last = builder.last().clone();
        let (result, final_score) = match end {
            MatchEnd::Terminal => (
                rules.result(&last).unwrap_or(GameResult::Draw),
                end_score(rules, &last).unwrap_or(0.0),
            ),
            MatchEnd::PlyLimit | MatchEnd::Repetition => (GameResult::Draw, 0.0),
        };
        a.release(&last);
        b.release(&last);
        log::debug!("match {id}: {:?} after {} plies, {:?}", end, rules.ply(&last), result);
        builder.finish(id, self.config.max_plies, swapped, end, result, final_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::{GraphGame, GraphScorer, Nim, NimEncoder, NodeOutcome, PASS};
    use crate::nn::{ConstantEvaluator, ModelScorer, PositionScorer, SessionPool};
    use crate::search::{AlphaBeta, AlphaBetaConfig, NextPositionCache, Searcher};

    fn ab_player<G: GameRules>(
        rules: &Arc<G>,
        scorer: Arc<dyn PositionScorer<G>>,
        depth: usize,
    ) -> Player<G> {
        let cache = Arc::new(NextPositionCache::new(Arc::clone(rules)));
        let searcher = AlphaBeta::new(
            Arc::clone(rules),
            Arc::clone(&scorer),
            cache,
            AlphaBetaConfig::default().with_max_depth(depth),
        );
        Player::new("ab", Arc::new(searcher) as Arc<dyn Searcher<G>>, scorer)
    }

    fn nim_player(nim: &Arc<Nim>, depth: usize) -> Player<Nim> {
        let pool = Arc::new(SessionPool::single(Arc::new(ConstantEvaluator::new(0.0))));
        let scorer = ModelScorer::<Nim>::direct(Arc::new(NimEncoder::new(nim)), pool);
        ab_player(nim, Arc::new(scorer), depth)
    }

    #[test]
    fn test_match_runs_to_terminal() {
        let nim = Arc::new(Nim::new(7, 3));
        let player = nim_player(&nim, 8);
        let runner = MatchRunner::new(Arc::clone(&nim), MatchConfig::default());

        let m = runner.run_match(0, &player, &player).unwrap();
        assert_eq!(m.end, MatchEnd::Terminal);
        assert_eq!(m.positions().len(), m.actions().len() + 1);
        assert!(nim.is_terminal(m.final_position()));
        // Perfect play from 7 stones: the first mover wins.
        assert_eq!(m.result, GameResult::Winner(Side::First));
        assert_eq!(m.winning_player(), Some(0));
        assert_eq!(m.labels().snapshot().scores.last(), Some(&-1.0));
    }

    #[test]
    fn test_ply_limit_is_draw() {
        let nim = Arc::new(Nim::new(30, 1));
        let player = nim_player(&nim, 1);
        let runner = MatchRunner::new(Arc::clone(&nim), MatchConfig::default().with_max_plies(4));

        let m = runner.run_match(0, &player, &player).unwrap();
        assert_eq!(m.end, MatchEnd::PlyLimit);
        assert_eq!(m.len(), 4);
        assert!(m.is_draw());
        assert_eq!(m.winning_player(), None);
    }

    #[test]
    fn test_odd_ids_swap_first_player() {
        let nim = Arc::new(Nim::new(1, 1));
        let a = nim_player(&nim, 1);
        let b = nim_player(&nim, 1);
        let runner = MatchRunner::new(Arc::clone(&nim), MatchConfig::default());

        let even = runner.run_match(2, &a, &b).unwrap();
        let odd = runner.run_match(3, &a, &b).unwrap();
        assert!(!even.swapped);
        assert!(odd.swapped);
        assert_eq!(even.winning_player(), Some(0));
        assert_eq!(odd.winning_player(), Some(1));

        let config = MatchConfig::default().with_alternate_first(false);
        let fixed = MatchRunner::new(Arc::clone(&nim), config);
        assert!(!fixed.run_match(3, &a, &b).unwrap().swapped);
    }

    #[test]
    fn test_forced_pass_plays_skip() {
        let mut graph = GraphGame::new();
        let root = graph.add_node(0.0);
        let blocked = graph.add_node(0.0);
        let resume = graph.add_node(0.0);
        let end = graph.add_terminal(NodeOutcome::MoverLoses);
        graph.connect(root, blocked);
        graph.connect_pass(blocked, resume);
        graph.connect(resume, end);
        let graph = Arc::new(graph);
        let player = ab_player(&graph, Arc::new(GraphScorer::new(Arc::clone(&graph))), 2);

        let runner = MatchRunner::new(Arc::clone(&graph), MatchConfig::default());
        let m = runner.run_match(0, &player, &player).unwrap();
        assert_eq!(m.actions(), &[blocked, PASS, end]);
        let labels = m.labels().snapshot();
        // The skip is labeled with the negated score of the next ply.
        assert_eq!(labels.scores[1], -labels.scores[2]);
        assert_eq!(labels.policy[1], None);
        assert_eq!(m.result, GameResult::Winner(Side::First));
    }

    #[test]
    fn test_repetition_draw() {
        let mut graph = GraphGame::new();
        let a = graph.add_node(0.0);
        let b = graph.add_node(0.0);
        graph.connect(a, b);
        graph.connect(b, a);
        let graph = Arc::new(graph);
        let player = ab_player(&graph, Arc::new(GraphScorer::new(Arc::clone(&graph))), 1);

        let config = MatchConfig::default().with_repetition_limit(2);
        let runner = MatchRunner::new(Arc::clone(&graph), config);
        let m = runner.run_match(0, &player, &player).unwrap();
        assert_eq!(m.end, MatchEnd::Repetition);
        assert_eq!(m.len(), 4);
        assert!(m.is_draw());
    }

    #[test]
    fn test_double_pass_is_invariant_error() {
        let mut graph = GraphGame::new();
        let root = graph.add_node(0.0);
        let stuck = graph.add_node(0.0);
        graph.connect(root, stuck);
        let graph = Arc::new(graph);
        let player = ab_player(&graph, Arc::new(GraphScorer::new(Arc::clone(&graph))), 1);

        let runner = MatchRunner::new(Arc::clone(&graph), MatchConfig::default());
        let err = runner.run_match(0, &player, &player).unwrap_err();
        assert!(matches!(err, EngineError::Invariant(_)));
    }

    #[test]
    fn test_config_from_params() {
        let mut params = Params::parse("max_plies=50,alternate_first=false").unwrap();
        let config = MatchConfig::from_params(&mut params).unwrap();
        assert_eq!(config.max_plies, 50);
        assert_eq!(config.repetition_limit, 3);
        assert!(!config.alternate_first);

        let mut params = Params::parse("max_plies=0").unwrap();
        assert!(MatchConfig::from_params(&mut params).is_err());
    }
}
