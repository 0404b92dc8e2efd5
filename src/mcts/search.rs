//! Core MCTS search algorithm.
//!
//! Each traversal walks down the tree with the selection policy until it
//! reaches a finished game or an action visited for the first time:
//!
//! - a finished child contributes its exact outcome
//! - a first visit scores the child position with the scorer
//! - a second visit turns the child into a tree node and keeps descending
//!
//! The value is then backed up the path, negated at each level. The tree
//! is rebuilt on every call; only the next-position cache is shared.

use std::sync::Arc;
use std::time::Instant;

use crate::core::{end_score, EngineError, GameRules, Result, SeedSequence};
use crate::nn::PositionScorer;
use crate::search::{
    first_best, finished_game, Expansion, NextPositionCache, ScoredAction, SearchResult, Searcher,
};

use super::config::MCTSConfig;
use super::node::{NodeId, SearchNode};
use super::policy::{SelectionPolicy, PUCT};
use super::stats::SearchStats;
use super::tree::SearchTree;

/// Traversal cap used when neither a cap nor a clock is configured.
const FALLBACK_TRAVERSES: u32 = 100;

/// Allowed distance of a policy head's weights from a distribution.
const PRIOR_TOLERANCE: f32 = 1e-3;

/// Main MCTS search context.
///
/// Holds configuration and collaborators only, so one instance can serve
/// many concurrent `search` calls; each call builds its own tree.
pub struct MCTSSearch<G: GameRules> {
    /// The game rules.
    rules: Arc<G>,

    /// Leaf evaluator.
    scorer: Arc<dyn PositionScorer<G>>,

    /// Shared expansions.
    cache: Arc<NextPositionCache<G>>,

    /// Search configuration.
    config: MCTSConfig,

    /// Selection policy.
    selection: Box<dyn SelectionPolicy>,

    /// Per-call generators for final action sampling.
    seeds: SeedSequence,
}

impl<G: GameRules> std::fmt::Debug for MCTSSearch<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MCTSSearch").field("config", &self.config).finish()
    }
}

impl<G: GameRules> MCTSSearch<G> {
    /// Create a new MCTS searcher using PUCT selection.
    pub fn new(
        rules: Arc<G>,
        scorer: Arc<dyn PositionScorer<G>>,
        cache: Arc<NextPositionCache<G>>,
        config: MCTSConfig,
    ) -> Self {
        let seeds = SeedSequence::new(config.seed);
        Self {
            rules,
            scorer,
            cache,
            config,
            selection: Box::new(PUCT),
            seeds,
        }
    }

    /// Set a custom selection policy.
    #[must_use]
    pub fn with_selection<S: SelectionPolicy + 'static>(mut self, selection: S) -> Self {
        self.selection = Box::new(selection);
        self
    }

    /// Search configuration.
    pub fn config(&self) -> &MCTSConfig {
        &self.config
    }

    /// Run a search, returning the result together with its statistics.
    pub fn search_with_stats(
        &self,
        position: &G::Position,
    ) -> Result<(SearchResult<G>, SearchStats)> {
        let (tree, stats) = self.run(position)?;
        let root = tree.get(tree.root());
        let index = self.choose(position, root);
        log::debug!(
            "mcts: {} traverses, {} nodes, {} evaluations in {}us, visits {:?}",
            stats.traverses,
            stats.nodes_created,
            stats.evaluations,
            stats.time_us,
            root.visit_counts()
        );
        let result = SearchResult {
            action: root.expansion.actions[index].clone(),
            next: root.child_position(index).clone(),
            score: root.edges[index].mean_score() as f32,
            policy: Some(root.visit_policy()),
        };
        Ok((result, stats))
    }

    fn run(&self, position: &G::Position) -> Result<(SearchTree<G>, SearchStats)> {
        let start = Instant::now();
        let expansion = self.cache.expand(position);
        if expansion.is_empty() {
            return Err(finished_game());
        }
        let root = self.new_node(position, expansion, 0)?;
        let single = root.edges.len() == 1;
        let capacity = self.config.max_traverses.unwrap_or(256) as usize;
        let mut tree = SearchTree::with_capacity(root, capacity);
        let mut stats = SearchStats::new();

        let deadline = self.config.max_time.map(|t| start + t);
        let max_traverses = match (self.config.max_traverses, deadline) {
            (None, None) => Some(FALLBACK_TRAVERSES),
            (cap, _) => cap,
        };
        let min_traverses = self.config.min_traverses.max(1);

        loop {
            let done = stats.traverses;
            if single && done >= 1 {
                break;
            }
            if done >= min_traverses {
                if max_traverses.map_or(false, |cap| done >= cap) {
                    break;
                }
                if deadline.map_or(false, |d| Instant::now() >= d) {
                    break;
                }
                if tree.len() >= self.config.max_nodes {
                    break;
                }
            }
            self.traverse(&mut tree, &mut stats)?;
            stats.traverses += 1;
        }

        stats.time_us = start.elapsed().as_micros() as u64;
        Ok((tree, stats))
    }

    /// Edge priors for a node at `position`.
    fn priors(&self, position: &G::Position, expansion: &Expansion<G>) -> Result<Vec<f32>> {
        let n = expansion.len();
        if self.config.use_policy_network && !expansion.skipped && self.scorer.has_policy() {
            let (_, weights) = self.scorer.score_with_policy(position, &expansion.actions)?;
            if let Some(weights) = weights {
                check_priors(&weights, n)?;
                return Ok(weights);
            }
        }
        Ok(vec![1.0 / n as f32; n])
    }

    fn new_node(
        &self,
        position: &G::Position,
        expansion: Arc<Expansion<G>>,
        depth: u16,
    ) -> Result<SearchNode<G>> {
        let priors = self.priors(position, &expansion)?;
        Ok(SearchNode::new(expansion, &priors, depth))
    }

    /// One traversal: select, evaluate or expand, back up.
    fn traverse(&self, tree: &mut SearchTree<G>, stats: &mut SearchStats) -> Result<()> {
        let mut path: Vec<(NodeId, usize)> = Vec::new();
        let mut current = tree.root();

        // Value for the side to move at the last node on the path.
        let leaf_value = loop {
            let node = tree.get(current);
            let index = self.selection.select(&node.edges, node.visits, &self.config);
            path.push((current, index));

            let child = node.child_position(index);
            if let Some(score) = end_score(self.rules.as_ref(), child) {
                stats.terminal_hits += 1;
                break -f64::from(score);
            }

            let edge = &node.edges[index];
            if edge.visits == 0 {
                stats.evaluations += 1;
                break -f64::from(self.scorer.score(child)?);
            }
            if edge.is_expanded() {
                current = edge.child;
                continue;
            }

            let depth = node.depth + 1;
            let child = child.clone();
            let expansion = self.cache.expand(&child);
            let created = self.new_node(&child, expansion, depth)?;
            let id = tree.alloc(created);
            tree.get_mut(current).edges[index].child = id;
            stats.nodes_created += 1;
            stats.max_depth = stats.max_depth.max(depth);
            current = id;
        };

        let mut value = leaf_value;
        for &(id, index) in path.iter().rev() {
            let node = tree.get_mut(id);
            node.edges[index].record(value);
            node.visits += 1;
            value = -value;
        }
        Ok(())
    }

    /// Final action: most visited, or sampled by visit count early in the
    /// game when a temperature is set.
    fn choose(&self, position: &G::Position, root: &SearchNode<G>) -> usize {
        let visits = root.visit_counts();
        let greedy = first_best(visits.iter().map(|&n| n as f32)).unwrap_or(0);
        let temperature = self.config.temperature;
        if temperature <= 0.0 || self.rules.ply(position) >= self.config.max_rand_depth {
            return greedy;
        }
        let total = f64::from(root.visits.max(1));
        let weights: Vec<f32> = visits
            .iter()
            .map(|&n| (f64::from(n) / total).powf(1.0 / temperature) as f32)
            .collect();
        self.seeds.next_rng().choose_weighted(&weights).unwrap_or(greedy)
    }
}

fn check_priors(weights: &[f32], actions: usize) -> Result<()> {
    if weights.len() != actions {
        return Err(EngineError::invariant(format!(
            "policy head returned {} weights for {} actions",
            weights.len(),
            actions
        )));
    }
    let sum: f32 = weights.iter().sum();
    if weights.iter().any(|&w| w < 0.0 || !w.is_finite()) || (sum - 1.0).abs() > PRIOR_TOLERANCE {
        return Err(EngineError::invariant(format!(
            "policy head weights are not a distribution (sum {sum})"
        )));
    }
    Ok(())
}

impl<G: GameRules> Searcher<G> for MCTSSearch<G> {
    fn name(&self) -> &str {
        "mcts"
    }

    fn search(&self, position: &G::Position) -> Result<SearchResult<G>> {
        Ok(self.search_with_stats(position)?.0)
    }

    fn score_candidates(&self, position: &G::Position) -> Result<Vec<ScoredAction<G>>> {
        let (tree, _) = self.run(position)?;
        let root = tree.get(tree.root());
        Ok(root
            .edges
            .iter()
            .enumerate()
            .map(|(index, edge)| ScoredAction {
                index,
                action: root.expansion.actions[index].clone(),
                next: root.child_position(index).clone(),
                // Unvisited actions are never preferred.
                score: if edge.visits > 0 { edge.mean_score() as f32 } else { f32::NEG_INFINITY },
            })
            .collect())
    }

    fn release(&self, position: &G::Position) {
        self.cache.release(position);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;
    use crate::games::{Nim, NimEncoder, NimPosition};
    use crate::nn::{ConstantEvaluator, ModelScorer, SessionPool};

    fn constant_scorer(nim: &Nim, policy: bool) -> Arc<dyn PositionScorer<Nim>> {
        let eval = ConstantEvaluator::new(0.0);
        let eval = if policy { eval.with_policy() } else { eval };
        let pool = SessionPool::single(Arc::new(eval));
        Arc::new(ModelScorer::<Nim>::direct(Arc::new(NimEncoder::new(nim)), Arc::new(pool)))
    }

    fn mcts(nim: Nim, config: MCTSConfig) -> (Arc<Nim>, MCTSSearch<Nim>) {
        let scorer = constant_scorer(&nim, config.use_policy_network);
        let nim = Arc::new(nim);
        let cache = Arc::new(NextPositionCache::new(Arc::clone(&nim)));
        let search = MCTSSearch::new(Arc::clone(&nim), scorer, cache, config);
        (nim, search)
    }

    #[test]
    fn test_finds_losing_pile() {
        let (nim, search) = mcts(Nim::new(5, 3), MCTSConfig::default().with_max_traverses(400));
        let (result, stats) = search.search_with_stats(&nim.initial_position(20)).unwrap();
        // Taking 1 leaves 4, a multiple of max_take + 1.
        assert_eq!(result.action, 1);
        assert!(result.score > 0.0);
        assert_eq!(stats.traverses, 400);
        assert!(stats.nodes_created > 0);
    }

    #[test]
    fn test_policy_is_visit_distribution() {
        let (nim, search) = mcts(Nim::new(7, 3), MCTSConfig::default().with_max_traverses(60));
        let result = search.search(&nim.initial_position(20)).unwrap();
        let policy = result.policy.unwrap();
        assert_eq!(policy.len(), 3);
        assert!((policy.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(policy.iter().all(|&p| p >= 0.0));
    }

    #[test]
    fn test_immediate_win() {
        let (nim, search) = mcts(Nim::new(2, 3), MCTSConfig::default().with_max_traverses(50));
        let result = search.search(&nim.initial_position(20)).unwrap();
        assert_eq!(result.action, 2);
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn test_single_action_one_traverse() {
        let (nim, search) = mcts(Nim::new(5, 1), MCTSConfig::default());
        let (result, stats) = search.search_with_stats(&nim.initial_position(20)).unwrap();
        assert_eq!(result.action, 1);
        assert_eq!(result.policy, Some(vec![1.0]));
        assert_eq!(stats.traverses, 1);
    }

    #[test]
    fn test_time_budget() {
        let mut config = MCTSConfig::default().with_max_time(Duration::from_millis(20));
        config.max_traverses = None;
        let (nim, search) = mcts(Nim::new(30, 3), config);
        let started = Instant::now();
        let (_, stats) = search.search_with_stats(&nim.initial_position(100)).unwrap();
        assert!(stats.traverses >= 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_deterministic_without_temperature() {
        let (nim, a) = mcts(Nim::new(9, 3), MCTSConfig::default());
        let (_, b) = mcts(Nim::new(9, 3), MCTSConfig::default());
        let start = nim.initial_position(20);
        let ra = a.search(&start).unwrap();
        let rb = b.search(&start).unwrap();
        assert_eq!(ra.action, rb.action);
        assert_eq!(ra.policy, rb.policy);
    }

    #[test]
    fn test_temperature_samples_early_moves() {
        let config = MCTSConfig::default().with_max_traverses(30).with_temperature(1.0, 10);
        let (nim, search) = mcts(Nim::new(9, 3), config);
        let start = nim.initial_position(20);
        let actions: HashSet<u32> =
            (0..200).map(|_| search.search(&start).unwrap().action).collect();
        assert!(actions.len() >= 2);

        // Past max_rand_depth the choice is greedy again.
        let late = NimPosition { stones: 9, ply: 10 };
        let first = search.search(&late).unwrap().action;
        for _ in 0..10 {
            assert_eq!(search.search(&late).unwrap().action, first);
        }
    }

    #[test]
    fn test_policy_network_priors() {
        let (nim, search) = mcts(Nim::new(6, 3), MCTSConfig::default().with_policy_network());
        let result = search.search(&nim.initial_position(20)).unwrap();
        assert!(nim.legal_actions(&nim.initial_position(20)).contains(&result.action));
    }

    struct SkewedPolicy;

    impl PositionScorer<Nim> for SkewedPolicy {
        fn score(&self, _: &NimPosition) -> Result<f32> {
            Ok(0.0)
        }

        fn score_with_policy(
            &self,
            _: &NimPosition,
            actions: &[u32],
        ) -> Result<(f32, Option<Vec<f32>>)> {
            Ok((0.0, Some(vec![2.0; actions.len()])))
        }

        fn has_policy(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_bad_priors_are_invariant_errors() {
        let nim = Arc::new(Nim::new(6, 3));
        let cache = Arc::new(NextPositionCache::new(Arc::clone(&nim)));
        let config = MCTSConfig::default().with_policy_network();
        let search = MCTSSearch::new(Arc::clone(&nim), Arc::new(SkewedPolicy), cache, config);
        let err = search.search(&nim.initial_position(20)).unwrap_err();
        assert!(matches!(err, EngineError::Invariant(_)));
    }

    #[test]
    fn test_score_candidates_reports_visited() {
        let (nim, search) = mcts(Nim::new(5, 3), MCTSConfig::default().with_max_traverses(200));
        let candidates = search.score_candidates(&nim.initial_position(20)).unwrap();
        assert_eq!(candidates.len(), 3);
        let best = candidates
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .unwrap();
        assert_eq!(best.action, 1);
    }

    #[test]
    fn test_score_candidates_covers_unvisited_actions() {
        let (nim, search) = mcts(Nim::new(20, 5), MCTSConfig::default().with_max_traverses(2));
        let candidates = search.score_candidates(&nim.initial_position(50)).unwrap();
        assert_eq!(candidates.len(), 5);
        assert!(candidates.iter().enumerate().all(|(i, c)| c.index == i));
        assert!(candidates.iter().any(|c| c.score == f32::NEG_INFINITY));
        assert!(candidates.iter().any(|c| c.score.is_finite()));
    }
}
