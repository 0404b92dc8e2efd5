//! Explicit game graph with fixed node values.
//!
//! Every node lists the nodes reachable in one move, an optional outcome,
//! and a static value from the perspective of the side to move there.
//! Edges may point back to earlier nodes, and a non-terminal node without
//! edges forces a pass, so the graph covers skips, draws and repetitions
//! as well as plain trees for checking searchers against minimax.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::core::{GameRules, Result, Side};
use crate::nn::{EncodedState, PositionScorer, StateEncoder};

/// Action that passes the turn without moving.
pub const PASS: u32 = u32::MAX;

/// How a terminal node ended, relative to the side to move there.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Drawn game.
    Draw,
    /// The side to move has won.
    MoverWins,
    /// The side to move has lost.
    MoverLoses,
}

/// One node of the graph.
#[derive(Clone, Debug, Default)]
pub struct GraphNode {
    /// Nodes reachable in one move, in enumeration order.
    pub children: Vec<u32>,
    /// Set for terminal nodes.
    pub outcome: Option<NodeOutcome>,
    /// Static value for the side to move.
    pub value: f32,
    /// Node reached by passing. Set on nodes where the mover must pass.
    pub pass_to: Option<u32>,
}

/// Game played on an explicit graph, starting at node 0.
#[derive(Clone, Debug, Default)]
pub struct GraphGame {
    nodes: Vec<GraphNode>,
}

/// Position in a `GraphGame`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GraphPosition {
    /// Current node.
    pub node: u32,
    /// Nodes visited before reaching `node`, oldest first.
    pub history: Vec<u32>,
}

impl GraphGame {
    /// Empty graph. Add the root first.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a non-terminal node with a static value, returning its id.
    pub fn add_node(&mut self, value: f32) -> u32 {
        self.nodes.push(GraphNode {
            value,
            ..GraphNode::default()
        });
        (self.nodes.len() - 1) as u32
    }

    /// Add a terminal node, returning its id.
    pub fn add_terminal(&mut self, outcome: NodeOutcome) -> u32 {
        self.nodes.push(GraphNode {
            outcome: Some(outcome),
            ..GraphNode::default()
        });
        (self.nodes.len() - 1) as u32
    }

    /// Add a move from `from` to `to`.
    pub fn connect(&mut self, from: u32, to: u32) {
        self.nodes[from as usize].children.push(to);
    }

    /// Make `from` a forced pass that hands the turn over at `to`.
    pub fn connect_pass(&mut self, from: u32, to: u32) {
        self.nodes[from as usize].pass_to = Some(to);
    }

    /// Complete tree of the given depth and branching factor. Leaves, in
    /// left-to-right order, get the values produced by `leaf_value`; inner
    /// nodes get value 0.
    pub fn uniform_tree(
        depth: usize,
        branching: usize,
        mut leaf_value: impl FnMut(usize) -> f32,
    ) -> Self {
        let mut game = Self::new();
        let root = game.add_node(0.0);
        let mut frontier = vec![root];
        let mut leaves = 0;
        for level in 0..depth {
            let mut next = Vec::with_capacity(frontier.len() * branching);
            for parent in frontier {
                for _ in 0..branching {
                    let value = if level + 1 == depth {
                        leaves += 1;
                        leaf_value(leaves - 1)
                    } else {
                        0.0
                    };
                    let child = game.add_node(value);
                    game.connect(parent, child);
                    next.push(child);
                }
            }
            frontier = next;
        }
        game
    }

    /// Node by id.
    #[must_use]
    pub fn node(&self, id: u32) -> &GraphNode {
        &self.nodes[id as usize]
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl GameRules for GraphGame {
    type Position = GraphPosition;
    type Action = u32;

    fn initial_position(&self, _max_plies: usize) -> GraphPosition {
        GraphPosition {
            node: 0,
            history: Vec::new(),
        }
    }

    fn legal_actions(&self, position: &GraphPosition) -> Vec<u32> {
        let node = self.node(position.node);
        if node.outcome.is_some() || node.pass_to.is_some() {
            return Vec::new();
        }
        node.children.clone()
    }

    fn apply(&self, position: &GraphPosition, action: &u32) -> GraphPosition {
        let mut history = position.history.clone();
        history.push(position.node);
        let node = if *action == PASS {
            self.node(position.node).pass_to.unwrap_or(position.node)
        } else {
            *action
        };
        GraphPosition { node, history }
    }

    fn skip_action(&self) -> u32 {
        PASS
    }

    fn is_terminal(&self, position: &GraphPosition) -> bool {
        self.node(position.node).outcome.is_some()
    }

    fn is_draw(&self, position: &GraphPosition) -> bool {
        self.node(position.node).outcome == Some(NodeOutcome::Draw)
    }

    fn winner(&self, position: &GraphPosition) -> Option<Side> {
        let mover = self.next_player(position);
        match self.node(position.node).outcome? {
            NodeOutcome::Draw => None,
            NodeOutcome::MoverWins => Some(mover),
            NodeOutcome::MoverLoses => Some(mover.other()),
        }
    }

    fn next_player(&self, position: &GraphPosition) -> Side {
        Side::for_ply(position.history.len())
    }

    fn ply(&self, position: &GraphPosition) -> usize {
        position.history.len()
    }

    fn repetitions(&self, position: &GraphPosition) -> usize {
        position.history.iter().filter(|&&n| n == position.node).count()
    }
}

/// Scorer returning each node's static value. Counts every position scored.
#[derive(Debug)]
pub struct GraphScorer {
    game: Arc<GraphGame>,
    evaluations: AtomicUsize,
}

impl GraphScorer {
    /// Scorer for `game`.
    #[must_use]
    pub fn new(game: Arc<GraphGame>) -> Self {
        Self {
            game,
            evaluations: AtomicUsize::new(0),
        }
    }

    /// Number of positions scored so far.
    #[must_use]
    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::Relaxed)
    }
}

impl PositionScorer<GraphGame> for GraphScorer {
    fn score(&self, position: &GraphPosition) -> Result<f32> {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        Ok(self.game.node(position.node).value)
    }
}

/// One-hot encoding of the current node.
#[derive(Clone, Debug)]
pub struct GraphEncoder {
    nodes: usize,
}

impl GraphEncoder {
    /// Encoder for `game`.
    #[must_use]
    pub fn new(game: &GraphGame) -> Self {
        Self { nodes: game.len() }
    }
}

impl StateEncoder<GraphGame> for GraphEncoder {
    fn encode(&self, position: &GraphPosition) -> EncodedState {
        let mut tensor = vec![0.0; self.nodes];
        if let Some(slot) = tensor.get_mut(position.node as usize) {
            *slot = 1.0;
        }
        EncodedState::new(tensor, vec![self.nodes])
    }

    fn output_shape(&self) -> Vec<usize> {
        vec![self.nodes]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{end_score, GameResult};

    #[test]
    fn test_uniform_tree_shape() {
        let game = GraphGame::uniform_tree(2, 3, |i| i as f32);
        assert_eq!(game.len(), 1 + 3 + 9);
        let root = game.initial_position(10);
        let children = game.legal_actions(&root);
        assert_eq!(children.len(), 3);
        let first = game.apply(&root, &children[0]);
        let leaves = game.legal_actions(&first);
        assert_eq!(game.node(leaves[0]).value, 0.0);
        assert_eq!(game.node(leaves[2]).value, 2.0);
    }

    #[test]
    fn test_pass_node_and_repetitions() {
        let mut game = GraphGame::new();
        let root = game.add_node(0.0);
        let stuck = game.add_node(0.0);
        game.connect(root, stuck);

        let start = game.initial_position(10);
        let at_stuck = game.apply(&start, &stuck);
        assert!(game.legal_actions(&at_stuck).is_empty());
        assert!(!game.is_terminal(&at_stuck));

        let passed = game.apply(&at_stuck, &PASS);
        assert_eq!(passed.node, stuck);
        assert_eq!(game.repetitions(&passed), 1);
        assert_eq!(game.next_player(&passed), Side::First);
    }

    #[test]
    fn test_pass_to_hands_over_turn() {
        let mut game = GraphGame::new();
        let root = game.add_node(0.0);
        let blocked = game.add_node(0.0);
        let resume = game.add_node(0.0);
        let end = game.add_terminal(NodeOutcome::MoverLoses);
        game.connect(root, blocked);
        game.connect_pass(blocked, resume);
        game.connect(resume, end);

        let at_blocked = game.apply(&game.initial_position(10), &blocked);
        assert!(game.legal_actions(&at_blocked).is_empty());
        let resumed = game.apply(&at_blocked, &PASS);
        assert_eq!(resumed.node, resume);
        assert_eq!(game.legal_actions(&resumed), vec![end]);
        assert_eq!(game.next_player(&resumed), Side::First);
    }

    #[test]
    fn test_outcomes_relative_to_mover() {
        let mut game = GraphGame::new();
        let root = game.add_node(0.0);
        let lost = game.add_terminal(NodeOutcome::MoverLoses);
        let draw = game.add_terminal(NodeOutcome::Draw);
        game.connect(root, lost);
        game.connect(root, draw);

        let start = game.initial_position(10);
        let end = game.apply(&start, &lost);
        assert_eq!(game.result(&end), Some(GameResult::Winner(Side::First)));
        assert_eq!(end_score(&game, &end), Some(-1.0));

        let drawn = game.apply(&start, &draw);
        assert_eq!(game.result(&drawn), Some(GameResult::Draw));
        assert_eq!(end_score(&game, &drawn), Some(0.0));
    }

    #[test]
    fn test_scorer_counts_evaluations() {
        let game = Arc::new(GraphGame::uniform_tree(1, 2, |i| 0.5 * i as f32));
        let scorer = GraphScorer::new(Arc::clone(&game));
        let start = game.initial_position(10);
        let child = game.apply(&start, &2);
        assert_eq!(scorer.score(&child).unwrap(), 0.5);
        assert_eq!(scorer.evaluations(), 1);
    }
}
