//! MCTS node and edge structures.
//!
//! Uses arena-based allocation with index references (NodeId). A node owns
//! the shared expansion of its position; edges line up with the
//! expansion's actions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::core::GameRules;
use crate::search::Expansion;

/// Index into the SearchTree node arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Sentinel value representing no node.
    pub const NONE: NodeId = NodeId(u32::MAX);

    /// Create a new node ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Check if this is the NONE sentinel.
    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == u32::MAX
    }

    /// Get the raw index value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            write!(f, "NodeId(NONE)")
        } else {
            write!(f, "NodeId({})", self.0)
        }
    }
}

/// Statistics of one action out of a node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Edge {
    /// Child node (NONE until the action's second visit).
    pub child: NodeId,

    /// Visit count N.
    pub visits: u32,

    /// Sum of backed-up values, from the perspective of the side to move
    /// at the parent.
    pub total_score: f64,

    /// Prior probability P.
    pub prior: f32,
}

impl Edge {
    /// Create an unvisited edge with the given prior.
    #[must_use]
    pub fn with_prior(prior: f32) -> Self {
        Self {
            child: NodeId::NONE,
            visits: 0,
            total_score: 0.0,
            prior,
        }
    }

    /// Mean value Q, `0` before the first visit.
    #[must_use]
    pub fn mean_score(&self) -> f64 {
        if self.visits == 0 {
            0.0
        } else {
            self.total_score / f64::from(self.visits)
        }
    }

    /// Check if this edge has a child node.
    #[must_use]
    pub fn is_expanded(&self) -> bool {
        !self.child.is_none()
    }

    /// Record one visit worth `value`.
    pub fn record(&mut self, value: f64) {
        self.visits += 1;
        self.total_score += value;
    }
}

/// A node in the MCTS tree.
#[derive(Clone, Debug)]
pub struct SearchNode<G: GameRules> {
    /// Actions and children of this node's position.
    pub expansion: Arc<Expansion<G>>,

    /// One edge per action.
    /// SmallVec optimizes for typical branching factor < 8.
    pub edges: SmallVec<[Edge; 8]>,

    /// Sum of edge visits.
    pub visits: u32,

    /// Depth in tree (root = 0).
    pub depth: u16,
}

impl<G: GameRules> SearchNode<G> {
    /// Create a node with one edge per prior.
    pub fn new(expansion: Arc<Expansion<G>>, priors: &[f32], depth: u16) -> Self {
        Self {
            expansion,
            edges: priors.iter().map(|&p| Edge::with_prior(p)).collect(),
            visits: 0,
            depth,
        }
    }

    /// Child position of edge `index`.
    #[must_use]
    pub fn child_position(&self, index: usize) -> &G::Position {
        &self.expansion.children[index]
    }

    /// Visit counts of all edges.
    #[must_use]
    pub fn visit_counts(&self) -> Vec<u32> {
        self.edges.iter().map(|e| e.visits).collect()
    }

    /// Visit distribution `N / sum N`, uniform before any visit.
    #[must_use]
    pub fn visit_policy(&self) -> Vec<f32> {
        let n = self.edges.len();
        if self.visits == 0 {
            return vec![1.0 / n as f32; n];
        }
        let total = self.visits as f32;
        self.edges.iter().map(|e| e.visits as f32 / total).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::GameRules;
    use crate::games::Nim;

    #[test]
    fn test_node_id_none() {
        assert!(NodeId::NONE.is_none());
        assert!(!NodeId::new(0).is_none());
        assert_eq!(NodeId::new(42).raw(), 42);
        assert_eq!(format!("{}", NodeId::NONE), "NodeId(NONE)");
    }

    #[test]
    fn test_edge_mean_score() {
        let mut edge = Edge::with_prior(0.5);
        assert_eq!(edge.mean_score(), 0.0);
        edge.record(1.0);
        edge.record(-0.5);
        assert_eq!(edge.visits, 2);
        assert!((edge.mean_score() - 0.25).abs() < 1e-9);
        assert!(!edge.is_expanded());
    }

    #[test]
    fn test_visit_policy() {
        let nim = Nim::new(5, 3);
        let expansion = Arc::new(Expansion::compute(&nim, &nim.initial_position(10)));
        let mut node = SearchNode::<Nim>::new(expansion, &[1.0 / 3.0; 3], 0);
        assert_eq!(node.visit_policy(), vec![1.0 / 3.0; 3]);

        node.edges[0].record(0.0);
        node.edges[2].record(0.0);
        node.edges[2].record(0.0);
        node.visits = 3;
        let policy = node.visit_policy();
        assert!((policy[2] - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(policy[1], 0.0);
        assert_eq!(node.visit_counts(), vec![1, 0, 2]);
    }

    #[test]
    fn test_edge_serialization() {
        let mut edge = Edge::with_prior(0.25);
        edge.record(0.5);
        let json = serde_json::to_string(&edge).unwrap();
        let back: Edge = serde_json::from_str(&json).unwrap();
        assert_eq!(back.visits, 1);
        assert_eq!(back.prior, 0.25);
    }
}
