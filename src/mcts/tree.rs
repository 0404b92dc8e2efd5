//! Arena-based MCTS tree.
//!
//! Uses a flat `Vec<SearchNode>` with index-based references. A tree lives
//! for one search call.

use serde::{Deserialize, Serialize};

use crate::core::GameRules;

use super::node::{NodeId, SearchNode};

/// Arena-based MCTS tree.
#[derive(Clone, Debug)]
pub struct SearchTree<G: GameRules> {
    /// All nodes in the tree.
    nodes: Vec<SearchNode<G>>,

    /// The root node ID (always 0).
    root: NodeId,
}

impl<G: GameRules> SearchTree<G> {
    /// Create a tree holding `root`.
    pub fn new(root: SearchNode<G>) -> Self {
        Self::with_capacity(root, 256)
    }

    /// Create a tree with custom initial capacity.
    pub fn with_capacity(root: SearchNode<G>, capacity: usize) -> Self {
        let mut nodes = Vec::with_capacity(capacity.max(1));
        nodes.push(root);
        Self {
            nodes,
            root: NodeId::new(0),
        }
    }

    /// Get the root node ID.
    #[inline]
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Get a node by ID.
    #[inline]
    #[must_use]
    pub fn get(&self, id: NodeId) -> &SearchNode<G> {
        &self.nodes[id.0 as usize]
    }

    /// Get a mutable node by ID.
    #[inline]
    pub fn get_mut(&mut self, id: NodeId) -> &mut SearchNode<G> {
        &mut self.nodes[id.0 as usize]
    }

    /// Allocate a new node, returning its ID.
    pub fn alloc(&mut self, node: SearchNode<G>) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Number of nodes in the tree.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the tree is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get statistics about the tree.
    #[must_use]
    pub fn stats(&self) -> TreeStats {
        let max_depth = self.nodes.iter().map(|n| n.depth).max().unwrap_or(0);
        let total_edges: usize = self.nodes.iter().map(|n| n.edges.len()).sum();
        let expanded_edges: usize = self
            .nodes
            .iter()
            .flat_map(|n| n.edges.iter())
            .filter(|e| e.is_expanded())
            .count();

        TreeStats {
            node_count: self.nodes.len(),
            max_depth,
            total_edges,
            expanded_edges,
        }
    }
}

/// Statistics about tree structure.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStats {
    /// Total nodes in tree.
    pub node_count: usize,

    /// Maximum depth reached.
    pub max_depth: u16,

    /// Total edges.
    pub total_edges: usize,

    /// Edges with a child node.
    pub expanded_edges: usize,
}
