//! MCTS search statistics for diagnostics and tuning.

use serde::{Deserialize, Serialize};

/// Statistics collected during one MCTS search.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchStats {
    /// Traversals performed.
    pub traverses: u32,

    /// Nodes added to the tree.
    pub nodes_created: u32,

    /// Positions sent to the scorer.
    pub evaluations: u32,

    /// Traversals that ended on a finished game.
    pub terminal_hits: u32,

    /// Maximum tree depth reached.
    pub max_depth: u16,

    /// Total time spent searching (microseconds).
    pub time_us: u64,
}

impl SearchStats {
    /// Create new empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all statistics to zero.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Traversals per second.
    #[must_use]
    pub fn traverses_per_second(&self) -> f64 {
        if self.time_us == 0 {
            0.0
        } else {
            f64::from(self.traverses) / (self.time_us as f64 / 1_000_000.0)
        }
    }

    /// Fraction of traversals that needed an evaluation.
    #[must_use]
    pub fn evaluation_rate(&self) -> f64 {
        if self.traverses == 0 {
            0.0
        } else {
            f64::from(self.evaluations) / f64::from(self.traverses)
        }
    }
}
