//! Tree policies for MCTS.
//!
//! A `SelectionPolicy` chooses which edge of a node the next traversal
//! follows. Ties always go to the lowest edge index, so searches are
//! deterministic for a deterministic evaluator.

use super::config::MCTSConfig;
use super::node::Edge;

/// Policy for selecting which edge to follow.
pub trait SelectionPolicy: Send + Sync {
    /// Select the edge index to follow out of a node visited `visits` times.
    fn select(&self, edges: &[Edge], visits: u32, config: &MCTSConfig) -> usize;
}

fn argmax(values: impl Iterator<Item = f64>) -> usize {
    let mut best = (0, f64::NEG_INFINITY);
    for (i, v) in values.enumerate() {
        if v > best.1 {
            best = (i, v);
        }
    }
    best.0
}

/// PUCT selection policy (Predictor + UCB for Trees).
///
/// Formula: Q(a) + c * sqrt(N) * P(a) / (1 + n(a))
#[derive(Clone, Debug, Default)]
pub struct PUCT;

impl SelectionPolicy for PUCT {
    fn select(&self, edges: &[Edge], visits: u32, config: &MCTSConfig) -> usize {
        let sqrt_parent = f64::from(visits).sqrt();
        argmax(edges.iter().map(|edge| {
            let u = config.exploration_constant * sqrt_parent * f64::from(edge.prior)
                / (1.0 + f64::from(edge.visits));
            edge.mean_score() + u
        }))
    }
}

/// UCB1 (Upper Confidence Bound) selection policy.
///
/// Ignores priors. Unvisited edges are tried first, in order.
/// Formula: Q(a) + c * sqrt(ln(N) / n(a))
#[derive(Clone, Debug, Default)]
pub struct UCB1;

impl SelectionPolicy for UCB1 {
    fn select(&self, edges: &[Edge], visits: u32, config: &MCTSConfig) -> usize {
        let ln_parent = f64::from(visits.max(1)).ln();
        argmax(edges.iter().map(|edge| {
            if edge.visits == 0 {
                f64::INFINITY
            } else {
                let exploration = (ln_parent / f64::from(edge.visits)).sqrt();
                edge.mean_score() + config.exploration_constant * exploration
            }
        }))
    }
}
