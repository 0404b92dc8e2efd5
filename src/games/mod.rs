//! Small reference games.
//!
//! - `Nim`: subtraction Nim, a real game with a known optimal strategy
//! - `GraphGame`: explicit game graph with fixed node values, for exercising
//!   searchers and match edge cases (passes, draws, repetitions)

pub mod graph;
pub mod nim;

pub use graph::{GraphEncoder, GraphGame, GraphNode, GraphPosition, GraphScorer, NodeOutcome, PASS};
pub use nim::{Nim, NimEncoder, NimPosition};
