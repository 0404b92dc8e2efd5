//! Monte Carlo Tree Search.
//!
//! ## Overview
//!
//! PUCT search over an arena tree, using the evaluator for leaf values and
//! optionally for edge priors:
//!
//! - **Lazy expansion**: an action's first visit only scores its child,
//!   the second visit turns the child into a node
//! - **Budget**: traversal cap, time limit, or both, whichever hits first
//! - **Training target**: the root visit distribution `N / sum N`
//! - **Configurable selection**: PUCT (default) or UCB1
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use rust_selfplay::core::GameRules;
//! use rust_selfplay::games::{Nim, NimEncoder};
//! use rust_selfplay::mcts::{MCTSConfig, MCTSSearch};
//! use rust_selfplay::nn::{ConstantEvaluator, ModelScorer, PositionScorer, SessionPool};
//! use rust_selfplay::search::{NextPositionCache, Searcher};
//!
//! let nim = Arc::new(Nim::new(6, 3));
//! let pool = Arc::new(SessionPool::single(Arc::new(ConstantEvaluator::new(0.0))));
//! let encoder = Arc::new(NimEncoder::new(&nim));
//! let scorer: Arc<dyn PositionScorer<Nim>> = Arc::new(ModelScorer::<Nim>::direct(encoder, pool));
//! let cache = Arc::new(NextPositionCache::new(Arc::clone(&nim)));
//! let config = MCTSConfig::default().with_max_traverses(200);
//! let search = MCTSSearch::new(Arc::clone(&nim), scorer, cache, config);
//!
//! let result = search.search(&nim.initial_position(50)).unwrap();
//! let probs = result.policy.unwrap();
//! for (action, prob) in nim.legal_actions(&nim.initial_position(50)).iter().zip(&probs) {
//!     println!("take {}: {:.2}%", action, prob * 100.0);
//! }
//! ```
//!
//! ## Custom Policies
//!
//! ```rust,ignore
//! use rust_selfplay::mcts::{MCTSSearch, UCB1};
//!
//! let search = MCTSSearch::new(rules, scorer, cache, config)
//!     .with_selection(UCB1);  // Use UCB1 instead of PUCT
//! ```

pub mod config;
pub mod node;
pub mod policy;
pub mod search;
pub mod stats;
pub mod tree;

// Re-export main types
pub use config::MCTSConfig;
pub use node::{Edge, NodeId, SearchNode};
pub use policy::{SelectionPolicy, PUCT, UCB1};
pub use search::MCTSSearch;
pub use stats::SearchStats;
pub use tree::{SearchTree, TreeStats};
