//! Evaluator integration.
//!
//! This module connects searchers to the numeric model that scores
//! positions and learns from self-play.
//!
//! ## Overview
//!
//! - **Encoding**: `StateEncoder` turns positions into `EncodedState` tensors
//! - **Evaluator**: `Evaluator` trait over `FeatureBatch` / `EvalOutput`
//! - **Sessions**: `SessionPool` round-robins over interchangeable backends
//! - **Batching**: `AutoBatchDispatcher` coalesces concurrent requests
//! - **Scoring**: `PositionScorer` is the searcher-facing facade, implemented
//!   by `ModelScorer`
//! - **Baseline**: `ConstantEvaluator` for tests, `LinearEvaluator` as a
//!   small trainable model
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//! use rust_selfplay::core::{CancelToken, GameRules};
//! use rust_selfplay::games::{Nim, NimEncoder};
//! use rust_selfplay::nn::{
//!     AutoBatchDispatcher, ConstantEvaluator, DispatchConfig, ModelScorer, PositionScorer,
//!     SessionPool,
//! };
//!
//! let nim = Nim::new(7, 3);
//! let pool = Arc::new(SessionPool::single(Arc::new(ConstantEvaluator::new(0.0))));
//! let config = DispatchConfig::default().with_batch_size(1);
//! let dispatcher = AutoBatchDispatcher::new(pool, config, CancelToken::new());
//! let scorer = ModelScorer::<Nim>::batched(Arc::new(NimEncoder::new(&nim)), dispatcher);
//!
//! let score = scorer.score(&nim.initial_position(100)).unwrap();
//! assert_eq!(score, 0.0);
//! ```

pub mod encoder;
pub mod traits;
pub mod baseline;
pub mod pool;
pub mod dispatch;
pub mod scorer;

// Re-export main types
pub use encoder::{EncodedState, StateEncoder};
pub use traits::{EvalOutput, Evaluator, FeatureBatch};
pub use baseline::{ConstantEvaluator, LinearConfig, LinearEvaluator};
pub use pool::SessionPool;
pub use dispatch::{
    AutoBatchDispatcher, Batch, DispatchConfig, DispatchStats, ScoreOutput, ScoreRequest, Ticket,
};
pub use scorer::{ModelScorer, PositionScorer, Route};
