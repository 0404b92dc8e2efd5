//! # rust-selfplay
//!
//! Search and self-play training engine for two-player board games.
//!
//! ## Design Principles
//!
//! 1. **Game-Agnostic**: Games plug in through the `GameRules` trait. The
//!    engine never looks inside a position.
//!
//! 2. **Side-to-Move Scores**: Every score is from the perspective of the
//!    side to move at the scored position. A finished game scores `0` for a
//!    draw and `±1` otherwise; heuristic scores are scaled below that.
//!
//! 3. **Explicit Wiring**: Players, scorers and strategies are assembled
//!    through an explicit `Registry`. There is no global state.
//!
//! ## Architecture
//!
//! - **Batched Evaluation**: Concurrent searches send positions to an
//!   `AutoBatchDispatcher`, which coalesces them into batches for a pool of
//!   evaluator sessions.
//!
//! - **Pipelines**: Self-play workers, the trainer and the rescoring
//!   workers talk through bounded crossbeam channels. One `CancelToken`
//!   stops every stage.
//!
//! ## Modules
//!
//! - `core`: Game trait, scores, RNG, options, cancellation, errors
//! - `nn`: Encoders, evaluator trait, session pool, batching dispatcher
//! - `search`: Alpha-beta, randomized wrapper, next-position cache
//! - `mcts`: PUCT Monte Carlo Tree Search
//! - `player`: Players and the registry that builds them
//! - `training`: Matches, self-play, replay buffer, trainer, persistence
//! - `games`: Small reference games (`Nim`, `GraphGame`)

pub mod core;
pub mod nn;
pub mod search;
pub mod mcts;
pub mod player;
pub mod training;
pub mod games;

#[cfg(feature = "python")]
pub mod python;

// Re-export commonly used types
pub use crate::core::{
    end_score, one_hot,
    GameResult, GameRules, Side, EVAL_SCALE, WIN_SCORE,
    GameRng, SeedSequence, Params, CancelToken,
    ConfigError, EngineError, EvalError, OrAbort, Result, StorageError,
};

pub use crate::nn::{
    EncodedState, StateEncoder,
    EvalOutput, Evaluator, FeatureBatch,
    ConstantEvaluator, LinearConfig, LinearEvaluator,
    AutoBatchDispatcher, DispatchConfig, SessionPool,
    ModelScorer, PositionScorer,
};

pub use crate::search::{
    AlphaBeta, AlphaBetaConfig, NextPositionCache, Randomized,
    ScoredAction, SearchConfig, SearchResult, Searcher,
};

pub use crate::mcts::{MCTSConfig, MCTSSearch, SearchStats, SearchTree};

pub use crate::player::{Player, Registry};

pub use crate::training::{
    Match, MatchEnd, MatchLabels, SharedLabels,
    MatchConfig, MatchRunner,
    MatchStream, SelfPlayConfig, SelfPlayOrchestrator, SelfPlaySummary, StopMode,
    Example, ReplayBuffer,
    ContinuousTrainer, EpochConfig, EpochReport, PlySelection, TrainStats, TrainerConfig,
    distill_match, rescore_and_train, RescoreConfig, Rescorer,
    load_matches, save_matches,
};
