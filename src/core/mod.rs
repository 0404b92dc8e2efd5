//! Core engine types: game collaborator trait, RNG, options, cancellation, errors.
//!
//! This module contains the fundamental building blocks that are game-agnostic.
//! Games plug in through `GameRules` rather than modifying the core.

pub mod game;
pub mod rng;
pub mod params;
pub mod cancel;
pub mod error;

pub use game::{end_score, one_hot, GameResult, GameRules, Side, EVAL_SCALE, WIN_SCORE};
pub use rng::{GameRng, SeedSequence};
pub use params::Params;
pub use cancel::CancelToken;
pub use error::{ConfigError, EngineError, EvalError, OrAbort, Result, StorageError};
