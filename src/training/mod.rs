//! Self-play and training pipeline.
//!
//! ## Overview
//!
//! - **MatchRunner**: plays one match between two players and records every
//!   ply with its score and policy labels
//! - **SelfPlayOrchestrator**: runs many matches on worker threads and
//!   streams them in completion order
//! - **ContinuousTrainer**: turns matches into examples in a `ReplayBuffer`
//!   and trains the evaluator on mini-batches, checkpointing as it goes.
//!   `train_epochs` does the same over a loaded corpus for a fixed number
//!   of epochs, holding out a share of the matches for validation
//! - **Rescorer**: relabels a fixed corpus with the current player and
//!   feeds the trainer instead of live self-play. `distill_match` relabels
//!   plies with a scorer's direct output instead of a search
//! - **storage**: match files and durable checkpoint writes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rust_selfplay::training::{
//!     ContinuousTrainer, MatchConfig, MatchRunner, SelfPlayConfig, SelfPlayOrchestrator,
//!     TrainerConfig,
//! };
//!
//! let runner = MatchRunner::new(rules.clone(), MatchConfig::default());
//! let orchestrator = SelfPlayOrchestrator::new(runner, SelfPlayConfig::default(), cancel.clone());
//! let stream = orchestrator.run_matches(1_000, player.clone(), player);
//!
//! let mut trainer = ContinuousTrainer::new(rules, encoder, evaluator, TrainerConfig::default());
//! let stats = trainer.run(stream.receiver(), &cancel)?;
//! stream.finish()?;
//! ```

pub mod record;
pub mod replay;
pub mod rescore;
pub mod runner;
pub mod self_play;
pub mod storage;
pub mod trainer;

// Re-export main types
pub use record::{Match, MatchEnd, MatchLabels, SharedLabels};
pub use replay::{Example, ReplayBuffer};
pub use rescore::{distill_match, rescore_and_train, RescoreConfig, RescoreStream, Rescorer};
pub use runner::{MatchConfig, MatchRunner};
pub use self_play::{MatchStream, SelfPlayConfig, SelfPlayOrchestrator, SelfPlaySummary, StopMode};
pub use storage::{durable_write, load_matches, save_matches, MatchRecord, FORMAT_VERSION};
pub use trainer::{
    ContinuousTrainer, EpochConfig, EpochReport, PlySelection, TrainStats, TrainerConfig,
};
