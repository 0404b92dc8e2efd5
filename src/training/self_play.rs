//! Self-play orchestration.
//!
//! A fixed set of named worker threads pulls match ids from a shared
//! counter, plays them with a `MatchRunner` and pushes the finished matches
//! onto a bounded channel:
//!
//! - **Backpressure**: the channel holds `2 * parallelism` matches; workers
//!   block on a full channel
//! - **Completion order**: matches arrive as they finish, not by id
//! - **Shutdown**: workers stop claiming ids once the target is met, an
//!   error occurred or the run is cancelled. Matches already in flight
//!   still finish and are delivered. The channel closes when the last
//!   worker exits.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::core::{CancelToken, ConfigError, EngineError, GameRules, Params, Result};
use crate::player::Player;

use super::record::Match;
use super::runner::MatchRunner;

/// What the target count of `run_matches` counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopMode {
    /// Stop after this many matches were played.
    Matches,
    /// Stop once this many matches ended with a winner.
    Wins,
}

/// Configuration for self-play runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SelfPlayConfig {
    /// Concurrent matches. 0 uses the available hardware parallelism.
    pub parallelism: usize,

    /// What the target count counts.
    pub stop: StopMode,

    /// Drop drawn matches from the output.
    pub wins_only: bool,

    /// Hard cap on matches started in `Wins` mode.
    pub max_matches: Option<u64>,

    /// Id of the first match.
    pub first_id: u64,
}

impl Default for SelfPlayConfig {
    fn default() -> Self {
        Self {
            parallelism: 0,
            stop: StopMode::Matches,
            wins_only: false,
            max_matches: None,
            first_id: 0,
        }
    }
}

impl SelfPlayConfig {
    /// Create config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of concurrent matches.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Count wins instead of matches.
    pub fn with_stop(mut self, stop: StopMode) -> Self {
        self.stop = stop;
        self
    }

    /// Drop drawn matches. Implies `StopMode::Wins`.
    pub fn with_wins_only(mut self) -> Self {
        self.wins_only = true;
        self.stop = StopMode::Wins;
        self
    }

    /// Cap the matches started in `Wins` mode.
    pub fn with_max_matches(mut self, max: u64) -> Self {
        self.max_matches = Some(max);
        self
    }

    /// Start numbering matches at `id`.
    pub fn with_first_id(mut self, id: u64) -> Self {
        self.first_id = id;
        self
    }

    /// Read `parallelism`, `wins`, `wins_only` and `max_matches`.
    pub fn from_params(params: &mut Params) -> Result<Self, ConfigError> {
        let mut config = Self {
            parallelism: params.pop_or("parallelism", 0)?,
            max_matches: params.pop_parsed("max_matches")?,
            ..Self::default()
        };
        if params.pop_flag("wins")? {
            config.stop = StopMode::Wins;
        }
        if params.pop_flag("wins_only")? {
            config = config.with_wins_only();
        }
        Ok(config)
    }

    /// Worker count after resolving 0 to the hardware parallelism.
    #[must_use]
    pub fn effective_parallelism(&self) -> usize {
        if self.parallelism > 0 {
            return self.parallelism;
        }
        thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
    }
}

/// First error reported by the workers of a run.
#[derive(Debug, Default)]
pub(crate) struct FirstError(Mutex<Option<EngineError>>);

impl FirstError {
    fn lock(&self) -> MutexGuard<'_, Option<EngineError>> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Keep `err` unless an earlier error is already recorded.
    pub(crate) fn record(&self, err: EngineError) {
        let mut slot = self.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub(crate) fn take(&self) -> Option<EngineError> {
        self.lock().take()
    }
}

/// Counters shared by the workers of one run.
#[derive(Debug, Default)]
struct Progress {
    next_id: AtomicU64,
    played: AtomicUsize,
    wins: AtomicUsize,
    stop: AtomicBool,
    error: FirstError,
}

impl Progress {
    fn record_error(&self, err: EngineError) {
        self.stop.store(true, Ordering::SeqCst);
        self.error.record(err);
    }
}

/// Totals of a finished run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfPlaySummary {
    /// Matches played to the end.
    pub played: usize,
    /// Matches that ended with a winner.
    pub wins: usize,
}

/// Plays batches of matches on worker threads.
pub struct SelfPlayOrchestrator<G: GameRules> {
    runner: Arc<MatchRunner<G>>,
    config: SelfPlayConfig,
    cancel: CancelToken,
}

impl<G: GameRules> std::fmt::Debug for SelfPlayOrchestrator<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfPlayOrchestrator")
            .field("runner", &self.runner)
            .field("config", &self.config)
            .finish()
    }
}

impl<G: GameRules> SelfPlayOrchestrator<G> {
    /// Orchestrator running matches with `runner`.
    pub fn new(runner: MatchRunner<G>, config: SelfPlayConfig, cancel: CancelToken) -> Self {
        Self {
            runner: Arc::new(runner),
            config,
            cancel,
        }
    }

    /// Self-play settings.
    pub fn config(&self) -> &SelfPlayConfig {
        &self.config
    }

    /// Start playing `n` matches (or `n` wins) of `a` against `b`.
    ///
    /// Returns immediately; matches are delivered through the stream.
    pub fn run_matches(&self, n: usize, a: Player<G>, b: Player<G>) -> MatchStream<G> {
        let parallelism = self.config.effective_parallelism();
        let (sender, receiver) = channel::bounded(2 * parallelism);
        let progress = Arc::new(Progress::default());
        progress.next_id.store(self.config.first_id, Ordering::SeqCst);
        log::info!(
            "self-play: {n} {} with parallelism {parallelism}",
            match self.config.stop {
                StopMode::Matches => "matches",
                StopMode::Wins => "wins",
            }
        );

        let mut handles = Vec::with_capacity(parallelism);
        for i in 0..parallelism {
            let worker = Worker {
                runner: Arc::clone(&self.runner),
                config: self.config.clone(),
                cancel: self.cancel.clone(),
                progress: Arc::clone(&progress),
                sender: sender.clone(),
                a: a.clone(),
                b: b.clone(),
                target: n,
            };
            match thread::Builder::new()
                .name(format!("self-play-{i}"))
                .spawn(move || worker.run())
            {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    log::error!("failed to spawn self-play worker {i}: {err}");
                    progress.record_error(EngineError::invariant(format!(
                        "failed to spawn self-play worker: {err}"
                    )));
                }
            }
        }

        MatchStream {
            receiver,
            handles,
            progress,
        }
    }
}

struct Worker<G: GameRules> {
    runner: Arc<MatchRunner<G>>,
    config: SelfPlayConfig,
    cancel: CancelToken,
    progress: Arc<Progress>,
    sender: Sender<Arc<Match<G>>>,
    a: Player<G>,
    b: Player<G>,
    target: usize,
}

impl<G: GameRules> Worker<G> {
    fn claim(&self) -> Option<u64> {
        if self.cancel.is_cancelled() || self.progress.stop.load(Ordering::SeqCst) {
            return None;
        }
        let id = self.progress.next_id.fetch_add(1, Ordering::SeqCst);
        let started = id - self.config.first_id;
        let within = match self.config.stop {
            StopMode::Matches => started < self.target as u64,
            StopMode::Wins => self.config.max_matches.map_or(true, |max| started < max),
        };
        within.then_some(id)
    }

    fn run(self) {
        while let Some(id) = self.claim() {
            let played = match self.runner.run_match(id, &self.a, &self.b) {
                Ok(played) => played,
                Err(EngineError::Cancelled) => break,
                Err(err) => {
                    log::error!("match {id} failed: {err}");
                    self.progress.record_error(err);
                    break;
                }
            };
            self.progress.played.fetch_add(1, Ordering::SeqCst);
            if !played.is_draw() {
                let wins = self.progress.wins.fetch_add(1, Ordering::SeqCst) + 1;
                if self.config.stop == StopMode::Wins && wins >= self.target {
                    log::debug!("self-play: {wins} wins reached, draining matches in flight");
                    self.progress.stop.store(true, Ordering::SeqCst);
                }
            }
            if self.config.wins_only && played.is_draw() {
                continue;
            }
            if self.sender.send(Arc::new(played)).is_err() {
                // Stream dropped.
                break;
            }
        }
    }
}

/// Matches of a running self-play batch, in completion order.
pub struct MatchStream<G: GameRules> {
    receiver: Receiver<Arc<Match<G>>>,
    handles: Vec<JoinHandle<()>>,
    progress: Arc<Progress>,
}

impl<G: GameRules> MatchStream<G> {
    /// The underlying channel, for consumers such as the trainer.
    pub fn receiver(&self) -> &Receiver<Arc<Match<G>>> {
        &self.receiver
    }

    /// Join the workers and report totals, or the first error of the run.
    ///
    /// Matches not yet received are discarded.
    pub fn finish(self) -> Result<SelfPlaySummary> {
        let Self {
            receiver,
            handles,
            progress,
        } = self;
        drop(receiver);
        for handle in handles {
            if handle.join().is_err() {
                progress.record_error(EngineError::invariant("self-play worker panicked"));
            }
        }
        if let Some(err) = progress.error.take() {
            return Err(err);
        }
        let summary = SelfPlaySummary {
            played: progress.played.load(Ordering::SeqCst),
            wins: progress.wins.load(Ordering::SeqCst),
        };
        log::info!("self-play finished: {} matches, {} wins", summary.played, summary.wins);
        Ok(summary)
    }
}

impl<G: GameRules> Iterator for MatchStream<G> {
    type Item = Arc<Match<G>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.recv().ok()
    }
}
