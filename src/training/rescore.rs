//! Rescore-and-train.
//!
//! Instead of playing new matches, a fixed corpus is relabeled over and
//! over with the current player: a sampler thread draws random
//! `(match, ply)` pairs, rescoring workers search them, write the new
//! labels back into the match and forward an `Example` to the trainer.
//! Both channels hold `2 * parallelism` items.
//!
//! The stream never ends on its own. It stops when the run is cancelled,
//! when a worker fails or when the consumer drops the stream.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use serde::{Deserialize, Serialize};

use crate::core::{CancelToken, ConfigError, EngineError, GameRng, GameRules, Params, Result};
use crate::nn::PositionScorer;
use crate::player::Player;

use super::record::Match;
use super::replay::Example;
use super::self_play::FirstError;
use super::trainer::{ContinuousTrainer, PlySelection, TrainStats};

/// Rescoring settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RescoreConfig {
    /// Rescoring workers. 0 uses the available hardware parallelism.
    pub parallelism: usize,

    /// Seed of the `(match, ply)` sampler.
    pub seed: u64,
}

impl Default for RescoreConfig {
    fn default() -> Self {
        Self {
            parallelism: 0,
            seed: 42,
        }
    }
}

impl RescoreConfig {
    /// Create config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of rescoring workers.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Set the sampler seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Read `parallelism` and `seed`.
    pub fn from_params(params: &mut Params) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            parallelism: params.pop_or("parallelism", defaults.parallelism)?,
            seed: params.pop_or("seed", defaults.seed)?,
        })
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

/// Plies of one match worth rescoring.
#[derive(Debug)]
struct Candidates {
    index: usize,
    plies: Vec<usize>,
}

/// A corpus of matches together with the plies that can be rescored.
pub struct Rescorer<G: GameRules> {
    matches: Arc<Vec<Arc<Match<G>>>>,
    candidates: Arc<Vec<Candidates>>,
    config: RescoreConfig,
    cancel: CancelToken,
}

impl<G: GameRules> std::fmt::Debug for Rescorer<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rescorer")
            .field("matches", &self.matches.len())
            .field("config", &self.config)
            .finish()
    }
}

impl<G: GameRules> Rescorer<G> {
    /// Rescorer over `matches`.
    ///
    /// Only unfinished positions with two or more legal actions are
    /// rescored. Fails if the corpus has none.
    pub fn new(
        rules: &G,
        matches: Vec<Arc<Match<G>>>,
        config: RescoreConfig,
        cancel: CancelToken,
    ) -> Result<Self> {
        let candidates: Vec<Candidates> = matches
            .iter()
            .enumerate()
            .filter_map(|(index, m)| {
                let plies: Vec<usize> = (0..m.actions().len())
                    .filter(|&ply| {
                        let position = &m.positions()[ply];
                        !rules.is_terminal(position) && rules.legal_actions(position).len() >= 2
                    })
                    .collect();
                (!plies.is_empty()).then_some(Candidates { index, plies })
            })
            .collect();
        if candidates.is_empty() {
            return Err(EngineError::invariant(format!(
                "none of {} matches has a ply with a choice to rescore",
                matches.len()
            )));
        }
        log::info!(
            "rescore corpus: {} matches, {} rescorable plies",
            matches.len(),
            candidates.iter().map(|c| c.plies.len()).sum::<usize>()
        );
        Ok(Self {
            matches: Arc::new(matches),
            candidates: Arc::new(candidates),
            config,
            cancel,
        })
    }

    /// The corpus, with labels as rescored so far.
    pub fn matches(&self) -> &[Arc<Match<G>>] {
        &self.matches
    }

    /// Rescoring settings.
    pub fn config(&self) -> &RescoreConfig {
        &self.config
    }

    /// Start the sampler and the rescoring workers for `player`.
    pub fn start(&self, player: Player<G>) -> RescoreStream<G> {
        let parallelism = self.config.effective_parallelism();
        let (sample_sender, sample_receiver) = channel::bounded(2 * parallelism);
        let (sender, receiver) = channel::bounded(2 * parallelism);
        let progress = Arc::new(RescoreProgress::default());
        log::info!("rescoring with {} on {parallelism} workers", player.name());

        let mut handles = Vec::with_capacity(parallelism + 1);
        let sampler = Sampler {
            candidates: Arc::clone(&self.candidates),
            rng: GameRng::new(self.config.seed),
            cancel: self.cancel.clone(),
            progress: Arc::clone(&progress),
            sender: sample_sender,
        };
        match thread::Builder::new()
            .name("rescore-sampler".into())
            .spawn(move || sampler.run())
        {
            Ok(handle) => handles.push(handle),
            Err(err) => {
                log::error!("failed to spawn rescore sampler: {err}");
                progress.record_error(EngineError::invariant(format!(
                    "failed to spawn rescore sampler: {err}"
                )));
            }
        }

        for i in 0..parallelism {
            let worker = Worker {
                matches: Arc::clone(&self.matches),
                player: player.clone(),
                cancel: self.cancel.clone(),
                progress: Arc::clone(&progress),
                samples: sample_receiver.clone(),
                sender: sender.clone(),
            };
            match thread::Builder::new()
                .name(format!("rescore-{i}"))
                .spawn(move || worker.run())
            {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    log::error!("failed to spawn rescore worker {i}: {err}");
                    progress.record_error(EngineError::invariant(format!(
                        "failed to spawn rescore worker: {err}"
                    )));
                }
            }
        }

        RescoreStream {
            receiver,
            handles,
            progress,
        }
    }
}

#[derive(Debug, Default)]
struct RescoreProgress {
    rescored: AtomicUsize,
    stop: AtomicBool,
    error: FirstError,
}

impl RescoreProgress {
    fn record_error(&self, err: EngineError) {
        self.stop.store(true, Ordering::SeqCst);
        self.error.record(err);
    }

    fn stopped(&self, cancel: &CancelToken) -> bool {
        cancel.is_cancelled() || self.stop.load(Ordering::SeqCst)
    }
}

struct Sampler {
    candidates: Arc<Vec<Candidates>>,
    rng: GameRng,
    cancel: CancelToken,
    progress: Arc<RescoreProgress>,
    sender: Sender<(usize, usize)>,
}

impl Sampler {
    fn run(mut self) {
        while !self.progress.stopped(&self.cancel) {
            let candidates = &self.candidates[self.rng.gen_range_usize(0..self.candidates.len())];
            let ply = candidates.plies[self.rng.gen_range_usize(0..candidates.plies.len())];
            select! {
                send(self.sender, (candidates.index, ply)) -> sent => {
                    if sent.is_err() {
                        // All workers are gone.
                        break;
                    }
                }
                recv(self.cancel.signal()) -> _ => break,
            }
        }
    }
}

struct Worker<G: GameRules> {
    matches: Arc<Vec<Arc<Match<G>>>>,
    player: Player<G>,
    cancel: CancelToken,
    progress: Arc<RescoreProgress>,
    samples: Receiver<(usize, usize)>,
    sender: Sender<Example<G>>,
}

impl<G: GameRules> Worker<G> {
    fn run(self) {
        for (index, ply) in self.samples.iter() {
            if self.progress.stopped(&self.cancel) {
                break;
            }
            let example = match rescore_ply(&self.player, &self.matches[index], ply) {
                Ok(example) => example,
                Err(EngineError::Cancelled) => break,
                Err(err) => {
                    let id = self.matches[index].id;
                    log::error!("rescoring match {id} ply {ply} failed: {err}");
                    self.progress.record_error(err);
                    break;
                }
            };
            self.progress.rescored.fetch_add(1, Ordering::SeqCst);
            select! {
                send(self.sender, example) -> sent => {
                    if sent.is_err() {
                        break;
                    }
                }
                recv(self.cancel.signal()) -> _ => break,
            }
        }
    }
}

/// Search `ply` of `m` again with `player` and store the new labels.
///
/// The policy label is kept when the player produces none.
fn rescore_ply<G: GameRules>(player: &Player<G>, m: &Match<G>, ply: usize) -> Result<Example<G>> {
    let position = &m.positions()[ply];
    let result = player.play(position)?;
    player.release(position);
    m.labels().update(ply, result.score, result.policy)?;
    let (label, policy) = m
        .labels()
        .get(ply)
        .ok_or_else(|| {
            EngineError::invariant(format!("match {} lost the labels of ply {ply}", m.id))
        })?;
    Ok(Example {
        position: position.clone(),
        label,
        policy: policy.unwrap_or_default(),
    })
}

/// Rescored examples of a running rescorer.
pub struct RescoreStream<G: GameRules> {
    receiver: Receiver<Example<G>>,
    handles: Vec<JoinHandle<()>>,
    progress: Arc<RescoreProgress>,
}

impl<G: GameRules> RescoreStream<G> {
    /// The underlying channel, for the trainer.
    pub fn receiver(&self) -> &Receiver<Example<G>> {
        &self.receiver
    }

    /// Stop the threads and report the number of rescored plies, or the
    /// first error of the run.
    pub fn finish(self) -> Result<usize> {
        let Self {
            receiver,
            handles,
            progress,
        } = self;
        progress.stop.store(true, Ordering::SeqCst);
        drop(receiver);
        for handle in handles {
            if handle.join().is_err() {
                progress.record_error(EngineError::invariant("rescore thread panicked"));
            }
        }
        if let Some(err) = progress.error.take() {
            return Err(err);
        }
        let rescored = progress.rescored.load(Ordering::SeqCst);
        log::info!("rescoring finished: {rescored} plies");
        Ok(rescored)
    }
}

impl<G: GameRules> Iterator for RescoreStream<G> {
    type Item = Example<G>;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.recv().ok()
    }
}

/// Rescore the corpus of `rescorer` with `player` and train on the result
/// until `cancel` fires or rescoring fails.
pub fn rescore_and_train<G: GameRules>(
    trainer: &mut ContinuousTrainer<G>,
    rescorer: &Rescorer<G>,
    player: Player<G>,
    cancel: &CancelToken,
) -> Result<TrainStats> {
    let stream = rescorer.start(player);
    let trained = trainer.run_rescored(stream.receiver(), cancel);
    let rescored = stream.finish();
    match (trained, rescored) {
        (_, Err(err)) | (Err(err), _) => Err(err),
        (Ok(stats), Ok(_)) => Ok(stats),
    }
}

/// Overwrite the labels of the selected plies of `m` with the direct
/// scores of `scorer`, without searching. Returns the number of plies
/// relabeled.
///
/// Finished positions keep their labels. Policies are left untouched.
pub fn distill_match<G: GameRules>(
    rules: &G,
    m: &Match<G>,
    scorer: &dyn PositionScorer<G>,
    selection: &PlySelection,
) -> Result<usize> {
    let plies: Vec<usize> = selection
        .select(m.len())
        .into_iter()
        .map(|(ply, _)| ply)
        .filter(|&ply| !rules.is_terminal(&m.positions()[ply]))
        .collect();
    if plies.is_empty() {
        return Ok(0);
    }
    let positions: Vec<G::Position> = plies.iter().map(|&ply| m.positions()[ply].clone()).collect();
    let scores = scorer.batch_score(&positions)?;
    if scores.len() != plies.len() {
        return Err(EngineError::invariant(format!(
            "distill: {} scores for {} positions",
            scores.len(),
            plies.len()
        )));
    }
    for (&ply, score) in plies.iter().zip(scores) {
        m.labels().update(ply, score, None)?;
    }
    log::debug!("distilled {} plies of match {}", plies.len(), m.id);
    Ok(plies.len())
}
