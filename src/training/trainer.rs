//! Continuous training from a stream of matches.
//!
//! The trainer turns every incoming match into labeled examples, keeps
//! them in a `ReplayBuffer` and, once the buffer is full, runs a fixed
//! number of learning steps per match on mini-batches sampled with
//! replacement. The evaluator is checkpointed on a wall-clock interval and
//! once more when the stream ends or the run is cancelled.
//!
//! `train_epochs` is the offline counterpart: a fixed corpus of matches is
//! split into training and validation matches and the evaluator makes a
//! number of shuffled passes over the training examples.

use std::borrow::Borrow;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver};
use crossbeam::select;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::core::{
    CancelToken, ConfigError, EngineError, GameResult, GameRng, GameRules, Params, Result,
    WIN_SCORE,
};
use crate::nn::{Evaluator, FeatureBatch, StateEncoder};

use super::record::Match;
use super::replay::{Example, ReplayBuffer};
use super::storage::durable_write;

/// Plies with fewer remaining plies than these thresholds get extra samples.
const END_THRESHOLDS: [usize; 3] = [10, 6, 3];

/// Selections longer than this double the end-game bonus.
const LONG_SELECTION: usize = 50;

/// Shortest wait between checkpoint checks of an idle trainer.
const MIN_CHECKPOINT_TICK: Duration = Duration::from_millis(10);

/// Which plies of a match become examples, and how often.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlySelection {
    /// First ply to use.
    pub start_ply: Option<usize>,

    /// Only use the last this many plies.
    pub last_plies: Option<usize>,

    /// Sample plies close to the end of the match more often.
    pub end_multiplier: bool,
}

impl Default for PlySelection {
    fn default() -> Self {
        Self {
            start_ply: None,
            last_plies: None,
            end_multiplier: true,
        }
    }
}

impl PlySelection {
    /// `(ply, samples)` pairs for a match with `plies` actions.
    ///
    /// A ply `k` plies before the last action gets one sample, plus `m`
    /// for each of `k < 10`, `k < 6` and `k < 3`, where `m` is 2 for
    /// selections of more than 50 plies and 1 otherwise.
    #[must_use]
    pub fn select(&self, plies: usize) -> Vec<(usize, usize)> {
        let mut from = self.start_ply.unwrap_or(0);
        if let Some(last) = self.last_plies {
            from = from.max(plies.saturating_sub(last));
        }
        if from >= plies {
            return Vec::new();
        }
        let bonus = if plies - from > LONG_SELECTION { 2 } else { 1 };
        (from..plies)
            .map(|ply| {
                let to_end = plies - ply - 1;
                let samples = if self.end_multiplier {
                    1 + bonus * END_THRESHOLDS.iter().filter(|&&t| to_end < t).count()
                } else {
                    1
                };
                (ply, samples)
            })
            .collect()
    }
}

/// Trainer settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Replay buffer capacity. Training starts once it is full.
    pub buffer_size: usize,

    /// Learning steps after each match. 0 means `buffer_size / batch_size`,
    /// rounded up.
    pub steps_per_match: usize,

    /// Mini-batch size. 0 uses the evaluator's preference.
    pub batch_size: usize,

    /// Evaluator checkpoint file.
    pub checkpoint_path: Option<PathBuf>,

    /// Wall-clock time between checkpoints.
    pub checkpoint_interval: Duration,

    /// Plies used for training.
    pub selection: PlySelection,

    /// Weight of the match outcome blended into the score labels.
    pub end_score_weight: f32,

    /// Rescored examples between learning steps.
    pub learn_every: usize,

    /// Seed of the mini-batch sampler.
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            buffer_size: 10_000,
            steps_per_match: 0,
            batch_size: 0,
            checkpoint_path: None,
            checkpoint_interval: Duration::from_secs(60),
            selection: PlySelection::default(),
            end_score_weight: 0.0,
            learn_every: 10,
            seed: 42,
        }
    }
}

impl TrainerConfig {
    /// Create config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the replay buffer capacity.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the learning steps per match.
    pub fn with_steps_per_match(mut self, steps: usize) -> Self {
        self.steps_per_match = steps;
        self
    }

    /// Set the mini-batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Write checkpoints to `path`.
    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    /// Set the time between checkpoints.
    pub fn with_checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Set the ply selection.
    pub fn with_selection(mut self, selection: PlySelection) -> Self {
        self.selection = selection;
        self
    }

    /// Blend the match outcome into labels with `weight`.
    pub fn with_end_score_weight(mut self, weight: f32) -> Self {
        self.end_score_weight = weight;
        self
    }

    /// Set the rescored examples between learning steps.
    pub fn with_learn_every(mut self, n: usize) -> Self {
        self.learn_every = n;
        self
    }

    /// Set the sampler seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Read trainer keys from `params`.
    ///
    /// Keys: `buffer_size`, `steps_per_match`, `batch_size`, `checkpoint`,
    /// `checkpoint_interval`, `start_ply`, `last_plies`, `end_multiplier`,
    /// `end_score_weight`, `learn_every`, `seed`.
    pub fn from_params(params: &mut Params) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            buffer_size: params.pop_or("buffer_size", defaults.buffer_size)?,
            steps_per_match: params.pop_or("steps_per_match", defaults.steps_per_match)?,
            batch_size: params.pop_or("batch_size", defaults.batch_size)?,
            checkpoint_path: params.pop("checkpoint").map(PathBuf::from),
            checkpoint_interval: params
                .pop_duration("checkpoint_interval")?
                .unwrap_or(defaults.checkpoint_interval),
            selection: PlySelection {
                start_ply: params.pop_parsed("start_ply")?,
                last_plies: params.pop_parsed("last_plies")?,
                end_multiplier: params.pop_or("end_multiplier", true)?,
            },
            end_score_weight: params.pop_or("end_score_weight", defaults.end_score_weight)?,
            learn_every: params.pop_or("learn_every", defaults.learn_every)?,
            seed: params.pop_or("seed", defaults.seed)?,
        };
        if !(0.0..=1.0).contains(&config.end_score_weight) {
            return Err(ConfigError::InvalidValue {
                key: "end_score_weight".into(),
                value: config.end_score_weight.to_string(),
                reason: "must be within [0, 1]".into(),
            });
        }
        if config.buffer_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "buffer_size".into(),
                value: "0".into(),
                reason: "the replay buffer needs room for one example".into(),
            });
        }
        Ok(config)
    }
}

/// Offline training over a fixed corpus.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EpochConfig {
    /// Passes over the training examples.
    pub epochs: usize,

    /// Share of matches, in percent, held out for validation.
    pub validation_percent: u32,
}

impl Default for EpochConfig {
    fn default() -> Self {
        Self {
            epochs: 1,
            validation_percent: 0,
        }
    }
}

impl EpochConfig {
    /// Set the number of passes.
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Hold out `percent` of the matches for validation.
    pub fn with_validation_percent(mut self, percent: u32) -> Self {
        self.validation_percent = percent;
        self
    }

    /// Read `epochs` and `validation` (a percentage) from `params`.
    pub fn from_params(params: &mut Params) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            epochs: params.pop_or("epochs", defaults.epochs)?,
            validation_percent: params.pop_or("validation", defaults.validation_percent)?,
        };
        if config.epochs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "epochs".into(),
                value: "0".into(),
                reason: "at least one pass is needed".into(),
            });
        }
        if config.validation_percent >= 100 {
            return Err(ConfigError::InvalidValue {
                key: "validation".into(),
                value: config.validation_percent.to_string(),
                reason: "must leave matches to train on (0 to 99)".into(),
            });
        }
        Ok(config)
    }

    /// Whether `m` belongs to the validation split.
    ///
    /// The split hashes the final position, so it does not depend on the
    /// order the corpus was loaded in.
    pub fn holds_out<G: GameRules>(&self, m: &Match<G>) -> bool {
        if self.validation_percent == 0 {
            return false;
        }
        let mut hasher = FxHasher::default();
        m.final_position().hash(&mut hasher);
        hasher.finish() % 100 < u64::from(self.validation_percent)
    }
}

/// Losses of one offline pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    /// Pass number, from 0.
    pub epoch: usize,
    /// Mean loss of the pass's learning steps.
    pub train_loss: f32,
    /// Score loss on the held-out matches after the pass.
    pub validation_loss: Option<f32>,
}

/// Running training statistics.
///
/// Averages are exponentially decayed with a decay of `1 - 1/n` for the
/// `n`-th update, capped at 0.95 for the loss and 0.99 for the match
/// ratios, so the first updates are not dragged towards zero.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainStats {
    /// Matches absorbed.
    pub matches: u64,
    /// Examples added to the replay buffer.
    pub examples: u64,
    /// Learning steps run.
    pub steps: u64,
    /// Average loss of recent steps.
    pub average_loss: f32,
    /// Recent share of matches won by the first player of the pair.
    pub wins: f32,
    /// Recent share of matches won by the second player of the pair.
    pub losses: f32,
    /// Recent share of drawn matches.
    pub draws: f32,
}

fn decay(count: u64, cap: f32) -> f32 {
    (1.0 - 1.0 / count as f32).min(cap)
}

impl TrainStats {
    /// Fold one step's loss into the average.
    pub fn record_loss(&mut self, loss: f32) {
        self.steps += 1;
        let d = decay(self.steps, 0.95);
        self.average_loss = d * self.average_loss + (1.0 - d) * loss;
    }

    /// Fold one match outcome into the ratios. `winner` is 0 for the first
    /// player of the pair, 1 for the second, `None` for a draw.
    pub fn record_match(&mut self, winner: Option<usize>) {
        self.matches += 1;
        let d = decay(self.matches, 0.99);
        let hit = |yes: bool| if yes { 1.0 - d } else { 0.0 };
        self.wins = d * self.wins + hit(winner == Some(0));
        self.losses = d * self.losses + hit(winner == Some(1));
        self.draws = d * self.draws + hit(winner.is_none());
    }
}

/// Trains an evaluator on a stream of matches or rescored examples.
pub struct ContinuousTrainer<G: GameRules> {
    rules: Arc<G>,
    encoder: Arc<dyn StateEncoder<G>>,
    evaluator: Arc<dyn Evaluator>,
    config: TrainerConfig,
    buffer: ReplayBuffer<Example<G>>,
    rng: GameRng,
    stats: TrainStats,
    last_checkpoint: Instant,
}

impl<G: GameRules> std::fmt::Debug for ContinuousTrainer<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinuousTrainer")
            .field("evaluator", &self.evaluator.name())
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<G: GameRules> ContinuousTrainer<G> {
    /// Trainer for `evaluator`, encoding positions with `encoder`.
    pub fn new(
        rules: Arc<G>,
        encoder: Arc<dyn StateEncoder<G>>,
        evaluator: Arc<dyn Evaluator>,
        config: TrainerConfig,
    ) -> Self {
        Self {
            rules,
            encoder,
            evaluator,
            buffer: ReplayBuffer::new(config.buffer_size),
            rng: GameRng::new(config.seed),
            config,
            stats: TrainStats::default(),
            last_checkpoint: Instant::now(),
        }
    }

    /// Trainer settings.
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Examples waiting to be learned.
    pub fn buffer(&self) -> &ReplayBuffer<Example<G>> {
        &self.buffer
    }

    /// Statistics so far.
    pub fn stats(&self) -> &TrainStats {
        &self.stats
    }

    /// Effective mini-batch size.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        match self.config.batch_size {
            0 => self.evaluator.batch_size().max(1),
            n => n,
        }
    }

    /// Effective learning steps per match.
    #[must_use]
    pub fn steps_per_match(&self) -> usize {
        match self.config.steps_per_match {
            0 => self.buffer.capacity().div_ceil(self.batch_size()),
            n => n,
        }
    }

    /// Outcome score of every position of `m`, for its side to move.
    fn end_scores(&self, m: &Match<G>) -> Vec<f32> {
        m.positions()
            .iter()
            .map(|position| match m.result {
                GameResult::Draw => 0.0,
                GameResult::Winner(side) if self.rules.next_player(position) == side => WIN_SCORE,
                GameResult::Winner(_) => -WIN_SCORE,
            })
            .collect()
    }

    /// Examples of the selected plies of `m`, each with its sample count.
    ///
    /// Only unfinished positions with a real choice (two or more legal
    /// actions) are used.
    fn selected_examples(&self, m: &Match<G>) -> Vec<(Example<G>, usize)> {
        let mut labels = m.labels().snapshot();
        if self.config.end_score_weight > 0.0 {
            labels.blend(&self.end_scores(m), self.config.end_score_weight);
        }
        self.config
            .selection
            .select(m.len())
            .into_iter()
            .filter_map(|(ply, samples)| {
                let position = &m.positions()[ply];
                if self.rules.is_terminal(position)
                    || self.rules.legal_actions(position).len() < 2
                {
                    return None;
                }
                let example = Example {
                    position: position.clone(),
                    label: labels.scores[ply],
                    policy: labels.policy[ply].clone().unwrap_or_default(),
                };
                Some((example, samples))
            })
            .collect()
    }

    /// Add the selected plies of `m` to the replay buffer. Returns the
    /// number of examples added.
    pub fn absorb_match(&mut self, m: &Match<G>) -> usize {
        self.stats.record_match(m.winning_player());
        let mut added = 0;
        for (example, samples) in self.selected_examples(m) {
            for _ in 0..samples {
                self.buffer.add(example.clone());
            }
            added += samples;
        }
        self.stats.examples += added as u64;
        log::debug!(
            "match {}: {added} examples, buffer {}/{}",
            m.id,
            self.buffer.len(),
            self.buffer.capacity()
        );
        added
    }

    /// Add one example to the replay buffer.
    pub fn add_example(&mut self, example: Example<G>) {
        self.buffer.add(example);
        self.stats.examples += 1;
    }

    /// One learning update on a mini-batch sampled from the buffer.
    pub fn learn_step(&mut self) -> Result<f32> {
        let examples = self.buffer.sample(self.batch_size(), &mut self.rng);
        if examples.is_empty() {
            return Err(EngineError::invariant("learning step on an empty replay buffer"));
        }
        self.learn_on(&examples)
    }

    fn learn_on(&mut self, examples: &[Example<G>]) -> Result<f32> {
        let mut batch = FeatureBatch::with_capacity(examples.len());
        let mut labels = Vec::with_capacity(examples.len());
        let mut policy_labels = Vec::with_capacity(examples.len());
        for example in examples {
            let action_features = if example.policy.is_empty() {
                Vec::new()
            } else {
                let actions = self.rules.legal_actions(&example.position);
                self.encoder.encode_actions(&example.position, &actions)
            };
            let features = self.encoder.encode(&example.position);
            batch.push(features, example.policy.len(), action_features);
            labels.push(example.label);
            policy_labels.push(example.policy.clone());
        }

        let loss = self.evaluator.learn(&batch, &labels, &policy_labels)?;
        self.stats.record_loss(loss);
        log::debug!(
            "step {}: loss {loss:.4}, average {:.4}",
            self.stats.steps,
            self.stats.average_loss
        );
        Ok(loss)
    }

    /// Mean squared error of the evaluator's scores against the labels of
    /// `examples`. Nothing is learned.
    pub fn validation_loss(&self, examples: &[Example<G>]) -> Result<f32> {
        if examples.is_empty() {
            return Err(EngineError::invariant("validation loss of no examples"));
        }
        let mut total = 0.0;
        for chunk in examples.chunks(self.batch_size()) {
            let mut batch = FeatureBatch::with_capacity(chunk.len());
            for example in chunk {
                batch.push(self.encoder.encode(&example.position), 0, Vec::new());
            }
            let output = self.evaluator.evaluate(&batch)?;
            if output.scores.len() != chunk.len() {
                return Err(EngineError::invariant(format!(
                    "evaluator returned {} scores for {} positions",
                    output.scores.len(),
                    chunk.len()
                )));
            }
            total += chunk
                .iter()
                .zip(&output.scores)
                .map(|(example, score)| (score - example.label).powi(2))
                .sum::<f32>();
        }
        Ok(total / examples.len() as f32)
    }

    /// Run the per-match learning steps if the buffer is full.
    ///
    /// Stops early, between steps, once `cancel` fires. Returns the number
    /// of steps run.
    pub fn train_after_match(&mut self, cancel: &CancelToken) -> Result<usize> {
        if !self.buffer.is_full() {
            return Ok(0);
        }
        let mut steps = 0;
        for _ in 0..self.steps_per_match() {
            if cancel.is_cancelled() {
                break;
            }
            self.learn_step()?;
            steps += 1;
        }
        Ok(steps)
    }

    /// Save the evaluator to the checkpoint path, if one is configured.
    ///
    /// The previous checkpoint stays current until the new one is fully
    /// written.
    pub fn checkpoint(&mut self) -> Result<()> {
        self.last_checkpoint = Instant::now();
        let Some(path) = self.config.checkpoint_path.as_deref() else {
            return Ok(());
        };
        let evaluator = &self.evaluator;
        durable_write(path, |out| evaluator.save(out).map_err(EngineError::from))?;
        log::info!(
            "checkpoint {} after {} steps, average loss {:.4}",
            path.display(),
            self.stats.steps,
            self.stats.average_loss
        );
        Ok(())
    }

    fn maybe_checkpoint(&mut self) -> Result<()> {
        if self.last_checkpoint.elapsed() >= self.config.checkpoint_interval {
            self.checkpoint()?;
        }
        Ok(())
    }

    /// Ticks while the input is idle, so the checkpoint interval holds
    /// between arrivals too. Silent without a checkpoint path.
    fn checkpoint_ticker(&self) -> Receiver<Instant> {
        match self.config.checkpoint_path {
            Some(_) => channel::tick(self.config.checkpoint_interval.max(MIN_CHECKPOINT_TICK)),
            None => channel::never(),
        }
    }

    /// Train on matches from `matches` until the channel closes or `cancel`
    /// fires, then write a final checkpoint.
    pub fn run(
        &mut self,
        matches: &Receiver<Arc<Match<G>>>,
        cancel: &CancelToken,
    ) -> Result<TrainStats> {
        log::info!(
            "training {}: buffer {}, batch {}, {} steps per match",
            self.evaluator.name(),
            self.buffer.capacity(),
            self.batch_size(),
            self.steps_per_match()
        );
        let ticker = self.checkpoint_ticker();
        while !cancel.is_cancelled() {
            select! {
                recv(matches) -> received => match received {
                    Ok(m) => {
                        self.absorb_match(&m);
                        self.train_after_match(cancel)?;
                        self.maybe_checkpoint()?;
                    }
                    Err(_) => break,
                },
                recv(ticker) -> _ => self.maybe_checkpoint()?,
                recv(cancel.signal()) -> _ => break,
            }
        }
        self.checkpoint()?;
        log::info!(
            "training done: {} matches, {} steps, average loss {:.4}",
            self.stats.matches,
            self.stats.steps,
            self.stats.average_loss
        );
        Ok(self.stats.clone())
    }

    /// Train on rescored examples until the channel closes or `cancel`
    /// fires, then write a final checkpoint.
    ///
    /// Once the buffer is full, one learning step runs every `learn_every`
    /// examples.
    pub fn run_rescored(
        &mut self,
        examples: &Receiver<Example<G>>,
        cancel: &CancelToken,
    ) -> Result<TrainStats> {
        let learn_every = self.config.learn_every.max(1);
        log::info!(
            "training {} on rescored examples: buffer {}, batch {}, \
             a step every {learn_every} examples",
            self.evaluator.name(),
            self.buffer.capacity(),
            self.batch_size()
        );
        let ticker = self.checkpoint_ticker();
        let mut pending = 0;
        while !cancel.is_cancelled() {
            select! {
                recv(examples) -> received => match received {
                    Ok(example) => {
                        self.add_example(example);
                        pending += 1;
                        if self.buffer.is_full() && pending >= learn_every {
                            pending = 0;
                            self.learn_step()?;
                        }
                        self.maybe_checkpoint()?;
                    }
                    Err(_) => break,
                },
                recv(ticker) -> _ => self.maybe_checkpoint()?,
                recv(cancel.signal()) -> _ => break,
            }
        }
        self.checkpoint()?;
        log::info!(
            "rescore training done: {} examples, {} steps, average loss {:.4}",
            self.stats.examples,
            self.stats.steps,
            self.stats.average_loss
        );
        Ok(self.stats.clone())
    }

    /// Offline training: split `matches` into training and validation
    /// matches, then make `config.epochs` shuffled passes over the training
    /// examples in mini-batches.
    ///
    /// Validation matches contribute each selected ply once and are only
    /// scored. Stops between steps once `cancel` fires and always ends with
    /// a checkpoint.
    pub fn train_epochs<M: Borrow<Match<G>>>(
        &mut self,
        matches: &[M],
        config: &EpochConfig,
        cancel: &CancelToken,
    ) -> Result<Vec<EpochReport>> {
        let mut train = Vec::new();
        let mut validation = Vec::new();
        let mut held_out = 0;
        for m in matches {
            let m = m.borrow();
            if config.holds_out(m) {
                held_out += 1;
                let examples = self.selected_examples(m);
                validation.extend(examples.into_iter().map(|(example, _)| example));
                continue;
            }
            self.stats.record_match(m.winning_player());
            for (example, samples) in self.selected_examples(m) {
                train.extend(std::iter::repeat(example).take(samples));
            }
        }
        if train.is_empty() {
            return Err(EngineError::invariant(format!(
                "no training examples in {} matches ({held_out} held out)",
                matches.len()
            )));
        }
        self.stats.examples += train.len() as u64;
        log::info!(
            "offline training {}: {} examples from {} matches, \
             {} validation examples from {held_out} matches",
            self.evaluator.name(),
            train.len(),
            matches.len() - held_out,
            validation.len()
        );

        let batch_size = self.batch_size();
        let mut reports = Vec::with_capacity(config.epochs);
        for epoch in 0..config.epochs {
            self.rng.shuffle(&mut train);
            let mut total = 0.0;
            let mut steps = 0;
            for chunk in train.chunks(batch_size) {
                if cancel.is_cancelled() {
                    break;
                }
                total += self.learn_on(chunk)?;
                steps += 1;
                self.maybe_checkpoint()?;
            }
            if steps == 0 {
                break;
            }
            let validation_loss = if validation.is_empty() {
                None
            } else {
                Some(self.validation_loss(&validation)?)
            };
            let report = EpochReport {
                epoch,
                train_loss: total / steps as f32,
                validation_loss,
            };
            match report.validation_loss {
                Some(v) => log::info!(
                    "epoch {epoch}: train loss {:.4}, validation loss {v:.4}",
                    report.train_loss
                ),
                None => log::info!("epoch {epoch}: train loss {:.4}", report.train_loss),
            }
            reports.push(report);
            if cancel.is_cancelled() {
                break;
            }
        }
        self.checkpoint()?;
        Ok(reports)
    }
}
