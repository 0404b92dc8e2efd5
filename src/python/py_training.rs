//! Training entry points for Python.

use std::sync::Arc;

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::core::{CancelToken, EngineError, Params, Result};
use crate::games::{Nim, NimEncoder};
use crate::nn::{Evaluator, ModelScorer, PositionScorer, SessionPool, StateEncoder};
use crate::player::Registry;
use crate::training::{
    ContinuousTrainer, MatchConfig, MatchRunner, SelfPlayConfig, SelfPlayOrchestrator, TrainStats,
    TrainerConfig,
};

use super::py_nn::PyEvaluator;

fn to_py_err(err: EngineError) -> PyErr {
    match err {
        EngineError::Config(err) => PyValueError::new_err(err.to_string()),
        err => PyRuntimeError::new_err(err.to_string()),
    }
}

/// Self-play `matches` games of Nim with `player` and train `evaluator` on
/// them.
///
/// `player` is an option string such as `"model,ab,max_depth=2"`; the
/// scorer key `model` refers to `evaluator`. `options` carries match,
/// self-play and trainer keys. Returns `(matches, steps, average_loss)`.
#[pyfunction]
#[pyo3(signature = (
    evaluator,
    stones = 21,
    max_take = 3,
    matches = 100,
    player = "model,ab".to_string(),
    options = String::new()
))]
pub fn train_nim(
    py: Python<'_>,
    evaluator: &PyEvaluator,
    stones: u32,
    max_take: u32,
    matches: usize,
    player: String,
    options: String,
) -> PyResult<(u64, u64, f32)> {
    let model = Arc::clone(&evaluator.inner) as Arc<dyn Evaluator>;
    let stats = py
        .allow_threads(move || run_nim(model, stones, max_take, matches, &player, &options))
        .map_err(to_py_err)?;
    Ok((stats.matches, stats.steps, stats.average_loss))
}

fn run_nim(
    model: Arc<dyn Evaluator>,
    stones: u32,
    max_take: u32,
    matches: usize,
    player: &str,
    options: &str,
) -> Result<TrainStats> {
    let nim = Arc::new(Nim::new(stones, max_take));
    let encoder: Arc<dyn StateEncoder<Nim>> = Arc::new(NimEncoder::new(&nim));

    let mut params = Params::parse(options)?;
    let match_config = MatchConfig::from_params(&mut params)?;
    let self_play_config = SelfPlayConfig::from_params(&mut params)?;
    let trainer_config = TrainerConfig::from_params(&mut params)?;
    params.finish()?;

    let pool = Arc::new(SessionPool::single(Arc::clone(&model)));
    let scorer_encoder = Arc::clone(&encoder);
    let registry = Registry::new(Arc::clone(&nim))
        .with_default_searchers()
        .with_scorer("model", move |_| {
            Ok(Arc::new(ModelScorer::direct(Arc::clone(&scorer_encoder), Arc::clone(&pool)))
                as Arc<dyn PositionScorer<Nim>>)
        });
    let player = registry.build_player(player)?;

    let cancel = CancelToken::new();
    let runner = MatchRunner::new(Arc::clone(&nim), match_config);
    let orchestrator = SelfPlayOrchestrator::new(runner, self_play_config, cancel.clone());
    let stream = orchestrator.run_matches(matches, player.clone(), player);

    let mut trainer = ContinuousTrainer::new(nim, encoder, model, trainer_config);
    let trained = trainer.run(stream.receiver(), &cancel);
    let played = stream.finish();
    let stats = trained?;
    played?;
    Ok(stats)
}
