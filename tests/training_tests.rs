//! Self-play, persistence and training integration tests on Nim.

use std::fs::File;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rust_selfplay::core::{one_hot, CancelToken, GameResult, GameRules, Side};
use rust_selfplay::games::{Nim, NimEncoder};
use rust_selfplay::nn::{
    ConstantEvaluator, Evaluator, LinearConfig, LinearEvaluator, ModelScorer, PositionScorer,
    SessionPool, StateEncoder,
};
use rust_selfplay::player::{Player, Registry};
use rust_selfplay::training::{
    load_matches, rescore_and_train, save_matches, ContinuousTrainer, Match, MatchConfig, MatchEnd,
    MatchRunner, RescoreConfig, Rescorer, SelfPlayConfig, SelfPlayOrchestrator, TrainerConfig,
};

fn registry(nim: &Arc<Nim>, evaluator: Arc<dyn Evaluator>) -> Registry<Nim> {
    let encoder: Arc<dyn StateEncoder<Nim>> = Arc::new(NimEncoder::new(nim));
    let pool = Arc::new(SessionPool::single(evaluator));
    Registry::new(Arc::clone(nim))
        .with_default_searchers()
        .with_scorer("model", move |_| {
            let scorer = ModelScorer::direct(Arc::clone(&encoder), Arc::clone(&pool));
            Ok(Arc::new(scorer) as Arc<dyn PositionScorer<Nim>>)
        })
}

fn self_play(
    nim: &Arc<Nim>,
    player: &Player<Nim>,
    n: usize,
    parallelism: usize,
) -> Vec<Arc<Match<Nim>>> {
    let runner = MatchRunner::new(Arc::clone(nim), MatchConfig::default());
    let config = SelfPlayConfig::default().with_parallelism(parallelism);
    let orchestrator = SelfPlayOrchestrator::new(runner, config, CancelToken::new());
    let mut stream = orchestrator.run_matches(n, player.clone(), player.clone());
    let mut matches: Vec<_> = stream.by_ref().collect();
    stream.finish().unwrap();
    matches.sort_by_key(|m| m.id);
    matches
}

// =============================================================================
// Self-Play Tests
// =============================================================================

#[test]
fn test_self_play_forced_nim() {
    let nim = Arc::new(Nim::new(2, 1));
    let player = registry(&nim, Arc::new(ConstantEvaluator::new(0.0)))
        .build_player("model,ab")
        .unwrap();

    let matches = self_play(&nim, &player, 4, 2);
    assert_eq!(matches.iter().map(|m| m.id).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    for m in &matches {
        assert_eq!(m.actions(), &[1, 1]);
        assert_eq!(m.end, MatchEnd::Terminal);
        // The side moving second takes the last stone.
        assert_eq!(m.result, GameResult::Winner(Side::Second));
        let expected = if m.id % 2 == 1 { 0 } else { 1 };
        assert_eq!(m.winning_player(), Some(expected));
    }
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_matches_survive_save_and_load() {
    let nim = Arc::new(Nim::new(9, 3));
    let player = registry(&nim, Arc::new(ConstantEvaluator::new(0.0)))
        .build_player("model,ab,max_depth=2,randomness=1.0,seed=3")
        .unwrap();
    let matches = self_play(&nim, &player, 6, 2);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("matches.bin");
    save_matches(&path, matches.iter().map(|m| m.as_ref())).unwrap();
    let loaded = load_matches(nim.as_ref(), &path).unwrap();

    assert_eq!(loaded.len(), matches.len());
    for (original, loaded) in matches.iter().zip(&loaded) {
        assert_eq!(loaded.actions(), original.actions());
        assert_eq!(loaded.positions(), original.positions());
        assert_eq!(loaded.end, original.end);
        assert_eq!(loaded.result, original.result);

        let before = original.labels().snapshot();
        let after = loaded.labels().snapshot();
        assert_eq!(after.scores, before.scores);
        for (ply, action) in original.actions().iter().enumerate() {
            let legal = nim.legal_actions(&original.positions()[ply]);
            let expected = match &before.policy[ply] {
                Some(policy) => policy.clone(),
                None => one_hot(legal.len(), legal.iter().position(|a| a == action).unwrap()),
            };
            assert_eq!(after.policy[ply].as_ref(), Some(&expected));
        }
    }
}

// =============================================================================
// Training Pipeline Tests
// =============================================================================

#[test]
fn test_self_play_feeds_trainer() {
    let nim = Arc::new(Nim::new(9, 3));
    let linear = LinearConfig::default().with_learning_rate(0.1).with_batch_size(16);
    let model = Arc::new(LinearEvaluator::new(4, linear));
    let player = registry(&nim, Arc::clone(&model) as Arc<dyn Evaluator>)
        .build_player("model,ab,max_depth=2,randomness=0.5")
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let checkpoint = dir.path().join("linear.bin");
    let cancel = CancelToken::new();
    let runner = MatchRunner::new(Arc::clone(&nim), MatchConfig::default());
    let config = SelfPlayConfig::default().with_parallelism(2);
    let orchestrator = SelfPlayOrchestrator::new(runner, config, cancel.clone());
    let stream = orchestrator.run_matches(30, player.clone(), player);

    let mut trainer = ContinuousTrainer::new(
        Arc::clone(&nim),
        Arc::new(NimEncoder::new(&nim)),
        Arc::clone(&model) as Arc<dyn Evaluator>,
        TrainerConfig::default()
            .with_buffer_size(32)
            .with_steps_per_match(2)
            .with_checkpoint(&checkpoint),
    );
    let stats = trainer.run(stream.receiver(), &cancel).unwrap();
    let summary = stream.finish().unwrap();

    assert_eq!(summary.played, 30);
    assert_eq!(stats.matches, 30);
    assert!(stats.steps > 0);
    assert!(stats.average_loss.is_finite());
    assert!((stats.wins + stats.losses + stats.draws - 1.0).abs() < 1e-4);

    let saved =
        LinearEvaluator::load(File::open(&checkpoint).unwrap(), LinearConfig::default()).unwrap();
    assert_eq!(saved.weights().unwrap(), model.weights().unwrap());
}

#[test]
fn test_rescore_and_train_on_saved_corpus() {
    let nim = Arc::new(Nim::new(9, 3));
    let player = registry(&nim, Arc::new(ConstantEvaluator::new(0.0)))
        .build_player("model,ab,max_depth=6")
        .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corpus.bin");
    let played = self_play(&nim, &player, 4, 2);
    save_matches(&path, played.iter().map(|m| m.as_ref())).unwrap();

    let corpus: Vec<Arc<Match<Nim>>> = load_matches(nim.as_ref(), &path)
        .unwrap()
        .into_iter()
        .map(Arc::new)
        .collect();
    let cancel = CancelToken::new();
    let rescorer = Rescorer::new(
        nim.as_ref(),
        corpus,
        RescoreConfig::default().with_parallelism(2),
        cancel.clone(),
    )
    .unwrap();

    let model = Arc::new(ConstantEvaluator::new(0.5).with_batch_size(4));
    let shallow = registry(&nim, Arc::clone(&model) as Arc<dyn Evaluator>)
        .build_player("model,ab,max_depth=1")
        .unwrap();
    let mut trainer = ContinuousTrainer::new(
        Arc::clone(&nim),
        Arc::new(NimEncoder::new(&nim)),
        Arc::clone(&model) as Arc<dyn Evaluator>,
        TrainerConfig::default().with_buffer_size(8).with_learn_every(2),
    );

    let stopper = {
        let cancel = cancel.clone();
        let model = Arc::clone(&model);
        thread::spawn(move || {
            while model.learn_calls() < 10 {
                thread::sleep(Duration::from_millis(1));
            }
            cancel.cancel();
        })
    };
    let stats = rescore_and_train(&mut trainer, &rescorer, shallow, &cancel).unwrap();
    stopper.join().unwrap();
    assert!(stats.steps >= 10);

    // Rescored labels are written back into the corpus and can be saved.
    let rescored = dir.path().join("rescored.bin");
    save_matches(&rescored, rescorer.matches().iter().map(|m| m.as_ref())).unwrap();
    let reloaded = load_matches(nim.as_ref(), &rescored).unwrap();
    let changed = reloaded
        .iter()
        .zip(&played)
        .any(|(after, before)| {
            after.labels().snapshot().scores != before.labels().snapshot().scores
        });
    assert!(changed);
}
