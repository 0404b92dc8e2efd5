//! Batching dispatcher integration tests with concurrent searchers.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rust_selfplay::core::{CancelToken, EngineError, GameRules};
use rust_selfplay::games::{Nim, NimEncoder, NimPosition};
use rust_selfplay::nn::{
    AutoBatchDispatcher, ConstantEvaluator, DispatchConfig, LinearConfig, LinearEvaluator,
    ModelScorer, PositionScorer, SessionPool,
};
use rust_selfplay::search::{AlphaBeta, AlphaBetaConfig, NextPositionCache, Searcher};

fn linear_pool() -> Arc<SessionPool> {
    // One weight per residue of the pile modulo 4, then the bias.
    let weights = vec![-1.0, 0.5, 0.25, -0.25, 0.1];
    let model = LinearEvaluator::with_weights(weights, LinearConfig::default());
    Arc::new(SessionPool::replicate(Arc::new(model), 2))
}

fn position(stones: u32) -> NimPosition {
    NimPosition { stones, ply: 0 }
}

// =============================================================================
// Request Correspondence
// =============================================================================

#[test]
fn test_concurrent_callers_get_their_own_scores() {
    let nim = Nim::new(40, 3);
    let pool = linear_pool();
    let direct = ModelScorer::<Nim>::direct(Arc::new(NimEncoder::new(&nim)), Arc::clone(&pool));
    let config = DispatchConfig::default()
        .with_batch_size(4)
        .with_flush_timeout(Duration::from_millis(5));
    let dispatcher = AutoBatchDispatcher::new(pool, config, CancelToken::new());
    let encoder = Arc::new(NimEncoder::new(&nim));
    let batched = Arc::new(ModelScorer::<Nim>::batched(encoder, dispatcher.clone()));

    let handles: Vec<_> = (0..8u32)
        .map(|t| {
            let batched = Arc::clone(&batched);
            thread::spawn(move || {
                (0..50u32)
                    .map(|i| {
                        let stones = (t * 50 + i) % 40;
                        (stones, batched.score(&position(stones)).unwrap())
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for handle in handles {
        for (stones, score) in handle.join().unwrap() {
            let expected = direct.score(&position(stones)).unwrap();
            assert!((score - expected).abs() < 1e-6, "pile {stones}: {score} vs {expected}");
        }
    }
    assert_eq!(dispatcher.stats().positions, 400);
    assert_eq!(dispatcher.stats().failures, 0);
}

#[test]
fn test_policy_weights_follow_action_counts() {
    let nim = Nim::new(10, 3);
    let pool = Arc::new(SessionPool::single(Arc::new(ConstantEvaluator::new(0.0).with_policy())));
    let config = DispatchConfig::default()
        .with_batch_size(3)
        .with_flush_timeout(Duration::from_millis(5));
    let dispatcher = AutoBatchDispatcher::new(pool, config, CancelToken::new());
    let scorer = Arc::new(ModelScorer::<Nim>::batched(Arc::new(NimEncoder::new(&nim)), dispatcher));
    let nim = Arc::new(nim);

    let handles: Vec<_> = (1..=3u32)
        .map(|stones| {
            let scorer = Arc::clone(&scorer);
            let nim = Arc::clone(&nim);
            thread::spawn(move || {
                let pos = position(stones);
                let actions = nim.legal_actions(&pos);
                let (_, weights) = scorer.score_with_policy(&pos, &actions).unwrap();
                (actions.len(), weights.unwrap())
            })
        })
        .collect();

    for handle in handles {
        let (count, weights) = handle.join().unwrap();
        assert_eq!(weights.len(), count);
    }
}

// =============================================================================
// Concurrent Searches
// =============================================================================

#[test]
fn test_parallel_searches_share_batches() {
    let nim = Arc::new(Nim::new(13, 3));
    let config = DispatchConfig::default()
        .with_batch_size(8)
        .with_flush_timeout(Duration::from_millis(2));
    let dispatcher = AutoBatchDispatcher::new(linear_pool(), config, CancelToken::new());
    let scorer: Arc<dyn PositionScorer<Nim>> =
        Arc::new(ModelScorer::<Nim>::batched(Arc::new(NimEncoder::new(&nim)), dispatcher.clone()));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let nim = Arc::clone(&nim);
            let scorer = Arc::clone(&scorer);
            thread::spawn(move || {
                let cache = Arc::new(NextPositionCache::new(Arc::clone(&nim)));
                let searcher = AlphaBeta::new(
                    Arc::clone(&nim),
                    scorer,
                    cache,
                    AlphaBetaConfig::default().with_max_depth(3),
                );
                searcher.search(&nim.initial_position(100)).unwrap().action
            })
        })
        .collect();

    let actions: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(actions.windows(2).all(|w| w[0] == w[1]));
    assert!(dispatcher.stats().positions > 0);
}

// =============================================================================
// Cancellation
// =============================================================================

#[test]
fn test_cancel_releases_every_waiting_caller() {
    let nim = Nim::new(10, 3);
    let cancel = CancelToken::new();
    // Size-only release: three callers never fill a batch of 64.
    let dispatcher = AutoBatchDispatcher::new(
        linear_pool(),
        DispatchConfig::default().with_batch_size(64),
        cancel.clone(),
    );
    let scorer = Arc::new(ModelScorer::<Nim>::batched(Arc::new(NimEncoder::new(&nim)), dispatcher));

    let handles: Vec<_> = (0..3u32)
        .map(|stones| {
            let scorer = Arc::clone(&scorer);
            thread::spawn(move || scorer.score(&position(stones + 1)))
        })
        .collect();
    thread::sleep(Duration::from_millis(20));
    cancel.cancel();

    for handle in handles {
        assert!(matches!(handle.join().unwrap(), Err(EngineError::Cancelled)));
    }
}
