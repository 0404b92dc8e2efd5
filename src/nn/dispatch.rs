//! Automatic batching of concurrent evaluation requests.
//!
//! ## Overview
//!
//! Searchers on many threads each need one position scored at a time, but
//! evaluators are far more efficient on large batches. The dispatcher sits
//! in between:
//!
//! ```text
//!  callers --Command--> coordinator --Batch--> evaluation workers --reply--> callers
//!          (unbounded)   (1 thread)   (bounded)   (1 per pool session)
//! ```
//!
//! - The coordinator owns the batch under construction. It appends each
//!   request and releases the batch once it reaches the configured size (or,
//!   if `flush_timeout` is set, once its oldest request waited that long).
//! - Evaluation workers run the evaluator on whole batches, split the result
//!   per request and answer each request's one-shot reply channel exactly
//!   once. Evaluator failures are answered with the error, never dropped.
//! - Callers block on their reply or on the run's `CancelToken`, whichever
//!   fires first.
//!
//! Dropping the last `AutoBatchDispatcher` handle closes the command
//! channel; the coordinator then flushes its partial batch and exits, and
//! the workers exit once the batch channel drains.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};

use crate::core::{CancelToken, EngineError, EvalError, Result};

use super::encoder::EncodedState;
use super::pool::SessionPool;
use super::traits::{Evaluator, FeatureBatch};

/// Dispatcher settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Number of requests that releases a batch.
    pub batch_size: usize,

    /// Release a partial batch once its oldest request waited this long.
    /// `None` releases on size only, which can stall when fewer than
    /// `batch_size` callers are active.
    pub flush_timeout: Option<Duration>,

    /// Evaluation worker threads (0 = one per pool session).
    pub workers: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            flush_timeout: None,
            workers: 0,
        }
    }
}

impl DispatchConfig {
    /// Set the release threshold.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Enable the timeout-based flush.
    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = Some(timeout);
        self
    }

    /// Set the number of evaluation workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

/// Score and optional per-action weights for one request.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoreOutput {
    /// Score for the side to move.
    pub score: f32,
    /// Weights of the request's actions, if the evaluator has a policy.
    pub action_weights: Option<Vec<f32>>,
}

/// One position waiting to be scored.
#[derive(Debug)]
pub struct ScoreRequest {
    features: EncodedState,
    action_count: usize,
    action_features: Vec<EncodedState>,
    reply: Sender<Result<ScoreOutput>>,
}

/// Requests accumulated for one evaluator call, with their features
/// already concatenated.
#[derive(Debug)]
pub struct Batch {
    features: FeatureBatch,
    replies: Vec<Sender<Result<ScoreOutput>>>,
    opened: Instant,
}

impl Batch {
    fn new() -> Self {
        Self {
            features: FeatureBatch::new(),
            replies: Vec::new(),
            opened: Instant::now(),
        }
    }

    fn push(&mut self, request: ScoreRequest) {
        if self.replies.is_empty() {
            self.opened = Instant::now();
        }
        self.features
            .push(request.features, request.action_count, request.action_features);
        self.replies.push(request.reply);
    }

    /// Number of requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.replies.len()
    }

    /// Whether the batch holds no request.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }

    fn fail(self, err: &EngineError) {
        for reply in self.replies {
            let _ = reply.send(Err(replicate(err)));
        }
    }
}

enum Command {
    Score(ScoreRequest),
    Resize(usize),
}

/// Counters shared by the dispatcher threads.
#[derive(Debug, Default)]
struct Shared {
    batch_size: AtomicUsize,
    evaluations: AtomicU64,
    positions: AtomicU64,
    failures: AtomicU64,
}

/// Snapshot of dispatcher activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Evaluator calls made.
    pub evaluations: u64,
    /// Positions scored.
    pub positions: u64,
    /// Evaluator calls that failed.
    pub failures: u64,
}

impl DispatchStats {
    /// Average positions per evaluator call.
    #[must_use]
    pub fn mean_batch(&self) -> f64 {
        if self.evaluations == 0 {
            0.0
        } else {
            self.positions as f64 / self.evaluations as f64
        }
    }
}

/// Handle onto a running dispatcher. Cheap to clone.
#[derive(Clone)]
pub struct AutoBatchDispatcher {
    commands: Sender<Command>,
    shared: Arc<Shared>,
    cancel: CancelToken,
    has_policy: bool,
}

impl std::fmt::Debug for AutoBatchDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoBatchDispatcher")
            .field("batch_size", &self.batch_size())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Pending reply of a submitted request.
#[derive(Debug)]
pub struct Ticket {
    reply: Receiver<Result<ScoreOutput>>,
    cancel: CancelToken,
}

impl Ticket {
    /// Block until the request is scored or the run is cancelled.
    pub fn wait(self) -> Result<ScoreOutput> {
        crossbeam::select! {
            recv(self.reply) -> msg => match msg {
                Ok(result) => result,
                Err(_) if self.cancel.is_cancelled() => Err(EngineError::Cancelled),
                Err(_) => Err(EngineError::invariant(
                    "dispatcher dropped a request without answering",
                )),
            },
            recv(self.cancel.signal()) -> _ => Err(EngineError::Cancelled),
        }
    }
}

impl AutoBatchDispatcher {
    /// Start the coordinator and evaluation workers over `pool`.
    pub fn new(pool: Arc<SessionPool>, config: DispatchConfig, cancel: CancelToken) -> Self {
        let batch_size = config.batch_size.max(1);
        let workers = if config.workers == 0 { pool.len() } else { config.workers };
        let shared = Arc::new(Shared {
            batch_size: AtomicUsize::new(batch_size),
            ..Shared::default()
        });
        let has_policy = pool.has_policy();

        let (commands, command_rx) = channel::unbounded();
        let (batch_tx, batch_rx) = channel::bounded::<Batch>(workers * 2);

        for i in 0..workers {
            let batches = batch_rx.clone();
            let pool = Arc::clone(&pool);
            let shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("eval-{i}"))
                .spawn(move || evaluate_batches(&pool, &batches, &shared));
            if let Err(err) = spawned {
                log::error!("failed to spawn evaluation worker {i}: {err}");
            }
        }
        drop(batch_rx);

        let coordinator = {
            let shared = Arc::clone(&shared);
            let cancel = cancel.clone();
            let flush_timeout = config.flush_timeout;
            thread::Builder::new()
                .name("eval-dispatch".to_string())
                .spawn(move || {
                    coordinate(&command_rx, &batch_tx, batch_size, flush_timeout, &shared, &cancel)
                })
        };
        if let Err(err) = coordinator {
            // Requests will find the command channel closed and report it.
            log::error!("failed to spawn dispatcher coordinator: {err}");
        }
        log::debug!("dispatcher started: batch_size={batch_size}, workers={workers}");

        Self {
            commands,
            shared,
            cancel,
            has_policy,
        }
    }

    /// Queue one position and return a ticket for its reply.
    ///
    /// `action_count` is the number of weights wanted back (0 for none).
    pub fn submit(
        &self,
        features: EncodedState,
        action_count: usize,
        action_features: Vec<EncodedState>,
    ) -> Ticket {
        let (reply, reply_rx) = channel::bounded(1);
        let request = ScoreRequest {
            features,
            action_count,
            action_features,
            reply,
        };
        let sent = self.commands.send(Command::Score(request));
        if let Err(channel::SendError(Command::Score(request))) = sent {
            let err = if self.cancel.is_cancelled() {
                EngineError::Cancelled
            } else {
                EngineError::invariant("dispatcher coordinator is not running")
            };
            let _ = request.reply.send(Err(err));
        }
        Ticket {
            reply: reply_rx,
            cancel: self.cancel.clone(),
        }
    }

    /// Score one position, blocking until its batch is evaluated.
    pub fn score(
        &self,
        features: EncodedState,
        action_count: usize,
        action_features: Vec<EncodedState>,
    ) -> Result<ScoreOutput> {
        self.submit(features, action_count, action_features).wait()
    }

    /// Change the release threshold. Values below 1 are clamped to 1.
    pub fn set_batch_size(&self, batch_size: usize) {
        let batch_size = batch_size.max(1);
        self.shared.batch_size.store(batch_size, Ordering::Relaxed);
        let _ = self.commands.send(Command::Resize(batch_size));
    }

    /// Current release threshold.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.shared.batch_size.load(Ordering::Relaxed)
    }

    /// Whether replies carry action weights.
    #[must_use]
    pub fn has_policy(&self) -> bool {
        self.has_policy
    }

    /// Activity counters.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            evaluations: self.shared.evaluations.load(Ordering::Relaxed),
            positions: self.shared.positions.load(Ordering::Relaxed),
            failures: self.shared.failures.load(Ordering::Relaxed),
        }
    }
}

fn coordinate(
    commands: &Receiver<Command>,
    batches: &Sender<Batch>,
    mut batch_size: usize,
    flush_timeout: Option<Duration>,
    shared: &Shared,
    cancel: &CancelToken,
) {
    let mut pending = Batch::new();
    loop {
        let received = match flush_timeout {
            Some(timeout) if !pending.is_empty() => {
                commands.recv_deadline(pending.opened + timeout)
            }
            _ => commands.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(Command::Score(request)) => {
                pending.push(request);
                if pending.len() >= batch_size {
                    release(&mut pending, batches);
                }
            }
            Ok(Command::Resize(size)) => {
                log::debug!("dispatcher batch size {batch_size} -> {size}");
                batch_size = size;
                if pending.len() >= batch_size {
                    release(&mut pending, batches);
                }
            }
            Err(RecvTimeoutError::Timeout) => release(&mut pending, batches),
            Err(RecvTimeoutError::Disconnected) => {
                if !pending.is_empty() {
                    if cancel.is_cancelled() {
                        pending.fail(&EngineError::Cancelled);
                    } else {
                        release(&mut pending, batches);
                    }
                }
                break;
            }
        }
    }
    log::debug!(
        "dispatcher stopped after {} evaluations",
        shared.evaluations.load(Ordering::Relaxed)
    );
}

fn release(pending: &mut Batch, batches: &Sender<Batch>) {
    let batch = std::mem::replace(pending, Batch::new());
    if let Err(channel::SendError(batch)) = batches.send(batch) {
        batch.fail(&EngineError::invariant("no evaluation worker is running"));
    }
}

fn evaluate_batches(pool: &SessionPool, batches: &Receiver<Batch>, shared: &Shared) {
    for batch in batches.iter() {
        let Batch { features, replies, .. } = batch;
        let session = pool.next_session();
        let result = session
            .evaluate(&features)
            .map_err(EngineError::from)
            .and_then(|output| output.split(&features));
        shared.evaluations.fetch_add(1, Ordering::Relaxed);
        shared.positions.fetch_add(features.len() as u64, Ordering::Relaxed);
        match result {
            Ok(outputs) => {
                for (reply, (score, action_weights)) in replies.into_iter().zip(outputs) {
                    let _ = reply.send(Ok(ScoreOutput { score, action_weights }));
                }
            }
            Err(err) => {
                shared.failures.fetch_add(1, Ordering::Relaxed);
                log::error!("{} failed on a batch of {}: {err}", session.name(), features.len());
                for reply in replies {
                    let _ = reply.send(Err(replicate(&err)));
                }
            }
        }
    }
}

/// Copy of a batch-wide error for one of its requests.
fn replicate(err: &EngineError) -> EngineError {
    match err {
        EngineError::Cancelled => EngineError::Cancelled,
        EngineError::Invariant(msg) => EngineError::Invariant(msg.clone()),
        EngineError::Evaluator(EvalError::Backend(msg)) => {
            EngineError::Evaluator(EvalError::Backend(msg.clone()))
        }
        other => EngineError::Evaluator(EvalError::Backend(other.to_string())),
    }
}
