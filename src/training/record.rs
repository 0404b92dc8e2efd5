//! Match records.
//!
//! A `Match` is immutable once built except for its labels: the per-ply
//! scores and policy weights sit behind `SharedLabels`, so rescoring
//! workers can rewrite them while a trainer reads snapshots.

use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::core::{EngineError, GameResult, GameRules, Result, Side};

/// Why a match stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchEnd {
    /// The game reached a finished position.
    Terminal,
    /// The ply cap was reached. Counts as a draw.
    PlyLimit,
    /// A position repeated too often. Counts as a draw.
    Repetition,
}

/// Per-ply training labels of a match.
///
/// Both vectors have one entry per position, the final position included.
/// `scores[i]` is from the perspective of the side to move at position `i`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchLabels {
    /// Score label per position.
    pub scores: Vec<f32>,
    /// Action weights per position, `None` where nothing was searched.
    pub policy: Vec<Option<Vec<f32>>>,
}

impl MatchLabels {
    /// Number of labeled positions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Whether no position is labeled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Blend `end_scores[i]` into every score with `weight`.
    pub fn blend(&mut self, end_scores: &[f32], weight: f32) {
        for (score, end) in self.scores.iter_mut().zip(end_scores) {
            *score = weight * end + (1.0 - weight) * *score;
        }
    }
}

/// Labels guarded for concurrent rescoring.
#[derive(Debug, Default)]
pub struct SharedLabels(Mutex<MatchLabels>);

impl SharedLabels {
    /// Wrap `labels`.
    #[must_use]
    pub fn new(labels: MatchLabels) -> Self {
        Self(Mutex::new(labels))
    }

    fn lock(&self) -> MutexGuard<'_, MatchLabels> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Run `f` on the labels under the lock.
    pub fn read<R>(&self, f: impl FnOnce(&MatchLabels) -> R) -> R {
        f(&self.lock())
    }

    /// Copy of the current labels.
    #[must_use]
    pub fn snapshot(&self) -> MatchLabels {
        self.lock().clone()
    }

    /// Score and policy label of one ply.
    #[must_use]
    pub fn get(&self, ply: usize) -> Option<(f32, Option<Vec<f32>>)> {
        let labels = self.lock();
        let score = *labels.scores.get(ply)?;
        Some((score, labels.policy.get(ply).cloned().flatten()))
    }

    /// Replace the labels of one ply.
    pub fn update(&self, ply: usize, score: f32, policy: Option<Vec<f32>>) -> Result<()> {
        let mut labels = self.lock();
        if ply >= labels.scores.len() {
            return Err(EngineError::invariant(format!(
                "label update at ply {ply} of a match with {} positions",
                labels.scores.len()
            )));
        }
        labels.scores[ply] = score;
        if policy.is_some() {
            labels.policy[ply] = policy;
        }
        Ok(())
    }
}

/// A played or loaded match.
#[derive(Debug)]
pub struct Match<G: GameRules> {
    /// Sequence number, also used to alternate who moves first.
    pub id: u64,
    /// Ply cap the match was played with.
    pub max_plies: usize,
    /// Whether the second player moved first.
    pub swapped: bool,
    /// Why the match stopped.
    pub end: MatchEnd,
    /// Final result. Non-terminal ends are draws.
    pub result: GameResult,
    positions: Vec<G::Position>,
    actions: Vec<G::Action>,
    labels: SharedLabels,
}

impl<G: GameRules> Match<G> {
    /// Assemble a match, checking that every sequence has the right length.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: u64,
        max_plies: usize,
        swapped: bool,
        end: MatchEnd,
        result: GameResult,
        positions: Vec<G::Position>,
        actions: Vec<G::Action>,
        labels: MatchLabels,
    ) -> Result<Self> {
        if positions.len() != actions.len() + 1 {
            return Err(EngineError::invariant(format!(
                "match {id}: {} positions for {} actions",
                positions.len(),
                actions.len()
            )));
        }
        if labels.scores.len() != positions.len() || labels.policy.len() != positions.len() {
            return Err(EngineError::invariant(format!(
                "match {id}: {} scores and {} policy labels for {} positions",
                labels.scores.len(),
                labels.policy.len(),
                positions.len()
            )));
        }
        Ok(Self {
            id,
            max_plies,
            swapped,
            end,
            result,
            positions,
            actions,
            labels: SharedLabels::new(labels),
        })
    }

    /// Every position, the initial one first.
    pub fn positions(&self) -> &[G::Position] {
        &self.positions
    }

    /// Actions played, one fewer than positions.
    pub fn actions(&self) -> &[G::Action] {
        &self.actions
    }

    /// Guarded labels.
    pub fn labels(&self) -> &SharedLabels {
        &self.labels
    }

    /// Number of plies played.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether no ply was played.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Last position.
    pub fn final_position(&self) -> &G::Position {
        // from_parts guarantees at least one position.
        &self.positions[self.positions.len() - 1]
    }

    /// Whether the match ended without a winner.
    #[must_use]
    pub fn is_draw(&self) -> bool {
        self.result == GameResult::Draw
    }

    /// Winning player: `0` for the player passed first to the runner,
    /// `1` for the other, `None` for draws.
    #[must_use]
    pub fn winning_player(&self) -> Option<usize> {
        match self.result {
            GameResult::Draw => None,
            GameResult::Winner(side) => {
                let first_won = side == Side::First;
                Some(usize::from(first_won == self.swapped))
            }
        }
    }
}

/// Incremental match assembly used while playing.
pub(crate) struct MatchBuilder<G: GameRules> {
    positions: Vec<G::Position>,
    actions: Vec<G::Action>,
    scores: Vec<f32>,
    policy: Vec<Option<Vec<f32>>>,
    pending_skip: bool,
}

impl<G: GameRules> MatchBuilder<G> {
    pub(crate) fn new(initial: G::Position) -> Self {
        Self {
            positions: vec![initial],
            actions: Vec::new(),
            scores: Vec::new(),
            policy: Vec::new(),
            pending_skip: false,
        }
    }

    pub(crate) fn last(&self) -> &G::Position {
        &self.positions[self.positions.len() - 1]
    }

    fn settle_skip(&mut self, next_score: f32) {
        if self.pending_skip {
            if let Some(last) = self.scores.last_mut() {
                *last = -next_score;
            }
            self.pending_skip = false;
        }
    }

    /// Record a searched ply.
    pub(crate) fn push(
        &mut self,
        action: G::Action,
        next: G::Position,
        score: f32,
        policy: Option<Vec<f32>>,
    ) {
        self.settle_skip(score);
        self.actions.push(action);
        self.positions.push(next);
        self.scores.push(score);
        self.policy.push(policy);
    }

    /// Record a forced skip. Its score is filled in from the next ply.
    pub(crate) fn push_skip(&mut self, action: G::Action, next: G::Position) {
        self.settle_skip(0.0);
        self.actions.push(action);
        self.positions.push(next);
        self.scores.push(0.0);
        self.policy.push(None);
        self.pending_skip = true;
    }

    pub(crate) fn finish(
        mut self,
        id: u64,
        max_plies: usize,
        swapped: bool,
        end: MatchEnd,
        result: GameResult,
        final_score: f32,
    ) -> Result<Match<G>> {
        self.settle_skip(final_score);
        self.scores.push(final_score);
        self.policy.push(None);
        Match::from_parts(
            id,
            max_plies,
            swapped,
            end,
            result,
            self.positions,
            self.actions,
            MatchLabels {
                scores: self.scores,
                policy: self.policy,
            },
        )
    }
}
