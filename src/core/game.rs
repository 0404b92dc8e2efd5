//! Game rules collaborator trait.
//!
//! The engine never looks inside a position. Games implement `GameRules`
//! to expose:
//! - What actions are legal
//! - How an action turns one position into the next
//! - When the game is over and who won
//!
//! Positions are treated as immutable snapshots: `apply` returns a new
//! position and the old one stays valid.

use std::fmt::Debug;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Score of a proven win, from the perspective of the side to move.
pub const WIN_SCORE: f32 = 1.0;

/// Factor applied to evaluator scores inside searchers, so that a heuristic
/// score never equals a proven win.
pub const EVAL_SCALE: f32 = 0.999;

/// One of the two sides of a game.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// The side that moves at the initial position.
    First,
    /// The other side.
    Second,
}

impl Side {
    /// The opposing side.
    #[inline]
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Side::First => Side::Second,
            Side::Second => Side::First,
        }
    }

    /// Side to move after `ply` plies from the initial position.
    #[inline]
    #[must_use]
    pub const fn for_ply(ply: usize) -> Self {
        if ply % 2 == 0 {
            Side::First
        } else {
            Side::Second
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::First => write!(f, "first"),
            Side::Second => write!(f, "second"),
        }
    }
}

/// Result of a finished game.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameResult {
    /// Single winner.
    Winner(Side),
    /// Draw (no winner).
    Draw,
}

impl GameResult {
    /// Check if a side won.
    #[must_use]
    pub fn is_winner(&self, side: Side) -> bool {
        matches!(self, GameResult::Winner(s) if *s == side)
    }
}

/// Rules of a two-player game.
///
/// ## Implementation Notes
///
/// - `legal_actions`: return empty when the side to move has to pass; the
///   engine then plays `skip_action`
/// - `apply`: must be deterministic, searchers replay it freely
/// - `is_terminal`: true for wins and draws alike
/// - `repetitions`: how many times the current position occurred before,
///   games without repetitions can keep the default
pub trait GameRules: Send + Sync + 'static {
    /// Immutable game snapshot.
    type Position: Clone + Debug + Hash + Eq + Send + Sync + 'static;

    /// Move descriptor. Serialized as-is into match files.
    type Action: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Starting position of a new match.
    fn initial_position(&self, max_plies: usize) -> Self::Position;

    /// Legal actions at `position`, in a stable enumeration order.
    fn legal_actions(&self, position: &Self::Position) -> Vec<Self::Action>;

    /// Position reached by playing `action`.
    fn apply(&self, position: &Self::Position, action: &Self::Action) -> Self::Position;

    /// Action played when no legal action exists.
    fn skip_action(&self) -> Self::Action;

    /// Whether the game is over (win or draw).
    fn is_terminal(&self, position: &Self::Position) -> bool;

    /// Whether the game ended in a draw.
    fn is_draw(&self, position: &Self::Position) -> bool;

    /// Winner of a finished game.
    fn winner(&self, position: &Self::Position) -> Option<Side>;

    /// Side to move.
    fn next_player(&self, position: &Self::Position) -> Side;

    /// Number of plies played to reach `position`.
    fn ply(&self, position: &Self::Position) -> usize;

    /// Number of earlier occurrences of `position` in its own history.
    fn repetitions(&self, _position: &Self::Position) -> usize {
        0
    }

    /// Result of a finished game, `None` while it continues.
    fn result(&self, position: &Self::Position) -> Option<GameResult> {
        if !self.is_terminal(position) {
            return None;
        }
        if self.is_draw(position) {
            return Some(GameResult::Draw);
        }
        Some(self.winner(position).map_or(GameResult::Draw, GameResult::Winner))
    }
}

/// Score of a finished game from the perspective of the side to move.
///
/// Returns `None` if the game continues, `0` for a draw and `±WIN_SCORE`
/// otherwise.
pub fn end_score<G: GameRules + ?Sized>(rules: &G, position: &G::Position) -> Option<f32> {
    let result = rules.result(position)?;
    Some(match result {
        GameResult::Draw => 0.0,
        GameResult::Winner(side) if side == rules.next_player(position) => WIN_SCORE,
        GameResult::Winner(_) => -WIN_SCORE,
    })
}

/// One-hot vector of length `len` with `1.0` at `index`.
#[must_use]
pub fn one_hot(len: usize, index: usize) -> Vec<f32> {
    let mut v = vec![0.0; len];
    if index < len {
        v[index] = 1.0;
    }
    v
}
