//! Subtraction Nim: players alternately take 1..=max_take stones, whoever
//! takes the last stone wins.
//!
//! Positions with `stones % (max_take + 1) == 0` are lost for the side to
//! move, which makes the game a convenient learning target.

use crate::core::{GameRules, Side};
use crate::nn::{EncodedState, StateEncoder};

/// Nim rules.
#[derive(Clone, Debug)]
pub struct Nim {
    stones: u32,
    max_take: u32,
}

/// Nim position.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NimPosition {
    /// Stones left on the pile.
    pub stones: u32,
    /// Plies played so far.
    pub ply: u32,
}

impl Nim {
    /// Game starting with `stones` where each move takes at most `max_take`.
    #[must_use]
    pub fn new(stones: u32, max_take: u32) -> Self {
        Self {
            stones,
            max_take: max_take.max(1),
        }
    }

    /// Starting pile size.
    #[must_use]
    pub fn stones(&self) -> u32 {
        self.stones
    }

    /// Largest number of stones a move may take.
    #[must_use]
    pub fn max_take(&self) -> u32 {
        self.max_take
    }

    /// Whether the side to move at `position` loses against perfect play.
    #[must_use]
    pub fn is_losing(&self, position: &NimPosition) -> bool {
        position.stones % (self.max_take + 1) == 0
    }
}

impl GameRules for Nim {
    type Position = NimPosition;
    type Action = u32;

    fn initial_position(&self, _max_plies: usize) -> NimPosition {
        NimPosition {
            stones: self.stones,
            ply: 0,
        }
    }

    fn legal_actions(&self, position: &NimPosition) -> Vec<u32> {
        (1..=self.max_take.min(position.stones)).collect()
    }

    fn apply(&self, position: &NimPosition, action: &u32) -> NimPosition {
        NimPosition {
            stones: position.stones.saturating_sub(*action),
            ply: position.ply + 1,
        }
    }

    fn skip_action(&self) -> u32 {
        0
    }

    fn is_terminal(&self, position: &NimPosition) -> bool {
        position.stones == 0
    }

    fn is_draw(&self, _position: &NimPosition) -> bool {
        false
    }

    fn winner(&self, position: &NimPosition) -> Option<Side> {
        self.is_terminal(position)
            .then(|| self.next_player(position).other())
    }

    fn next_player(&self, position: &NimPosition) -> Side {
        Side::for_ply(position.ply as usize)
    }

    fn ply(&self, position: &NimPosition) -> usize {
        position.ply as usize
    }
}

/// Encodes the pile size modulo `max_take + 1` as a one-hot vector.
///
/// Action features encode the pile left after each action the same way.
#[derive(Clone, Debug)]
pub struct NimEncoder {
    period: u32,
}

impl NimEncoder {
    /// Encoder for `game`.
    #[must_use]
    pub fn new(game: &Nim) -> Self {
        Self {
            period: game.max_take + 1,
        }
    }

    fn one_hot(&self, stones: u32) -> EncodedState {
        let mut tensor = vec![0.0; self.period as usize];
        tensor[(stones % self.period) as usize] = 1.0;
        EncodedState::new(tensor, vec![self.period as usize])
    }
}

impl StateEncoder<Nim> for NimEncoder {
    fn encode(&self, position: &NimPosition) -> EncodedState {
        self.one_hot(position.stones)
    }

    fn encode_actions(&self, position: &NimPosition, actions: &[u32]) -> Vec<EncodedState> {
        actions
            .iter()
            .map(|a| self.one_hot(position.stones.saturating_sub(*a)))
            .collect()
    }

    fn output_shape(&self) -> Vec<usize> {
        vec![self.period as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{end_score, GameResult};

    #[test]
    fn test_legal_actions_bounded_by_pile() {
        let nim = Nim::new(2, 3);
        let start = nim.initial_position(10);
        assert_eq!(nim.legal_actions(&start), vec![1, 2]);
    }

    #[test]
    fn test_exact_two_ply_game() {
        let nim = Nim::new(2, 1);
        let mut position = nim.initial_position(10);
        let mut plies = 0;
        while !nim.is_terminal(&position) {
            let actions = nim.legal_actions(&position);
            assert_eq!(actions, vec![1]);
            position = nim.apply(&position, &actions[0]);
            plies += 1;
        }
        assert_eq!(plies, 2);
        assert_eq!(nim.result(&position), Some(GameResult::Winner(Side::Second)));
        assert_eq!(end_score(&nim, &position), Some(-1.0));
    }

    #[test]
    fn test_losing_positions() {
        let nim = Nim::new(8, 3);
        assert!(nim.is_losing(&NimPosition { stones: 8, ply: 0 }));
        assert!(!nim.is_losing(&NimPosition { stones: 7, ply: 0 }));
    }

    #[test]
    fn test_encoder_shapes() {
        let nim = Nim::new(5, 2);
        let encoder = NimEncoder::new(&nim);
        let start = nim.initial_position(10);
        let encoded = encoder.encode(&start);
        assert_eq!(encoded.shape, vec![3]);
        assert_eq!(encoded.tensor, vec![0.0, 0.0, 1.0]);

        let actions = nim.legal_actions(&start);
        let per_action = encoder.encode_actions(&start, &actions);
        assert_eq!(per_action.len(), 2);
        // Taking 1 leaves 4 (4 % 3 = 1), taking 2 leaves 3 (3 % 3 = 0).
        assert_eq!(per_action[0].tensor, vec![0.0, 1.0, 0.0]);
        assert_eq!(per_action[1].tensor, vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_encoder_wraps_pile_by_period() {
        let nim = Nim::new(9, 3);
        let encoder = NimEncoder::new(&nim);
        for (stones, hot) in [(0, 0), (3, 3), (4, 0), (9, 1), (14, 2)] {
            let encoded = encoder.encode(&NimPosition { stones, ply: 0 });
            let mut expected = vec![0.0; 4];
            expected[hot] = 1.0;
            assert_eq!(encoded.tensor, expected, "pile {stones}");
        }
    }
}
