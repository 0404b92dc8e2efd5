//! Position encoding for evaluator input.
//!
//! Transforms positions into tensor representations the evaluator consumes.

use serde::{Deserialize, Serialize};

use crate::core::GameRules;

/// Encoded position or action as a flat tensor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncodedState {
    /// Flattened tensor data (row-major order).
    pub tensor: Vec<f32>,

    /// Shape of the tensor (e.g., [channels, height, width] or [features]).
    pub shape: Vec<usize>,
}

impl EncodedState {
    /// Create a new encoded state.
    pub fn new(tensor: Vec<f32>, shape: Vec<usize>) -> Self {
        debug_assert_eq!(
            tensor.len(),
            shape.iter().product::<usize>(),
            "Tensor length must match shape product"
        );
        Self { tensor, shape }
    }

    /// Flat feature vector with shape `[len]`.
    pub fn flat(tensor: Vec<f32>) -> Self {
        let len = tensor.len();
        Self {
            tensor,
            shape: vec![len],
        }
    }

    /// Create a zero-filled encoded state with the given shape.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let size = shape.iter().product();
        Self {
            tensor: vec![0.0; size],
            shape,
        }
    }

    /// Get the total number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tensor.len()
    }

    /// Check if the tensor is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tensor.is_empty()
    }
}

/// Encodes positions of game `G` for the evaluator.
///
/// Each encoder defines:
/// - How to convert a position to a tensor, from the side to move's view
/// - Optionally, per-action features for policy heads
/// - The shape of the output tensor
pub trait StateEncoder<G: GameRules>: Send + Sync {
    /// Encode `position` from the perspective of its side to move.
    fn encode(&self, position: &G::Position) -> EncodedState;

    /// Features for each of `actions` at `position`. Encoders without
    /// action features return an empty vector.
    fn encode_actions(&self, _position: &G::Position, _actions: &[G::Action]) -> Vec<EncodedState> {
        Vec::new()
    }

    /// Shape of encoded positions.
    fn output_shape(&self) -> Vec<usize>;
}
