//! Deterministic random number generation for searchers and trainers.
//!
//! ## Key Features
//!
//! - **Deterministic**: Same seed produces identical sequence
//! - **Forkable**: Create independent branches from one stream
//! - **Thread friendly**: `SeedSequence` hands out per-call generators to
//!   strategies that are shared across worker threads
//!
//! ```
//! use rust_selfplay::core::{GameRng, SeedSequence};
//!
//! let seeds = SeedSequence::new(42);
//! let mut a = seeds.next_rng();
//! let mut b = seeds.next_rng();
//! // Different calls draw from different streams.
//! let _ = (a.gen_f32(), b.gen_f32());
//!
//! // But the sequence of streams is reproducible.
//! let mut again = SeedSequence::new(42).next_rng();
//! assert_eq!(GameRng::new(42).fork().gen_f32(), again.gen_f32());
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// Deterministic RNG backed by ChaCha8.
#[derive(Clone, Debug)]
pub struct GameRng {
    inner: ChaCha8Rng,
    seed: u64,
    fork_counter: u64,
}

impl GameRng {
    /// Create a new RNG with the given seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            inner: ChaCha8Rng::seed_from_u64(seed),
            seed,
            fork_counter: 0,
        }
    }

    /// Fork this RNG to create an independent branch.
    ///
    /// Each fork produces a different but deterministic sequence.
    #[must_use]
    pub fn fork(&mut self) -> Self {
        self.fork_counter += 1;
        Self::new(fork_seed(self.seed, self.fork_counter))
    }

    /// Seed this generator was created with.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Generate a random usize in the given range.
    pub fn gen_range_usize(&mut self, range: std::ops::Range<usize>) -> usize {
        self.inner.gen_range(range)
    }

    /// Uniform float in `[0, 1)`.
    pub fn gen_f32(&mut self) -> f32 {
        self.inner.gen::<f32>()
    }

    /// Uniform float in `[0, 1)`.
    pub fn gen_f64(&mut self) -> f64 {
        self.inner.gen::<f64>()
    }

    /// Shuffle a slice in place.
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        use rand::seq::SliceRandom;
        slice.shuffle(&mut self.inner);
    }

    /// Choose an index with probability proportional to `weights`.
    ///
    /// Weights do not need to sum to 1.0.
    /// Returns `None` if weights are empty or all zero.
    pub fn choose_weighted(&mut self, weights: &[f32]) -> Option<usize> {
        if weights.is_empty() {
            return None;
        }

        let total: f32 = weights.iter().sum();
        if total <= 0.0 || !total.is_finite() {
            return None;
        }

        let mut threshold = self.inner.gen::<f32>() * total;
        for (i, &weight) in weights.iter().enumerate() {
            threshold -= weight;
            if threshold < 0.0 {
                return Some(i);
            }
        }

        // Rounding left a sliver: return the last non-zero weight.
        weights.iter().rposition(|&w| w > 0.0)
    }
}

fn fork_seed(seed: u64, counter: u64) -> u64 {
    seed.wrapping_add(counter.wrapping_mul(GOLDEN_GAMMA))
}

/// Thread-safe source of reproducible per-call generators.
///
/// The n-th call to `next_rng` returns the same stream as the n-th
/// `GameRng::fork` of `GameRng::new(seed)`.
#[derive(Debug)]
pub struct SeedSequence {
    seed: u64,
    counter: AtomicU64,
}

impl SeedSequence {
    /// Create a sequence rooted at `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            counter: AtomicU64::new(0),
        }
    }

    /// Next generator in the sequence.
    pub fn next_rng(&self) -> GameRng {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        GameRng::new(fork_seed(self.seed, n))
    }
}

impl Clone for SeedSequence {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            counter: AtomicU64::new(self.counter.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determinism() {
        let mut rng1 = GameRng::new(42);
        let mut rng2 = GameRng::new(42);

        for _ in 0..100 {
            assert_eq!(rng1.gen_range_usize(0..1000), rng2.gen_range_usize(0..1000));
        }
    }

    #[test]
    fn test_fork_produces_different_sequence() {
        let mut rng = GameRng::new(42);
        let mut forked = rng.fork();

        let seq1: Vec<_> = (0..10).map(|_| rng.gen_range_usize(0..1000)).collect();
        let seq2: Vec<_> = (0..10).map(|_| forked.gen_range_usize(0..1000)).collect();

        assert_ne!(seq1, seq2);
    }

    #[test]
    fn test_seed_sequence_matches_forks() {
        let seeds = SeedSequence::new(7);
        let mut root = GameRng::new(7);
        for _ in 0..3 {
            assert_eq!(seeds.next_rng().seed(), root.fork().seed());
        }
    }

    #[test]
    fn test_choose_weighted() {
        let mut rng = GameRng::new(42);

        let weights = vec![100.0, 0.0, 0.0];
        for _ in 0..10 {
            assert_eq!(rng.choose_weighted(&weights), Some(0));
        }

        let weights = vec![0.0, 0.0, 1.0];
        for _ in 0..10 {
            assert_eq!(rng.choose_weighted(&weights), Some(2));
        }

        assert_eq!(rng.choose_weighted(&[]), None);
        assert_eq!(rng.choose_weighted(&[0.0, 0.0]), None);
    }

    #[test]
    fn test_shuffle_keeps_elements() {
        let mut rng = GameRng::new(42);
        let mut data: Vec<u32> = (1..=10).collect();
        rng.shuffle(&mut data);
        data.sort_unstable();
        assert_eq!(data, (1..=10).collect::<Vec<_>>());
    }
}
