//! Fixed-size replay buffer.
//!
//! Entries are appended until the buffer is full; after that each new
//! entry overwrites the oldest one. The ring and its cursor sit behind one
//! mutex so `add` and `sample` can be called from different threads.

use std::sync::{Mutex, MutexGuard};

use crate::core::{GameRng, GameRules};

/// One labeled position.
pub struct Example<G: GameRules> {
    /// Position to learn.
    pub position: G::Position,
    /// Score label for the side to move.
    pub label: f32,
    /// Action weights, empty when the position has no policy label.
    pub policy: Vec<f32>,
}

impl<G: GameRules> Clone for Example<G> {
    fn clone(&self) -> Self {
        Self {
            position: self.position.clone(),
            label: self.label,
            policy: self.policy.clone(),
        }
    }
}

impl<G: GameRules> std::fmt::Debug for Example<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Example")
            .field("position", &self.position)
            .field("label", &self.label)
            .field("policy", &self.policy)
            .finish()
    }
}

#[derive(Debug)]
struct Ring<T> {
    entries: Vec<T>,
    cursor: usize,
    total_added: u64,
}

/// Ring buffer of training entries.
#[derive(Debug)]
pub struct ReplayBuffer<T> {
    ring: Mutex<Ring<T>>,
    capacity: usize,
}

impl<T: Clone> ReplayBuffer<T> {
    /// Buffer holding at most `capacity` entries (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(Ring {
                entries: Vec::with_capacity(capacity),
                cursor: 0,
                total_added: 0,
            }),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ring<T>> {
        match self.ring.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append `entry`, overwriting the oldest entry once full.
    pub fn add(&self, entry: T) {
        let mut ring = self.lock();
        if ring.entries.len() < self.capacity {
            ring.entries.push(entry);
        } else {
            let cursor = ring.cursor;
            ring.entries[cursor] = entry;
        }
        ring.cursor = (ring.cursor + 1) % self.capacity;
        ring.total_added += 1;
    }

    /// Number of entries held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the buffer holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Whether the buffer reached its capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries added over the buffer's lifetime, evicted ones included.
    #[must_use]
    pub fn total_added(&self) -> u64 {
        self.lock().total_added
    }

    /// `k` entries drawn uniformly with replacement. Empty if the buffer is.
    pub fn sample(&self, k: usize, rng: &mut GameRng) -> Vec<T> {
        let ring = self.lock();
        if ring.entries.is_empty() {
            return Vec::new();
        }
        (0..k)
            .map(|_| ring.entries[rng.gen_range_usize(0..ring.entries.len())].clone())
            .collect()
    }

    /// Copy of every entry, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<T> {
        let ring = self.lock();
        if ring.entries.len() < self.capacity {
            return ring.entries.clone();
        }
        let (newer, older) = ring.entries.split_at(ring.cursor);
        older.iter().chain(newer).cloned().collect()
    }
}
