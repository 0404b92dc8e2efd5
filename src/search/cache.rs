//! Next-positions cache shared by the searchers of one player.
//!
//! Expanding a position (listing its legal actions and applying each of
//! them) is the same work for every searcher and every iteration, so the
//! result is memoized per position. The match runner releases a position
//! once it has been played past, which drops its entry together with
//! every cached descendant.

use std::sync::{Arc, Mutex, MutexGuard};

use rustc_hash::FxHashMap;

use crate::core::GameRules;

/// Default cap on cached positions before the cache is cleared.
pub const DEFAULT_MAX_ENTRIES: usize = 200_000;

/// Legal actions of a position and the positions they lead to.
#[derive(Clone, Debug)]
pub struct Expansion<G: GameRules> {
    /// Actions in enumeration order.
    pub actions: Vec<G::Action>,
    /// `children[i]` is the result of `actions[i]`.
    pub children: Vec<G::Position>,
    /// True when the side to move had no legal action and the only entry
    /// is the skip action.
    pub skipped: bool,
}

impl<G: GameRules> Expansion<G> {
    /// Expand `position` without caching.
    pub fn compute(rules: &G, position: &G::Position) -> Self {
        if rules.is_terminal(position) {
            return Self {
                actions: Vec::new(),
                children: Vec::new(),
                skipped: false,
            };
        }
        let mut actions = rules.legal_actions(position);
        let skipped = actions.is_empty();
        if skipped {
            actions.push(rules.skip_action());
        }
        let children = actions.iter().map(|a| rules.apply(position, a)).collect();
        Self {
            actions,
            children,
            skipped,
        }
    }

    /// Number of actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// True for terminal positions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Memoized expansions keyed by position.
pub struct NextPositionCache<G: GameRules> {
    rules: Arc<G>,
    entries: Mutex<FxHashMap<G::Position, Arc<Expansion<G>>>>,
    max_entries: usize,
}

impl<G: GameRules> std::fmt::Debug for NextPositionCache<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NextPositionCache")
            .field("entries", &self.len())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

impl<G: GameRules> NextPositionCache<G> {
    /// Empty cache with the default size cap.
    pub fn new(rules: Arc<G>) -> Self {
        Self::with_max_entries(rules, DEFAULT_MAX_ENTRIES)
    }

    /// Empty cache that clears itself past `max_entries` positions.
    pub fn with_max_entries(rules: Arc<G>, max_entries: usize) -> Self {
        Self {
            rules,
            entries: Mutex::new(FxHashMap::default()),
            max_entries: max_entries.max(1),
        }
    }

    /// Game rules the cache expands with.
    pub fn rules(&self) -> &Arc<G> {
        &self.rules
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<G::Position, Arc<Expansion<G>>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Expansion of `position`, computed on first use.
    pub fn expand(&self, position: &G::Position) -> Arc<Expansion<G>> {
        if let Some(found) = self.lock().get(position) {
            return Arc::clone(found);
        }

        // Expand outside the lock; a concurrent duplicate is harmless.
        let expansion = Arc::new(Expansion::compute(self.rules.as_ref(), position));
        let mut entries = self.lock();
        if entries.len() >= self.max_entries {
            log::debug!("next-position cache full ({} entries), clearing", entries.len());
            entries.clear();
        }
        Arc::clone(entries.entry(position.clone()).or_insert(expansion))
    }

    /// Drop `position` and every cached position reachable from it.
    pub fn release(&self, position: &G::Position) {
        let mut entries = self.lock();
        let mut stack = vec![position.clone()];
        while let Some(next) = stack.pop() {
            if let Some(expansion) = entries.remove(&next) {
                stack.extend(expansion.children.iter().cloned());
            }
        }
    }

    /// Number of cached positions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.lock().clear();
    }
}
