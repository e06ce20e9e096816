//! Change counting and generation snapshots.
//!
//! A generation is everything one `declare_types` call established:
//! the owner, the declared types and the data cached for them. When a
//! new generation starts, the old one may be frozen into a bounded
//! history ring (newest first) so readers holding an old change count
//! can still fetch what was cached.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;

use super::callback::{ClientId, Owner};
use super::types::PasteboardType;

/// Monotonic per-pasteboard change counter. Starts at 0, only moves up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ChangeCount(u64);

impl ChangeCount {
    pub fn get(self) -> u64 {
        self.0
    }

    /// Advance by exactly one and return the new value.
    pub fn bump(&mut self) -> ChangeCount {
        self.0 += 1;
        *self
    }
}

impl From<u64> for ChangeCount {
    fn from(count: u64) -> Self {
        Self(count)
    }
}

/// The live generation of a pasteboard.
#[derive(Debug, Default)]
pub struct Generation {
    pub change_count: ChangeCount,
    pub owner: Option<Owner>,
    pub types: Vec<PasteboardType>,
    pub cache: HashMap<PasteboardType, Bytes>,
}

impl Generation {
    /// Freeze into a history snapshot. The live callback is dropped;
    /// only the owner's identity survives.
    pub fn freeze(self) -> RetainedGeneration {
        RetainedGeneration {
            change_count: self.change_count,
            owner: self.owner.map(|o| o.client),
            types: self.types,
            cache: self.cache,
        }
    }
}

/// An immutable past generation.
#[derive(Debug, Clone)]
pub struct RetainedGeneration {
    pub change_count: ChangeCount,
    pub owner: Option<ClientId>,
    pub types: Vec<PasteboardType>,
    pub cache: HashMap<PasteboardType, Bytes>,
}

/// Bounded, newest-first ring of retained generations.
///
/// Depth 0 retains nothing.
#[derive(Debug, Default)]
pub struct History {
    entries: VecDeque<RetainedGeneration>,
    depth: usize,
}

impl History {
    /// The ring grows as generations are pushed; `depth` only caps it.
    pub fn new(depth: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            depth,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Change the depth, evicting the oldest entries if now over.
    pub fn set_depth(&mut self, depth: usize) {
        self.depth = depth;
        self.entries.truncate(depth);
    }

    /// Retain a generation, evicting the oldest when at depth.
    pub fn push(&mut self, generation: RetainedGeneration) {
        if self.depth == 0 {
            return;
        }
        if self.entries.len() == self.depth {
            self.entries.pop_back();
        }
        self.entries.push_front(generation);
    }

    /// Look up a retained generation by its change count.
    pub fn get(&self, count: ChangeCount) -> Option<&RetainedGeneration> {
        self.entries.iter().find(|g| g.change_count == count)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn counts(&self) -> Vec<u64> {
        self.entries.iter().map(|g| g.change_count.get()).collect()
    }
}
