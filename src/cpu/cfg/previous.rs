//! Previous instructions cache
//!
//! For every address, the set of instructions that have been valid there.
//! When guest code rewrites bytes back to an earlier pattern, the matching
//! original instance is revived instead of being re-parsed, preserving
//! node identity across the revert.
//!
//! Entries leave the cache through identity rewrites when the reducer
//! folds two instances into one, or oldest-first once an address exceeds
//! its cap. A dropped shape is not an error: if its byte pattern ever
//! returns, it simply parses fresh again.

use std::collections::HashMap;

use crate::cpu::address::SegmentedAddress;
use crate::cpu::cfg::arena::{NodeArena, NodeId};
use crate::memory::MemoryBus;

/// Default cap on remembered instances per address
const DEFAULT_MAX_PER_ADDRESS: usize = 64;

/// Address -> instructions that have been valid there
#[derive(Debug)]
pub struct PreviousInstructions {
    by_address: HashMap<SegmentedAddress, Vec<NodeId>>,
    max_per_address: usize,
}

impl PreviousInstructions {
    /// Create a cache with the default per-address cap
    pub fn new() -> Self {
        Self {
            by_address: HashMap::new(),
            max_per_address: DEFAULT_MAX_PER_ADDRESS,
        }
    }

    /// Set a custom cap on remembered instances per address
    pub fn with_max_per_address(mut self, cap: usize) -> Self {
        self.max_per_address = cap.max(1);
        self
    }

    /// Remember `id` as having been valid at `addr`. Past the per-address
    /// cap the oldest instance is dropped.
    pub fn add(&mut self, addr: SegmentedAddress, id: NodeId) {
        let set = self.by_address.entry(addr).or_default();
        if set.contains(&id) {
            return;
        }
        set.push(id);
        if set.len() > self.max_per_address {
            set.remove(0);
        }
    }

    /// Among all prior instances at `addr`, find one whose signature
    /// matches the bytes currently in memory. Wildcard positions match any
    /// byte.
    pub fn get_if_matches_memory(
        &self,
        arena: &NodeArena,
        mem: &MemoryBus,
        addr: SegmentedAddress,
    ) -> Option<NodeId> {
        let set = self.by_address.get(&addr)?;
        set.iter()
            .copied()
            .find(|&id| arena.instruction(id).matches_memory(mem))
    }

    /// Number of instances remembered at `addr`
    pub fn count_at(&self, addr: SegmentedAddress) -> usize {
        self.by_address.get(&addr).map(Vec::len).unwrap_or(0)
    }

    /// Rewrite a node identity in place (driven by the replacer fan-out).
    /// A removal (`new == None`) is not meaningful here: stale instances
    /// are exactly what this cache exists to remember.
    pub(crate) fn rewrite(&mut self, old: NodeId, new: Option<NodeId>) {
        let Some(new) = new else { return };
        for set in self.by_address.values_mut() {
            if set.contains(&old) {
                set.retain(|&id| id != old && id != new);
                set.push(new);
            }
        }
    }
}

impl Default for PreviousInstructions {
    fn default() -> Self {
        Self::new()
    }
}
