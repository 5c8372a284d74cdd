//! Current instructions cache
//!
//! Maps each guest address to the single instruction that is valid there
//! right now. Entries arm write watchpoints over their byte footprint; a
//! watchpoint hit on an identity-bearing byte evicts the entry, while a
//! hit under a signature wildcard is tolerated because the executor
//! re-reads those bytes on every execution.

use std::collections::HashMap;

use log::trace;

use crate::cpu::address::SegmentedAddress;
use crate::cpu::cfg::arena::{NodeArena, NodeId};
use crate::memory::{MemoryBus, WatchpointHit};

/// Address -> currently valid instruction
#[derive(Debug, Default)]
pub struct CurrentInstructions {
    by_address: HashMap<SegmentedAddress, NodeId>,
}

impl CurrentInstructions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lookup only; no side effects.
    pub fn get(&self, addr: SegmentedAddress) -> Option<NodeId> {
        self.by_address.get(&addr).copied()
    }

    /// Install `id` as the instruction currently valid at its own address
    /// and arm watchpoints over its footprint.
    pub fn set_as_current(&mut self, arena: &mut NodeArena, mem: &mut MemoryBus, id: NodeId) {
        let (addr, len) = {
            let inst = arena.instruction_mut(id);
            inst.live = true;
            (inst.address, inst.length)
        };
        mem.watchpoints_mut().watch_range(addr.linear(), len, addr);
        self.by_address.insert(addr, id);
    }

    /// Drop the entry at `addr`: disarm its watchpoints and mark the
    /// instruction stale. The node itself stays in the graph and in the
    /// previous-instructions cache.
    pub fn evict(&mut self, arena: &mut NodeArena, mem: &mut MemoryBus, addr: SegmentedAddress) -> Option<NodeId> {
        let id = self.by_address.remove(&addr)?;
        let (base, len) = {
            let inst = arena.instruction_mut(id);
            inst.live = false;
            (inst.address.linear(), inst.length)
        };
        mem.watchpoints_mut().unwatch_range(base, len, addr);
        trace!("evicted instruction at {}", addr);
        Some(id)
    }

    /// React to a watchpoint hit. Writes that land under a signature
    /// wildcard (a field whose value is re-read at execution) do not
    /// invalidate the entry.
    pub fn handle_hit(
        &mut self,
        arena: &mut NodeArena,
        mem: &mut MemoryBus,
        hit: WatchpointHit,
    ) -> Option<NodeId> {
        let id = self.get(hit.owner)?;
        let pos = {
            let inst = arena.instruction(id);
            hit.linear.wrapping_sub(inst.address.linear()) as usize
        };
        if arena.instruction(id).signature.is_wildcard(pos) {
            return None;
        }
        self.evict(arena, mem, hit.owner)
    }

    /// Number of cached addresses
    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    /// Rewrite a node identity in place (driven by the replacer fan-out).
    /// Watchpoints are keyed by address, not node id, so the armed ranges
    /// carry over to the replacement unchanged.
    pub(crate) fn rewrite(&mut self, old: NodeId, new: Option<NodeId>) {
        let addr = self
            .by_address
            .iter()
            .find_map(|(addr, id)| if *id == old { Some(*addr) } else { None });
        if let Some(addr) = addr {
            match new {
                Some(new) => {
                    self.by_address.insert(addr, new);
                }
                None => {
                    self.by_address.remove(&addr);
                }
            }
        }
    }
}
