//! Selector nodes
//!
//! When two or more decoded instructions have coexisted at one address,
//! a selector node stands over them in the graph. At execution time it
//! picks the candidate whose signature matches the bytes currently in
//! memory; an unseen byte pattern falls through to a fresh parse that is
//! adopted as a new candidate.

use log::{debug, trace};

use crate::cpu::address::SegmentedAddress;
use crate::cpu::cfg::arena::{NodeId, NodeKind};
use crate::cpu::cfg::CfgCpu;
use crate::cpu::error::CfgError;
use crate::memory::MemoryBus;

/// Default cap on how many shapes one selector tracks (tunable through
/// [`CfgCpu::with_selector_cap`]). On overflow the oldest candidate is
/// dropped from the selector; it stays in the previous-instructions cache
/// and can be re-adopted later.
pub const MAX_SELECTOR_CANDIDATES: usize = 16;

/// A polymorphic node standing over several instructions at one address
#[derive(Debug)]
pub struct SelectorNode {
    /// Address shared by every candidate
    pub address: SegmentedAddress,
    /// Candidates in adoption order
    pub candidates: Vec<NodeId>,
}

impl SelectorNode {
    pub fn new(address: SegmentedAddress) -> Self {
        Self {
            address,
            candidates: Vec::new(),
        }
    }
}

impl CfgCpu {
    /// Stand a selector over two diverged instances of one address,
    /// reusing the existing selector if the address already has one.
    /// Any predecessor that routed to either instance now routes to the
    /// selector.
    pub(crate) fn install_selector(&mut self, from_memory: NodeId, suggested: NodeId) -> NodeId {
        let addr = self.arena.address(from_memory);
        let sel = match self.selectors.get(&addr).copied() {
            Some(sel) => sel,
            None => {
                let sel = self.arena.insert_selector(SelectorNode::new(addr));
                self.selectors.insert(addr, sel);
                debug!("installed selector at {}", addr);
                sel
            }
        };
        self.adopt_candidate(sel, suggested);
        self.adopt_candidate(sel, from_memory);
        sel
    }

    /// Add `cand` to the selector's candidate set and re-route its
    /// predecessors through the selector.
    pub(crate) fn adopt_candidate(&mut self, sel: NodeId, cand: NodeId) {
        if self.arena.selector(sel).candidates.contains(&cand) {
            return;
        }
        self.arena.insert_intermediate_predecessor(cand, sel);
        self.arena.selector_mut(sel).candidates.push(cand);

        if self.arena.selector(sel).candidates.len() > self.selector_cap {
            let dropped = self.arena.selector_mut(sel).candidates.remove(0);
            self.arena.node_mut(dropped).predecessors.remove(&sel);
            trace!(
                "selector at {} dropped its oldest candidate",
                self.arena.address(sel)
            );
        }
    }

    /// Resolve a node to the concrete instruction to execute. Instruction
    /// nodes resolve to themselves; selectors scan their candidates
    /// against memory and fall back to a fresh parse.
    ///
    /// The matching candidate is promoted back into the current cache so
    /// its footprint is watched again.
    pub fn resolve_selector(&mut self, mem: &mut MemoryBus, node: NodeId) -> Result<NodeId, CfgError> {
        let (addr, candidates) = match &self.arena.node(node).kind {
            NodeKind::Selector(sel) => (sel.address, sel.candidates.clone()),
            NodeKind::Instruction(_) => return Ok(node),
        };

        for cand in candidates {
            if self.arena.instruction(cand).matches_memory(mem) {
                if self.current.get(addr) != Some(cand) {
                    self.current.evict(&mut self.arena, mem, addr);
                    self.current.set_as_current(&mut self.arena, mem, cand);
                }
                trace!("selector at {} matched candidate {:?}", addr, cand);
                return Ok(cand);
            }
        }

        // Unseen byte pattern: parse it and remember the new shape
        let fresh = self.instruction_from_memory(mem, addr)?;
        self.adopt_candidate(node, fresh);
        Ok(fresh)
    }
}
