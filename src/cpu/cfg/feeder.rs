//! Instructions feeder
//!
//! The parse-or-reuse front end: given an address, produce the canonical
//! instruction node for the bytes currently there. The common path is a
//! current-cache hit; a revert to a previously seen byte pattern revives
//! the original node; only genuinely new bytes reach the parser.

use log::trace;

use crate::cpu::address::SegmentedAddress;
use crate::cpu::cfg::arena::NodeId;
use crate::cpu::cfg::CfgCpu;
use crate::cpu::decode::InstructionParser;
use crate::cpu::error::DecodeError;
use crate::memory::MemoryBus;

impl CfgCpu {
    /// Canonical instruction node for the bytes at `addr`.
    ///
    /// The returned node's signature always matches memory at return time:
    /// current entries are coherent by the watchpoint contract, revived
    /// entries are matched against memory before promotion, and fresh
    /// parses reflect memory by construction.
    pub fn instruction_from_memory(
        &mut self,
        mem: &mut MemoryBus,
        addr: SegmentedAddress,
    ) -> Result<NodeId, DecodeError> {
        if let Some(id) = self.current.get(addr) {
            return Ok(id);
        }

        if let Some(id) = self.previous.get_if_matches_memory(&self.arena, mem, addr) {
            trace!("revived instruction at {}", addr);
            self.current.set_as_current(&mut self.arena, mem, id);
            return Ok(id);
        }

        let inst = InstructionParser::parse(mem, addr)?;
        let id = self.arena.insert_instruction(inst);
        self.current.set_as_current(&mut self.arena, mem, id);
        self.previous.add(addr, id);
        Ok(id)
    }
}
