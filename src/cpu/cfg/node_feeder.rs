//! Dispatch arbiter
//!
//! Decides which node runs next by arbitrating between the graph's
//! suggestion and what memory actually contains at the instruction
//! pointer. The interesting path is a stale suggestion: the suggested
//! node was evicted by a write to its footprint, and memory may now parse
//! to the same node (revival), a reducible sibling, or a genuinely
//! different instruction that needs a selector.

use log::debug;

use crate::cpu::address::SegmentedAddress;
use crate::cpu::cfg::arena::NodeId;
use crate::cpu::cfg::CfgCpu;
use crate::cpu::error::CfgError;
use crate::memory::MemoryBus;

impl CfgCpu {
    /// Produce the node to execute for the instruction pointer `ip` and
    /// link it into the graph behind the previously executed node.
    pub fn linked_node_to_execute(
        &mut self,
        mem: &mut MemoryBus,
        ip: SegmentedAddress,
    ) -> Result<NodeId, CfgError> {
        self.drain_watchpoint_hits(mem);

        let suggested = self.context.next_according_to_graph();
        let node = self.determine(mem, suggested, ip)?;

        if let Some(prev) = self.context.last_executed() {
            self.arena.link(prev, node);
        }
        Ok(node)
    }

    /// Apply queued watchpoint hits. Guest writes happen inside
    /// instruction execution, so draining here observes every hit before
    /// the affected node could run again.
    pub fn drain_watchpoint_hits(&mut self, mem: &mut MemoryBus) {
        let hits = mem.watchpoints_mut().take_fired();
        for hit in hits {
            if let Some(id) = self.current.handle_hit(&mut self.arena, mem, hit) {
                self.replace_everywhere(id, None);
            }
        }
    }

    fn determine(
        &mut self,
        mem: &mut MemoryBus,
        suggested: Option<NodeId>,
        ip: SegmentedAddress,
    ) -> Result<NodeId, CfgError> {
        // The graph has never seen this address
        let Some(suggested) = suggested else {
            return Ok(self.instruction_from_memory(mem, ip)?);
        };

        // A live node is coherent with memory by the watchpoint contract
        if self.arena.is_live(suggested) {
            return Ok(suggested);
        }

        // Stale suggestion: consult memory
        let from_memory = self.instruction_from_memory(mem, ip)?;
        if from_memory == suggested {
            // Memory reverted to this node's bytes; the feeder just
            // revived it
            return Ok(suggested);
        }

        let suggested_addr = self.arena.address(suggested);
        let memory_addr = self.arena.address(from_memory);
        if memory_addr != suggested_addr {
            return Err(CfgError::UnhandledCfgDiscrepancy {
                expected: suggested_addr,
                found: memory_addr,
            });
        }

        debug!("self-modified instruction at {}", memory_addr);
        if let Some(survivor) = self.reduce_to_one(from_memory, suggested) {
            return Ok(survivor);
        }
        Ok(self.install_selector(from_memory, suggested))
    }
}
