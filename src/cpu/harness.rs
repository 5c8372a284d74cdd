//! CPU test harness
//!
//! Provides a minimal environment for driving the graph core without a
//! full emulator: CPU state, memory bus, and the control-flow graph,
//! wired together by a one-instruction dispatch step.

use crate::cpu::cfg::CfgCpu;
use crate::cpu::error::CfgError;
use crate::cpu::exec;
use crate::cpu::state::Cpu;
use crate::memory::MemoryBus;

/// Test harness combining CPU state, memory and the graph core
pub struct CpuHarness {
    /// CPU state
    pub cpu: Cpu,

    /// Memory bus
    pub mem: MemoryBus,

    /// Control-flow graph core
    pub cfg: CfgCpu,
}

impl CpuHarness {
    /// Create a new harness with zeroed CPU and memory
    pub fn new() -> Self {
        Self {
            cpu: Cpu::new(),
            mem: MemoryBus::new(),
            cfg: CfgCpu::new(),
        }
    }

    /// Load a program at segment:0 and point CS:IP at it.
    ///
    /// The graph is discarded: the load writes around the watchpoint
    /// channel, so any cached instruction could silently go stale.
    pub fn load_program(&mut self, code: &[u8], segment: u16) {
        self.mem.load(code, (segment as usize) << 4);
        self.cpu.segments[1] = segment; // CS
        self.cpu.ip = 0;
        self.mem.watchpoints_mut().clear();
        self.cfg = CfgCpu::new();
    }

    /// Run one dispatch step: arbitrate the next node, resolve selectors,
    /// execute, and record the outcome in the execution context.
    pub fn step(&mut self) -> Result<(), CfgError> {
        if self.cpu.halted {
            return Ok(());
        }

        let ip = self.cpu.ip_segmented();
        let node = self.cfg.linked_node_to_execute(&mut self.mem, ip)?;
        let inst = self.cfg.resolve_selector(&mut self.mem, node)?;

        exec::execute(&mut self.cpu, &mut self.mem, self.cfg.arena().instruction(inst));

        let new_ip = self.cpu.ip_segmented();
        let next = self
            .cfg
            .arena()
            .node(inst)
            .successors
            .get(&new_ip)
            .copied();
        self.cfg.context_mut().record(inst, next);
        Ok(())
    }

    /// Redirect execution to `offset` in the current code segment,
    /// forgetting dispatch state so the next step consults the caches
    /// directly instead of linking from the previously executed node.
    pub fn jump_to(&mut self, offset: u16) {
        self.cpu.ip = offset;
        self.cfg.context_mut().reset();
    }

    /// Execute multiple dispatch steps
    pub fn step_n(&mut self, n: usize) -> Result<(), CfgError> {
        for _ in 0..n {
            self.step()?;
        }
        Ok(())
    }

    /// Reset CPU state to power-on defaults
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.cfg.context_mut().reset();
    }
}

impl Default for CpuHarness {
    fn default() -> Self {
        Self::new()
    }
}
