//! Control-flow graph of decoded instructions
//!
//! The graph discovers nodes as execution reaches them, caches them by
//! guest address, and keeps them coherent with memory through write
//! watchpoints. Self-modifying code is handled without flushing: a
//! rewritten immediate folds into the existing node via signature
//! reduction, a revert revives the original node from the previous
//! cache, and genuinely diverging shapes get a selector that arbitrates
//! at execution time.

pub mod arena;
pub mod context;
pub mod current;
pub mod feeder;
pub mod linker;
pub mod node_feeder;
pub mod previous;
pub mod reducer;
pub mod replacer;
pub mod selector;

use std::collections::HashMap;

pub use arena::{LinkKind, Node, NodeArena, NodeId, NodeKind};
pub use context::ExecutionContext;
pub use current::CurrentInstructions;
pub use previous::PreviousInstructions;
pub use replacer::InstructionReplacer;
pub use selector::{SelectorNode, MAX_SELECTOR_CANDIDATES};

use crate::cpu::address::SegmentedAddress;

/// The control-flow-graph CPU core: node storage, the two instruction
/// caches, selector registry and per-executor dispatch state.
///
/// All mutation happens on the executor thread; the memory bus delivers
/// watchpoint hits through a queue drained at each dispatch entry.
#[derive(Debug)]
pub struct CfgCpu {
    pub(crate) arena: NodeArena,
    pub(crate) current: CurrentInstructions,
    pub(crate) previous: PreviousInstructions,
    pub(crate) selectors: HashMap<SegmentedAddress, NodeId>,
    pub(crate) context: ExecutionContext,
    pub(crate) selector_cap: usize,
}

impl CfgCpu {
    /// Create a core with the default cache caps
    pub fn new() -> Self {
        Self {
            arena: NodeArena::new(),
            current: CurrentInstructions::new(),
            previous: PreviousInstructions::new(),
            selectors: HashMap::new(),
            context: ExecutionContext::new(),
            selector_cap: MAX_SELECTOR_CANDIDATES,
        }
    }

    /// Set a custom cap on remembered instruction shapes per address
    pub fn with_previous_cap(mut self, cap: usize) -> Self {
        self.previous = PreviousInstructions::new().with_max_per_address(cap);
        self
    }

    /// Set a custom cap on candidates per selector. A selector always
    /// keeps at least the two shapes whose divergence created it.
    pub fn with_selector_cap(mut self, cap: usize) -> Self {
        self.selector_cap = cap.max(2);
        self
    }

    /// Node storage and edge maps
    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    /// Address -> currently valid instruction
    pub fn current(&self) -> &CurrentInstructions {
        &self.current
    }

    /// Address -> all instructions ever valid there
    pub fn previous(&self) -> &PreviousInstructions {
        &self.previous
    }

    /// Selector standing at `addr`, if one has been installed
    pub fn selector_at(&self, addr: SegmentedAddress) -> Option<NodeId> {
        self.selectors.get(&addr).copied()
    }

    /// Per-executor dispatch state
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ExecutionContext {
        &mut self.context
    }
}

impl Default for CfgCpu {
    fn default() -> Self {
        Self::new()
    }
}
