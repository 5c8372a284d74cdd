//! cfg86 - x86 real-mode CPU core built around a control-flow graph of
//! decoded instructions.
//!
//! Instructions are parsed once, cached by guest address, and linked into a
//! successor/predecessor graph as execution discovers control flow. Write
//! watchpoints over each cached instruction's byte footprint keep the graph
//! coherent with memory, so self-modifying guest code is handled by
//! re-parsing, signature reduction, or runtime selector nodes rather than by
//! flushing the whole cache.

pub mod cpu;
pub mod memory;
