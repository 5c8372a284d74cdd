//! Identity-rewrite fan-out
//!
//! Several holders index instructions by node id: the current and
//! previous caches, the graph's edge maps and selector candidate sets,
//! and the execution context. When reduction folds two instances into one
//! (or eviction retires an instance), every holder must rewrite its
//! references in the same operation so the transition is atomic from the
//! executor's point of view.

use crate::cpu::cfg::arena::{NodeArena, NodeId, NodeKind};
use crate::cpu::cfg::context::ExecutionContext;
use crate::cpu::cfg::current::CurrentInstructions;
use crate::cpu::cfg::previous::PreviousInstructions;
use crate::cpu::cfg::CfgCpu;

/// Implemented by every holder that indexes instructions by identity.
///
/// `new == None` announces an eviction: the instruction is no longer
/// current, but it still exists. Holders that track history or graph
/// structure keep their references so the stale node can be detected and
/// arbitrated on the next dispatch; only "what is current" bookkeeping
/// drops it.
pub trait InstructionReplacer {
    fn replace_instruction(&mut self, old: NodeId, new: Option<NodeId>);
}

impl InstructionReplacer for CurrentInstructions {
    fn replace_instruction(&mut self, old: NodeId, new: Option<NodeId>) {
        self.rewrite(old, new);
    }
}

impl InstructionReplacer for PreviousInstructions {
    fn replace_instruction(&mut self, old: NodeId, new: Option<NodeId>) {
        self.rewrite(old, new);
    }
}

impl InstructionReplacer for ExecutionContext {
    fn replace_instruction(&mut self, old: NodeId, new: Option<NodeId>) {
        // An evicted node stays in the context: the arbiter needs to see
        // the stale suggestion to detect divergence.
        if let Some(new) = new {
            self.rewrite(old, new);
        }
    }
}

impl InstructionReplacer for NodeArena {
    /// Rewrite successor values, predecessor keys and selector candidate
    /// sets. Eviction keeps edges intact; the stale node's `live` flag is
    /// what routes the arbiter around it.
    fn replace_instruction(&mut self, old: NodeId, new: Option<NodeId>) {
        let Some(new) = new else { return };
        let ids: Vec<NodeId> = self.ids().collect();
        for id in ids {
            if id == old {
                continue;
            }
            let node = self.node_mut(id);
            for next in node.successors.values_mut() {
                if *next == old {
                    *next = new;
                }
            }
            if let Some(kind) = node.predecessors.remove(&old) {
                node.predecessors.entry(new).or_insert(kind);
            }
            if let NodeKind::Selector(sel) = &mut node.kind {
                if let Some(pos) = sel.candidates.iter().position(|&c| c == old) {
                    if sel.candidates.contains(&new) {
                        sel.candidates.remove(pos);
                    } else {
                        sel.candidates[pos] = new;
                    }
                }
            }
        }
    }
}

impl CfgCpu {
    /// Run the rewrite across every registered holder. Holders run to
    /// completion before control returns, so no observer can see a
    /// half-rewritten state.
    pub(crate) fn replace_everywhere(&mut self, old: NodeId, new: Option<NodeId>) {
        let holders: [&mut dyn InstructionReplacer; 4] = [
            &mut self.current,
            &mut self.previous,
            &mut self.arena,
            &mut self.context,
        ];
        for holder in holders {
            holder.replace_instruction(old, new);
        }
    }
}
