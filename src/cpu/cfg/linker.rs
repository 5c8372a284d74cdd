//! Edge maintenance for the control-flow graph
//!
//! Successor and predecessor maps are always mutated in pairs so that at
//! no observable boundary does one direction disagree with the other.

use crate::cpu::cfg::arena::{LinkKind, NodeArena, NodeId, NodeKind};

impl NodeArena {
    /// Record that execution flowed from `prev` to `curr`.
    ///
    /// The successor slot is keyed by `curr`'s address; if the slot already
    /// routes to a different node the edge is retargeted and the old
    /// target loses its back-edge. Linking the same pair twice is a no-op.
    pub fn link(&mut self, prev: NodeId, curr: NodeId) {
        let target = self.address(curr);
        let kind = match &self.node(prev).kind {
            NodeKind::Instruction(inst) if inst.next_address() == target => LinkKind::FallThrough,
            _ => LinkKind::Branch,
        };

        let displaced = self.node_mut(prev).successors.insert(target, curr);
        if let Some(old) = displaced {
            if old == curr {
                return;
            }
            self.node_mut(old).predecessors.remove(&prev);
        }
        self.node_mut(curr).predecessors.insert(prev, kind);
    }

    /// Re-route every predecessor of `existing` through `intermediate`,
    /// leaving `existing` reachable only from `intermediate`. Used to
    /// stand a selector over diverged instances of an address.
    pub fn insert_intermediate_predecessor(&mut self, existing: NodeId, intermediate: NodeId) {
        let target = self.address(existing);
        let preds: Vec<(NodeId, LinkKind)> = self
            .node(existing)
            .predecessors
            .iter()
            .map(|(&id, &kind)| (id, kind))
            .collect();

        for (pred, kind) in preds {
            if pred == intermediate {
                continue;
            }
            self.node_mut(pred).successors.insert(target, intermediate);
            self.node_mut(intermediate).predecessors.insert(pred, kind);
        }

        let existing_node = self.node_mut(existing);
        existing_node.predecessors.clear();
        existing_node
            .predecessors
            .insert(intermediate, LinkKind::Selector);
    }

    /// Fold `victim`'s edges into `survivor` after an identity rewrite:
    /// edges the survivor lacks are adopted, edges it already has win.
    pub(crate) fn merge_edges(&mut self, victim: NodeId, survivor: NodeId) {
        let (succs, preds) = {
            let node = self.node(victim);
            (
                node.successors.clone(),
                node.predecessors.clone(),
            )
        };
        for (target, next) in succs {
            if next == survivor {
                continue;
            }
            self.node_mut(survivor).successors.entry(target).or_insert(next);
        }
        for (pred, kind) in preds {
            if pred == survivor {
                continue;
            }
            self.node_mut(survivor).predecessors.entry(pred).or_insert(kind);
        }
    }
}
