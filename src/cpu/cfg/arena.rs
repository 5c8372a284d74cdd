//! Node arena for the control-flow graph
//!
//! The graph is intrinsically cyclic, so nodes live in a slab indexed by
//! stable ids and edges are maps of ids, never ownership links. A node is
//! either a parsed instruction or a selector standing over several parsed
//! instructions at the same address.

use std::collections::BTreeMap;

use crate::cpu::address::SegmentedAddress;
use crate::cpu::cfg::selector::SelectorNode;
use crate::cpu::decode::ParsedInstruction;

/// Stable identity of a graph node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

/// How a predecessor reaches a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Sequential flow into the next instruction
    FallThrough,
    /// Taken branch, call or return
    Branch,
    /// Placeholder link from a selector to one of its candidates
    Selector,
}

/// Node payload
#[derive(Debug)]
pub enum NodeKind {
    Instruction(ParsedInstruction),
    Selector(SelectorNode),
}

/// A graph node: payload plus its edge maps.
///
/// Successors are keyed by target address; predecessors record how each
/// incoming node reaches this one. The two maps are kept symmetric by the
/// linker.
#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    /// successor address -> node executed next from there
    pub successors: BTreeMap<SegmentedAddress, NodeId>,
    /// incoming node -> kind of link
    pub predecessors: BTreeMap<NodeId, LinkKind>,
}

/// Slab of graph nodes with id reuse
#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: Vec<Option<Node>>,
    free: Vec<u32>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, kind: NodeKind) -> NodeId {
        let node = Node {
            kind,
            successors: BTreeMap::new(),
            predecessors: BTreeMap::new(),
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot as usize] = Some(node);
                NodeId(slot)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId((self.nodes.len() - 1) as u32)
            }
        }
    }

    /// Add a parsed instruction to the graph
    pub fn insert_instruction(&mut self, inst: ParsedInstruction) -> NodeId {
        self.insert(NodeKind::Instruction(inst))
    }

    /// Add a selector node to the graph
    pub fn insert_selector(&mut self, selector: SelectorNode) -> NodeId {
        self.insert(NodeKind::Selector(selector))
    }

    /// Remove a node. The caller must have rewritten every reference to it
    /// first; dangling edges to a freed slot are a graph corruption bug.
    pub fn remove(&mut self, id: NodeId) {
        if self.nodes[id.0 as usize].take().is_some() {
            self.free.push(id.0);
        }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        match &self.nodes[id.0 as usize] {
            Some(node) => node,
            None => panic!("graph node {:?} was freed", id),
        }
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        match &mut self.nodes[id.0 as usize] {
            Some(node) => node,
            None => panic!("graph node {:?} was freed", id),
        }
    }

    /// The instruction payload of `id`; panics on a selector node.
    pub fn instruction(&self, id: NodeId) -> &ParsedInstruction {
        match &self.node(id).kind {
            NodeKind::Instruction(inst) => inst,
            NodeKind::Selector(_) => panic!("graph node {:?} is a selector", id),
        }
    }

    pub fn instruction_mut(&mut self, id: NodeId) -> &mut ParsedInstruction {
        match &mut self.node_mut(id).kind {
            NodeKind::Instruction(inst) => inst,
            NodeKind::Selector(_) => panic!("graph node {:?} is a selector", id),
        }
    }

    /// The selector payload of `id`; panics on an instruction node.
    pub fn selector(&self, id: NodeId) -> &SelectorNode {
        match &self.node(id).kind {
            NodeKind::Selector(sel) => sel,
            NodeKind::Instruction(_) => panic!("graph node {:?} is not a selector", id),
        }
    }

    pub fn selector_mut(&mut self, id: NodeId) -> &mut SelectorNode {
        match &mut self.node_mut(id).kind {
            NodeKind::Selector(sel) => sel,
            NodeKind::Instruction(_) => panic!("graph node {:?} is not a selector", id),
        }
    }

    /// Guest address of the node, whichever payload it carries
    pub fn address(&self, id: NodeId) -> SegmentedAddress {
        match &self.node(id).kind {
            NodeKind::Instruction(inst) => inst.address,
            NodeKind::Selector(sel) => sel.address,
        }
    }

    /// Whether the node can be trusted without consulting memory.
    /// Selectors arbitrate against memory themselves, so they always can.
    pub fn is_live(&self, id: NodeId) -> bool {
        match &self.node(id).kind {
            NodeKind::Instruction(inst) => inst.live,
            NodeKind::Selector(_) => true,
        }
    }

    /// True if the slot still holds a node
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes
            .get(id.0 as usize)
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over live node ids
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(i, _)| NodeId(i as u32))
    }
}
