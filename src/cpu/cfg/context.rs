//! Per-executor dispatch state

use crate::cpu::cfg::arena::NodeId;

/// The two pieces of state the arbiter consumes on every step: the node
/// that just ran, and the node the graph predicts will run next (the
/// successor edge matching the new instruction pointer, if one exists).
#[derive(Debug, Default)]
pub struct ExecutionContext {
    last_executed: Option<NodeId>,
    next_according_to_graph: Option<NodeId>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Node executed on the previous step
    pub fn last_executed(&self) -> Option<NodeId> {
        self.last_executed
    }

    /// Graph's prediction for the node at the current instruction pointer
    pub fn next_according_to_graph(&self) -> Option<NodeId> {
        self.next_according_to_graph
    }

    /// Record the outcome of a step.
    pub fn record(&mut self, executed: NodeId, next: Option<NodeId>) {
        self.last_executed = Some(executed);
        self.next_according_to_graph = next;
    }

    /// Forget all dispatch state (external control transfer).
    pub fn reset(&mut self) {
        self.last_executed = None;
        self.next_according_to_graph = None;
    }

    /// Rewrite a node identity in place (driven by the replacer fan-out).
    pub(crate) fn rewrite(&mut self, old: NodeId, new: NodeId) {
        if self.last_executed == Some(old) {
            self.last_executed = Some(new);
        }
        if self.next_according_to_graph == Some(old) {
            self.next_according_to_graph = Some(new);
        }
    }
}
