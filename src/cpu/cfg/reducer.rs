//! Signature reduction
//!
//! Two instances at one address that share their identity-bearing bytes
//! (same opcode family, same final signature) describe the same logical
//! instruction whose non-final bytes have been rewritten between program
//! phases. Reduction folds them into a single node: differing fields lose
//! their cached value and become signature wildcards, so the surviving
//! node stays correct across every shape the guest flips between.

use std::collections::HashMap;
use std::mem::{discriminant, Discriminant};

use log::debug;

use crate::cpu::cfg::arena::{NodeArena, NodeId};
use crate::cpu::cfg::CfgCpu;
use crate::cpu::decode::instruction::InstructionKind;
use crate::cpu::decode::Signature;

/// Whether two instruction nodes can fold into one: same opcode family,
/// identical final signature (which implies identical length and layout).
fn mergeable(arena: &NodeArena, a: NodeId, b: NodeId) -> bool {
    let a = arena.instruction(a);
    let b = arena.instruction(b);
    discriminant(&a.kind) == discriminant(&b.kind)
        && a.signature_final == b.signature_final
        && a.fields.len() == b.fields.len()
}

/// Fold `victim`'s field differences into `survivor`: any field slot whose
/// trusted value differs is demoted to read-from-memory and its signature
/// positions become wildcards. The final signature is untouched.
fn merge_fields(arena: &mut NodeArena, survivor: NodeId, victim: NodeId) {
    let victim_fields = arena.instruction(victim).fields.clone();
    let inst = arena.instruction_mut(survivor);

    let mut wildcarded = Vec::new();
    for (i, field) in inst.fields.iter_mut().enumerate() {
        if field.is_final {
            continue;
        }
        if !field.matches_value_and_position(&victim_fields[i]) {
            field.discard_value();
            wildcarded.push((field.index, field.length));
        }
    }
    for (start, len) in wildcarded {
        inst.signature.wildcard_range(start, len);
    }
}

impl CfgCpu {
    /// Fold `victim` into `survivor` if they are two shapes of the same
    /// logical instruction. On success every reference to the victim is
    /// rewritten to the survivor and the victim node is freed.
    ///
    /// Returns the surviving node, or `None` when the instances genuinely
    /// differ and need a selector instead.
    pub fn reduce_to_one(&mut self, survivor: NodeId, victim: NodeId) -> Option<NodeId> {
        if survivor == victim {
            return Some(survivor);
        }
        if !mergeable(&self.arena, survivor, victim) {
            return None;
        }

        merge_fields(&mut self.arena, survivor, victim);
        self.arena.merge_edges(victim, survivor);
        self.replace_everywhere(victim, Some(survivor));
        self.arena.remove(victim);

        debug!(
            "reduced two instances at {} into one",
            self.arena.address(survivor)
        );
        Some(survivor)
    }

    /// Fold an arbitrary list of instruction nodes, grouping by opcode
    /// family and final signature. Applying the result a second time
    /// rewrites nothing.
    pub fn reduce_all(&mut self, ids: &[NodeId]) -> Vec<NodeId> {
        let mut survivors: HashMap<(Discriminant<InstructionKind>, Signature), NodeId> =
            HashMap::new();
        let mut out = Vec::new();

        for &id in ids {
            if !self.arena.contains(id) {
                // Already folded into an earlier survivor
                continue;
            }
            let key = {
                let inst = self.arena.instruction(id);
                (discriminant(&inst.kind), inst.signature_final.clone())
            };
            match survivors.get(&key) {
                Some(&survivor) => {
                    self.reduce_to_one(survivor, id);
                }
                None => {
                    survivors.insert(key, id);
                    out.push(id);
                }
            }
        }
        out
    }
}
