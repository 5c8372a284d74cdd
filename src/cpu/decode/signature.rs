//! Byte signatures with wildcards
//!
//! A signature is the per-byte pattern of an instruction as parsed.
//! Positions belonging to fields whose value has been discarded by
//! reduction become wildcards (`None`) and match any byte. The final
//! signature keeps only the positions inside identity-bearing fields and
//! is what decides whether two parses are "the same instruction".

use serde::{Deserialize, Serialize};

use crate::cpu::decode::field::InstructionField;

/// Per-byte pattern over an instruction's footprint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature(Vec<Option<u8>>);

impl Signature {
    /// Build the full signature from an instruction's fields.
    ///
    /// Every byte of the instruction belongs to some field; fields whose
    /// value has been discarded contribute wildcards.
    pub fn from_fields(length: u8, fields: &[InstructionField]) -> Self {
        let mut pattern = vec![None; length as usize];
        for field in fields {
            for i in 0..field.length {
                let pos = field.index.wrapping_add(i) as usize;
                if pos < pattern.len() {
                    pattern[pos] = field.bytes[i as usize];
                }
            }
        }
        Self(pattern)
    }

    /// Build the final signature: positions inside `is_final` fields keep
    /// their bytes, everything else is a wildcard.
    pub fn final_from_fields(length: u8, fields: &[InstructionField]) -> Self {
        let mut pattern = vec![None; length as usize];
        for field in fields.iter().filter(|f| f.is_final) {
            for i in 0..field.length {
                let pos = field.index.wrapping_add(i) as usize;
                if pos < pattern.len() {
                    pattern[pos] = field.bytes[i as usize];
                }
            }
        }
        Self(pattern)
    }

    /// Length of the pattern in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Pattern byte at `pos`, `None` for wildcards
    pub fn get(&self, pos: usize) -> Option<u8> {
        self.0.get(pos).copied().flatten()
    }

    /// True if the position is a wildcard (or out of range)
    pub fn is_wildcard(&self, pos: usize) -> bool {
        self.get(pos).is_none()
    }

    /// Wildcard the positions `[start, start + len)`.
    pub(crate) fn wildcard_range(&mut self, start: u8, len: u8) {
        for i in 0..len {
            let pos = start.wrapping_add(i) as usize;
            if pos < self.0.len() {
                self.0[pos] = None;
            }
        }
    }

    /// Match the pattern against a byte slice. Wildcards match any byte;
    /// a length mismatch never matches.
    pub fn matches(&self, bytes: &[u8]) -> bool {
        if bytes.len() != self.0.len() {
            return false;
        }
        self.0
            .iter()
            .zip(bytes)
            .all(|(pat, b)| match pat {
                Some(expected) => expected == b,
                None => true,
            })
    }
}
