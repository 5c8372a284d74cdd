//! Error types raised by the decode and dispatch layers

use thiserror::Error;

use crate::cpu::address::SegmentedAddress;

/// Decode failures.
///
/// These surface to the executor, which maps them onto the guest's invalid
/// opcode exception. They are not used for normal control flow: cache
/// misses, signature mismatches, and watchpoint fires are all handled
/// without errors.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The opcode byte has no dispatch entry
    #[error("invalid opcode {opcode:#04X} at {address}")]
    InvalidOpcode {
        opcode: u8,
        address: SegmentedAddress,
    },

    /// A prefix byte appeared where a full opcode is required
    #[error("prefix byte {opcode:#04X} at {address} where an opcode is required")]
    InvalidOpcodeBecausePrefix {
        opcode: u8,
        address: SegmentedAddress,
    },

    /// The ModR/M byte encodes a combination the opcode does not accept
    #[error("invalid ModR/M byte {modrm:#04X} for opcode {opcode:#04X} at {address}")]
    InvalidModRm {
        opcode: u8,
        modrm: u8,
        address: SegmentedAddress,
    },
}

/// Dispatch failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CfgError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The graph suggested a node whose address disagrees with what memory
    /// produced at the instruction pointer. Fatal: the coherence invariants
    /// rule this out, so reaching it means the graph is corrupt.
    #[error("graph suggested a node at {expected} but memory produced one at {found}")]
    UnhandledCfgDiscrepancy {
        expected: SegmentedAddress,
        found: SegmentedAddress,
    },
}
