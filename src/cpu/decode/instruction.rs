//! Parsed instruction representation
//!
//! A [`ParsedInstruction`] is the unit the control-flow graph caches and
//! dispatches: one typed variant per opcode family, the ordered list of
//! fields its bytes decompose into, and the byte signatures that tie it to
//! the memory it was parsed from.

use crate::cpu::address::SegmentedAddress;
use crate::cpu::decode::field::{FieldIx, InstructionField};
use crate::cpu::decode::modrm::ModRm;
use crate::cpu::decode::signature::Signature;
use crate::memory::MemoryBus;

/// ALU operation selected by bits 5-3 of the opcode (or the reg field of
/// a group instruction)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Or,
    Adc,
    Sbb,
    And,
    Sub,
    Xor,
    Cmp,
}

impl AluOp {
    /// Decode from the 3-bit operation number
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b111 {
            0 => AluOp::Add,
            1 => AluOp::Or,
            2 => AluOp::Adc,
            3 => AluOp::Sbb,
            4 => AluOp::And,
            5 => AluOp::Sub,
            6 => AluOp::Xor,
            _ => AluOp::Cmp,
        }
    }
}

/// Operand width. Word widens to Dword under the operand-size prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Byte,
    Word,
    Dword,
}

impl Width {
    /// Width in bytes
    pub fn bytes(self) -> u8 {
        match self {
            Width::Byte => 1,
            Width::Word => 2,
            Width::Dword => 4,
        }
    }
}

/// Data direction for ModR/M forms: bit 1 of the opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// reg -> r/m
    ToRm,
    /// r/m -> reg
    ToReg,
}

/// Condition code of a conditional jump (low nibble of opcodes 70-7F)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Condition(pub u8);

/// Operations encoded in the reg field of opcode 0xFF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grp5Op {
    CallRm,
    CallFarPtr,
    JmpRm,
    JmpFarPtr,
    PushRm,
}

/// Repeat prefix kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    /// REP/REPE (0xF3)
    Rep,
    /// REPNE (0xF2)
    RepNe,
}

/// Prefix bytes collected ahead of the opcode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Prefixes {
    /// Segment override (segment register index 0-3)
    pub segment: Option<u8>,
    /// Operand-size prefix (0x66) seen
    pub operand_size: bool,
    /// Address-size prefix (0x67) seen
    pub address_size: bool,
    /// LOCK prefix (0xF0) seen
    pub lock: bool,
    /// Repeat prefix (0xF2/0xF3)
    pub repeat: Option<Repeat>,
}

/// One typed variant per opcode family.
///
/// Variants reference their immediates, displacements and relative offsets
/// as indices into the instruction's field list, so that execution can
/// honour the per-field `use_value` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionKind {
    /// ALU op between r/m and reg (opcodes 00-3B, modrm forms)
    Alu {
        op: AluOp,
        width: Width,
        dir: Direction,
        modrm: ModRm,
    },
    /// ALU op between the accumulator and an immediate (04/05 pattern)
    AluAccImm {
        op: AluOp,
        width: Width,
        imm: FieldIx,
    },
    /// Group 1: ALU op between r/m and an immediate (80-83)
    AluGrp1 {
        op: AluOp,
        width: Width,
        modrm: ModRm,
        imm: FieldIx,
        sign_extend: bool,
    },
    /// MOV reg, imm (B0-BF)
    MovRegImm {
        reg: u8,
        width: Width,
        imm: FieldIx,
    },
    /// MOV between r/m and reg (88-8B)
    MovRm {
        width: Width,
        dir: Direction,
        modrm: ModRm,
    },
    /// MOV r/m, imm (C6/C7)
    MovRmImm {
        width: Width,
        modrm: ModRm,
        imm: FieldIx,
    },
    /// MOV between the accumulator and a direct offset (A0-A3)
    MovAccMoffs {
        width: Width,
        dir: Direction,
        offset: FieldIx,
        /// Segment register index to address through
        segment: u8,
    },
    /// INC/DEC reg16/reg32 (40-4F)
    IncDecReg { reg: u8, width: Width, dec: bool },
    /// INC/DEC r/m (FE /0 /1, FF /0 /1)
    IncDecRm {
        width: Width,
        dec: bool,
        modrm: ModRm,
    },
    /// PUSH reg (50-57)
    PushReg { reg: u8, width: Width },
    /// POP reg (58-5F)
    PopReg { reg: u8, width: Width },
    /// PUSHF (9C)
    PushFlags,
    /// POPF (9D)
    PopFlags,
    /// NOP (90)
    Nop,
    /// HLT (F4)
    Hlt,
    /// Conditional jump, 8-bit relative (70-7F)
    JmpCond { cond: Condition, rel: FieldIx },
    /// JMP short, 8-bit relative (EB)
    JmpShort { rel: FieldIx },
    /// JMP near, 16/32-bit relative (E9)
    JmpNear { rel: FieldIx, width: Width },
    /// JMP far immediate (EA)
    JmpFar { target: FieldIx },
    /// CALL near, 16/32-bit relative (E8)
    CallNear { rel: FieldIx, width: Width },
    /// RET near (C3)
    RetNear,
    /// Group 5 control/stack forms (FF /2../6)
    Grp5 {
        op: Grp5Op,
        width: Width,
        modrm: ModRm,
    },
}

/// A fully parsed instruction, anchored to the address it was parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInstruction {
    /// Where the instruction was parsed
    pub address: SegmentedAddress,
    /// Total length in bytes, prefixes included
    pub length: u8,
    /// Typed operation
    pub kind: InstructionKind,
    /// Prefixes in effect
    pub prefixes: Prefixes,
    /// Every field, in byte order
    pub fields: Vec<InstructionField>,
    /// Full byte pattern; wildcards at discarded-value fields
    pub signature: Signature,
    /// Byte pattern restricted to identity-bearing fields
    pub signature_final: Signature,
    /// True while the instruction's footprint is known to match memory
    pub live: bool,
}

impl ParsedInstruction {
    /// Build an instruction and derive its signatures from the fields.
    pub(crate) fn new(
        address: SegmentedAddress,
        length: u8,
        kind: InstructionKind,
        prefixes: Prefixes,
        fields: Vec<InstructionField>,
    ) -> Self {
        let signature = Signature::from_fields(length, &fields);
        let signature_final = Signature::final_from_fields(length, &fields);
        Self {
            address,
            length,
            kind,
            prefixes,
            fields,
            signature,
            signature_final,
            live: true,
        }
    }

    /// Field by index
    #[inline(always)]
    pub fn field(&self, ix: FieldIx) -> &InstructionField {
        &self.fields[ix as usize]
    }

    /// Address of the next sequential instruction
    #[inline(always)]
    pub fn next_address(&self) -> SegmentedAddress {
        self.address.advanced(self.length as u16)
    }

    /// Compare the signature against the bytes currently in memory at the
    /// instruction's own address.
    pub fn matches_memory(&self, mem: &MemoryBus) -> bool {
        let bytes: Vec<u8> = (0..self.length as u16)
            .map(|i| mem.read_u8(self.address.advanced(i).linear()))
            .collect();
        self.signature.matches(&bytes)
    }
}
