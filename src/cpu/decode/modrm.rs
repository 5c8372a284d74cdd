//! ModR/M and SIB decoding
//!
//! The ModR/M byte encodes addressing modes and register operands.
//! Format: [mod:2][reg:3][r/m:3]
//! - mod: addressing mode (00, 01, 10, 11)
//! - reg: register operand (or opcode extension for group instructions)
//! - r/m: register or memory operand
//!
//! With an address-size prefix the r/m field selects 32-bit forms instead,
//! including the SIB byte. ModR/M and SIB bytes are identity-bearing
//! fields; displacements are not.

use crate::cpu::address::SegmentedAddress;
use crate::cpu::decode::field::{FieldIx, InstructionField};
use crate::cpu::decode::instruction::Prefixes;
use crate::cpu::decode::reader::FieldReader;
use crate::cpu::error::DecodeError;

/// Effective-address form selected by mod/rm (and SIB when present).
///
/// The 16-bit forms are the canonical base/index combinations; the 32-bit
/// forms appear under the address-size prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressForm {
    /// [BX + SI + disp]
    BxSi,
    /// [BX + DI + disp]
    BxDi,
    /// [BP + SI + disp]
    BpSi,
    /// [BP + DI + disp]
    BpDi,
    /// [SI + disp]
    Si,
    /// [DI + disp]
    Di,
    /// [BP + disp]
    Bp,
    /// [BX + disp]
    Bx,
    /// [disp16] direct address
    Direct,
    /// [reg32 + disp] (address-size prefix)
    Reg32 { reg: u8 },
    /// [disp32] direct address (address-size prefix)
    Direct32,
    /// [base + index * scale + disp] (address-size prefix)
    Sib {
        scale: u8,
        index: Option<u8>,
        base: Option<u8>,
    },
}

/// A memory operand: address form plus the index of its displacement
/// field, if the form carries one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryOperand {
    pub form: AddressForm,
    pub disp: Option<FieldIx>,
}

/// Register-or-memory operand from the r/m field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RmOperand {
    Register(u8),
    Memory(MemoryOperand),
}

/// Decoded ModR/M byte with its resolved operand and segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModRm {
    /// Mod field (bits 7-6)
    pub mode: u8,
    /// Reg field (bits 5-3) - register or opcode extension
    pub reg: u8,
    /// R/M field (bits 2-0)
    pub rm: u8,
    /// Register or memory operand
    pub operand: RmOperand,
    /// Segment register index (0=ES, 1=CS, 2=SS, 3=DS) to use for memory
    /// access: the form's default unless a segment override prefix applies
    pub segment: u8,
}

impl ModRm {
    /// True for register-direct addressing (mod=11)
    pub fn is_register_direct(&self) -> bool {
        matches!(self.operand, RmOperand::Register(_))
    }
}

/// Default segment for an effective-address form.
/// BP-based 16-bit forms and EBP/ESP-based 32-bit forms default to SS.
fn default_segment(form: &AddressForm) -> u8 {
    match form {
        AddressForm::BpSi | AddressForm::BpDi | AddressForm::Bp => 2, // SS
        AddressForm::Reg32 { reg } if *reg == 4 || *reg == 5 => 2,    // SS
        AddressForm::Sib { base, .. } if matches!(base, Some(4) | Some(5)) => 2, // SS
        _ => 3, // DS
    }
}

/// Parse a ModR/M byte (and any SIB/displacement it implies) at the
/// reader's cursor, appending the consumed fields to `fields`.
pub(crate) fn parse_modrm(
    reader: &mut FieldReader<'_>,
    fields: &mut Vec<InstructionField>,
    prefixes: &Prefixes,
    address: SegmentedAddress,
    opcode: u8,
) -> Result<ModRm, DecodeError> {
    let modrm_field = reader.next_u8_field(true);
    let raw = modrm_field.value as u8;
    fields.push(modrm_field);

    let mode = (raw >> 6) & 0b11;
    let reg = (raw >> 3) & 0b111;
    let rm = raw & 0b111;

    if mode == 0b11 {
        return Ok(ModRm {
            mode,
            reg,
            rm,
            operand: RmOperand::Register(rm),
            // Register operands never touch memory; keep the data segment
            // so the struct stays uniform.
            segment: prefixes.segment.unwrap_or(3),
        });
    }

    let (form, disp_len) = if prefixes.address_size {
        parse_form32(reader, fields, mode, rm)
    } else {
        parse_form16(mode, rm)
    };

    // Displacement bytes do not contribute to instruction identity.
    let disp = match disp_len {
        0 => None,
        1 => {
            let f = reader.next_i8_field(false);
            fields.push(f);
            Some((fields.len() - 1) as FieldIx)
        }
        2 => {
            let f = reader.next_u16_field(false);
            fields.push(f);
            Some((fields.len() - 1) as FieldIx)
        }
        4 => {
            let f = reader.next_u32_field(false);
            fields.push(f);
            Some((fields.len() - 1) as FieldIx)
        }
        _ => {
            return Err(DecodeError::InvalidModRm {
                opcode,
                modrm: raw,
                address,
            })
        }
    };

    let segment = prefixes.segment.unwrap_or_else(|| default_segment(&form));

    Ok(ModRm {
        mode,
        reg,
        rm,
        operand: RmOperand::Memory(MemoryOperand { form, disp }),
        segment,
    })
}

/// 16-bit addressing: form and displacement width from mod/rm.
/// See Intel 8086 manual Table 2-2.
fn parse_form16(mode: u8, rm: u8) -> (AddressForm, u8) {
    let form = match rm {
        0b000 => AddressForm::BxSi,
        0b001 => AddressForm::BxDi,
        0b010 => AddressForm::BpSi,
        0b011 => AddressForm::BpDi,
        0b100 => AddressForm::Si,
        0b101 => AddressForm::Di,
        0b110 => {
            if mode == 0b00 {
                // Special case: direct 16-bit address
                return (AddressForm::Direct, 2);
            }
            AddressForm::Bp
        }
        0b111 => AddressForm::Bx,
        _ => unreachable!(),
    };
    let disp_len = match mode {
        0b00 => 0,
        0b01 => 1,
        0b10 => 2,
        _ => unreachable!(),
    };
    (form, disp_len)
}

/// 32-bit addressing (address-size prefix): form and displacement width,
/// consuming a SIB byte when rm=100.
fn parse_form32(
    reader: &mut FieldReader<'_>,
    fields: &mut Vec<InstructionField>,
    mode: u8,
    rm: u8,
) -> (AddressForm, u8) {
    let mut disp_len = match mode {
        0b00 => 0,
        0b01 => 1,
        0b10 => 4,
        _ => unreachable!(),
    };

    let form = match rm {
        0b100 => {
            // SIB byte follows; it is identity-bearing like ModR/M
            let sib_field = reader.next_u8_field(true);
            let sib = sib_field.value as u8;
            fields.push(sib_field);

            let scale = (sib >> 6) & 0b11;
            let index_bits = (sib >> 3) & 0b111;
            let base_bits = sib & 0b111;
            let index = if index_bits == 0b100 {
                None
            } else {
                Some(index_bits)
            };
            let base = if base_bits == 0b101 && mode == 0b00 {
                // No base register; a 32-bit displacement follows instead
                disp_len = 4;
                None
            } else {
                Some(base_bits)
            };
            AddressForm::Sib { scale, index, base }
        }
        0b101 if mode == 0b00 => {
            disp_len = 4;
            AddressForm::Direct32
        }
        reg => AddressForm::Reg32 { reg },
    };

    (form, disp_len)
}
