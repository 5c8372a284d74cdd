//! Binary instruction parser
//!
//! Walks prefixes, the opcode byte, and whatever ModR/M, SIB, displacement
//! and immediate fields the opcode implies, producing a typed
//! [`ParsedInstruction`] with its signatures precomputed.
//!
//! Prefixes, opcode, ModR/M and SIB bytes are identity-bearing (final)
//! fields; displacements, immediates, relative offsets and far pointers
//! are not, which is what lets signature reduction keep one node across
//! immediate-only self-modification.

use log::trace;

use crate::cpu::address::SegmentedAddress;
use crate::cpu::decode::field::{FieldIx, InstructionField};
use crate::cpu::decode::instruction::{
    AluOp, Condition, Direction, Grp5Op, InstructionKind, ParsedInstruction, Prefixes, Repeat,
    Width,
};
use crate::cpu::decode::modrm::{self, ModRm, RmOperand};
use crate::cpu::decode::reader::FieldReader;
use crate::cpu::error::DecodeError;
use crate::memory::MemoryBus;

/// Prefix bytes beyond this count stop being consumed, which forces the
/// next prefix byte to be read as an opcode and rejected.
const MAX_PREFIX_BYTES: usize = 14;

/// One-shot parser for the instruction at a given address
pub struct InstructionParser<'a> {
    reader: FieldReader<'a>,
    fields: Vec<InstructionField>,
    prefixes: Prefixes,
    address: SegmentedAddress,
}

impl<'a> InstructionParser<'a> {
    /// Parse the instruction at `address`.
    pub fn parse(
        mem: &'a MemoryBus,
        address: SegmentedAddress,
    ) -> Result<ParsedInstruction, DecodeError> {
        let parser = Self {
            reader: FieldReader::new(mem, address),
            fields: Vec::new(),
            prefixes: Prefixes::default(),
            address,
        };
        parser.run()
    }

    fn run(mut self) -> Result<ParsedInstruction, DecodeError> {
        self.parse_prefixes();

        let opcode_field = self.reader.next_u8_field(true);
        let opcode = opcode_field.value as u8;
        self.fields.push(opcode_field);

        let kind = self.dispatch(opcode)?;
        let length = self.reader.index();

        let inst = ParsedInstruction::new(self.address, length, kind, self.prefixes, self.fields);
        trace!(
            "parsed opcode {:#04X} at {} ({} bytes)",
            opcode,
            inst.address,
            length
        );
        Ok(inst)
    }

    /// Consume prefix bytes until a non-prefix byte (or the prefix cap) is
    /// reached. Every prefix is an identity-bearing field.
    fn parse_prefixes(&mut self) {
        while self.fields.len() < MAX_PREFIX_BYTES {
            let byte = self.reader.peek_u8();
            match byte {
                0x26 => self.prefixes.segment = Some(0), // ES
                0x2E => self.prefixes.segment = Some(1), // CS
                0x36 => self.prefixes.segment = Some(2), // SS
                0x3E => self.prefixes.segment = Some(3), // DS
                0x66 => self.prefixes.operand_size = true,
                0x67 => self.prefixes.address_size = true,
                0xF0 => self.prefixes.lock = true,
                0xF2 => self.prefixes.repeat = Some(Repeat::RepNe),
                0xF3 => self.prefixes.repeat = Some(Repeat::Rep),
                _ => return,
            }
            let field = self.reader.next_u8_field(true);
            self.fields.push(field);
        }
    }

    /// Width selected by bit 0 of the opcode
    fn op_width(&self, opcode: u8) -> Width {
        if opcode & 1 == 0 {
            Width::Byte
        } else {
            self.word_width()
        }
    }

    /// Word width under the operand-size prefix
    fn word_width(&self) -> Width {
        if self.prefixes.operand_size {
            Width::Dword
        } else {
            Width::Word
        }
    }

    fn push(&mut self, field: InstructionField) -> FieldIx {
        self.fields.push(field);
        (self.fields.len() - 1) as FieldIx
    }

    /// Immediate operand field (never identity-bearing)
    fn imm_field(&mut self, width: Width) -> FieldIx {
        let field = match width {
            Width::Byte => self.reader.next_u8_field(false),
            Width::Word => self.reader.next_u16_field(false),
            Width::Dword => self.reader.next_u32_field(false),
        };
        self.push(field)
    }

    /// Signed relative-offset field (never identity-bearing)
    fn rel_field(&mut self, width: Width) -> FieldIx {
        let field = match width {
            Width::Byte => self.reader.next_i8_field(false),
            Width::Word => self.reader.next_i16_field(false),
            Width::Dword => self.reader.next_i32_field(false),
        };
        self.push(field)
    }

    fn modrm(&mut self, opcode: u8) -> Result<ModRm, DecodeError> {
        modrm::parse_modrm(
            &mut self.reader,
            &mut self.fields,
            &self.prefixes,
            self.address,
            opcode,
        )
    }

    fn invalid_modrm(&self, opcode: u8, m: &ModRm) -> DecodeError {
        DecodeError::InvalidModRm {
            opcode,
            modrm: (m.mode << 6) | (m.reg << 3) | m.rm,
            address: self.address,
        }
    }

    /// Opcode dispatch. Coverage follows the real-mode subset the rest of
    /// the core exercises; everything else is an invalid opcode.
    fn dispatch(&mut self, opcode: u8) -> Result<InstructionKind, DecodeError> {
        match opcode {
            // ALU group: ADD, OR, ADC, SBB, AND, SUB, XOR, CMP
            0x00..=0x05 | 0x08..=0x0D | 0x10..=0x15 | 0x18..=0x1D | 0x20..=0x25 | 0x28..=0x2D
            | 0x30..=0x35 | 0x38..=0x3D => {
                let op = AluOp::from_bits(opcode >> 3);
                let width = self.op_width(opcode);
                match opcode & 0b111 {
                    0 | 1 => {
                        let modrm = self.modrm(opcode)?;
                        Ok(InstructionKind::Alu {
                            op,
                            width,
                            dir: Direction::ToRm,
                            modrm,
                        })
                    }
                    2 | 3 => {
                        let modrm = self.modrm(opcode)?;
                        Ok(InstructionKind::Alu {
                            op,
                            width,
                            dir: Direction::ToReg,
                            modrm,
                        })
                    }
                    _ => {
                        let imm = self.imm_field(width);
                        Ok(InstructionKind::AluAccImm { op, width, imm })
                    }
                }
            }

            // A prefix byte where an opcode is required (only reachable
            // once the prefix cap has been exhausted)
            0x26 | 0x2E | 0x36 | 0x3E | 0x66 | 0x67 | 0xF0 | 0xF2 | 0xF3 => {
                Err(DecodeError::InvalidOpcodeBecausePrefix {
                    opcode,
                    address: self.address,
                })
            }

            // INC/DEC r16/r32
            0x40..=0x47 => Ok(InstructionKind::IncDecReg {
                reg: opcode & 0x07,
                width: self.word_width(),
                dec: false,
            }),
            0x48..=0x4F => Ok(InstructionKind::IncDecReg {
                reg: opcode & 0x07,
                width: self.word_width(),
                dec: true,
            }),

            // PUSH/POP r16/r32
            0x50..=0x57 => Ok(InstructionKind::PushReg {
                reg: opcode & 0x07,
                width: self.word_width(),
            }),
            0x58..=0x5F => Ok(InstructionKind::PopReg {
                reg: opcode & 0x07,
                width: self.word_width(),
            }),

            // Conditional jumps, 8-bit relative
            0x70..=0x7F => {
                let rel = self.rel_field(Width::Byte);
                Ok(InstructionKind::JmpCond {
                    cond: Condition(opcode & 0x0F),
                    rel,
                })
            }

            // Group 1: ALU r/m, imm
            0x80..=0x83 => {
                let modrm = self.modrm(opcode)?;
                let op = AluOp::from_bits(modrm.reg);
                let (width, imm_width, sign_extend) = match opcode {
                    0x80 | 0x82 => (Width::Byte, Width::Byte, false),
                    0x81 => (self.word_width(), self.word_width(), false),
                    _ => (self.word_width(), Width::Byte, true),
                };
                let imm = self.imm_field(imm_width);
                Ok(InstructionKind::AluGrp1 {
                    op,
                    width,
                    modrm,
                    imm,
                    sign_extend,
                })
            }

            // MOV r/m, r and MOV r, r/m
            0x88..=0x8B => {
                let modrm = self.modrm(opcode)?;
                Ok(InstructionKind::MovRm {
                    width: self.op_width(opcode),
                    dir: if opcode & 0b10 == 0 {
                        Direction::ToRm
                    } else {
                        Direction::ToReg
                    },
                    modrm,
                })
            }

            0x90 => Ok(InstructionKind::Nop),

            0x9C => Ok(InstructionKind::PushFlags),
            0x9D => Ok(InstructionKind::PopFlags),

            // MOV between the accumulator and a direct offset
            0xA0..=0xA3 => {
                let offset_width = if self.prefixes.address_size {
                    Width::Dword
                } else {
                    Width::Word
                };
                let offset = self.imm_field(offset_width);
                Ok(InstructionKind::MovAccMoffs {
                    width: self.op_width(opcode),
                    dir: if opcode & 0b10 == 0 {
                        Direction::ToReg
                    } else {
                        Direction::ToRm
                    },
                    offset,
                    segment: self.prefixes.segment.unwrap_or(3), // DS default
                })
            }

            // MOV reg, imm
            0xB0..=0xB7 => {
                let imm = self.imm_field(Width::Byte);
                Ok(InstructionKind::MovRegImm {
                    reg: opcode & 0x07,
                    width: Width::Byte,
                    imm,
                })
            }
            0xB8..=0xBF => {
                let width = self.word_width();
                let imm = self.imm_field(width);
                Ok(InstructionKind::MovRegImm {
                    reg: opcode & 0x07,
                    width,
                    imm,
                })
            }

            0xC3 => Ok(InstructionKind::RetNear),

            // MOV r/m, imm (reg field must be 0)
            0xC6 | 0xC7 => {
                let modrm = self.modrm(opcode)?;
                if modrm.reg != 0 {
                    return Err(self.invalid_modrm(opcode, &modrm));
                }
                let width = self.op_width(opcode);
                let imm = self.imm_field(width);
                Ok(InstructionKind::MovRmImm { width, modrm, imm })
            }

            // CALL near, relative
            0xE8 => {
                let width = self.word_width();
                let rel = self.rel_field(width);
                Ok(InstructionKind::CallNear { rel, width })
            }

            // JMP near / far / short
            0xE9 => {
                let width = self.word_width();
                let rel = self.rel_field(width);
                Ok(InstructionKind::JmpNear { rel, width })
            }
            0xEA => {
                let target_field = self.reader.next_segmented_field(false);
                let target = self.push(target_field);
                Ok(InstructionKind::JmpFar { target })
            }
            0xEB => {
                let rel = self.rel_field(Width::Byte);
                Ok(InstructionKind::JmpShort { rel })
            }

            0xF4 => Ok(InstructionKind::Hlt),

            // Group 4: INC/DEC r/m8
            0xFE => {
                let modrm = self.modrm(opcode)?;
                match modrm.reg {
                    0 => Ok(InstructionKind::IncDecRm {
                        width: Width::Byte,
                        dec: false,
                        modrm,
                    }),
                    1 => Ok(InstructionKind::IncDecRm {
                        width: Width::Byte,
                        dec: true,
                        modrm,
                    }),
                    _ => Err(self.invalid_modrm(opcode, &modrm)),
                }
            }

            // Group 5: INC/DEC/CALL/JMP/PUSH r/m
            0xFF => {
                let modrm = self.modrm(opcode)?;
                let width = self.word_width();
                let op = match modrm.reg {
                    0 => {
                        return Ok(InstructionKind::IncDecRm {
                            width,
                            dec: false,
                            modrm,
                        })
                    }
                    1 => {
                        return Ok(InstructionKind::IncDecRm {
                            width,
                            dec: true,
                            modrm,
                        })
                    }
                    2 => Grp5Op::CallRm,
                    3 => Grp5Op::CallFarPtr,
                    4 => Grp5Op::JmpRm,
                    5 => Grp5Op::JmpFarPtr,
                    6 => Grp5Op::PushRm,
                    _ => return Err(self.invalid_modrm(opcode, &modrm)),
                };
                // Far-pointer forms need a memory operand to load from
                if matches!(op, Grp5Op::CallFarPtr | Grp5Op::JmpFarPtr)
                    && matches!(modrm.operand, RmOperand::Register(_))
                {
                    return Err(self.invalid_modrm(opcode, &modrm));
                }
                Ok(InstructionKind::Grp5 { op, width, modrm })
            }

            _ => Err(DecodeError::InvalidOpcode {
                opcode,
                address: self.address,
            }),
        }
    }
}
