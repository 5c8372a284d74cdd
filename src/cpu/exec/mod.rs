//! Instruction execution
//!
//! The executor visits a parsed instruction with an exhaustive match over
//! its opcode-family tag and performs the semantic effect against CPU
//! state and memory. Operand values go through the field accessors, so a
//! field whose cached value was discarded by reduction is transparently
//! re-read from live memory on every execution.

pub mod alu;

use crate::cpu::address::SegmentedAddress;
use crate::cpu::decode::field::FieldIx;
use crate::cpu::decode::instruction::{
    AluOp, Condition, Direction, Grp5Op, InstructionKind, ParsedInstruction, Width,
};
use crate::cpu::decode::modrm::{AddressForm, MemoryOperand, ModRm, RmOperand};
use crate::cpu::state::Cpu;
use crate::memory::MemoryBus;

/// A resolved r/m operand location
enum RmRef {
    Reg(u8),
    Mem { segment: u16, offset: u16 },
}

impl Condition {
    /// Evaluate a Jcc condition code against the flags
    pub fn eval(&self, cpu: &Cpu) -> bool {
        let of = cpu.flag(Cpu::OF);
        let cf = cpu.flag(Cpu::CF);
        let zf = cpu.flag(Cpu::ZF);
        let sf = cpu.flag(Cpu::SF);
        let pf = cpu.flag(Cpu::PF);
        match self.0 {
            0x0 => of,              // JO
            0x1 => !of,             // JNO
            0x2 => cf,              // JB/JC
            0x3 => !cf,             // JNB/JNC
            0x4 => zf,              // JZ/JE
            0x5 => !zf,             // JNZ/JNE
            0x6 => cf || zf,        // JBE
            0x7 => !cf && !zf,      // JNBE/JA
            0x8 => sf,              // JS
            0x9 => !sf,             // JNS
            0xA => pf,              // JP
            0xB => !pf,             // JNP
            0xC => sf != of,        // JL
            0xD => sf == of,        // JNL/JGE
            0xE => zf || sf != of,  // JLE
            _ => !zf && sf == of,   // JNLE/JG
        }
    }
}

/// Displacement value widened to 16 bits (8-bit displacements are
/// sign-extended)
fn disp16(mem: &MemoryBus, inst: &ParsedInstruction, disp: Option<FieldIx>) -> u16 {
    match disp {
        None => 0,
        Some(ix) => {
            let field = inst.field(ix);
            match field.length {
                1 => field.value_i8(mem) as i16 as u16,
                _ => field.value_u16(mem),
            }
        }
    }
}

/// Displacement value widened to 32 bits
fn disp32(mem: &MemoryBus, inst: &ParsedInstruction, disp: Option<FieldIx>) -> u32 {
    match disp {
        None => 0,
        Some(ix) => {
            let field = inst.field(ix);
            match field.length {
                1 => field.value_i8(mem) as i32 as u32,
                2 => field.value_u16(mem) as u32,
                _ => field.value_u32(mem),
            }
        }
    }
}

/// Effective offset of a memory operand.
/// See Intel 8086 manual Table 2-2 for the 16-bit forms; 32-bit forms
/// truncate to the 16-bit real-mode offset.
fn effective_offset(
    cpu: &Cpu,
    mem: &MemoryBus,
    inst: &ParsedInstruction,
    mop: &MemoryOperand,
) -> u16 {
    match mop.form {
        AddressForm::BxSi => cpu
            .read_reg16(3)
            .wrapping_add(cpu.read_reg16(6))
            .wrapping_add(disp16(mem, inst, mop.disp)),
        AddressForm::BxDi => cpu
            .read_reg16(3)
            .wrapping_add(cpu.read_reg16(7))
            .wrapping_add(disp16(mem, inst, mop.disp)),
        AddressForm::BpSi => cpu
            .read_reg16(5)
            .wrapping_add(cpu.read_reg16(6))
            .wrapping_add(disp16(mem, inst, mop.disp)),
        AddressForm::BpDi => cpu
            .read_reg16(5)
            .wrapping_add(cpu.read_reg16(7))
            .wrapping_add(disp16(mem, inst, mop.disp)),
        AddressForm::Si => cpu.read_reg16(6).wrapping_add(disp16(mem, inst, mop.disp)),
        AddressForm::Di => cpu.read_reg16(7).wrapping_add(disp16(mem, inst, mop.disp)),
        AddressForm::Bp => cpu.read_reg16(5).wrapping_add(disp16(mem, inst, mop.disp)),
        AddressForm::Bx => cpu.read_reg16(3).wrapping_add(disp16(mem, inst, mop.disp)),
        AddressForm::Direct => disp16(mem, inst, mop.disp),
        AddressForm::Reg32 { reg } => cpu
            .read_reg32(reg)
            .wrapping_add(disp32(mem, inst, mop.disp)) as u16,
        AddressForm::Direct32 => disp32(mem, inst, mop.disp) as u16,
        AddressForm::Sib { scale, index, base } => {
            let base_value = base.map(|r| cpu.read_reg32(r)).unwrap_or(0);
            let index_value = index.map(|r| cpu.read_reg32(r) << scale).unwrap_or(0);
            base_value
                .wrapping_add(index_value)
                .wrapping_add(disp32(mem, inst, mop.disp)) as u16
        }
    }
}

fn resolve_rm(cpu: &Cpu, mem: &MemoryBus, inst: &ParsedInstruction, modrm: &ModRm) -> RmRef {
    match &modrm.operand {
        RmOperand::Register(reg) => RmRef::Reg(*reg),
        RmOperand::Memory(mop) => RmRef::Mem {
            segment: cpu.read_seg(modrm.segment),
            offset: effective_offset(cpu, mem, inst, mop),
        },
    }
}

fn read_reg(cpu: &Cpu, width: Width, reg: u8) -> u32 {
    match width {
        Width::Byte => cpu.read_reg8(reg) as u32,
        Width::Word => cpu.read_reg16(reg) as u32,
        Width::Dword => cpu.read_reg32(reg),
    }
}

fn write_reg(cpu: &mut Cpu, width: Width, reg: u8, value: u32) {
    match width {
        Width::Byte => cpu.write_reg8(reg, value as u8),
        Width::Word => cpu.write_reg16(reg, value as u16),
        Width::Dword => cpu.write_reg32(reg, value),
    }
}

fn read_rm(cpu: &Cpu, mem: &MemoryBus, width: Width, rm: &RmRef) -> u32 {
    match rm {
        RmRef::Reg(reg) => read_reg(cpu, width, *reg),
        RmRef::Mem { segment, offset } => {
            let linear = SegmentedAddress::new(*segment, *offset).linear();
            match width {
                Width::Byte => mem.read_u8(linear) as u32,
                Width::Word => mem.read_u16(linear) as u32,
                Width::Dword => mem.read_u32(linear),
            }
        }
    }
}

fn write_rm(cpu: &mut Cpu, mem: &mut MemoryBus, width: Width, rm: &RmRef, value: u32) {
    match rm {
        RmRef::Reg(reg) => write_reg(cpu, width, *reg, value),
        RmRef::Mem { segment, offset } => {
            let linear = SegmentedAddress::new(*segment, *offset).linear();
            match width {
                Width::Byte => mem.write_u8(linear, value as u8),
                Width::Word => mem.write_u16(linear, value as u16),
                Width::Dword => mem.write_u32(linear, value),
            }
        }
    }
}

/// Immediate operand value at the instruction's width
fn imm_value(mem: &MemoryBus, inst: &ParsedInstruction, ix: FieldIx, width: Width) -> u32 {
    let field = inst.field(ix);
    match width {
        Width::Byte => field.value_u8(mem) as u32,
        Width::Word => field.value_u16(mem) as u32,
        Width::Dword => field.value_u32(mem),
    }
}

/// ALU dispatch at the instruction's width
fn alu_op(cpu: &mut Cpu, op: AluOp, width: Width, a: u32, b: u32) -> u32 {
    match width {
        Width::Byte => alu::alu8(cpu, op, a as u8, b as u8) as u32,
        Width::Word => alu::alu16(cpu, op, a as u16, b as u16) as u32,
        Width::Dword => alu::alu32(cpu, op, a, b),
    }
}

// === Stack helpers ===

fn push16(cpu: &mut Cpu, mem: &mut MemoryBus, value: u16) {
    let sp = cpu.read_reg16(4).wrapping_sub(2);
    cpu.write_reg16(4, sp);
    mem.write_u16(SegmentedAddress::new(cpu.read_seg(2), sp).linear(), value);
}

fn pop16(cpu: &mut Cpu, mem: &mut MemoryBus) -> u16 {
    let sp = cpu.read_reg16(4);
    let value = mem.read_u16(SegmentedAddress::new(cpu.read_seg(2), sp).linear());
    cpu.write_reg16(4, sp.wrapping_add(2));
    value
}

fn push32(cpu: &mut Cpu, mem: &mut MemoryBus, value: u32) {
    let sp = cpu.read_reg16(4).wrapping_sub(4);
    cpu.write_reg16(4, sp);
    mem.write_u32(SegmentedAddress::new(cpu.read_seg(2), sp).linear(), value);
}

fn pop32(cpu: &mut Cpu, mem: &mut MemoryBus) -> u32 {
    let sp = cpu.read_reg16(4);
    let value = mem.read_u32(SegmentedAddress::new(cpu.read_seg(2), sp).linear());
    cpu.write_reg16(4, sp.wrapping_add(4));
    value
}

fn push(cpu: &mut Cpu, mem: &mut MemoryBus, width: Width, value: u32) {
    match width {
        Width::Dword => push32(cpu, mem, value),
        _ => push16(cpu, mem, value as u16),
    }
}

fn pop(cpu: &mut Cpu, mem: &mut MemoryBus, width: Width) -> u32 {
    match width {
        Width::Dword => pop32(cpu, mem),
        _ => pop16(cpu, mem) as u32,
    }
}

/// Execute one parsed instruction.
///
/// The instruction pointer is advanced to the fall-through address first;
/// control-transfer instructions overwrite it.
pub fn execute(cpu: &mut Cpu, mem: &mut MemoryBus, inst: &ParsedInstruction) {
    let next = inst.next_address();
    cpu.ip = next.offset;

    match &inst.kind {
        InstructionKind::Nop => {}

        InstructionKind::Hlt => {
            cpu.halted = true;
        }

        InstructionKind::Alu {
            op,
            width,
            dir,
            modrm,
        } => {
            let rm = resolve_rm(cpu, mem, inst, modrm);
            let rm_value = read_rm(cpu, mem, *width, &rm);
            let reg_value = read_reg(cpu, *width, modrm.reg);
            match dir {
                Direction::ToRm => {
                    let result = alu_op(cpu, *op, *width, rm_value, reg_value);
                    if *op != AluOp::Cmp {
                        write_rm(cpu, mem, *width, &rm, result);
                    }
                }
                Direction::ToReg => {
                    let result = alu_op(cpu, *op, *width, reg_value, rm_value);
                    if *op != AluOp::Cmp {
                        write_reg(cpu, *width, modrm.reg, result);
                    }
                }
            }
        }

        InstructionKind::AluAccImm { op, width, imm } => {
            let a = read_reg(cpu, *width, 0);
            let b = imm_value(mem, inst, *imm, *width);
            let result = alu_op(cpu, *op, *width, a, b);
            if *op != AluOp::Cmp {
                write_reg(cpu, *width, 0, result);
            }
        }

        InstructionKind::AluGrp1 {
            op,
            width,
            modrm,
            imm,
            sign_extend,
        } => {
            let rm = resolve_rm(cpu, mem, inst, modrm);
            let a = read_rm(cpu, mem, *width, &rm);
            let b = if *sign_extend {
                let wide = inst.field(*imm).value_i8(mem) as i32 as u32;
                match width {
                    Width::Word => wide & 0xFFFF,
                    _ => wide,
                }
            } else {
                imm_value(mem, inst, *imm, *width)
            };
            let result = alu_op(cpu, *op, *width, a, b);
            if *op != AluOp::Cmp {
                write_rm(cpu, mem, *width, &rm, result);
            }
        }

        InstructionKind::MovRegImm { reg, width, imm } => {
            let value = imm_value(mem, inst, *imm, *width);
            write_reg(cpu, *width, *reg, value);
        }

        InstructionKind::MovRm { width, dir, modrm } => {
            let rm = resolve_rm(cpu, mem, inst, modrm);
            match dir {
                Direction::ToRm => {
                    let value = read_reg(cpu, *width, modrm.reg);
                    write_rm(cpu, mem, *width, &rm, value);
                }
                Direction::ToReg => {
                    let value = read_rm(cpu, mem, *width, &rm);
                    write_reg(cpu, *width, modrm.reg, value);
                }
            }
        }

        InstructionKind::MovRmImm { width, modrm, imm } => {
            let rm = resolve_rm(cpu, mem, inst, modrm);
            let value = imm_value(mem, inst, *imm, *width);
            write_rm(cpu, mem, *width, &rm, value);
        }

        InstructionKind::MovAccMoffs {
            width,
            dir,
            offset,
            segment,
        } => {
            let field = inst.field(*offset);
            let off = match field.length {
                2 => field.value_u16(mem),
                _ => field.value_u32(mem) as u16,
            };
            let rm = RmRef::Mem {
                segment: cpu.read_seg(*segment),
                offset: off,
            };
            match dir {
                Direction::ToReg => {
                    let value = read_rm(cpu, mem, *width, &rm);
                    write_reg(cpu, *width, 0, value);
                }
                Direction::ToRm => {
                    let value = read_reg(cpu, *width, 0);
                    write_rm(cpu, mem, *width, &rm, value);
                }
            }
        }

        InstructionKind::IncDecReg { reg, width, dec } => {
            let value = read_reg(cpu, *width, *reg);
            let result = if *dec {
                alu::dec(cpu, width.bytes(), value)
            } else {
                alu::inc(cpu, width.bytes(), value)
            };
            write_reg(cpu, *width, *reg, result);
        }

        InstructionKind::IncDecRm { width, dec, modrm } => {
            let rm = resolve_rm(cpu, mem, inst, modrm);
            let value = read_rm(cpu, mem, *width, &rm);
            let result = if *dec {
                alu::dec(cpu, width.bytes(), value)
            } else {
                alu::inc(cpu, width.bytes(), value)
            };
            write_rm(cpu, mem, *width, &rm, result);
        }

        InstructionKind::PushReg { reg, width } => {
            let value = read_reg(cpu, *width, *reg);
            push(cpu, mem, *width, value);
        }

        InstructionKind::PopReg { reg, width } => {
            let value = pop(cpu, mem, *width);
            write_reg(cpu, *width, *reg, value);
        }

        InstructionKind::PushFlags => {
            let flags = cpu.flags();
            push16(cpu, mem, flags);
        }

        InstructionKind::PopFlags => {
            let flags = pop16(cpu, mem);
            cpu.set_flags(flags);
        }

        InstructionKind::JmpCond { cond, rel } => {
            if cond.eval(cpu) {
                let offset = inst.field(*rel).value_i8(mem) as i16;
                cpu.ip = next.offset.wrapping_add(offset as u16);
            }
        }

        InstructionKind::JmpShort { rel } => {
            let offset = inst.field(*rel).value_i8(mem) as i16;
            cpu.ip = next.offset.wrapping_add(offset as u16);
        }

        InstructionKind::JmpNear { rel, width } => {
            let offset = match width {
                Width::Dword => inst.field(*rel).value_i32(mem) as u16,
                _ => inst.field(*rel).value_i16(mem) as u16,
            };
            cpu.ip = next.offset.wrapping_add(offset);
        }

        InstructionKind::JmpFar { target } => {
            let target = inst.field(*target).value_segmented(mem);
            cpu.write_seg(1, target.segment);
            cpu.ip = target.offset;
        }

        InstructionKind::CallNear { rel, width } => {
            let offset = match width {
                Width::Dword => inst.field(*rel).value_i32(mem) as u16,
                _ => inst.field(*rel).value_i16(mem) as u16,
            };
            push16(cpu, mem, next.offset);
            cpu.ip = next.offset.wrapping_add(offset);
        }

        InstructionKind::RetNear => {
            cpu.ip = pop16(cpu, mem);
        }

        InstructionKind::Grp5 { op, width, modrm } => {
            let rm = resolve_rm(cpu, mem, inst, modrm);
            match op {
                Grp5Op::CallRm => {
                    let target = read_rm(cpu, mem, *width, &rm) as u16;
                    push16(cpu, mem, next.offset);
                    cpu.ip = target;
                }
                Grp5Op::JmpRm => {
                    cpu.ip = read_rm(cpu, mem, *width, &rm) as u16;
                }
                Grp5Op::CallFarPtr | Grp5Op::JmpFarPtr => {
                    // m16:16 pointer at the effective address, or m16:32
                    // under the operand-size prefix
                    let (segment, offset) = match &rm {
                        RmRef::Mem { segment, offset } => (*segment, *offset),
                        // The parser rejects register forms of far calls
                        RmRef::Reg(_) => unreachable!(),
                    };
                    let base = SegmentedAddress::new(segment, offset).linear();
                    let (target_off, target_seg) = match width {
                        Width::Dword => (
                            mem.read_u32(base) as u16,
                            mem.read_u16(base.wrapping_add(4)),
                        ),
                        _ => (mem.read_u16(base), mem.read_u16(base.wrapping_add(2))),
                    };
                    if matches!(op, Grp5Op::CallFarPtr) {
                        let cs = cpu.read_seg(1);
                        push(cpu, mem, *width, cs as u32);
                        push(cpu, mem, *width, next.offset as u32);
                    }
                    cpu.write_seg(1, target_seg);
                    cpu.ip = target_off;
                }
                Grp5Op::PushRm => {
                    let value = read_rm(cpu, mem, *width, &rm);
                    push(cpu, mem, *width, value);
                }
            }
        }
    }
}
