//! Parser tests: opcode coverage, prefixes, ModR/M forms, signatures

use cfg86::cpu::address::SegmentedAddress;
use cfg86::cpu::decode::instruction::{AluOp, Direction, InstructionKind, Width};
use cfg86::cpu::decode::modrm::{AddressForm, RmOperand};
use cfg86::cpu::decode::InstructionParser;
use cfg86::cpu::error::DecodeError;
use cfg86::memory::MemoryBus;

fn parse(code: &[u8]) -> Result<cfg86::cpu::decode::ParsedInstruction, DecodeError> {
    let mut mem = MemoryBus::new();
    mem.load(code, 0x10000);
    InstructionParser::parse(&mem, SegmentedAddress::new(0x1000, 0))
}

#[test]
fn test_mov_reg_imm16() {
    let inst = parse(&[0xB8, 0x34, 0x12]).unwrap();

    assert_eq!(inst.length, 3);
    assert!(matches!(
        inst.kind,
        InstructionKind::MovRegImm {
            reg: 0,
            width: Width::Word,
            ..
        }
    ));

    // Opcode is identity-bearing, the immediate is not
    assert_eq!(inst.fields.len(), 2);
    assert!(inst.fields[0].is_final);
    assert!(!inst.fields[1].is_final);
    assert_eq!(inst.fields[1].value, 0x1234);

    assert_eq!(inst.signature_final.get(0), Some(0xB8));
    assert!(inst.signature_final.is_wildcard(1));
    assert!(inst.signature_final.is_wildcard(2));
    assert_eq!(inst.signature.get(1), Some(0x34));
    assert_eq!(inst.signature.get(2), Some(0x12));
}

#[test]
fn test_segment_override_prefix() {
    // ES: MOV AL, [BX]
    let inst = parse(&[0x26, 0x8A, 0x07]).unwrap();

    assert_eq!(inst.length, 3);
    assert_eq!(inst.prefixes.segment, Some(0));
    let InstructionKind::MovRm { width, dir, modrm } = &inst.kind else {
        panic!("expected MovRm, got {:?}", inst.kind);
    };
    assert_eq!(*width, Width::Byte);
    assert_eq!(*dir, Direction::ToReg);
    assert_eq!(modrm.segment, 0, "override should beat the DS default");
    let RmOperand::Memory(mop) = modrm.operand else {
        panic!("expected a memory operand");
    };
    assert_eq!(mop.form, AddressForm::Bx);
}

#[test]
fn test_modrm_disp8() {
    // MOV AX, [SI+0x12]
    let inst = parse(&[0x8B, 0x44, 0x12]).unwrap();

    let InstructionKind::MovRm { modrm, .. } = &inst.kind else {
        panic!("expected MovRm");
    };
    let RmOperand::Memory(mop) = modrm.operand else {
        panic!("expected a memory operand");
    };
    assert_eq!(mop.form, AddressForm::Si);
    let disp = inst.field(mop.disp.expect("disp8 field"));
    assert_eq!(disp.value, 0x12);
    assert!(!disp.is_final);
}

#[test]
fn test_modrm_bp_defaults_to_ss() {
    // MOV AX, [BP+2]
    let inst = parse(&[0x8B, 0x46, 0x02]).unwrap();
    let InstructionKind::MovRm { modrm, .. } = &inst.kind else {
        panic!("expected MovRm");
    };
    assert_eq!(modrm.segment, 2, "BP-based addressing defaults to SS");
}

#[test]
fn test_direct_address_form() {
    // MOV AX, [0x2000]
    let inst = parse(&[0xA1, 0x00, 0x20]).unwrap();
    assert!(matches!(
        inst.kind,
        InstructionKind::MovAccMoffs {
            width: Width::Word,
            dir: Direction::ToReg,
            segment: 3,
            ..
        }
    ));
    assert_eq!(inst.length, 3);
}

#[test]
fn test_grp1_sign_extended() {
    // ADD BX, 5 (sign-extended imm8)
    let inst = parse(&[0x83, 0xC3, 0x05]).unwrap();
    let InstructionKind::AluGrp1 {
        op,
        width,
        modrm,
        sign_extend,
        ..
    } = &inst.kind
    else {
        panic!("expected AluGrp1");
    };
    assert_eq!(*op, AluOp::Add);
    assert_eq!(*width, Width::Word);
    assert!(*sign_extend);
    assert_eq!(modrm.operand, RmOperand::Register(3));
}

#[test]
fn test_jmp_far_target() {
    // JMP 2000:0100
    let inst = parse(&[0xEA, 0x00, 0x01, 0x00, 0x20]).unwrap();
    let InstructionKind::JmpFar { target } = &inst.kind else {
        panic!("expected JmpFar");
    };
    let mem = MemoryBus::new();
    let target = inst.field(*target).value_segmented(&mem);
    assert_eq!(target, SegmentedAddress::new(0x2000, 0x0100));
    assert_eq!(inst.length, 5);
}

#[test]
fn test_operand_size_prefix_widens_immediate() {
    // MOV EAX, 0x12345678
    let inst = parse(&[0x66, 0xB8, 0x78, 0x56, 0x34, 0x12]).unwrap();
    assert_eq!(inst.length, 6);
    assert!(matches!(
        inst.kind,
        InstructionKind::MovRegImm {
            reg: 0,
            width: Width::Dword,
            ..
        }
    ));
    assert_eq!(inst.fields[2].value, 0x12345678);
}

#[test]
fn test_address_size_prefix_parses_sib() {
    // MOV AX, [EAX+EBX]
    let inst = parse(&[0x67, 0x8B, 0x04, 0x18]).unwrap();
    assert_eq!(inst.length, 4);
    let InstructionKind::MovRm { modrm, .. } = &inst.kind else {
        panic!("expected MovRm");
    };
    let RmOperand::Memory(mop) = modrm.operand else {
        panic!("expected a memory operand");
    };
    assert_eq!(
        mop.form,
        AddressForm::Sib {
            scale: 0,
            index: Some(3),
            base: Some(0),
        }
    );
}

#[test]
fn test_invalid_opcode() {
    let err = parse(&[0x0F, 0x00]).unwrap_err();
    assert!(matches!(err, DecodeError::InvalidOpcode { opcode: 0x0F, .. }));
}

#[test]
fn test_invalid_modrm_reg_extension() {
    // C6 /1 does not exist
    let err = parse(&[0xC6, 0xC8, 0x00]).unwrap_err();
    assert!(matches!(err, DecodeError::InvalidModRm { opcode: 0xC6, .. }));
}

#[test]
fn test_prefix_flood_is_rejected() {
    // More prefixes than any instruction can carry
    let code = [0x26u8; 16];
    let err = parse(&code).unwrap_err();
    assert!(matches!(
        err,
        DecodeError::InvalidOpcodeBecausePrefix { opcode: 0x26, .. }
    ));
}

#[test]
fn test_fields_record_absolute_addresses() {
    let inst = parse(&[0xB8, 0x34, 0x12]).unwrap();
    assert_eq!(inst.fields[0].address, 0x10000);
    assert_eq!(inst.fields[1].address, 0x10001);
    assert_eq!(inst.fields[1].index, 1);
}

#[test]
fn test_offset_wraps_at_segment_boundary() {
    // Instruction bytes straddling offset 0xFFFF wrap back to offset 0
    // within the same segment
    let mut mem = MemoryBus::new();
    mem.write_u8(SegmentedAddress::new(0x1000, 0xFFFF).linear(), 0xB0); // MOV AL, imm8
    mem.write_u8(SegmentedAddress::new(0x1000, 0x0000).linear(), 0x7F);

    let inst = InstructionParser::parse(&mem, SegmentedAddress::new(0x1000, 0xFFFF)).unwrap();
    assert_eq!(inst.fields[1].value, 0x7F);
    assert_eq!(
        inst.fields[1].address,
        SegmentedAddress::new(0x1000, 0).linear()
    );
}

/// Equal memory and equal seed address parse to equal signatures.
#[test]
fn test_parse_determinism() {
    let mut mem = MemoryBus::new();
    mem.load(&[0x81, 0xC3, 0x34, 0x12], 0x10000);
    let seed = SegmentedAddress::new(0x1000, 0);

    let a = InstructionParser::parse(&mem, seed).unwrap();
    let b = InstructionParser::parse(&mem, seed).unwrap();

    assert_eq!(a.signature, b.signature);
    assert_eq!(a.signature_final, b.signature_final);
    assert_eq!(a.length, b.length);
}
