//! Signature matching, serialization, and reduction properties

use cfg86::cpu::address::SegmentedAddress;
use cfg86::cpu::decode::{InstructionParser, Signature};
use cfg86::cpu::CpuHarness;
use cfg86::memory::MemoryBus;

fn addr(offset: u16) -> SegmentedAddress {
    SegmentedAddress::new(0x1000, offset)
}

#[test]
fn test_signature_matches_with_wildcards() {
    let mut mem = MemoryBus::new();
    mem.load(&[0xB8, 0x34, 0x12], 0x10000);
    let inst = InstructionParser::parse(&mem, addr(0)).unwrap();

    assert!(inst.signature.matches(&[0xB8, 0x34, 0x12]));
    assert!(!inst.signature.matches(&[0xB8, 0x35, 0x12]));
    assert!(!inst.signature.matches(&[0xB8, 0x34]), "length must match");

    // The final signature wildcards the immediate, so it matches any
    // immediate bytes under the same opcode
    assert!(inst.signature_final.matches(&[0xB8, 0x00, 0xFF]));
    assert!(!inst.signature_final.matches(&[0xB9, 0x34, 0x12]));
}

#[test]
fn test_signature_serde_round_trip() {
    let mut mem = MemoryBus::new();
    mem.load(&[0x81, 0xC3, 0x34, 0x12], 0x10000);
    let inst = InstructionParser::parse(&mem, addr(0)).unwrap();

    let json = serde_json::to_string(&inst.signature).unwrap();
    let back: Signature = serde_json::from_str(&json).unwrap();
    assert_eq!(inst.signature, back);

    let json = serde_json::to_string(&inst.signature_final).unwrap();
    let back: Signature = serde_json::from_str(&json).unwrap();
    assert_eq!(inst.signature_final, back);
}

/// Two instances with the same final signature fold into one, and folding
/// again changes nothing.
#[test]
fn test_reduction_is_idempotent() {
    let mut harness = CpuHarness::new();
    harness.load_program(&[0xB8, 0x34, 0x12], 0x1000);
    harness.step().unwrap();
    let first = harness.cfg.current().get(addr(0)).unwrap();

    // Rewrite the immediate and force a second parse of the same address
    harness.mem.write_u8(addr(0).linear() + 1, 0x35);
    harness.jump_to(0);
    harness.step().unwrap();
    let second = harness.cfg.current().get(addr(0)).unwrap();
    assert_ne!(first, second, "the rewritten shape parses to a new node");

    let survivors = harness.cfg.reduce_all(&[second, first]);
    assert_eq!(survivors, vec![second]);
    assert!(!harness.cfg.arena().contains(first), "the victim is freed");

    let inst = harness.cfg.arena().instruction(second);
    let signature_after_first = inst.signature.clone();
    assert!(inst.signature.is_wildcard(1));
    assert!(inst.signature.is_wildcard(2));

    // Second application rewrites nothing
    let survivors = harness.cfg.reduce_all(&[second]);
    assert_eq!(survivors, vec![second]);
    assert_eq!(
        harness.cfg.arena().instruction(second).signature,
        signature_after_first
    );
    assert_eq!(harness.cfg.previous().count_at(addr(0)), 1);
}

/// Instances with different final signatures refuse to fold.
#[test]
fn test_reduction_refuses_different_shapes() {
    let mut harness = CpuHarness::new();
    harness.load_program(&[0xB8, 0x34, 0x12], 0x1000);
    harness.step().unwrap();
    let mov_ax = harness.cfg.current().get(addr(0)).unwrap();

    harness.mem.write_u8(addr(0).linear(), 0xB9);
    harness.jump_to(0);
    harness.step().unwrap();
    let mov_cx = harness.cfg.current().get(addr(0)).unwrap();

    let survivors = harness.cfg.reduce_all(&[mov_cx, mov_ax]);
    assert_eq!(survivors.len(), 2, "different opcodes must not fold");
    assert!(harness.cfg.arena().contains(mov_ax));
    assert!(harness.cfg.arena().contains(mov_cx));
}
