//! End-to-end dispatch tests for the control-flow graph core

use cfg86::cpu::address::SegmentedAddress;
use cfg86::cpu::error::CfgError;
use cfg86::cpu::{CfgCpu, CpuHarness};

fn addr(offset: u16) -> SegmentedAddress {
    SegmentedAddress::new(0x1000, offset)
}

/// Linear flow: MOV AX, 0x1234 then NOP. Both land in the current cache
/// and the sequential edge connects them.
#[test]
fn test_linear_two_step() {
    let mut harness = CpuHarness::new();

    // B8 34 12 = MOV AX, 0x1234; 90 = NOP
    harness.load_program(&[0xB8, 0x34, 0x12, 0x90], 0x1000);

    harness.step().unwrap();
    assert_eq!(harness.cpu.read_reg16(0), 0x1234, "AX should be 0x1234");

    harness.step().unwrap();

    let mov = harness
        .cfg
        .current()
        .get(addr(0))
        .expect("MOV should be current at 1000:0000");
    let nop = harness
        .cfg
        .current()
        .get(addr(3))
        .expect("NOP should be current at 1000:0003");

    // Sequential edge MOV -> NOP, with the back-edge mirrored
    assert_eq!(
        harness.cfg.arena().node(mov).successors.get(&addr(3)),
        Some(&nop),
        "MOV should have NOP as its successor"
    );
    assert!(
        harness.cfg.arena().node(nop).predecessors.contains_key(&mov),
        "NOP should have MOV as a predecessor"
    );

    // The second step executed the NOP
    assert_eq!(harness.cfg.context().last_executed(), Some(nop));
}

/// A tight loop forms a back-edge and reuses both nodes on the second
/// pass instead of re-parsing.
#[test]
fn test_loop_forms_back_edge() {
    let mut harness = CpuHarness::new();

    // 40 = INC AX; EB FD = JMP -3 (back to the INC)
    harness.load_program(&[0x40, 0xEB, 0xFD], 0x1000);

    harness.step_n(4).unwrap(); // two full loop iterations

    assert_eq!(harness.cpu.read_reg16(0), 2, "AX should count iterations");
    assert_eq!(
        harness.cfg.current().len(),
        2,
        "exactly INC and JMP should be cached"
    );

    let inc = harness.cfg.current().get(addr(0)).unwrap();
    let jmp = harness.cfg.current().get(addr(1)).unwrap();
    assert_eq!(
        harness.cfg.arena().node(inc).successors.get(&addr(1)),
        Some(&jmp)
    );
    assert_eq!(
        harness.cfg.arena().node(jmp).successors.get(&addr(0)),
        Some(&inc),
        "the loop should form a back-edge"
    );

    // The second pass went through the caches, not the parser
    assert_eq!(harness.cfg.previous().count_at(addr(0)), 1);
    assert_eq!(harness.cfg.previous().count_at(addr(1)), 1);
}

/// Writing a byte that is already there must not evict anything.
#[test]
fn test_silent_store_does_not_evict() {
    let mut harness = CpuHarness::new();

    harness.load_program(&[0xB8, 0x34, 0x12, 0x90], 0x1000);
    harness.step_n(2).unwrap();

    let nop_before = harness.cfg.current().get(addr(3)).unwrap();

    // External agent rewrites the NOP with the same byte
    harness.mem.write_u8(addr(3).linear(), 0x90);
    harness.cfg.drain_watchpoint_hits(&mut harness.mem);

    assert_eq!(
        harness.cfg.current().get(addr(3)),
        Some(nop_before),
        "silent store should leave the cached NOP untouched"
    );
    assert_eq!(harness.cfg.current().len(), 2);
}

/// Rewriting the opcode byte diverges the address: the stale graph
/// suggestion meets a freshly parsed instruction and a selector is
/// installed over both shapes.
#[test]
fn test_opcode_rewrite_installs_selector() {
    let mut harness = CpuHarness::new();

    // B8 34 12 = MOV AX, 0x1234; EB FB = JMP -5 (back to the MOV)
    harness.load_program(&[0xB8, 0x34, 0x12, 0xEB, 0xFB], 0x1000);

    harness.step_n(4).unwrap(); // MOV, JMP, MOV (cached), JMP
    let mov_ax = harness.cfg.current().get(addr(0)).unwrap();
    assert_eq!(harness.cpu.read_reg16(0), 0x1234);

    // Rewrite MOV AX,imm16 into MOV CX,imm16
    harness.mem.write_u8(addr(0).linear(), 0xB9);

    // The graph still suggests the evicted MOV AX; arbitration installs a
    // selector and executes the new shape
    harness.step().unwrap();
    assert_eq!(harness.cpu.read_reg16(1), 0x1234, "CX should be loaded now");

    let sel = harness
        .cfg
        .selector_at(addr(0))
        .expect("a selector should stand at the rewritten address");
    let mov_cx = harness.cfg.current().get(addr(0)).unwrap();
    assert_ne!(mov_cx, mov_ax, "the new shape is a distinct node");

    let candidates = &harness.cfg.arena().selector(sel).candidates;
    assert!(candidates.contains(&mov_ax), "old shape stays a candidate");
    assert!(candidates.contains(&mov_cx), "new shape joins the candidates");
    assert_eq!(
        harness.cfg.previous().count_at(addr(0)),
        2,
        "both shapes should be remembered"
    );

    // Loop once more: the graph now routes through the selector, which
    // picks MOV CX by signature match
    harness.cpu.regs[1] = 0; // clear CX
    harness.step_n(2).unwrap(); // JMP, then the selector resolves
    assert_eq!(harness.cpu.read_reg16(1), 0x1234);
    assert_eq!(
        harness.cfg.context().last_executed(),
        Some(mov_cx),
        "the selector should resolve to the matching candidate"
    );
}

/// Rewriting only the immediate folds the two shapes into one node whose
/// immediate is re-read from memory; no selector appears.
#[test]
fn test_immediate_rewrite_reduces_to_one() {
    let mut harness = CpuHarness::new();

    harness.load_program(&[0xB8, 0x34, 0x12, 0xEB, 0xFB], 0x1000);
    harness.step_n(4).unwrap();

    // Rewrite the low immediate byte: 0x1234 -> 0x1235
    harness.mem.write_u8(addr(0).linear() + 1, 0x35);
    harness.step().unwrap();

    assert_eq!(
        harness.cpu.read_reg16(0),
        0x1235,
        "the surviving node should read the rewritten immediate"
    );
    assert!(
        harness.cfg.selector_at(addr(0)).is_none(),
        "same-shape rewrite must not create a selector"
    );
    assert_eq!(
        harness.cfg.previous().count_at(addr(0)),
        1,
        "the two instances should fold into one"
    );

    let survivor = harness.cfg.current().get(addr(0)).unwrap();
    let inst = harness.cfg.arena().instruction(survivor);
    let imm = inst
        .fields
        .iter()
        .find(|f| !f.is_final)
        .expect("the immediate field");
    assert!(!imm.use_value, "the immediate should be demoted to re-read");
    assert!(inst.signature.is_wildcard(1));
    assert!(inst.signature.is_wildcard(2));

    // Rewrite the immediate again: no eviction (wildcard positions), the
    // same node picks up the new value from memory
    harness.mem.write_u8(addr(0).linear() + 1, 0x77);
    harness.step_n(2).unwrap(); // JMP, MOV
    assert_eq!(harness.cpu.read_reg16(0), 0x1277);
    assert_eq!(harness.cfg.current().get(addr(0)), Some(survivor));
}

/// Reverting bytes to a previously seen pattern revives the original
/// node, preserving identity.
#[test]
fn test_revert_reuses_original_instance() {
    let mut harness = CpuHarness::new();

    harness.load_program(&[0xB8, 0x34, 0x12, 0xEB, 0xFB], 0x1000);
    harness.step_n(4).unwrap();
    let original = harness.cfg.current().get(addr(0)).unwrap();

    // Diverge to MOV CX (selector installed), then revert to MOV AX
    harness.mem.write_u8(addr(0).linear(), 0xB9);
    harness.step_n(2).unwrap(); // MOV CX, JMP
    harness.mem.write_u8(addr(0).linear(), 0xB8);

    harness.step().unwrap(); // selector resolves at 1000:0000
    assert_eq!(
        harness.cfg.context().last_executed(),
        Some(original),
        "the revert should revive the original node, not a re-parse"
    );
    assert_eq!(harness.cfg.current().get(addr(0)), Some(original));
    assert_eq!(harness.cfg.previous().count_at(addr(0)), 2);
}

/// A stale suggestion whose address disagrees with the instruction
/// pointer is a fatal graph corruption.
#[test]
fn test_address_mismatch_is_fatal() {
    let mut harness = CpuHarness::new();

    // 40 = INC AX; 90 = NOP
    harness.load_program(&[0x40, 0x90, 0x90], 0x1000);
    harness.step().unwrap();
    let inc = harness.cfg.current().get(addr(0)).unwrap();
    harness.step().unwrap();
    let nop = harness.cfg.current().get(addr(1)).unwrap();

    // Evict the INC, then forge a context claiming the graph expects it
    // at an address the instruction pointer has moved past
    harness.mem.write_u8(addr(0).linear(), 0x41);
    harness.cfg.context_mut().record(nop, Some(inc));

    let err = harness.step().unwrap_err();
    assert!(
        matches!(err, CfgError::UnhandledCfgDiscrepancy { .. }),
        "expected a discrepancy error, got {err:?}"
    );
}

/// Past the per-address cap, the previous cache drops its oldest shape.
#[test]
fn test_previous_cache_cap_drops_oldest() {
    let mut harness = CpuHarness::new();
    harness.load_program(&[0x90], 0x1000);
    harness.cfg = CfgCpu::new().with_previous_cap(2);

    harness.step().unwrap();
    for opcode in [0x40u8, 0x41, 0x42] {
        harness.mem.write_u8(addr(0).linear(), opcode);
        harness.jump_to(0);
        harness.step().unwrap();
    }

    assert_eq!(
        harness.cfg.previous().count_at(addr(0)),
        2,
        "only the two newest shapes should be remembered"
    );
}

/// Past the candidate cap, a selector drops its oldest shape; the drop is
/// not fatal because the shape can always parse fresh again.
#[test]
fn test_selector_candidate_cap_drops_oldest() {
    let mut harness = CpuHarness::new();
    harness.load_program(&[0xB8, 0x34, 0x12, 0xEB, 0xFB], 0x1000);
    harness.cfg = CfgCpu::new().with_selector_cap(2);

    harness.step_n(4).unwrap();
    let mov_ax = harness.cfg.current().get(addr(0)).unwrap();

    // First divergence: MOV AX -> MOV CX, selector over both
    harness.mem.write_u8(addr(0).linear(), 0xB9);
    harness.step_n(2).unwrap(); // MOV CX, then JMP

    // Second divergence: the selector meets a third shape, MOV DX
    harness.mem.write_u8(addr(0).linear(), 0xBA);
    harness.step().unwrap();
    assert_eq!(harness.cpu.read_reg16(2), 0x1234, "DX loaded by the new shape");

    let sel = harness.cfg.selector_at(addr(0)).unwrap();
    let candidates = &harness.cfg.arena().selector(sel).candidates;
    assert_eq!(candidates.len(), 2, "the cap bounds the candidate set");
    assert!(
        !candidates.contains(&mov_ax),
        "the oldest candidate should be dropped"
    );
}

/// An operand-size-prefixed far call reads an m16:32 pointer: 4-byte
/// offset, then the segment.
#[test]
fn test_far_call_through_wide_pointer() {
    let mut harness = CpuHarness::new();

    // 66 FF 1E 00 03 = CALL FAR DWORD PTR [0x0300]
    harness.load_program(&[0x66, 0xFF, 0x1E, 0x00, 0x03], 0x1000);
    // Pointer at DS:0300 -> 2000:00000010, HLT at the target
    harness
        .mem
        .load(&[0x10, 0x00, 0x00, 0x00, 0x00, 0x20], 0x300);
    harness.mem.load(&[0xF4], 0x20010);

    harness.step().unwrap();
    assert_eq!(harness.cpu.segments[1], 0x2000, "CS should follow the pointer");
    assert_eq!(harness.cpu.ip, 0x0010, "IP comes from the 4-byte offset");

    // Return address pushed as two dwords: CS then the next offset
    assert_eq!(harness.mem.read_u32(0xFFFC), 0x1000);
    assert_eq!(harness.mem.read_u32(0xFFF8), 5);

    harness.step().unwrap();
    assert!(harness.cpu.halted, "the far target should execute");
}

/// The halted flag stops dispatch without touching the graph.
#[test]
fn test_hlt_stops_dispatch() {
    let mut harness = CpuHarness::new();

    harness.load_program(&[0x40, 0xF4, 0x40], 0x1000);
    harness.step_n(4).unwrap();

    assert!(harness.cpu.halted);
    assert_eq!(harness.cpu.read_reg16(0), 1, "only the first INC ran");
    assert_eq!(harness.cfg.current().len(), 2);
}
