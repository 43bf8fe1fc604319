mod common;

use common::{assemble, boot, read16, read32, set_widths, write16, write32};
use m65832::fields::Width;
use m65832::processor::{Status, StopReason, Trap, Watchpoint};
use pretty_assertions::assert_eq;

#[test]
fn width_selection_survives_emulation_mode() {
    // E=1 with M=32: a 32-bit immediate load and a 4-byte store.
    let code = assemble(".m32\n lda #$12345678\n sta B+$1234\n stp\n");
    let mut cpu = boot(&code);
    cpu.p.insert(Status::E);
    set_widths(&mut cpu, Width::W32, Width::W8);
    assert_eq!(cpu.run(1_000), StopReason::Stopped);
    assert_eq!(cpu.a, 0x1234_5678);
    assert_eq!(read32(&mut cpu, 0x1234), 0x1234_5678);
}

#[test]
fn eight_bit_loads_merge_into_the_accumulator() {
    let code = assemble(".m8\n lda #$42\n stp\n");
    let mut cpu = boot(&code);
    cpu.a = 0xAABB_CC00;
    assert_eq!(cpu.run(100), StopReason::Stopped);
    assert_eq!(cpu.a, 0xAABB_CC42);
    assert!(!cpu.p.contains(Status::Z));
}

#[test]
fn register_window_shadows_direct_page() {
    let code = assemble(".m8\n lda #$5a\n sta $10\n stp\n");
    let mut cpu = boot(&code);
    cpu.p.insert(Status::R);
    cpu.mem.raw_write8(0x10, 0xAA); // RAM sentinel
    assert_eq!(cpu.run(100), StopReason::Stopped);
    // The write landed in R4, not in RAM.
    assert_eq!(cpu.regfile[4] & 0xFF, 0x5A);
    assert_eq!(cpu.mem.raw_read8(0x10), 0xAA);

    // With the window off the sentinel is visible again.
    let code = assemble(".m8\n lda $10\n stp\n");
    let mut cpu2 = boot(&code);
    cpu2.mem.raw_write8(0x10, 0xAA);
    assert_eq!(cpu2.run(100), StopReason::Stopped);
    assert_eq!(cpu2.a & 0xFF, 0xAA);
}

#[test]
fn extended_alu_targets_registers() {
    let code = assemble(" ld.w r2, #$1234\n adc.w r2, #$1111\n st.w r2, B+$2000\n stp\n");
    let mut cpu = boot(&code);
    assert_eq!(cpu.run(100), StopReason::Stopped);
    assert_eq!(cpu.regfile[2] & 0xFFFF, 0x2345);
    assert_eq!(read16(&mut cpu, 0x2000), 0x2345);
}

#[test]
fn barrel_shifter_and_extends() {
    let code = assemble(" shl r0, r1, 4\n sext8 r2, r3\n stp\n");
    let mut cpu = boot(&code);
    set_widths(&mut cpu, Width::W32, Width::W8);
    cpu.p.insert(Status::R);
    cpu.regfile[1] = 0x11;
    cpu.regfile[3] = 0x80;
    assert_eq!(cpu.run(100), StopReason::Stopped);
    assert_eq!(cpu.regfile[0], 0x110);
    assert_eq!(cpu.regfile[2], 0xFFFF_FF80);
}

#[test]
fn accumulator_shift_takes_count_from_a_slot() {
    let code = assemble(" shl a, a, 8\n stp\n");
    let mut cpu = boot(&code);
    set_widths(&mut cpu, Width::W32, Width::W8);
    cpu.a = 0x12;
    assert_eq!(cpu.run(100), StopReason::Stopped);
    assert_eq!(cpu.a, 0x1200);
}

#[test]
fn multiply_places_the_high_half_in_t() {
    let code = assemble(".m16\n mul $40\n stp\n");
    let mut cpu = boot(&code);
    set_widths(&mut cpu, Width::W16, Width::W8);
    write16(&mut cpu, 0x40, 300);
    cpu.a = 100;
    assert_eq!(cpu.run(100), StopReason::Stopped);
    assert_eq!(cpu.a & 0xFFFF, 30000);
    assert_eq!(cpu.t, 0);

    // Negative product: the high half carries the sign bits.
    let code = assemble(".m16\n mul $40\n stp\n");
    let mut cpu = boot(&code);
    set_widths(&mut cpu, Width::W16, Width::W8);
    write16(&mut cpu, 0x40, (-2i16) as u16);
    cpu.a = 3;
    assert_eq!(cpu.run(100), StopReason::Stopped);
    assert_eq!(cpu.a & 0xFFFF, (-6i16) as u16 as u32);
    assert_eq!(cpu.t & 0xFFFF, 0xFFFF);
}

#[test]
fn divide_yields_quotient_and_remainder() {
    let code = assemble(".m16\n div $40\n stp\n");
    let mut cpu = boot(&code);
    set_widths(&mut cpu, Width::W16, Width::W8);
    write16(&mut cpu, 0x40, 7);
    cpu.a = 100;
    assert_eq!(cpu.run(100), StopReason::Stopped);
    assert_eq!(cpu.a & 0xFFFF, 14);
    assert_eq!(cpu.t, 2);
    assert!(!cpu.p.contains(Status::V));

    // Divide by zero saturates and flags V.
    let code = assemble(".m16\n div $42\n stp\n");
    let mut cpu = boot(&code);
    set_widths(&mut cpu, Width::W16, Width::W8);
    cpu.a = 100;
    assert_eq!(cpu.run(100), StopReason::Stopped);
    assert!(cpu.p.contains(Status::V));
    assert_eq!(cpu.t, 100);
}

#[test]
fn ldq_and_stq_move_64_bits_through_a_and_t() {
    let code = assemble(" ldq $40\n stq B+$2000\n stp\n");
    let mut cpu = boot(&code);
    write32(&mut cpu, 0x40, 0x1122_3344);
    write32(&mut cpu, 0x44, 0x5566_7788);
    assert_eq!(cpu.run(100), StopReason::Stopped);
    assert_eq!(cpu.a, 0x1122_3344);
    assert_eq!(cpu.t, 0x5566_7788);
    assert_eq!(read32(&mut cpu, 0x2000), 0x1122_3344);
    assert_eq!(read32(&mut cpu, 0x2004), 0x5566_7788);
}

#[test]
fn lea_computes_addresses_without_touching_memory() {
    let code = assemble(" lea $40\n stp\n");
    let mut cpu = boot(&code);
    cpu.d = 0x9000;
    assert_eq!(cpu.run(100), StopReason::Stopped);
    assert_eq!(cpu.a, 0x9040);
}

#[test]
fn setd_and_setb_load_the_base_registers() {
    let code = assemble(" setd #$00004000\n setb #$00010000\n tda\n tat\n tba\n stp\n");
    let mut cpu = boot(&code);
    assert_eq!(cpu.run(100), StopReason::Stopped);
    assert_eq!(cpu.d, 0x4000);
    assert_eq!(cpu.b, 0x0001_0000);
    // TDA went through A into T via TAT before TBA overwrote A.
    assert_eq!(cpu.t, 0x4000);
    assert_eq!(cpu.a, 0x0001_0000);
}

#[test]
fn wid_prefix_forces_32_bit_operands() {
    // $42 $A9: LDA #imm32 even in 8-bit mode.
    let code = [0x42, 0xA9, 0x78, 0x56, 0x34, 0x12, 0xDB];
    let mut cpu = boot(&code);
    assert_eq!(cpu.run(100), StopReason::Stopped);
    assert_eq!(cpu.a, 0x1234_5678);

    // $42 $8D: STA abs32.
    let code = [0x42, 0x8D, 0x00, 0x20, 0x00, 0x00, 0xDB];
    let mut cpu = boot(&code);
    cpu.a = 0xDEAD_BEEF;
    assert_eq!(cpu.run(100), StopReason::Stopped);
    assert_eq!(read32(&mut cpu, 0x2000), 0xDEAD_BEEF);
}

#[test]
fn wid_before_a_non_data_opcode_follows_compat() {
    // Strict (8-bit, K clear): illegal.
    let code = [0x42, 0x4C, 0x00, 0x00];
    let mut cpu = boot(&code);
    assert_eq!(cpu.run(100), StopReason::Trap(Trap::IllegalOp));

    // Compat (M=32): two-cycle NOP.
    let code = [0x42, 0x4C, 0xDB, 0x00];
    let mut cpu = boot(&code);
    set_widths(&mut cpu, Width::W32, Width::W8);
    assert_eq!(cpu.run(100), StopReason::Stopped);
}

#[test]
fn unknown_extended_opcodes_follow_compat() {
    let code = [0x02, 0x77, 0xDB];
    let mut cpu = boot(&code);
    assert_eq!(cpu.run(100), StopReason::Trap(Trap::IllegalOp));

    let mut cpu = boot(&code);
    set_widths(&mut cpu, Width::W32, Width::W8);
    assert_eq!(cpu.run(100), StopReason::Stopped);

    // P.K alone also selects compat.
    let mut cpu = boot(&code);
    cpu.p.insert(Status::K);
    assert_eq!(cpu.run(100), StopReason::Stopped);
}

#[test]
fn reserved_primary_opcodes_trap_in_strict_mode() {
    for opcode in [0x8Bu8, 0xAF, 0xFF] {
        let code = [opcode, 0xDB];
        let mut cpu = boot(&code);
        assert_eq!(cpu.run(100), StopReason::Trap(Trap::IllegalOp), "opcode {:02x}", opcode);
    }
}

#[test]
fn block_move_copies_and_counts_down() {
    let code = assemble(" mvn $00,$00\n stp\n");
    let mut cpu = boot(&code);
    cpu.x = 0x2000;
    cpu.y = 0x3000;
    cpu.a = 2; // moves A+1 = 3 bytes
    for (j, byte) in [0x11u8, 0x22, 0x33].iter().enumerate() {
        cpu.mem.raw_write8(0x2000 + j as u32, *byte);
    }
    assert_eq!(cpu.run(1_000), StopReason::Stopped);
    assert_eq!(cpu.mem.raw_read8(0x3000), 0x11);
    assert_eq!(cpu.mem.raw_read8(0x3001), 0x22);
    assert_eq!(cpu.mem.raw_read8(0x3002), 0x33);
    assert_eq!(cpu.a, 0xFFFF_FFFF);
    assert_eq!(cpu.x, 0x2003);
    assert_eq!(cpu.y, 0x3003);
}

#[test]
fn decimal_mode_addition() {
    let code = assemble(".m8\n sed\n clc\n lda #$15\n adc #$27\n stp\n");
    let mut cpu = boot(&code);
    assert_eq!(cpu.run(100), StopReason::Stopped);
    assert_eq!(cpu.a & 0xFF, 0x42);
}

#[test]
fn jsr_rts_round_trip() {
    let source = ".m8\n.org $1000\n jsr sub\n lda #$01\n stp\nsub: lda #$02\n rts\n";
    let code = assemble(source);
    let mut cpu = boot(&code);
    assert_eq!(cpu.run(1_000), StopReason::Stopped);
    // Subroutine ran first, then the fall-through path.
    assert_eq!(cpu.a & 0xFF, 0x01);
    assert_eq!(cpu.s, 0x01FF);
}

#[test]
fn branch_taken_in_32_bit_mode_uses_16_bit_displacement() {
    let source = ".m32\n lda #$00000000\n beq skip\n lda #$000000ff\nskip: stp\n";
    let code = assemble(source);
    let mut cpu = boot(&code);
    set_widths(&mut cpu, Width::W32, Width::W8);
    assert_eq!(cpu.run(100), StopReason::Stopped);
    assert_eq!(cpu.a, 0);
}

#[test]
fn fpu_moves_round_trip_through_memory() {
    let code = assemble(" ldf f1, $40\n mvf f2, f1\n stf f2, B+$2000\n stp\n");
    let mut cpu = boot(&code);
    let bits = 2.5f64.to_bits();
    write32(&mut cpu, 0x40, bits as u32);
    write32(&mut cpu, 0x44, (bits >> 32) as u32);
    assert_eq!(cpu.run(100), StopReason::Stopped);
    assert_eq!(cpu.fregs[1], 2.5);
    assert_eq!(cpu.fregs[2], 2.5);
    assert_eq!(read32(&mut cpu, 0x2000), bits as u32);
    assert_eq!(read32(&mut cpu, 0x2004), (bits >> 32) as u32);
}

#[test]
fn taf_and_tfa_convert() {
    let code = assemble(" taf f0\n lda #$00\n tfa f0\n stp\n");
    let mut cpu = boot(&code);
    set_widths(&mut cpu, Width::W32, Width::W8);
    cpu.a = 41;
    assert_eq!(cpu.run(100), StopReason::Stopped);
    assert_eq!(cpu.fregs[0], 41.0);
    assert_eq!(cpu.a, 41);
}

#[test]
fn cycles_accumulate_per_instruction() {
    let code = assemble(".m8\n nop\n nop\n stp\n");
    let mut cpu = boot(&code);
    assert_eq!(cpu.run(1_000), StopReason::Stopped);
    // Two NOPs at 2 cycles plus STP at 3.
    assert_eq!(cpu.cycles, 7);
}

#[test]
fn watchpoints_record_but_the_access_completes() {
    let code = assemble(".m8\n lda #$5a\n sta $2040\n stp\n");
    let mut cpu = boot(&code);
    cpu.watchpoints.push(Watchpoint { base: 0x2040, len: 1, on_read: false, on_write: true });
    assert_eq!(cpu.run(100), StopReason::Trap(Trap::Watchpoint));
    assert_eq!(cpu.mem.raw_read8(0x2040), 0x5A);
}
