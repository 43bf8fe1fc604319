mod common;

use common::{assemble, boot, read16, read32, write32};
use m65832::processor::{
    Status, StopReason, Trap, VEC_ABORT, VEC_BRK, VEC_IRQ, VEC_NMI, VEC_SYSCALL,
};
use pretty_assertions::assert_eq;

#[test]
fn brk_pushes_next_pc_and_full_p() {
    let code = assemble(".m8\n brk\n nop\n");
    let mut cpu = boot(&code);
    write32(&mut cpu, VEC_BRK, 0x4000);
    cpu.p = Status::S | Status::C | Status::N;
    let p_before = cpu.p.bits();

    assert_eq!(cpu.step(), None);
    assert_eq!(cpu.trap, Trap::Brk);
    assert_eq!(cpu.pc, 0x4000);
    assert!(cpu.p.contains(Status::I) && cpu.p.contains(Status::S));
    assert!(!cpu.p.contains(Status::D));
    // Stack: 16-bit P on top, then the 32-bit address after the opcode.
    assert_eq!(cpu.s, 0x01FF - 6);
    let sp = cpu.s;
    assert_eq!(read16(&mut cpu, sp + 1), p_before);
    assert_eq!(read32(&mut cpu, sp + 3), common::CODE_BASE + 1);
}

#[test]
fn rti_restores_p_and_pc_exactly() {
    // For a spread of P values, BRK then RTI must be the identity.
    let patterns = [
        Status::S,
        Status::S | Status::C | Status::Z | Status::V | Status::N,
        Status::S | Status::M1, // 32-bit accumulator
        Status::S | Status::M0 | Status::X0 | Status::K,
        Status::S | Status::D,
    ];
    for pattern in patterns {
        let code = assemble(".m8\n brk\n nop\n");
        let mut cpu = boot(&code);
        write32(&mut cpu, VEC_BRK, 0x4000);
        cpu.mem.raw_write8(0x4000, 0x40); // RTI
        cpu.p = pattern;
        assert_eq!(cpu.step(), None, "BRK");
        assert_eq!(cpu.step(), None, "RTI");
        assert_eq!(cpu.p, pattern, "P must round-trip through the stack");
        assert_eq!(cpu.pc, common::CODE_BASE + 1);
        assert_eq!(cpu.s, 0x01FF);
    }
}

#[test]
fn abort_beats_nmi_beats_irq() {
    let code = assemble(".m8\n nop\n nop\n nop\n nop\n stp\n");
    let mut cpu = boot(&code);
    write32(&mut cpu, VEC_ABORT, 0x4000);
    write32(&mut cpu, VEC_NMI, 0x5000);
    write32(&mut cpu, VEC_IRQ, 0x6000);
    cpu.p.remove(Status::I);
    cpu.abort_pending = true;
    cpu.nmi_pending = true;
    cpu.irq_pending = true;

    assert_eq!(cpu.step(), None);
    assert_eq!((cpu.pc, cpu.trap), (0x4000, Trap::Abort));
    // ABORT and NMI are edge-style and were consumed in order.
    assert_eq!(cpu.step(), None);
    assert_eq!((cpu.pc, cpu.trap), (0x5000, Trap::Nmi));
    // IRQ is level-sensitive but now masked by the entry sequences.
    cpu.p.remove(Status::I);
    assert_eq!(cpu.step(), None);
    assert_eq!((cpu.pc, cpu.trap), (0x6000, Trap::Irq));
}

#[test]
fn masked_irq_is_held_off() {
    let code = assemble(".m8\n nop\n stp\n");
    let mut cpu = boot(&code);
    cpu.p.insert(Status::I);
    cpu.irq_pending = true;
    assert_eq!(cpu.run(1_000), StopReason::Stopped);
    assert_eq!(cpu.trap, Trap::None);
}

#[test]
fn trap_vectors_through_the_syscall_table() {
    let code = assemble(" trap #$03\n");
    let mut cpu = boot(&code);
    write32(&mut cpu, VEC_SYSCALL + 4 * 3, 0x4000);
    cpu.mem.raw_write8(0x4000, 0xDB); // STP
    assert_eq!(cpu.run(1_000), StopReason::Stopped);
    // The handler ran: STP sits at the vector target.
    assert_eq!(cpu.pc, 0x4001);
}

#[test]
fn timer_raises_a_level_irq() {
    let code = assemble(".m8\nloop: nop\n bra loop\n");
    let mut cpu = boot(&code);
    write32(&mut cpu, VEC_IRQ, 0x4000);
    cpu.mem.raw_write8(0x4000, 0xDB); // handler: STP
    cpu.p.remove(Status::I);
    cpu.timer.ctrl = 3; // enable + irq enable
    cpu.timer.cmp = 16;
    assert_eq!(cpu.run(10_000), StopReason::Stopped);
    assert!(cpu.timer.cnt >= 16);
}

#[test]
fn wai_parks_until_a_line_asserts() {
    let code = assemble(".m8\n wai\n lda #$01\n stp\n");
    let mut cpu = boot(&code);
    cpu.p.insert(Status::I);
    assert_eq!(cpu.run(50), StopReason::CycleBudget);
    assert!(cpu.waiting);
    // A masked IRQ wakes the core without vectoring.
    cpu.irq_pending = true;
    assert_eq!(cpu.run(1_000), StopReason::Stopped);
    assert_eq!(cpu.a & 0xFF, 0x01);
    assert_eq!(cpu.trap, Trap::None);
}

#[test]
fn stp_is_privileged() {
    let code = assemble(".m8\n stp\n");
    let mut cpu = boot(&code);
    cpu.p = Status::empty(); // user mode
    assert_eq!(cpu.run(100), StopReason::Trap(Trap::Privilege));
    assert!(!cpu.stopped);
}

#[test]
fn user_sep_of_the_s_bit_traps() {
    let code = assemble(".m8\n sep #$0800\n");
    let mut cpu = boot(&code);
    cpu.p = Status::empty();
    assert_eq!(cpu.run(100), StopReason::Trap(Trap::Privilege));
    assert!(!cpu.p.contains(Status::S));
}

#[test]
fn user_rep_of_the_s_bit_is_masked() {
    let code = assemble(".m8\n rep #$0802\n nop\n");
    let mut cpu = boot(&code);
    cpu.p = Status::Z; // user mode with Z set
    assert_eq!(cpu.step_n(1), StopReason::StepBudget);
    // Z was cleared, the S request was dropped silently.
    assert!(!cpu.p.contains(Status::Z));
    assert!(!cpu.p.contains(Status::S));
    assert_eq!(cpu.trap, Trap::None);
}

#[test]
fn supervisor_sep_controls_widths_even_in_emulation() {
    // SEP #$0080 sets M1: 32-bit accumulator while E=1.
    let code = assemble(".m8\n sep #$0080\n");
    let mut cpu = boot(&code);
    cpu.p.insert(Status::E);
    assert_eq!(cpu.step_n(1), StopReason::StepBudget);
    assert!(cpu.p.contains(Status::M1));
    assert_eq!(cpu.m_width(), m65832::fields::Width::W32);
    assert!(cpu.p.contains(Status::E));
}

#[test]
fn emulation_mode_clamps_the_stack_page() {
    let code = assemble(".m8\n pha\n pha\n stp\n");
    let mut cpu = boot(&code);
    cpu.p.insert(Status::E);
    cpu.s = 0x0100; // next push wraps within page 1
    assert_eq!(cpu.run(100), StopReason::Stopped);
    assert_eq!(cpu.s & 0xFFFF_FF00, 0x0100);
}

#[test]
fn exception_entry_pushes_32_bit_pc_even_in_emulation() {
    let code = assemble(".m8\n brk\n");
    let mut cpu = boot(&code);
    cpu.p.insert(Status::E);
    // Emulation BRK vectors through $FFFE.
    cpu.mem.raw_write8(0xFFFE, 0x00);
    cpu.mem.raw_write8(0xFFFF, 0x40);
    assert_eq!(cpu.step(), None);
    assert_eq!(cpu.pc, 0x4000);
    // Six bytes pushed despite E=1.
    assert_eq!(cpu.s, 0x01FF - 6);
}
